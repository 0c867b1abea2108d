pub mod config;
pub mod error;
pub mod medium;
pub mod sensor;
pub mod storage;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use config::{
    FactoryResetPolicy, NetworkConfig, RuntimeConfig, SetpointBounds, ThermostatConfig,
};
pub use error::{ControlError, Rejection, StorageError};
pub use medium::{FileMedium, MemoryMedium};
pub use sensor::{Reading, SensorInputs};
pub use storage::{Medium, SettingsStore, REGION_SIZE};
pub use thermostat::{Evaluation, Outcome, SetpointEdge, ThermostatEngine};
pub use topics::*;
pub use types::{
    ControllerStatePayload, ControllerStatus, DisplayUnit, ThermostatMode, ThermostatState, Variant,
};
