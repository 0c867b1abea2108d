use thiserror::Error;

use crate::types::{ThermostatMode, ThermostatState, Variant};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("setpoint {value} outside [{min}, {max}]")]
    SetpointOutOfRange { value: f64, min: f64, max: f64 },
    #[error("band {low}..{high} narrower than {min_width}")]
    BandTooNarrow { low: f64, high: f64, min_width: f64 },
    #[error("{variant} thermostat has no single setpoint")]
    SingleSetpointUnsupported { variant: &'static str },
    #[error("{variant} thermostat has no setpoint band")]
    SetpointBandUnsupported { variant: &'static str },
    #[error("mode {mode} not supported by {variant} thermostat")]
    UnsupportedMode {
        mode: ThermostatMode,
        variant: &'static str,
    },
    #[error("state {state} not supported by {variant} thermostat")]
    UnsupportedState {
        state: ThermostatState,
        variant: &'static str,
    },
    #[error("unknown value '{0}'")]
    UnknownToken(String),
}

impl Rejection {
    pub(crate) fn unsupported_mode(mode: ThermostatMode, variant: Variant) -> Self {
        Self::UnsupportedMode {
            mode,
            variant: variant.as_str(),
        }
    }

    pub(crate) fn unsupported_state(state: ThermostatState, variant: Variant) -> Self {
        Self::UnsupportedState {
            state,
            variant: variant.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The medium could not be brought up. Fatal: the controller must not run
    /// on unknown persisted state.
    #[error("failed to initialise settings medium: {0}")]
    Init(String),
    #[error("read of {len} bytes at offset {offset} failed: {reason}")]
    Read {
        offset: usize,
        len: usize,
        reason: String,
    },
    #[error("write of {len} bytes at offset {offset} failed: {reason}")]
    Write {
        offset: usize,
        len: usize,
        reason: String,
    },
    #[error("{len} bytes at offset {offset} exceed the {capacity} byte region")]
    OutOfRange {
        offset: usize,
        len: usize,
        capacity: usize,
    },
}

impl StorageError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Init(_))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("rejected configuration: {0}")]
    Rejected(#[from] Rejection),
    #[error("invalid temperature sample {0}")]
    InvalidSample(f64),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
