use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Rejection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    #[default]
    Heating,
    Manual,
    HeatCool,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heating => "heating",
            Self::Manual => "manual",
            Self::HeatCool => "heat-cool",
        }
    }

    pub fn modes(self) -> &'static [ThermostatMode] {
        match self {
            Self::Heating => &[
                ThermostatMode::Off,
                ThermostatMode::Heat,
                ThermostatMode::Automatic,
            ],
            Self::Manual => &[ThermostatMode::Manual, ThermostatMode::Automatic],
            Self::HeatCool => &[
                ThermostatMode::Off,
                ThermostatMode::Heat,
                ThermostatMode::Cool,
                ThermostatMode::Automatic,
                ThermostatMode::FanOnly,
            ],
        }
    }

    pub fn states(self) -> &'static [ThermostatState] {
        match self {
            Self::Heating | Self::Manual => &[ThermostatState::Idle, ThermostatState::Heating],
            Self::HeatCool => &[
                ThermostatState::Idle,
                ThermostatState::Heating,
                ThermostatState::Cooling,
                ThermostatState::Fan,
            ],
        }
    }

    pub fn supports_mode(self, mode: ThermostatMode) -> bool {
        self.modes().contains(&mode)
    }

    pub fn supports_state(self, state: ThermostatState) -> bool {
        self.states().contains(&state)
    }

    pub fn is_dual_setpoint(self) -> bool {
        matches!(self, Self::HeatCool)
    }

    pub fn default_mode(self) -> ThermostatMode {
        match self {
            Self::Heating | Self::HeatCool => ThermostatMode::Off,
            Self::Manual => ThermostatMode::Automatic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThermostatMode {
    Off,
    Heat,
    Cool,
    #[serde(rename = "auto", alias = "automatic")]
    Automatic,
    Manual,
    FanOnly,
}

impl ThermostatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::Automatic => "auto",
            Self::Manual => "manual",
            Self::FanOnly => "fan-only",
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Heat => 1,
            Self::Cool => 2,
            Self::Automatic => 3,
            Self::Manual => 4,
            Self::FanOnly => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Off),
            1 => Some(Self::Heat),
            2 => Some(Self::Cool),
            3 => Some(Self::Automatic),
            4 => Some(Self::Manual),
            6 => Some(Self::FanOnly),
            _ => None,
        }
    }

    pub fn pinned_state(self) -> Option<ThermostatState> {
        match self {
            Self::Off => Some(ThermostatState::Idle),
            Self::Heat => Some(ThermostatState::Heating),
            Self::Cool => Some(ThermostatState::Cooling),
            Self::FanOnly => Some(ThermostatState::Fan),
            Self::Automatic | Self::Manual => None,
        }
    }
}

impl std::fmt::Display for ThermostatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ThermostatMode {
    type Err = ControlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "heat" => Ok(Self::Heat),
            "cool" => Ok(Self::Cool),
            "auto" | "automatic" => Ok(Self::Automatic),
            "manual" => Ok(Self::Manual),
            "fan-only" | "fan_only" => Ok(Self::FanOnly),
            _ => Err(Rejection::UnknownToken(value.to_string()).into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThermostatState {
    Idle,
    Heating,
    Cooling,
    Fan,
}

impl ThermostatState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Heating => "heating",
            Self::Cooling => "cooling",
            Self::Fan => "fan",
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Heating => 1,
            Self::Cooling => 2,
            Self::Fan => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Idle),
            1 => Some(Self::Heating),
            2 => Some(Self::Cooling),
            3 => Some(Self::Fan),
            _ => None,
        }
    }
}

impl std::fmt::Display for ThermostatState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ThermostatState {
    type Err = ControlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "heating" => Ok(Self::Heating),
            "cooling" => Ok(Self::Cooling),
            "fan" => Ok(Self::Fan),
            _ => Err(Rejection::UnknownToken(value.to_string()).into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayUnit {
    #[default]
    Metric,
    Imperial,
}

impl DisplayUnit {
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some(units) if units.eq_ignore_ascii_case("imperial") => Self::Imperial,
            _ => Self::Metric,
        }
    }

    pub fn present(self, celsius: f64) -> f64 {
        match self {
            Self::Metric => celsius,
            Self::Imperial => crate::sensor::celsius_to_fahrenheit(celsius),
        }
    }

    pub fn to_celsius(self, value: f64) -> f64 {
        match self {
            Self::Metric => value,
            Self::Imperial => crate::sensor::fahrenheit_to_celsius(value),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Labeled {
    pub description: &'static str,
    pub value: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct Environment {
    pub temperature: f64,
    pub humidity: f64,
    #[serde(rename = "remoteTemperature")]
    pub remote_temperature: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub variant: &'static str,
    pub units: DisplayUnit,
    pub environment: Environment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setpoint: Option<f64>,
    #[serde(rename = "setpointLow", skip_serializing_if = "Option::is_none")]
    pub setpoint_low: Option<f64>,
    #[serde(rename = "setpointHigh", skip_serializing_if = "Option::is_none")]
    pub setpoint_high: Option<f64>,
    pub hysteresis: f64,
    pub mode: Labeled,
    pub state: Labeled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatePayload {
    pub temp: f64,
    pub mode: &'static str,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setpoint: Option<f64>,
    #[serde(rename = "setpointLow", skip_serializing_if = "Option::is_none")]
    pub setpoint_low: Option<f64>,
    #[serde(rename = "setpointHigh", skip_serializing_if = "Option::is_none")]
    pub setpoint_high: Option<f64>,
}
