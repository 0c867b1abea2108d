use serde::{Deserialize, Serialize};

use crate::types::Variant;

pub const ABSOLUTE_MINIMUM_SETPOINT_C: f64 = 18.0;
pub const ABSOLUTE_MAXIMUM_SETPOINT_C: f64 = 32.0;
pub const MINIMUM_SETPOINT_RANGE_C: f64 = 10.0;
pub const MAX_HYSTERESIS_C: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactoryResetPolicy {
    #[default]
    Full,
    DisplayOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatConfig {
    pub variant: Variant,
    pub minimum_setpoint_c: f64,
    pub maximum_setpoint_c: f64,
    pub default_setpoint_c: f64,
    pub default_setpoint_low_c: f64,
    pub default_setpoint_high_c: f64,
    pub hysteresis_c: f64,
    pub state_change_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub sensor_stale_timeout_ms: u64,
    pub state_publish_interval_ms: u64,
    pub factory_reset: FactoryResetPolicy,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            variant: Variant::Heating,
            minimum_setpoint_c: 18.0,
            maximum_setpoint_c: 32.0,
            default_setpoint_c: 22.0,
            default_setpoint_low_c: 20.0,
            default_setpoint_high_c: 24.0,
            hysteresis_c: 1.0,
            state_change_delay_ms: 30_000,
            poll_interval_ms: 1_000,
            sensor_stale_timeout_ms: 300_000,
            state_publish_interval_ms: 10_000,
            factory_reset: FactoryResetPolicy::Full,
        }
    }
}

impl ThermostatConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        self.hysteresis_c = if self.hysteresis_c.is_finite() {
            self.hysteresis_c.clamp(0.0, MAX_HYSTERESIS_C)
        } else {
            defaults.hysteresis_c
        };

        let bounds = self.bounds();
        self.minimum_setpoint_c = bounds.min;
        self.maximum_setpoint_c = bounds.max;

        self.default_setpoint_c =
            bounds.clamp_or(self.default_setpoint_c, defaults.default_setpoint_c);
        self.default_setpoint_low_c =
            bounds.clamp_or(self.default_setpoint_low_c, defaults.default_setpoint_low_c);
        self.default_setpoint_high_c =
            bounds.clamp_or(self.default_setpoint_high_c, defaults.default_setpoint_high_c);
        if self.default_setpoint_high_c - self.default_setpoint_low_c < self.min_band_width() {
            self.default_setpoint_low_c = bounds.min;
            self.default_setpoint_high_c = bounds.max;
        }

        self.state_change_delay_ms = self.state_change_delay_ms.min(3_600_000);
        self.poll_interval_ms = self.poll_interval_ms.clamp(100, 60_000);
        self.sensor_stale_timeout_ms = self.sensor_stale_timeout_ms.max(self.poll_interval_ms);
        self.state_publish_interval_ms = self.state_publish_interval_ms.clamp(1_000, 3_600_000);
    }

    pub fn bounds(&self) -> SetpointBounds {
        SetpointBounds::resolve(self.minimum_setpoint_c, self.maximum_setpoint_c)
    }

    pub fn min_band_width(&self) -> f64 {
        2.0 * self.hysteresis_c
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SetpointBounds {
    pub min: f64,
    pub max: f64,
}

impl SetpointBounds {
    /// Guarantees `ABSOLUTE_MIN <= min`, `min + MIN_RANGE <= max <= ABSOLUTE_MAX`
    /// for any input, inverted or non-finite included.
    pub fn resolve(configured_min: f64, configured_max: f64) -> Self {
        let mut min = if configured_min.is_nan() {
            ABSOLUTE_MINIMUM_SETPOINT_C
        } else {
            configured_min
        };
        let mut max = if configured_max.is_nan() {
            ABSOLUTE_MAXIMUM_SETPOINT_C
        } else {
            configured_max
        };

        min = min.max(ABSOLUTE_MINIMUM_SETPOINT_C);
        // A min closer than MIN_RANGE to the ceiling would force max past it.
        min = min.min(ABSOLUTE_MAXIMUM_SETPOINT_C - MINIMUM_SETPOINT_RANGE_C);
        if max < min + MINIMUM_SETPOINT_RANGE_C {
            max = min + MINIMUM_SETPOINT_RANGE_C;
        }
        max = max.min(ABSOLUTE_MAXIMUM_SETPOINT_C);

        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }

    fn clamp_or(&self, value: f64, fallback: f64) -> f64 {
        let value = if value.is_finite() { value } else { fallback };
        value.clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub http_port: u16,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub thermostat: ThermostatConfig,
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.thermostat.sanitize();
        if self.network.http_port == 0 {
            self.network.http_port = NetworkConfig::default().http_port;
        }
        if self.network.mqtt_port == 0 {
            self.network.mqtt_port = NetworkConfig::default().mqtt_port;
        }
    }
}
