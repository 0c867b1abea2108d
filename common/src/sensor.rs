use crate::error::ControlError;

pub const MIN_VALID_TEMP_C: f64 = -40.0;
pub const MAX_VALID_TEMP_C: f64 = 85.0;

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    (celsius * 9.0 / 5.0) + 32.0
}

pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

pub fn validate_sample(value_c: f64) -> Result<f64, ControlError> {
    if value_c.is_finite() && (MIN_VALID_TEMP_C..=MAX_VALID_TEMP_C).contains(&value_c) {
        Ok(value_c)
    } else {
        Err(ControlError::InvalidSample(value_c))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reading {
    value_c: f64,
    received_ms: Option<u64>,
}

impl Reading {
    pub fn update(&mut self, value_c: f64, now_ms: u64) {
        self.value_c = value_c;
        self.received_ms = Some(now_ms);
    }

    pub fn clear(&mut self) {
        self.received_ms = None;
    }

    pub fn is_fresh(&self, now_ms: u64, stale_timeout_ms: u64) -> bool {
        self.received_ms
            .map(|last| now_ms.saturating_sub(last) < stale_timeout_ms)
            .unwrap_or(false)
    }

    pub fn value(&self, now_ms: u64, stale_timeout_ms: u64) -> f64 {
        if self.is_fresh(now_ms, stale_timeout_ms) {
            self.value_c
        } else {
            f64::NAN
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SensorInputs {
    pub local: Reading,
    pub remote: Reading,
    pub humidity: f64,
    stale_timeout_ms: u64,
}

impl SensorInputs {
    pub fn new(stale_timeout_ms: u64) -> Self {
        Self {
            local: Reading::default(),
            remote: Reading::default(),
            humidity: f64::NAN,
            stale_timeout_ms,
        }
    }

    pub fn stale_timeout_ms(&self) -> u64 {
        self.stale_timeout_ms
    }

    pub fn set_remote(&mut self, value_c: f64, now_ms: u64) -> Result<(), ControlError> {
        if value_c.is_nan() {
            self.remote.clear();
            return Ok(());
        }
        self.remote.update(validate_sample(value_c)?, now_ms);
        Ok(())
    }

    pub fn sample(&self, now_ms: u64, use_remote: bool) -> f64 {
        if use_remote {
            let remote = self.remote.value(now_ms, self.stale_timeout_ms);
            if !remote.is_nan() {
                return remote;
            }
        }
        // NaN when neither source is usable.
        self.local.value(now_ms, self.stale_timeout_ms)
    }
}
