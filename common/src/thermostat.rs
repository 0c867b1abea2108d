use tracing::{debug, info, warn};

use crate::{
    config::{FactoryResetPolicy, SetpointBounds, ThermostatConfig},
    error::{ControlError, Rejection, StorageError},
    storage::{layout, Field, FieldValue, Medium, SettingsStore},
    types::{
        ControllerStatePayload, ControllerStatus, DisplayUnit, Environment, Labeled,
        ThermostatMode, ThermostatState, Variant,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    InvalidSample,
    Pinned,
    Manual,
    RateLimited,
    DeadBand,
    Transitioned,
    Held,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub state: ThermostatState,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetpointEdge {
    Single,
    Low,
    High,
}

pub struct ThermostatEngine<M> {
    config: ThermostatConfig,
    bounds: SetpointBounds,
    store: SettingsStore<M>,
    last_evaluation_ms: Option<u64>,
}

impl<M: Medium> ThermostatEngine<M> {
    pub fn new(
        mut config: ThermostatConfig,
        store: SettingsStore<M>,
    ) -> Result<Self, StorageError> {
        config.sanitize();
        let bounds = config.bounds();
        let mut engine = Self {
            config,
            bounds,
            store,
            last_evaluation_ms: None,
        };
        engine.restore()?;
        Ok(engine)
    }

    pub fn config(&self) -> &ThermostatConfig {
        &self.config
    }

    pub fn variant(&self) -> Variant {
        self.config.variant
    }

    pub fn bounds(&self) -> SetpointBounds {
        self.bounds
    }

    pub fn hysteresis(&self) -> f64 {
        self.config.hysteresis_c
    }

    pub fn store(&self) -> &SettingsStore<M> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SettingsStore<M> {
        &mut self.store
    }

    pub fn mode(&self) -> ThermostatMode {
        ThermostatMode::from_code(self.store.get(layout::MODE))
            .unwrap_or_else(|| self.variant().default_mode())
    }

    pub fn mode_str(&self) -> &'static str {
        self.mode().as_str()
    }

    pub fn state(&self) -> ThermostatState {
        ThermostatState::from_code(self.store.get(layout::STATE)).unwrap_or(ThermostatState::Idle)
    }

    pub fn state_str(&self) -> &'static str {
        self.state().as_str()
    }

    pub fn setpoint(&self) -> f64 {
        self.store.get(layout::SETPOINT)
    }

    pub fn setpoint_low(&self) -> f64 {
        self.store.get(layout::SETPOINT)
    }

    pub fn setpoint_high(&self) -> f64 {
        self.store.get(layout::SETPOINT_HIGH)
    }

    pub fn screen_imperial(&self) -> bool {
        self.store.get(layout::SCREEN_IMPERIAL)
    }

    pub fn display_unit(&self) -> DisplayUnit {
        if self.screen_imperial() {
            DisplayUnit::Imperial
        } else {
            DisplayUnit::Metric
        }
    }

    pub fn use_remote_temperature(&self) -> bool {
        self.store.get(layout::REMOTE_TEMPERATURE)
    }

    pub fn set_mode(&mut self, mode: ThermostatMode) -> Result<bool, ControlError> {
        if !self.variant().supports_mode(mode) {
            return Err(Rejection::unsupported_mode(mode, self.variant()).into());
        }
        Ok(self.store.set(layout::MODE, mode.code())?)
    }

    pub fn set_setpoint(&mut self, setpoint_c: f64) -> Result<bool, ControlError> {
        let field = self.validate_setpoint(SetpointEdge::Single, setpoint_c)?;
        Ok(self.store.set(field, setpoint_c)?)
    }

    pub fn set_setpoint_low(&mut self, low_c: f64) -> Result<bool, ControlError> {
        let field = self.validate_setpoint(SetpointEdge::Low, low_c)?;
        Ok(self.store.set(field, low_c)?)
    }

    pub fn set_setpoint_high(&mut self, high_c: f64) -> Result<bool, ControlError> {
        let field = self.validate_setpoint(SetpointEdge::High, high_c)?;
        Ok(self.store.set(field, high_c)?)
    }

    pub fn set_setpoint_band(&mut self, low_c: f64, high_c: f64) -> Result<bool, ControlError> {
        self.check_band(low_c, high_c)?;
        let low = (layout::SETPOINT, low_c);
        let high = (layout::SETPOINT_HIGH, high_c);

        // The stored band must stay ordered between the two writes.
        let changed = if high_c > self.setpoint_high() {
            self.set_both(high, low)?
        } else {
            self.set_both(low, high)?
        };
        Ok(changed)
    }

    pub fn set_setpoint_and_resume(
        &mut self,
        edge: SetpointEdge,
        value_c: f64,
    ) -> Result<bool, ControlError> {
        let field = self.validate_setpoint(edge, value_c)?;
        let automatic = ThermostatMode::Automatic;
        if !self.variant().supports_mode(automatic) {
            return Err(Rejection::unsupported_mode(automatic, self.variant()).into());
        }
        Ok(self.set_both((field, value_c), (layout::MODE, automatic.code()))?)
    }

    pub fn set_state(&mut self, state: ThermostatState) -> Result<bool, ControlError> {
        if !self.variant().supports_state(state) {
            return Err(Rejection::unsupported_state(state, self.variant()).into());
        }

        let target = (layout::STATE, state.code());
        if self.variant() == Variant::Manual {
            let manual = (layout::MODE, ThermostatMode::Manual.code());
            Ok(self.set_both(manual, target)?)
        } else {
            Ok(self.store.set(target.0, target.1)?)
        }
    }

    pub fn set_screen_imperial(&mut self, imperial: bool) -> Result<bool, ControlError> {
        Ok(self.store.set(layout::SCREEN_IMPERIAL, imperial)?)
    }

    pub fn set_use_remote_temperature(&mut self, remote: bool) -> Result<bool, ControlError> {
        Ok(self.store.set(layout::REMOTE_TEMPERATURE, remote)?)
    }

    /// Automatic mode is evaluated at most once per `state_change_delay_ms`;
    /// the window restarts on every evaluation that passes it.
    pub fn evaluate(
        &mut self,
        temperature_c: f64,
        now_ms: u64,
    ) -> Result<Evaluation, ControlError> {
        let current = self.state();
        if temperature_c.is_nan() {
            debug!("ignoring NaN temperature sample");
            return Ok(Evaluation {
                state: current,
                outcome: Outcome::InvalidSample,
            });
        }

        let mode = self.mode();
        let (next, outcome) = match mode.pinned_state() {
            Some(pinned) => (pinned, Outcome::Pinned),
            None if mode == ThermostatMode::Manual => (current, Outcome::Manual),
            None => {
                if !self.can_evaluate_automatic(now_ms) {
                    return Ok(Evaluation {
                        state: current,
                        outcome: Outcome::RateLimited,
                    });
                }
                self.last_evaluation_ms = Some(now_ms);

                match self.automatic_target(temperature_c) {
                    Some(target) if target != current => (target, Outcome::Transitioned),
                    Some(target) => (target, Outcome::Held),
                    None => (current, Outcome::DeadBand),
                }
            }
        };

        self.store.set(layout::MODE, mode.code())?;
        self.store.set(layout::STATE, next.code())?;

        if next != current {
            info!(
                mode = mode.as_str(),
                from = current.as_str(),
                to = next.as_str(),
                temperature_c,
                "thermostat state changed"
            );
        }

        Ok(Evaluation {
            state: next,
            outcome,
        })
    }

    pub fn factory_reset(&mut self) -> Result<(), ControlError> {
        if self.config.factory_reset == FactoryResetPolicy::Full {
            self.store.set(layout::MODE, self.variant().default_mode().code())?;
            self.store.set(layout::STATE, ThermostatState::Idle.code())?;
            if self.variant().is_dual_setpoint() {
                self.store.set(layout::SETPOINT, self.config.default_setpoint_low_c)?;
                self.store
                    .set(layout::SETPOINT_HIGH, self.config.default_setpoint_high_c)?;
            } else {
                self.store.set(layout::SETPOINT, self.config.default_setpoint_c)?;
            }
            self.last_evaluation_ms = None;
        }

        self.store.factory_reset()?;
        info!(policy = ?self.config.factory_reset, "factory reset applied");
        Ok(())
    }

    pub fn status(
        &self,
        temperature_c: f64,
        humidity: f64,
        units: DisplayUnit,
    ) -> ControllerStatus {
        let (setpoint, setpoint_low, setpoint_high) = self.setpoints_in(units);
        let mode = self.mode();
        let state = self.state();

        ControllerStatus {
            variant: self.variant().as_str(),
            units,
            environment: Environment {
                temperature: units.present(temperature_c),
                humidity,
                remote_temperature: self.use_remote_temperature(),
            },
            setpoint,
            setpoint_low,
            setpoint_high,
            hysteresis: match units {
                DisplayUnit::Metric => self.hysteresis(),
                DisplayUnit::Imperial => self.hysteresis() * 9.0 / 5.0,
            },
            mode: Labeled {
                description: mode.as_str(),
                value: mode.code(),
            },
            state: Labeled {
                description: state.as_str(),
                value: state.code(),
            },
        }
    }

    pub fn state_payload(&self, temperature_c: f64) -> ControllerStatePayload {
        let (setpoint, setpoint_low, setpoint_high) = self.setpoints_in(DisplayUnit::Metric);
        ControllerStatePayload {
            temp: temperature_c,
            mode: self.mode_str(),
            state: self.state_str(),
            setpoint,
            setpoint_low,
            setpoint_high,
        }
    }

    fn setpoints_in(&self, units: DisplayUnit) -> (Option<f64>, Option<f64>, Option<f64>) {
        if self.variant().is_dual_setpoint() {
            (
                None,
                Some(units.present(self.setpoint_low())),
                Some(units.present(self.setpoint_high())),
            )
        } else {
            (Some(units.present(self.setpoint())), None, None)
        }
    }

    fn restore(&mut self) -> Result<(), StorageError> {
        let variant = self.variant();

        let stored_mode = self.store.get(layout::MODE);
        let mode_valid = ThermostatMode::from_code(stored_mode)
            .is_some_and(|mode| variant.supports_mode(mode));
        if !mode_valid {
            warn!(code = stored_mode, "no usable mode in settings, writing default");
            self.store.set(layout::MODE, variant.default_mode().code())?;
        }

        let stored_state = self.store.get(layout::STATE);
        let state_valid = ThermostatState::from_code(stored_state)
            .is_some_and(|state| variant.supports_state(state));
        if !state_valid {
            warn!(code = stored_state, "no usable state in settings, writing default");
            self.store.set(layout::STATE, ThermostatState::Idle.code())?;
        }

        if variant.is_dual_setpoint() {
            if self.check_band(self.setpoint_low(), self.setpoint_high()).is_err() {
                warn!("no usable setpoint band in settings, writing defaults");
                self.store.set(layout::SETPOINT, self.config.default_setpoint_low_c)?;
                self.store
                    .set(layout::SETPOINT_HIGH, self.config.default_setpoint_high_c)?;
            }
        } else if self.check_bounds(self.setpoint()).is_err() {
            warn!("no usable setpoint in settings, writing default");
            self.store.set(layout::SETPOINT, self.config.default_setpoint_c)?;
        }

        info!(
            variant = variant.as_str(),
            mode = self.mode_str(),
            state = self.state_str(),
            "thermostat settings restored"
        );
        Ok(())
    }

    // A failed second write rolls back the first.
    fn set_both<A: FieldValue, B: FieldValue>(
        &mut self,
        first: (Field<A>, A),
        second: (Field<B>, B),
    ) -> Result<bool, StorageError> {
        let (first_field, first_value) = first;
        let (second_field, second_value) = second;
        let previous = self.store.get(first_field);

        let first_changed = self.store.set(first_field, first_value)?;
        match self.store.set(second_field, second_value) {
            Ok(second_changed) => Ok(first_changed || second_changed),
            Err(err) => {
                if first_changed {
                    if let Err(rollback) = self.store.set(first_field, previous) {
                        warn!(
                            field = first_field.name(),
                            "rollback after failed write also failed: {rollback}"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    fn validate_setpoint(
        &self,
        edge: SetpointEdge,
        value_c: f64,
    ) -> Result<Field<f64>, Rejection> {
        match edge {
            SetpointEdge::Single => {
                if self.variant().is_dual_setpoint() {
                    return Err(Rejection::SingleSetpointUnsupported {
                        variant: self.variant().as_str(),
                    });
                }
                self.check_bounds(value_c)?;
                Ok(layout::SETPOINT)
            }
            SetpointEdge::Low => {
                self.check_band(value_c, self.setpoint_high())?;
                Ok(layout::SETPOINT)
            }
            SetpointEdge::High => {
                self.check_band(self.setpoint_low(), value_c)?;
                Ok(layout::SETPOINT_HIGH)
            }
        }
    }

    fn check_bounds(&self, value_c: f64) -> Result<(), Rejection> {
        // NaN fails `contains`.
        if self.bounds.contains(value_c) {
            Ok(())
        } else {
            Err(Rejection::SetpointOutOfRange {
                value: value_c,
                min: self.bounds.min,
                max: self.bounds.max,
            })
        }
    }

    fn check_band(&self, low_c: f64, high_c: f64) -> Result<(), Rejection> {
        if !self.variant().is_dual_setpoint() {
            return Err(Rejection::SetpointBandUnsupported {
                variant: self.variant().as_str(),
            });
        }
        self.check_bounds(low_c)?;
        self.check_bounds(high_c)?;

        let min_width = self.config.min_band_width();
        if low_c >= high_c || high_c - low_c < min_width {
            return Err(Rejection::BandTooNarrow {
                low: low_c,
                high: high_c,
                min_width,
            });
        }
        Ok(())
    }

    fn can_evaluate_automatic(&self, now_ms: u64) -> bool {
        self.last_evaluation_ms
            .map(|last| now_ms.saturating_sub(last) >= self.config.state_change_delay_ms)
            .unwrap_or(true)
    }

    fn automatic_target(&self, temperature_c: f64) -> Option<ThermostatState> {
        let hysteresis = self.hysteresis();

        if self.variant().is_dual_setpoint() {
            let low = self.setpoint_low();
            let high = self.setpoint_high();
            if temperature_c >= low + hysteresis && temperature_c <= high - hysteresis {
                Some(ThermostatState::Idle)
            } else if temperature_c <= low - hysteresis {
                Some(ThermostatState::Heating)
            } else if temperature_c >= high + hysteresis {
                Some(ThermostatState::Cooling)
            } else {
                None
            }
        } else {
            let setpoint = self.setpoint();
            if temperature_c >= setpoint + hysteresis {
                Some(ThermostatState::Idle)
            } else if temperature_c <= setpoint - hysteresis {
                Some(ThermostatState::Heating)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::MemoryMedium;
    use crate::storage::REGION_SIZE;
    use pretty_assertions::assert_eq;

    const DELAY: u64 = 30_000;

    fn engine(variant: Variant) -> ThermostatEngine<MemoryMedium> {
        let config = ThermostatConfig {
            variant,
            ..ThermostatConfig::default()
        };
        let store = SettingsStore::open(MemoryMedium::new(REGION_SIZE)).unwrap();
        ThermostatEngine::new(config, store).unwrap()
    }

    fn reboot(engine: ThermostatEngine<MemoryMedium>) -> ThermostatEngine<MemoryMedium> {
        let config = engine.config.clone();
        let medium = engine.store.into_medium();
        ThermostatEngine::new(config, SettingsStore::open(medium).unwrap()).unwrap()
    }

    #[test]
    fn first_boot_writes_defaults() {
        let engine = engine(Variant::Heating);

        assert_eq!(engine.mode(), ThermostatMode::Off);
        assert_eq!(engine.state(), ThermostatState::Idle);
        assert_eq!(engine.setpoint(), 22.0);
        // Mode and state decode from the zeroed medium; only the setpoint
        // needed writing.
        assert_eq!(engine.store().medium().writes(), 1);
    }

    #[test]
    fn erased_ff_medium_is_replaced_with_defaults() {
        let config = ThermostatConfig {
            variant: Variant::HeatCool,
            ..ThermostatConfig::default()
        };
        let store = SettingsStore::open(MemoryMedium::filled(REGION_SIZE, 0xFF)).unwrap();
        let engine = ThermostatEngine::new(config, store).unwrap();

        assert_eq!(engine.mode(), ThermostatMode::Off);
        assert_eq!(engine.state(), ThermostatState::Idle);
        assert_eq!(engine.setpoint_low(), 20.0);
        assert_eq!(engine.setpoint_high(), 24.0);
    }

    #[test]
    fn automatic_single_setpoint_follows_hysteresis() {
        let mut engine = engine(Variant::Heating);
        engine.set_mode(ThermostatMode::Automatic).unwrap();
        engine.set_setpoint(22.0).unwrap();

        let eval = engine.evaluate(23.5, 1_000).unwrap();
        assert_eq!(eval.state, ThermostatState::Idle);
        assert_eq!(eval.outcome, Outcome::Held);

        let eval = engine.evaluate(20.5, 1_000 + DELAY).unwrap();
        assert_eq!(eval.state, ThermostatState::Heating);
        assert_eq!(eval.outcome, Outcome::Transitioned);

        let eval = engine.evaluate(22.0, 1_000 + 2 * DELAY).unwrap();
        assert_eq!(eval.state, ThermostatState::Heating);
        assert_eq!(eval.outcome, Outcome::DeadBand);
    }

    #[test]
    fn ticks_inside_delay_are_dropped() {
        let mut engine = engine(Variant::Heating);
        engine.set_mode(ThermostatMode::Automatic).unwrap();

        assert_eq!(engine.evaluate(25.0, 0).unwrap().state, ThermostatState::Idle);

        let eval = engine.evaluate(15.0, DELAY - 1).unwrap();
        assert_eq!(eval.outcome, Outcome::RateLimited);
        assert_eq!(eval.state, ThermostatState::Idle);

        assert_eq!(
            engine.evaluate(15.0, DELAY).unwrap().state,
            ThermostatState::Heating
        );
    }

    #[test]
    fn dead_band_evaluation_restarts_the_window() {
        let mut engine = engine(Variant::Heating);
        engine.set_mode(ThermostatMode::Automatic).unwrap();

        engine.evaluate(22.0, 0).unwrap();
        assert_eq!(engine.evaluate(22.5, DELAY).unwrap().outcome, Outcome::DeadBand);

        // Only 10s since the dead-band evaluation.
        let eval = engine.evaluate(15.0, DELAY + 10_000).unwrap();
        assert_eq!(eval.outcome, Outcome::RateLimited);
        assert_eq!(eval.state, ThermostatState::Idle);
    }

    #[test]
    fn nan_never_changes_state() {
        let mut engine = engine(Variant::HeatCool);
        engine.set_state(ThermostatState::Fan).unwrap();

        for mode in Variant::HeatCool.modes() {
            engine.set_mode(*mode).unwrap();
            let eval = engine.evaluate(f64::NAN, 0).unwrap();
            assert_eq!(eval.outcome, Outcome::InvalidSample);
            assert_eq!(engine.state(), ThermostatState::Fan);
        }
    }

    #[test]
    fn fixed_modes_pin_state_without_rate_limit() {
        let mut engine = engine(Variant::HeatCool);
        engine.set_mode(ThermostatMode::Automatic).unwrap();
        engine.evaluate(21.0, 0).unwrap();

        let cases = [
            (ThermostatMode::Heat, ThermostatState::Heating),
            (ThermostatMode::Cool, ThermostatState::Cooling),
            (ThermostatMode::FanOnly, ThermostatState::Fan),
            (ThermostatMode::Off, ThermostatState::Idle),
        ];
        for (offset, (mode, expected)) in cases.into_iter().enumerate() {
            engine.set_mode(mode).unwrap();
            let eval = engine.evaluate(21.0, offset as u64 + 1).unwrap();
            assert_eq!(eval, Evaluation { state: expected, outcome: Outcome::Pinned });
        }
    }

    #[test]
    fn dual_setpoint_rules() {
        let mut engine = engine(Variant::HeatCool);
        engine.set_mode(ThermostatMode::Automatic).unwrap();
        engine.set_setpoint_band(20.0, 24.0).unwrap();

        let mut now = 0;
        let mut step = |engine: &mut ThermostatEngine<MemoryMedium>, temp: f64| {
            let eval = engine.evaluate(temp, now).unwrap();
            now += DELAY;
            eval.state
        };

        assert_eq!(step(&mut engine, 18.5), ThermostatState::Heating);
        assert_eq!(step(&mut engine, 20.5), ThermostatState::Heating);
        assert_eq!(step(&mut engine, 22.0), ThermostatState::Idle);
        assert_eq!(step(&mut engine, 25.0), ThermostatState::Cooling);
        assert_eq!(step(&mut engine, 23.5), ThermostatState::Cooling);
        assert_eq!(step(&mut engine, 23.0), ThermostatState::Idle);
    }

    #[test]
    fn setpoint_outside_bounds_is_rejected() {
        let mut engine = engine(Variant::Heating);
        engine.set_setpoint(21.5).unwrap();

        for value in [17.9, 32.1, f64::NAN, f64::INFINITY] {
            let err = engine.set_setpoint(value).unwrap_err();
            assert!(matches!(
                err,
                ControlError::Rejected(Rejection::SetpointOutOfRange { .. })
            ));
        }
        assert_eq!(engine.setpoint(), 21.5);
        assert!(engine.set_setpoint(32.0).unwrap());
    }

    #[test]
    fn setter_family_must_match_variant() {
        let mut single = engine(Variant::Heating);
        assert!(matches!(
            single.set_setpoint_low(20.0),
            Err(ControlError::Rejected(Rejection::SetpointBandUnsupported { .. }))
        ));

        let mut dual = engine(Variant::HeatCool);
        assert!(matches!(
            dual.set_setpoint(20.0),
            Err(ControlError::Rejected(Rejection::SingleSetpointUnsupported { .. }))
        ));
    }

    #[test]
    fn band_edges_cannot_cross() {
        let mut engine = engine(Variant::HeatCool);
        engine.set_setpoint_band(20.0, 24.0).unwrap();

        assert!(engine.set_setpoint_low(25.0).is_err());
        assert!(engine.set_setpoint_low(23.0).is_err());
        assert!(engine.set_setpoint_high(19.0).is_err());
        assert_eq!((engine.setpoint_low(), engine.setpoint_high()), (20.0, 24.0));

        assert!(engine.set_setpoint_low(22.0).unwrap());
        assert!(engine.set_setpoint_high(30.0).unwrap());
        assert_eq!((engine.setpoint_low(), engine.setpoint_high()), (22.0, 30.0));
    }

    #[test]
    fn manual_override_takes_mode_to_manual() {
        let mut engine = engine(Variant::Manual);
        assert_eq!(engine.mode(), ThermostatMode::Automatic);

        engine.set_state(ThermostatState::Heating).unwrap();
        assert_eq!(engine.mode(), ThermostatMode::Manual);

        let eval = engine.evaluate(30.0, 0).unwrap();
        assert_eq!(eval, Evaluation {
            state: ThermostatState::Heating,
            outcome: Outcome::Manual,
        });
    }

    #[test]
    fn unsupported_mode_and_state_are_rejected() {
        let mut engine = engine(Variant::Heating);

        assert!(matches!(
            engine.set_mode(ThermostatMode::Cool),
            Err(ControlError::Rejected(Rejection::UnsupportedMode { .. }))
        ));
        assert!(matches!(
            engine.set_state(ThermostatState::Fan),
            Err(ControlError::Rejected(Rejection::UnsupportedState { .. }))
        ));
        assert_eq!(engine.mode(), ThermostatMode::Off);
    }

    #[test]
    fn steady_ticks_do_not_rewrite_settings() {
        let mut engine = engine(Variant::Heating);
        engine.set_mode(ThermostatMode::Heat).unwrap();
        engine.evaluate(20.0, 0).unwrap();
        let writes = engine.store().medium().writes();

        for tick in 1..50 {
            engine.evaluate(20.0, tick * 1_000).unwrap();
        }
        assert_eq!(engine.store().medium().writes(), writes);
    }

    #[test]
    fn settings_survive_reboot() {
        let mut engine = engine(Variant::Heating);
        engine.set_mode(ThermostatMode::Automatic).unwrap();
        engine.set_setpoint(21.5).unwrap();
        engine.evaluate(18.0, 0).unwrap();

        let engine = reboot(engine);
        assert_eq!(engine.mode(), ThermostatMode::Automatic);
        assert_eq!(engine.state(), ThermostatState::Heating);
        assert_eq!(engine.setpoint(), 21.5);
    }

    #[test]
    fn full_factory_reset_restores_defaults() {
        let mut engine = engine(Variant::Heating);
        engine.set_mode(ThermostatMode::Heat).unwrap();
        engine.set_setpoint(28.0).unwrap();
        engine.set_state(ThermostatState::Heating).unwrap();
        engine.set_screen_imperial(true).unwrap();

        engine.factory_reset().unwrap();

        assert_eq!(engine.mode(), ThermostatMode::Off);
        assert_eq!(engine.state(), ThermostatState::Idle);
        assert_eq!(engine.setpoint(), 22.0);
        assert_eq!(engine.display_unit(), DisplayUnit::Metric);
    }

    #[test]
    fn display_only_factory_reset_keeps_control_settings() {
        let config = ThermostatConfig {
            factory_reset: FactoryResetPolicy::DisplayOnly,
            ..ThermostatConfig::default()
        };
        let store = SettingsStore::open(MemoryMedium::new(REGION_SIZE)).unwrap();
        let mut engine = ThermostatEngine::new(config, store).unwrap();
        engine.set_mode(ThermostatMode::Heat).unwrap();
        engine.set_setpoint(28.0).unwrap();
        engine.set_use_remote_temperature(true).unwrap();

        engine.factory_reset().unwrap();

        assert_eq!(engine.mode(), ThermostatMode::Heat);
        assert_eq!(engine.setpoint(), 28.0);
        assert!(!engine.use_remote_temperature());
    }

    #[test]
    fn failed_write_leaves_state_unchanged() {
        let mut engine = engine(Variant::Heating);
        engine.set_mode(ThermostatMode::Heat).unwrap();
        engine.store_mut().medium_mut().set_fail_writes(true);

        assert!(matches!(
            engine.evaluate(20.0, 0),
            Err(ControlError::Storage(StorageError::Write { .. }))
        ));
        assert_eq!(engine.state(), ThermostatState::Idle);

        engine.store_mut().medium_mut().set_fail_writes(false);
        assert_eq!(engine.evaluate(20.0, 1).unwrap().state, ThermostatState::Heating);
    }

    #[test]
    fn band_write_failure_rolls_back() {
        let mut engine = engine(Variant::HeatCool);
        engine.set_setpoint_band(20.0, 24.0).unwrap();
        engine.store_mut().medium_mut().fail_one_write_after(1);

        assert!(matches!(
            engine.set_setpoint_band(26.0, 30.0),
            Err(ControlError::Storage(StorageError::Write { .. }))
        ));
        assert_eq!((engine.setpoint_low(), engine.setpoint_high()), (20.0, 24.0));
    }

    #[test]
    fn band_stays_ordered_when_medium_dies_mid_update() {
        let mut engine = engine(Variant::HeatCool);
        engine.set_setpoint_band(20.0, 24.0).unwrap();

        engine.store_mut().medium_mut().fail_writes_after(1);
        assert!(engine.set_setpoint_band(26.0, 30.0).is_err());
        assert_eq!((engine.setpoint_low(), engine.setpoint_high()), (20.0, 30.0));

        engine.store_mut().medium_mut().set_fail_writes(false);
        engine.set_setpoint_band(22.0, 30.0).unwrap();
        engine.store_mut().medium_mut().fail_writes_after(1);
        assert!(engine.set_setpoint_band(18.0, 21.0).is_err());
        assert_eq!((engine.setpoint_low(), engine.setpoint_high()), (18.0, 30.0));
    }

    #[test]
    fn manual_override_rolls_back_mode_on_failure() {
        let mut engine = engine(Variant::Manual);
        engine.store_mut().medium_mut().fail_one_write_after(1);

        assert!(engine.set_state(ThermostatState::Heating).is_err());
        assert_eq!(engine.mode(), ThermostatMode::Automatic);
        assert_eq!(engine.state(), ThermostatState::Idle);
    }

    #[test]
    fn setpoint_update_resumes_automatic_mode() {
        let mut engine = engine(Variant::Heating);
        assert_eq!(engine.mode(), ThermostatMode::Off);

        assert!(engine
            .set_setpoint_and_resume(SetpointEdge::Single, 21.0)
            .unwrap());
        assert_eq!(engine.mode(), ThermostatMode::Automatic);
        assert_eq!(engine.setpoint(), 21.0);

        engine.set_mode(ThermostatMode::Heat).unwrap();
        engine.store_mut().medium_mut().fail_one_write_after(1);
        assert!(engine
            .set_setpoint_and_resume(SetpointEdge::Single, 25.0)
            .is_err());
        assert_eq!(engine.setpoint(), 21.0);
        assert_eq!(engine.mode(), ThermostatMode::Heat);
    }

    #[test]
    fn resume_rejects_wrong_edge_without_writing() {
        let mut engine = engine(Variant::HeatCool);
        let writes = engine.store().medium().writes();

        assert!(matches!(
            engine.set_setpoint_and_resume(SetpointEdge::Single, 21.0),
            Err(ControlError::Rejected(Rejection::SingleSetpointUnsupported { .. }))
        ));
        assert!(engine
            .set_setpoint_and_resume(SetpointEdge::High, 26.0)
            .unwrap());
        assert_eq!(engine.setpoint_high(), 26.0);
        assert_eq!(engine.mode(), ThermostatMode::Automatic);
        assert_eq!(engine.store().medium().writes(), writes + 2);
    }

    #[test]
    fn full_factory_reset_restores_default_band() {
        let mut engine = engine(Variant::HeatCool);
        engine.set_mode(ThermostatMode::Cool).unwrap();
        engine.set_setpoint_band(25.0, 30.0).unwrap();
        engine.evaluate(28.0, 0).unwrap();
        assert_eq!(engine.state(), ThermostatState::Cooling);

        engine.factory_reset().unwrap();

        assert_eq!((engine.setpoint_low(), engine.setpoint_high()), (20.0, 24.0));
        assert_eq!(engine.state(), ThermostatState::Idle);
        assert_eq!(engine.mode(), ThermostatMode::Off);
    }

    #[test]
    fn status_converts_to_imperial() {
        let mut engine = engine(Variant::Heating);
        engine.set_setpoint(20.0).unwrap();

        let status = engine.status(25.0, 40.0, DisplayUnit::Imperial);
        assert_eq!(status.setpoint, Some(68.0));
        assert_eq!(status.environment.temperature, 77.0);
        assert_eq!(status.mode.description, "off");
        assert_eq!(status.state.value, 0);
        assert_eq!(status.setpoint_low, None);
    }
}
