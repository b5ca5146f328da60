//! Two-level fan hysteresis built on the trigger engine.

use super::thresholds::{ThresholdPolicy, Thresholds};
use super::trigger::{TriggerCallback, TriggerEngine, TriggerMode};
use log::debug;

/// The two triggers driving the fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FanTrigger {
    /// Temperature rose to the on level.
    On,
    /// Temperature fell to the off level.
    Off,
}

/// Owns the current thresholds and the trigger state derived from them.
///
/// Callers wrap this in a single lock so evaluation and reconfiguration
/// never interleave.
pub struct FanHysteresis {
    policy: ThresholdPolicy,
    thresholds: Thresholds,
    engine: TriggerEngine<FanTrigger>,
    callback: TriggerCallback<FanTrigger>,
}

impl FanHysteresis {
    /// Build with the policy defaults. `callback` receives both triggers.
    pub fn new(policy: ThresholdPolicy, callback: TriggerCallback<FanTrigger>) -> Self {
        let mut hysteresis = Self {
            policy,
            thresholds: policy.defaults(),
            engine: TriggerEngine::new(),
            callback,
        };
        hysteresis.register();
        hysteresis
    }

    pub fn policy(&self) -> &ThresholdPolicy {
        &self.policy
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Raw on/off levels in sensor units.
    pub fn raw_levels(&self) -> (f64, f64) {
        (
            self.policy.to_raw(self.thresholds.on_percent),
            self.policy.to_raw(self.thresholds.off_percent),
        )
    }

    /// Change one or both percentages and re-register the triggers.
    /// Trigger edge memory survives.
    pub fn set_percentages(&mut self, on: Option<f64>, off: Option<f64>) -> Thresholds {
        self.thresholds = self.policy.update(self.thresholds, on, off);
        self.register();
        self.thresholds
    }

    /// Restore the configured default percentages.
    pub fn reset(&mut self) -> Thresholds {
        self.thresholds = self.policy.defaults();
        self.register();
        self.thresholds
    }

    pub fn evaluate(&mut self, value: f64) -> usize {
        self.engine.evaluate(value)
    }

    fn register(&mut self) {
        let (on_level, off_level) = self.raw_levels();
        debug!(
            "[Fan] Setup fan triggers: ON = {}% ({}), OFF = {}% ({})",
            self.thresholds.on_percent, on_level, self.thresholds.off_percent, off_level
        );
        self.engine.set_threshold(
            FanTrigger::On,
            TriggerMode::Above,
            on_level,
            self.callback.clone(),
        );
        self.engine.set_threshold(
            FanTrigger::Off,
            TriggerMode::Below,
            off_level,
            self.callback.clone(),
        );
    }
}
