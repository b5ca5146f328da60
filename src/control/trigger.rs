//! Edge-triggered threshold callbacks.
//!
//! Each trigger remembers whether the last evaluated value was past its
//! level. The callback runs only on the transition into "past"; staying
//! past the level, or leaving it again, is silent. Replacing a trigger
//! keeps that memory, so moving a level across the current value fires on
//! the next evaluation.

use log::debug;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Direction a trigger watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Past the level when `value >= level`.
    Above,
    /// Past the level when `value <= level`.
    Below,
}

impl TriggerMode {
    pub fn is_past(self, value: f64, level: f64) -> bool {
        match self {
            TriggerMode::Above => value >= level,
            TriggerMode::Below => value <= level,
        }
    }
}

/// Callback invoked with the trigger id and the value that crossed.
pub type TriggerCallback<K> = Arc<dyn Fn(K, f64) + Send + Sync>;

struct Trigger<K> {
    mode: TriggerMode,
    level: f64,
    past: bool,
    callback: TriggerCallback<K>,
}

/// Set of named edge triggers evaluated against one value stream.
pub struct TriggerEngine<K> {
    triggers: BTreeMap<K, Trigger<K>>,
}

impl<K: Ord + Copy + Debug> TriggerEngine<K> {
    pub fn new() -> Self {
        Self {
            triggers: BTreeMap::new(),
        }
    }

    /// Register or replace a trigger. A replaced trigger keeps its
    /// last evaluation result.
    pub fn set_threshold(
        &mut self,
        id: K,
        mode: TriggerMode,
        level: f64,
        callback: TriggerCallback<K>,
    ) {
        let past = self.triggers.get(&id).map(|t| t.past).unwrap_or(false);
        self.triggers.insert(
            id,
            Trigger {
                mode,
                level,
                past,
                callback,
            },
        );
    }

    /// Evaluate every trigger against `value`. Returns the number of
    /// callbacks fired.
    pub fn evaluate(&mut self, value: f64) -> usize {
        let mut fired = 0;
        for (id, trigger) in self.triggers.iter_mut() {
            let past = trigger.mode.is_past(value, trigger.level);
            if past == trigger.past {
                continue;
            }
            trigger.past = past;
            if past {
                debug!(
                    "[Trigger] {:?} fired at {} ({:?} {})",
                    id, value, trigger.mode, trigger.level
                );
                (trigger.callback)(*id, value);
                fired += 1;
            }
        }
        fired
    }

    pub fn level(&self, id: K) -> Option<f64> {
        self.triggers.get(&id).map(|t| t.level)
    }

    /// Result of the last evaluation, `None` for unknown ids.
    pub fn is_past(&self, id: K) -> Option<bool> {
        self.triggers.get(&id).map(|t| t.past)
    }
}

impl<K: Ord + Copy + Debug> Default for TriggerEngine<K> {
    fn default() -> Self {
        Self::new()
    }
}
