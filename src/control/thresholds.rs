//! Fan switching thresholds expressed as percentages of the device maximum.

use serde::{Deserialize, Serialize};

/// Inclusive range a single percentage is clamped into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentRange {
    pub min: f64,
    pub max: f64,
}

impl PercentRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.min(self.max).max(self.min)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Current on/off levels in percent. `off_percent <= on_percent` always.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub on_percent: f64,
    pub off_percent: f64,
}

/// Static rules for deriving [`Thresholds`]: defaults, allowed ranges and the
/// percentage to temperature mapping of the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    /// Temperature that 100 % corresponds to.
    pub max_temperature: f64,
    pub default_on: f64,
    pub default_off: f64,
    pub on_range: PercentRange,
    pub off_range: PercentRange,
}

impl ThresholdPolicy {
    /// Thresholds built from the configured defaults.
    pub fn defaults(&self) -> Thresholds {
        self.sanitize(self.default_on, self.default_off)
    }

    /// Replace one or both levels of `current`. Values are taken by
    /// magnitude, clamped into their ranges, and swapped if the result
    /// would leave the off level above the on level. A zero keeps the
    /// current level.
    pub fn update(&self, current: Thresholds, on: Option<f64>, off: Option<f64>) -> Thresholds {
        let given = |value: Option<f64>| value.map(f64::abs).filter(|v| *v != 0.0);
        self.sanitize(
            given(on).unwrap_or(current.on_percent),
            given(off).unwrap_or(current.off_percent),
        )
    }

    fn sanitize(&self, on: f64, off: f64) -> Thresholds {
        let on = self.on_range.clamp(on);
        let off = self.off_range.clamp(off);
        if off > on {
            Thresholds {
                on_percent: off,
                off_percent: on,
            }
        } else {
            Thresholds {
                on_percent: on,
                off_percent: off,
            }
        }
    }

    /// Convert a percentage into raw sensor units.
    pub fn to_raw(&self, percent: f64) -> f64 {
        self.max_temperature * percent / 100.0
    }

    /// Check that swapping a pair can never push a level out of its range.
    ///
    /// Holds when the off range sits at or below the on range on both ends.
    pub fn check(&self) -> Result<(), String> {
        let ranges = [("on", self.on_range), ("off", self.off_range)];
        for (name, range) in ranges {
            if !(range.min.is_finite() && range.max.is_finite()) || range.min > range.max {
                return Err(format!(
                    "{} percentage range [{}, {}] is empty",
                    name, range.min, range.max
                ));
            }
        }
        if self.off_range.min > self.on_range.min || self.off_range.max > self.on_range.max {
            return Err(format!(
                "off percentage range [{}, {}] must not extend above on range [{}, {}]",
                self.off_range.min, self.off_range.max, self.on_range.min, self.on_range.max
            ));
        }
        if !(self.max_temperature.is_finite() && self.max_temperature > 0.0) {
            return Err(format!(
                "maximal temperature must be positive, got {}",
                self.max_temperature
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> ThresholdPolicy {
        ThresholdPolicy {
            max_temperature: 100.0,
            default_on: 85.0,
            default_off: 75.0,
            on_range: PercentRange::new(80.0, 95.0),
            off_range: PercentRange::new(60.0, 75.0),
        }
    }

    #[test]
    fn test_defaults() {
        let thresholds = policy().defaults();
        assert_eq!(thresholds.on_percent, 85.0);
        assert_eq!(thresholds.off_percent, 75.0);
    }

    #[test]
    fn test_update_clamps_on_level() {
        let policy = policy();
        let updated = policy.update(policy.defaults(), Some(120.0), None);
        assert_eq!(updated.on_percent, 95.0);
        assert_eq!(updated.off_percent, 75.0);
    }

    #[test]
    fn test_update_takes_magnitude() {
        let policy = policy();
        let updated = policy.update(policy.defaults(), None, Some(-65.0));
        assert_eq!(updated.off_percent, 65.0);
        assert_eq!(updated.on_percent, 85.0);
    }

    #[test]
    fn test_update_zero_keeps_current_level() {
        let policy = policy();
        let current = policy.update(policy.defaults(), Some(90.0), Some(70.0));
        let updated = policy.update(current, Some(0.0), Some(-0.0));
        assert_eq!(updated, current);

        let updated = policy.update(current, Some(0.0), Some(65.0));
        assert_eq!(updated.on_percent, 90.0);
        assert_eq!(updated.off_percent, 65.0);
    }

    #[test]
    fn test_update_swaps_inverted_pair() {
        let policy = ThresholdPolicy {
            on_range: PercentRange::new(40.0, 95.0),
            off_range: PercentRange::new(30.0, 75.0),
            ..policy()
        };
        let updated = policy.update(policy.defaults(), Some(50.0), Some(70.0));
        assert_eq!(updated.on_percent, 70.0);
        assert_eq!(updated.off_percent, 50.0);
    }

    #[test]
    fn test_to_raw() {
        let policy = ThresholdPolicy {
            max_temperature: 70.0,
            ..policy()
        };
        assert_eq!(policy.to_raw(100.0), 70.0);
        assert_eq!(policy.to_raw(50.0), 35.0);
    }

    #[test]
    fn test_check_rejects_overlapping_ranges() {
        assert!(policy().check().is_ok());

        let inverted = ThresholdPolicy {
            on_range: PercentRange::new(95.0, 80.0),
            ..policy()
        };
        assert!(inverted.check().is_err());

        let off_above = ThresholdPolicy {
            off_range: PercentRange::new(60.0, 99.0),
            ..policy()
        };
        assert!(off_above.check().is_err());

        let no_max = ThresholdPolicy {
            max_temperature: 0.0,
            ..policy()
        };
        assert!(no_max.check().is_err());
    }

    prop_compose! {
        fn valid_policy()(
            on_min in 0.0f64..100.0,
            on_width in 0.0f64..50.0,
            off_min_drop in 0.0f64..50.0,
            off_max_drop in 0.0f64..50.0,
        ) -> ThresholdPolicy {
            let on_range = PercentRange::new(on_min, on_min + on_width);
            let off_min = on_range.min - off_min_drop;
            let off_max = (on_range.max - off_max_drop).max(off_min);
            ThresholdPolicy {
                max_temperature: 100.0,
                default_on: on_range.max,
                default_off: off_min,
                on_range,
                off_range: PercentRange::new(off_min, off_max),
            }
        }
    }

    proptest! {
        #[test]
        fn ordered_and_in_range_after_any_update(
            policy in valid_policy(),
            on in proptest::option::of(-300.0f64..300.0),
            off in proptest::option::of(-300.0f64..300.0),
        ) {
            prop_assert!(policy.check().is_ok());
            let updated = policy.update(policy.defaults(), on, off);
            prop_assert!(updated.off_percent <= updated.on_percent);
            prop_assert!(policy.on_range.contains(updated.on_percent));
            prop_assert!(policy.off_range.contains(updated.off_percent));
        }
    }
}
