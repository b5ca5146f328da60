//! Exponential smoothing of raw temperature samples.

use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Bit pattern marking "no sample yet". `sample` rejects non-finite input,
/// so a NaN can never be a real smoothed value.
const UNDEFINED: u64 = u64::MAX;

#[derive(Debug, Error, PartialEq)]
pub enum SampleError {
    #[error("non-finite reading: {0}")]
    NonFinite(f64),
}

/// Exponential decay filter with fixed output precision.
///
/// `smoothed' = smoothed + factor * (reading - smoothed)`, rounded to
/// `decimals` places. The first sample initializes the value.
///
/// The current value is kept as `f64` bits in an atomic, so readers on
/// other tasks always see a whole value. Only the sampling task writes.
pub struct SmoothingFilter {
    factor: f64,
    decimals: u32,
    value: AtomicU64,
}

impl SmoothingFilter {
    /// `factor` is clamped into `(0, 1]`; anything non-positive or
    /// non-finite falls back to 1 (no smoothing).
    pub fn new(factor: f64, decimals: u32) -> Self {
        let factor = if factor.is_finite() && factor > 0.0 {
            factor.min(1.0)
        } else {
            1.0
        };
        Self {
            factor,
            decimals,
            value: AtomicU64::new(UNDEFINED),
        }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Blend a new raw reading into the smoothed value and return it.
    pub fn sample(&self, raw: f64) -> Result<f64, SampleError> {
        if !raw.is_finite() {
            return Err(SampleError::NonFinite(raw));
        }
        let next = match self.current() {
            Some(previous) => previous + self.factor * (raw - previous),
            None => raw,
        };
        let rounded = self.round(next);
        self.value.store(rounded.to_bits(), Ordering::SeqCst);
        Ok(rounded)
    }

    /// Current smoothed value, `None` before the first sample.
    pub fn current(&self) -> Option<f64> {
        match self.value.load(Ordering::SeqCst) {
            UNDEFINED => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    fn round(&self, value: f64) -> f64 {
        let scale = 10f64.powi(self.decimals as i32);
        (value * scale).round() / scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_until_first_sample() {
        let filter = SmoothingFilter::new(0.2, 3);
        assert_eq!(filter.current(), None);
        assert_eq!(filter.sample(50.0).unwrap(), 50.0);
        assert_eq!(filter.current(), Some(50.0));
    }

    #[test]
    fn test_each_sample_follows_blend_formula() {
        let filter = SmoothingFilter::new(0.2, 3);
        let readings = [47.3, 52.0, 61.9, 58.25, 44.0, 44.0, 90.5, -3.0];
        let mut previous: Option<f64> = None;
        for raw in readings {
            let smoothed = filter.sample(raw).unwrap();
            let expected = match previous {
                Some(p) => ((p + 0.2 * (raw - p)) * 1000.0).round() / 1000.0,
                None => raw,
            };
            assert_eq!(smoothed, expected);
            previous = Some(smoothed);
        }
    }

    #[test]
    fn test_rounds_to_precision() {
        let filter = SmoothingFilter::new(0.5, 1);
        filter.sample(10.0).unwrap();
        // 10 + 0.5 * (10.36 - 10) = 10.18 -> 10.2
        assert_eq!(filter.sample(10.36).unwrap(), 10.2);
    }

    #[test]
    fn test_rejects_non_finite_and_keeps_value() {
        let filter = SmoothingFilter::new(0.2, 3);
        filter.sample(40.0).unwrap();
        assert!(matches!(filter.sample(f64::NAN), Err(SampleError::NonFinite(_))));
        assert_eq!(
            filter.sample(f64::INFINITY),
            Err(SampleError::NonFinite(f64::INFINITY))
        );
        assert_eq!(filter.current(), Some(40.0));
    }

    #[test]
    fn test_factor_is_sanitized() {
        assert_eq!(SmoothingFilter::new(0.0, 3).factor(), 1.0);
        assert_eq!(SmoothingFilter::new(-0.3, 3).factor(), 1.0);
        assert_eq!(SmoothingFilter::new(4.0, 3).factor(), 1.0);
        assert_eq!(SmoothingFilter::new(f64::NAN, 3).factor(), 1.0);
        assert_eq!(SmoothingFilter::new(0.35, 3).factor(), 0.35);
    }
}
