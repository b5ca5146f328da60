//! Temperature sources.

use super::{HwError, TemperatureSensor};
use parking_lot::Mutex;
use rand::Rng;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Default SoC thermal zone on Allwinner boards.
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Values above this are assumed to be reported in millidegrees.
const MILLIDEGREE_CUTOFF: f64 = 1000.0;

/// Kernel thermal zone reader.
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ThermalZone {
    fn default() -> Self {
        Self::new(DEFAULT_THERMAL_ZONE)
    }
}

impl TemperatureSensor for ThermalZone {
    fn read_celsius(&self) -> Result<f64, HwError> {
        let raw = fs::read_to_string(&self.path).map_err(|e| HwError::io(&self.path, e))?;
        let value: f64 = raw.trim().parse().map_err(|_| HwError::Parse {
            path: self.path.clone(),
            value: raw.trim().to_string(),
        })?;
        // Some kernels report whole degrees, most report millidegrees.
        if value.abs() > MILLIDEGREE_CUTOFF {
            Ok(value / 1000.0)
        } else {
            Ok(value)
        }
    }
}

/// Synthetic SoC temperature for `--simulate` runs.
///
/// Heats up towards `hot` while the fan is idle and cools towards `cool`
/// while it runs, with a little noise on top.
pub struct SimulatedSensor {
    current: Mutex<f64>,
    fan: Arc<AtomicBool>,
    cool: f64,
    hot: f64,
}

impl SimulatedSensor {
    pub fn new(initial: f64, fan: Arc<AtomicBool>) -> Self {
        Self {
            current: Mutex::new(initial),
            fan,
            cool: 40.0,
            hot: 80.0,
        }
    }

    /// Temperatures approached with the fan running and idle.
    pub fn with_targets(mut self, cool: f64, hot: f64) -> Self {
        self.cool = cool;
        self.hot = hot;
        self
    }
}

impl TemperatureSensor for SimulatedSensor {
    fn read_celsius(&self) -> Result<f64, HwError> {
        let target = if self.fan.load(Ordering::SeqCst) {
            self.cool
        } else {
            self.hot
        };
        let noise: f64 = rand::thread_rng().gen_range(-0.5..0.5);
        let mut current = self.current.lock();
        *current += (target - *current) * 0.1 + noise;
        Ok(*current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thermal_zone_millidegrees() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp");
        fs::write(&path, "48231\n").unwrap();
        let zone = ThermalZone::new(&path);
        assert!((zone.read_celsius().unwrap() - 48.231).abs() < 1e-9);
    }

    #[test]
    fn test_thermal_zone_whole_degrees() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp");
        fs::write(&path, "52\n").unwrap();
        let zone = ThermalZone::new(&path);
        assert_eq!(zone.read_celsius().unwrap(), 52.0);
    }

    #[test]
    fn test_thermal_zone_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ThermalZone::new(dir.path().join("missing"));
        assert!(matches!(missing.read_celsius(), Err(HwError::Io { .. })));

        let path = dir.path().join("temp");
        fs::write(&path, "hot").unwrap();
        let garbage = ThermalZone::new(&path);
        assert!(matches!(garbage.read_celsius(), Err(HwError::Parse { .. })));
    }

    #[test]
    fn test_simulated_sensor_follows_fan() {
        let fan = Arc::new(AtomicBool::new(false));
        let sensor = SimulatedSensor::new(60.0, fan.clone());
        let mut last = 0.0;
        for _ in 0..50 {
            last = sensor.read_celsius().unwrap();
        }
        assert!(last > 70.0);

        fan.store(true, Ordering::SeqCst);
        for _ in 0..80 {
            last = sensor.read_celsius().unwrap();
        }
        assert!(last < 50.0);
    }

    #[test]
    fn test_simulated_sensor_reaches_custom_targets() {
        let fan = Arc::new(AtomicBool::new(false));
        let sensor = SimulatedSensor::new(45.0, fan.clone()).with_targets(55.0, 100.0);
        let mut last = 0.0;
        for _ in 0..80 {
            last = sensor.read_celsius().unwrap();
        }
        assert!(last > 95.0);

        fan.store(true, Ordering::SeqCst);
        for _ in 0..80 {
            last = sensor.read_celsius().unwrap();
        }
        assert!(last < 60.0);
    }
}
