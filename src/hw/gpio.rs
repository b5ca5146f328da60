//! GPIO output adapters.

use super::{HwError, OutputPin};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Root of the legacy sysfs GPIO interface.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Number of lines per Allwinner port bank (PA0..PA31, PB0..).
const PORT_WIDTH: u32 = 32;

/// Resolve a pin identifier to a kernel GPIO number.
///
/// Accepts plain numbers (`"13"`), `gpio` prefixed numbers (`"gpio13"`) and
/// Allwinner port names (`"PA13"`, `"pg7"`), where the port letter selects a
/// bank of 32 lines.
pub fn parse_pin_name(name: &str) -> Result<u32, HwError> {
    let trimmed = name.trim();
    let invalid = || HwError::InvalidPin(name.to_string());

    if let Ok(number) = trimmed.parse::<u32>() {
        return Ok(number);
    }

    let lower = trimmed.to_ascii_lowercase();
    if let Some(number) = lower.strip_prefix("gpio") {
        return number.parse().map_err(|_| invalid());
    }

    let mut chars = lower.chars();
    match (chars.next(), chars.next()) {
        (Some('p'), Some(port @ 'a'..='z')) => {
            let line: u32 = chars.as_str().parse().map_err(|_| invalid())?;
            if line >= PORT_WIDTH {
                return Err(invalid());
            }
            Ok((port as u32 - 'a' as u32) * PORT_WIDTH + line)
        }
        _ => Err(invalid()),
    }
}

/// Output pin driven through `/sys/class/gpio`.
///
/// Opening the pin exports it and configures it as an output when needed.
/// An already configured output keeps its level, so restarting the
/// controller does not glitch the fan.
pub struct SysfsPin {
    name: String,
    value_path: PathBuf,
}

impl SysfsPin {
    /// Open a pin under the system sysfs root. Requires root privileges.
    pub fn open(name: &str) -> Result<Self, HwError> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), name)
    }

    /// Open a pin under an arbitrary sysfs-like root.
    pub fn open_at(root: &Path, name: &str) -> Result<Self, HwError> {
        let number = parse_pin_name(name)?;
        let pin_dir = root.join(format!("gpio{}", number));

        if !pin_dir.exists() {
            let export = root.join("export");
            fs::write(&export, number.to_string()).map_err(|e| HwError::io(&export, e))?;
            info!("[GPIO] Exported pin {} as gpio{}", name, number);
        }

        let direction = pin_dir.join("direction");
        let current = fs::read_to_string(&direction).unwrap_or_default();
        if current.trim() != "out" {
            fs::write(&direction, "out").map_err(|e| HwError::io(&direction, e))?;
            debug!("[GPIO] Configured gpio{} as output", number);
        }

        Ok(Self {
            name: name.to_string(),
            value_path: pin_dir.join("value"),
        })
    }
}

impl OutputPin for SysfsPin {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_on(&self) -> Result<bool, HwError> {
        let raw = fs::read_to_string(&self.value_path)
            .map_err(|e| HwError::io(&self.value_path, e))?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(HwError::Parse {
                path: self.value_path.clone(),
                value: other.to_string(),
            }),
        }
    }

    fn set(&mut self, on: bool) -> Result<(), HwError> {
        let level = if on { "1" } else { "0" };
        fs::write(&self.value_path, level).map_err(|e| HwError::io(&self.value_path, e))
    }
}

/// In-memory pin used for simulation.
///
/// The level lives behind an `Arc` so a simulated sensor can observe
/// whether the fan is running.
pub struct MemoryPin {
    name: String,
    level: Arc<AtomicBool>,
}

impl MemoryPin {
    pub fn new(name: impl Into<String>, initial: bool) -> Self {
        Self {
            name: name.into(),
            level: Arc::new(AtomicBool::new(initial)),
        }
    }

    /// Shared handle to the pin level.
    pub fn level(&self) -> Arc<AtomicBool> {
        self.level.clone()
    }
}

impl OutputPin for MemoryPin {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_on(&self) -> Result<bool, HwError> {
        Ok(self.level.load(Ordering::SeqCst))
    }

    fn set(&mut self, on: bool) -> Result<(), HwError> {
        self.level.store(on, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_names() {
        assert_eq!(parse_pin_name("13").unwrap(), 13);
        assert_eq!(parse_pin_name(" gpio7 ").unwrap(), 7);
        assert_eq!(parse_pin_name("GPIO201").unwrap(), 201);
    }

    #[test]
    fn test_parse_port_names() {
        assert_eq!(parse_pin_name("PA13").unwrap(), 13);
        assert_eq!(parse_pin_name("pa0").unwrap(), 0);
        assert_eq!(parse_pin_name("PG7").unwrap(), 6 * 32 + 7);
        assert_eq!(parse_pin_name("PL10").unwrap(), 11 * 32 + 10);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_pin_name("").is_err());
        assert!(parse_pin_name("PA").is_err());
        assert!(parse_pin_name("PA32").is_err());
        assert!(parse_pin_name("fan").is_err());
        assert!(parse_pin_name("gpio-1").is_err());
    }

    #[test]
    fn test_sysfs_pin_exports_and_drives_value() {
        let root = tempfile::tempdir().unwrap();
        let pin_dir = root.path().join("gpio13");
        // The kernel creates the directory on export; emulate that up front.
        fs::create_dir(&pin_dir).unwrap();
        fs::write(pin_dir.join("direction"), "in\n").unwrap();
        fs::write(pin_dir.join("value"), "0\n").unwrap();

        let mut pin = SysfsPin::open_at(root.path(), "PA13").unwrap();
        assert_eq!(
            fs::read_to_string(pin_dir.join("direction")).unwrap(),
            "out"
        );
        assert!(!pin.is_on().unwrap());

        pin.set(true).unwrap();
        assert!(pin.is_on().unwrap());
        pin.set(false).unwrap();
        assert!(!pin.is_on().unwrap());
    }

    #[test]
    fn test_sysfs_pin_keeps_existing_output_level() {
        let root = tempfile::tempdir().unwrap();
        let pin_dir = root.path().join("gpio3");
        fs::create_dir(&pin_dir).unwrap();
        fs::write(pin_dir.join("direction"), "out\n").unwrap();
        fs::write(pin_dir.join("value"), "1\n").unwrap();

        let pin = SysfsPin::open_at(root.path(), "3").unwrap();
        assert!(pin.is_on().unwrap());
    }

    #[test]
    fn test_sysfs_pin_reports_garbage_value() {
        let root = tempfile::tempdir().unwrap();
        let pin_dir = root.path().join("gpio4");
        fs::create_dir(&pin_dir).unwrap();
        fs::write(pin_dir.join("direction"), "out").unwrap();
        fs::write(pin_dir.join("value"), "x").unwrap();

        let pin = SysfsPin::open_at(root.path(), "4").unwrap();
        assert!(matches!(pin.is_on(), Err(HwError::Parse { .. })));
    }

    #[test]
    fn test_memory_pin_shares_level() {
        let mut pin = MemoryPin::new("sim", false);
        let level = pin.level();
        pin.set(true).unwrap();
        assert!(level.load(Ordering::SeqCst));
        assert!(pin.is_on().unwrap());
    }
}
