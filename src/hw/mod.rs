//! Hardware capabilities used by the control loop.
//!
//! The controller only ever talks to the traits in this module. Concrete
//! adapters exist for Linux sysfs (GPIO and thermal zones) and for in-memory
//! simulation.

pub mod gpio;
pub mod thermal;

pub use gpio::{MemoryPin, SysfsPin, parse_pin_name};
pub use thermal::{SimulatedSensor, ThermalZone};

use chrono::{DateTime, Local};
use std::path::PathBuf;
use thiserror::Error;

/// Pin and sensor I/O failures.
#[derive(Debug, Error)]
pub enum HwError {
    #[error("invalid pin name: {0}")]
    InvalidPin(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected value {value:?} in {path}")]
    Parse { path: PathBuf, value: String },
}

impl HwError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Digital output driving the actuator.
pub trait OutputPin: Send {
    /// Human readable pin identifier, used in log lines.
    fn name(&self) -> &str;

    /// Read back the current level of the pin.
    fn is_on(&self) -> Result<bool, HwError>;

    /// Drive the pin high (`true`) or low (`false`).
    fn set(&mut self, on: bool) -> Result<(), HwError>;
}

/// A single temperature measurement.
#[derive(Debug, Clone, Copy)]
pub struct Reading {
    pub celsius: f64,
    pub taken_at: DateTime<Local>,
}

/// Source of raw temperature readings.
pub trait TemperatureSensor: Send + Sync {
    fn read_celsius(&self) -> Result<f64, HwError>;

    /// Take a timestamped reading.
    fn read(&self) -> Result<Reading, HwError> {
        Ok(Reading {
            celsius: self.read_celsius()?,
            taken_at: Local::now(),
        })
    }
}
