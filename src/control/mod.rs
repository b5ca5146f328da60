//! Temperature control: smoothing, thresholds, edge triggers and the fan
//! actuator.

pub mod actuator;
pub mod filter;
pub mod hysteresis;
pub mod thresholds;
pub mod trigger;

pub use actuator::{ActuatorController, ActuatorState, FanCommand};
pub use filter::{SampleError, SmoothingFilter};
pub use hysteresis::{FanHysteresis, FanTrigger};
pub use thresholds::{PercentRange, ThresholdPolicy, Thresholds};
pub use trigger::{TriggerCallback, TriggerEngine, TriggerMode};
