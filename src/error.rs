use thiserror::Error as ThisError;

use crate::hw::HwError;
use crate::instance_lock::InstanceLockError;
use crate::scheduler::SchedulerError;

/// Startup failures. Anything in here ends the process before the control
/// loop is entered.
#[derive(ThisError, Debug)]
pub enum ControllerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Root privileges are required to drive GPIO pin {0}")]
    PrivilegeRequired(String),

    #[error("Hardware initialization failed: {0}")]
    Hardware(#[from] HwError),

    #[error(transparent)]
    InstanceLock(#[from] InstanceLockError),

    #[error("Scheduler setup failed: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
