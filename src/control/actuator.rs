//! Fan actuator: idempotent ON/OFF/TOGGLE over an output pin.

use crate::hw::{HwError, OutputPin};
use log::{debug, error, info};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use strum::{Display, EnumString};

/// Status string published while the fan runs.
pub const STATUS_FAN_ON: &str = "FAN-ON";
/// Status string published while the fan is idle.
pub const STATUS_FAN_OFF: &str = "FAN-OFF";

/// Commands accepted by the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum FanCommand {
    On,
    Off,
    Toggle,
}

/// Binary fan state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActuatorState {
    On,
    Off,
}

impl ActuatorState {
    pub fn is_on(self) -> bool {
        self == ActuatorState::On
    }

    /// Fixed status string for the broker and the cloud status line.
    pub fn status(self) -> &'static str {
        match self {
            ActuatorState::On => STATUS_FAN_ON,
            ActuatorState::Off => STATUS_FAN_OFF,
        }
    }

    /// Numeric form for telemetry fields.
    pub fn as_number(self) -> u8 {
        match self {
            ActuatorState::On => 1,
            ActuatorState::Off => 0,
        }
    }

    /// Brightness for the app LED widget.
    pub fn led_value(self) -> u8 {
        match self {
            ActuatorState::On => 255,
            ActuatorState::Off => 0,
        }
    }
}

impl From<bool> for ActuatorState {
    fn from(on: bool) -> Self {
        if on { ActuatorState::On } else { ActuatorState::Off }
    }
}

impl fmt::Display for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActuatorState::On => "ON",
            ActuatorState::Off => "OFF",
        })
    }
}

/// Sole owner of the fan pin.
///
/// All pin access goes through one lock, so a TOGGLE from the app and a
/// trigger-driven OFF can never interleave their read and write.
pub struct ActuatorController {
    pin: Mutex<Box<dyn OutputPin>>,
    /// Last level seen on the pin, served when a read fails.
    last_known: AtomicBool,
}

impl ActuatorController {
    pub fn new(pin: Box<dyn OutputPin>) -> Self {
        let initial = pin.is_on().unwrap_or(false);
        Self {
            pin: Mutex::new(pin),
            last_known: AtomicBool::new(initial),
        }
    }

    /// Apply a command. Returns the new state when the pin actually
    /// changed, `None` for no-ops and failed attempts.
    pub fn apply(&self, command: FanCommand) -> Option<ActuatorState> {
        let mut pin = self.pin.lock();
        match Self::switch(pin.as_mut(), command) {
            Ok(Some(state)) => {
                self.last_known.store(state.is_on(), Ordering::SeqCst);
                info!("[Fan] Fan set to {}", state);
                Some(state)
            }
            Ok(None) => {
                debug!("[Fan] Fan command {} changes nothing", command);
                None
            }
            Err(e) => {
                error!("[Fan] Fan command {} failed: {}", command, e);
                None
            }
        }
    }

    fn switch(pin: &mut dyn OutputPin, command: FanCommand) -> Result<Option<ActuatorState>, HwError> {
        let target = match command {
            FanCommand::Toggle => {
                let resolved = if pin.is_on()? {
                    FanCommand::Off
                } else {
                    FanCommand::On
                };
                return Self::switch(pin, resolved);
            }
            FanCommand::On => true,
            FanCommand::Off => false,
        };
        if pin.is_on()? == target {
            return Ok(None);
        }
        pin.set(target)?;
        Ok(Some(ActuatorState::from(target)))
    }

    /// Current fan state as read from the pin.
    ///
    /// Falls back to the last known level if the read fails.
    pub fn state(&self) -> ActuatorState {
        let pin = self.pin.lock();
        match pin.is_on() {
            Ok(on) => {
                self.last_known.store(on, Ordering::SeqCst);
                ActuatorState::from(on)
            }
            Err(e) => {
                error!("[Fan] Reading pin {} failed: {}", pin.name(), e);
                ActuatorState::from(self.last_known.load(Ordering::SeqCst))
            }
        }
    }
}
