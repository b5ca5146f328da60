//! Inbound commands and the route table feeding them to the controller.

pub mod router;

pub use router::{CommandRouter, Route, RouteKey, RouteTable};

use crate::control::FanCommand;
use strum::{Display, EnumString};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    Unknown(String),

    #[error("invalid value {value:?} for {command}")]
    InvalidValue { command: String, value: String },

    #[error("command {0} requires a value")]
    MissingValue(String),
}

/// Command words understood on the broker topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum CommandName {
    On,
    Off,
    Toggle,
    Reset,
    Exit,
    PerCon,
    PerCOff,
}

/// A validated command for the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Fan(FanCommand),
    /// New fan-on percentage, not yet clamped.
    PercentOn(f64),
    /// New fan-off percentage, not yet clamped.
    PercentOff(f64),
    /// Restore the configured default percentages.
    Reset,
    /// Stop the process.
    Exit,
    /// Send the current temperature to the app.
    ReadTemperature,
}

impl Command {
    /// Build a command from its name and optional value.
    pub fn parse(name: &str, value: Option<&str>) -> Result<Self, CommandError> {
        let name = name.trim();
        let parsed: CommandName = name
            .parse()
            .map_err(|_| CommandError::Unknown(name.to_string()))?;
        Ok(match parsed {
            CommandName::On => Command::Fan(FanCommand::On),
            CommandName::Off => Command::Fan(FanCommand::Off),
            CommandName::Toggle => Command::Fan(FanCommand::Toggle),
            CommandName::Reset => Command::Reset,
            CommandName::Exit => Command::Exit,
            CommandName::PerCon => Command::PercentOn(parse_percent(parsed, value)?),
            CommandName::PerCOff => Command::PercentOff(parse_percent(parsed, value)?),
        })
    }
}

fn parse_percent(name: CommandName, value: Option<&str>) -> Result<f64, CommandError> {
    let raw = value.ok_or_else(|| CommandError::MissingValue(name.to_string()))?;
    match raw.trim().parse::<f64>() {
        Ok(percent) if percent.is_finite() => Ok(percent),
        _ => Err(CommandError::InvalidValue {
            command: name.to_string(),
            value: raw.to_string(),
        }),
    }
}
