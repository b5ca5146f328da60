//! Route table from inbound sources to controller commands.
//!
//! Transports only deliver `(source, payload)` pairs. The table maps each
//! source to a [`Route`], the route turns the payload into a [`Command`]
//! and the router executes it against the controller.

use super::{Command, CommandError};
use crate::config::{BlynkPins, TopicsConfig};
use crate::control::FanCommand;
use crate::controller::Controller;
use crate::sinks::blynk::BridgeEvent;
use crate::sinks::mqtt::MqttMessage;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Where an inbound message came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteKey {
    /// Broker topic.
    Broker(String),
    /// App write to a virtual pin.
    AppWrite(u8),
    /// App read request for a virtual pin.
    AppRead(u8),
}

/// How a payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Payload is a fan command word (`ON`, `OFF`, `TOGGLE`, `RESET`).
    FanCommand,
    /// Command name is the upper-cased last topic segment, payload its value.
    NamedValue,
    /// Payload is a script command (`EXIT`).
    ScriptCommand,
    /// Logged only.
    Echo,
    /// App push button: any non-zero value toggles the fan, 0 is the release.
    ToggleButton,
    /// App numeric input for the fan-on percentage.
    PercentOn,
    /// App numeric input for the fan-off percentage.
    PercentOff,
    /// App asks for the current temperature.
    TemperatureRead,
}

impl Route {
    /// Turn a payload into a command. `Ok(None)` means nothing to do.
    pub fn translate(self, key: &RouteKey, payload: &str) -> Result<Option<Command>, CommandError> {
        let payload = payload.trim();
        match self {
            Route::FanCommand => match Command::parse(payload, None)? {
                command @ (Command::Fan(_) | Command::Reset) => Ok(Some(command)),
                _ => Err(CommandError::Unknown(payload.to_string())),
            },
            Route::NamedValue => {
                let RouteKey::Broker(topic) = key else {
                    return Err(CommandError::Unknown(payload.to_string()));
                };
                let name = topic.rsplit('/').next().unwrap_or(topic).to_uppercase();
                match Command::parse(&name, Some(payload))? {
                    command @ (Command::PercentOn(_) | Command::PercentOff(_)) => {
                        Ok(Some(command))
                    }
                    _ => Err(CommandError::Unknown(name)),
                }
            }
            Route::ScriptCommand => match Command::parse(payload, None)? {
                Command::Exit => Ok(Some(Command::Exit)),
                _ => Err(CommandError::Unknown(payload.to_string())),
            },
            Route::Echo => Ok(None),
            Route::ToggleButton => match payload.parse::<i64>() {
                Ok(0) => Ok(None),
                Ok(_) => Ok(Some(Command::Fan(FanCommand::Toggle))),
                Err(_) => Err(CommandError::InvalidValue {
                    command: "TOGGLE".to_string(),
                    value: payload.to_string(),
                }),
            },
            Route::PercentOn => Command::parse("PERCON", Some(payload)).map(Some),
            Route::PercentOff => Command::parse("PERCOFF", Some(payload)).map(Some),
            Route::TemperatureRead => Ok(Some(Command::ReadTemperature)),
        }
    }
}

/// Registry of inbound sources.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<RouteKey, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, key: RouteKey, route: Route) -> Self {
        self.routes.insert(key, route);
        self
    }

    /// Broker topics plus, when `pins` is given, the app widgets.
    pub fn from_config(topics: &TopicsConfig, pins: Option<&BlynkPins>) -> Self {
        let broker = |topic: &String| RouteKey::Broker(topic.clone());
        let mut table = Self::new()
            .with_route(broker(&topics.data_temp), Route::Echo)
            .with_route(broker(&topics.command), Route::ScriptCommand)
            .with_route(broker(&topics.command_test), Route::Echo)
            .with_route(broker(&topics.command_fan), Route::FanCommand)
            .with_route(broker(&topics.command_fan_percon), Route::NamedValue)
            .with_route(broker(&topics.command_fan_percoff), Route::NamedValue);
        if let Some(pins) = pins {
            table = table
                .with_route(RouteKey::AppWrite(pins.fan_button), Route::ToggleButton)
                .with_route(RouteKey::AppWrite(pins.percent_on), Route::PercentOn)
                .with_route(RouteKey::AppWrite(pins.percent_off), Route::PercentOff)
                .with_route(RouteKey::AppRead(pins.temperature), Route::TemperatureRead);
        }
        table
    }

    /// Broker topics to subscribe to, sorted.
    pub fn broker_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .routes
            .keys()
            .filter_map(|key| match key {
                RouteKey::Broker(topic) => Some(topic.clone()),
                _ => None,
            })
            .collect();
        topics.sort();
        topics
    }

    pub fn resolve(&self, key: &RouteKey) -> Option<Route> {
        self.routes.get(key).copied()
    }
}

pub struct CommandRouter {
    table: RouteTable,
    controller: Arc<Controller>,
}

impl CommandRouter {
    pub fn new(table: RouteTable, controller: Arc<Controller>) -> Self {
        Self { table, controller }
    }

    /// Resolve, translate and execute one inbound message. Unknown sources
    /// and bad payloads are logged and dropped.
    pub async fn dispatch(&self, key: RouteKey, payload: &str) {
        let Some(route) = self.table.resolve(&key) else {
            warn!("[Command] Received {:?} from unknown source {:?}", payload, key);
            return;
        };
        match route.translate(&key, payload) {
            Ok(Some(command)) => {
                debug!("[Command] {:?} from {:?}", command, key);
                self.execute(command).await;
            }
            Ok(None) => debug!("[Command] Received {:?} from {:?}", payload, key),
            Err(e) => warn!("[Command] Dropping {:?} from {:?}: {}", payload, key, e),
        }
    }

    pub async fn execute(&self, command: Command) {
        match command {
            Command::Fan(fan) => {
                self.controller.apply_fan(fan).await;
            }
            Command::PercentOn(percent) => {
                self.controller.set_percentages(Some(percent), None).await;
            }
            Command::PercentOff(percent) => {
                self.controller.set_percentages(None, Some(percent)).await;
            }
            Command::Reset => {
                self.controller.reset_thresholds().await;
            }
            Command::Exit => {
                info!("[Command] Exit command received");
                self.controller.stop();
            }
            Command::ReadTemperature => {
                self.controller
                    .coordinator()
                    .publish_bridge_temperature()
                    .await;
            }
        }
    }

    /// Feed broker messages until the channel closes.
    pub async fn run_broker(self: Arc<Self>, mut rx: mpsc::Receiver<MqttMessage>) {
        while let Some(msg) = rx.recv().await {
            self.dispatch(RouteKey::Broker(msg.topic), &msg.payload).await;
        }
        debug!("[Command] Broker message channel closed");
    }

    /// Feed app requests until the channel closes. Every new session gets
    /// the current fan LED and thresholds; the broker is left alone.
    pub async fn run_bridge(self: Arc<Self>, mut rx: mpsc::Receiver<BridgeEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                BridgeEvent::Connected => self.controller.publish_bridge_state().await,
                BridgeEvent::Write { pin, value } => {
                    self.dispatch(RouteKey::AppWrite(pin), &value).await
                }
                BridgeEvent::Read { pin } => self.dispatch(RouteKey::AppRead(pin), "").await,
            }
        }
        debug!("[Command] App event channel closed");
    }
}
