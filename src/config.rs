use crate::control::{PercentRange, ThresholdPolicy};
use crate::error::{ControllerError, Result};
use crate::sinks::thingspeak;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Load environment variables from a .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv(path: &Path) {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(&key).is_err() {
            // SAFETY: called from `main` before the async runtime and any other thread starts
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Find the first '=' and split there
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            // Remove surrounding quotes if present
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }

            if !key.is_empty() {
                pairs.push((key.to_string(), value.to_string()));
            }
        }
    }
    pairs
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub fan: FanConfig,
    pub sampling: SamplingConfig,
    /// Upper bound for a single sink publish.
    pub publish_timeout_ms: u64,
    pub mqtt: MqttConfig,
    pub topics: TopicsConfig,
    pub thingspeak: ThingSpeakConfig,
    pub blynk: BlynkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanConfig {
    /// GPIO driving the fan, as a number or a port name like `PA13`.
    pub pin: Option<String>,
    pub thermal_zone: String,
    /// Temperature in °C that 100 % corresponds to.
    pub max_temperature: f64,
    pub percent_on: f64,
    pub on_range: PercentRange,
    pub percent_off: f64,
    pub off_range: PercentRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub period_secs: u64,
    /// Publish temperature every n-th sample.
    pub prescale_publish: u64,
    /// Evaluate fan triggers every n-th sample.
    pub prescale_triggers: u64,
    pub smoothing_factor: f64,
    pub decimals: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    pub data_temp: String,
    pub status_fan: String,
    /// Script commands (`EXIT`).
    pub command: String,
    /// Logged only.
    pub command_test: String,
    pub command_fan: String,
    pub command_fan_percon: String,
    pub command_fan_percoff: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThingSpeakConfig {
    pub enabled: bool,
    pub mqtt: MqttConfig,
    pub channel_id: Option<String>,
    pub field_temp: u8,
    pub field_fan: u8,
    pub period_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlynkConfig {
    pub enabled: bool,
    pub auth_token: Option<String>,
    pub host: String,
    pub port: u16,
    pub heartbeat_secs: u64,
    pub pins: BlynkPins,
}

/// Virtual pins of the app widgets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlynkPins {
    pub temperature: u8,
    pub fan_led: u8,
    pub fan_button: u8,
    pub percent_on: u8,
    pub percent_off: u8,
}

impl Default for BlynkPins {
    fn default() -> Self {
        Self {
            temperature: 0,
            fan_led: 1,
            fan_button: 2,
            percent_on: 3,
            percent_off: 4,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fan: FanConfig {
                pin: None,
                thermal_zone: "/sys/class/thermal/thermal_zone0/temp".to_string(),
                max_temperature: 100.0,
                percent_on: 85.0,
                on_range: PercentRange::new(80.0, 95.0),
                percent_off: 75.0,
                off_range: PercentRange::new(60.0, 75.0),
            },
            sampling: SamplingConfig {
                period_secs: 5,
                prescale_publish: 3,
                prescale_triggers: 6,
                smoothing_factor: 0.2,
                decimals: 3,
            },
            publish_timeout_ms: 2000,
            mqtt: MqttConfig {
                broker_host: "localhost".to_string(),
                broker_port: 1883,
                client_id: "thermofan".to_string(),
                username: None,
                password: None,
            },
            topics: TopicsConfig {
                data_temp: "server/data/temp".to_string(),
                status_fan: "server/status/fan".to_string(),
                command: "server/command".to_string(),
                command_test: "server/command/test".to_string(),
                command_fan: "server/command/fan".to_string(),
                command_fan_percon: "server/command/fan/percon".to_string(),
                command_fan_percoff: "server/command/fan/percoff".to_string(),
            },
            thingspeak: ThingSpeakConfig {
                enabled: false,
                mqtt: MqttConfig {
                    broker_host: "mqtt3.thingspeak.com".to_string(),
                    broker_port: 1883,
                    client_id: String::new(),
                    username: None,
                    password: None,
                },
                channel_id: None,
                field_temp: 1,
                field_fan: 2,
                period_secs: 60,
            },
            blynk: BlynkConfig {
                enabled: false,
                auth_token: None,
                host: "blynk-cloud.com".to_string(),
                port: 80,
                heartbeat_secs: 10,
                pins: BlynkPins::default(),
            },
        }
    }
}

fn set_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn!("[Config] Ignoring invalid value {:?} for {}", raw, key),
        }
    }
}

fn set_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut String) {
    if let Some(value) = lookup(key) {
        *target = value;
    }
}

fn set_optional(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut Option<String>) {
    if let Some(value) = lookup(key)
        && !value.trim().is_empty()
    {
        *target = Some(value);
    }
}

fn set_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut bool) {
    if let Some(raw) = lookup(key) {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => *target = true,
            "0" | "false" | "no" | "off" => *target = false,
            _ => warn!("[Config] Ignoring invalid flag {:?} for {}", raw, key),
        }
    }
}

impl Config {
    /// Defaults overlaid with `THERMOFAN_*` environment variables, sanitized.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let l = &lookup;

        // Fan and thresholds
        set_optional(l, "THERMOFAN_FAN_PIN", &mut config.fan.pin);
        set_string(l, "THERMOFAN_THERMAL_ZONE", &mut config.fan.thermal_zone);
        set_parsed(l, "THERMOFAN_MAX_TEMPERATURE", &mut config.fan.max_temperature);
        set_parsed(l, "THERMOFAN_PERCENT_ON", &mut config.fan.percent_on);
        set_parsed(l, "THERMOFAN_PERCENT_ON_MIN", &mut config.fan.on_range.min);
        set_parsed(l, "THERMOFAN_PERCENT_ON_MAX", &mut config.fan.on_range.max);
        set_parsed(l, "THERMOFAN_PERCENT_OFF", &mut config.fan.percent_off);
        set_parsed(l, "THERMOFAN_PERCENT_OFF_MIN", &mut config.fan.off_range.min);
        set_parsed(l, "THERMOFAN_PERCENT_OFF_MAX", &mut config.fan.off_range.max);

        // Sampling
        set_parsed(l, "THERMOFAN_PERIOD", &mut config.sampling.period_secs);
        set_parsed(l, "THERMOFAN_PRESCALE_PUBLISH", &mut config.sampling.prescale_publish);
        set_parsed(l, "THERMOFAN_PRESCALE_TRIGGERS", &mut config.sampling.prescale_triggers);
        set_parsed(l, "THERMOFAN_SMOOTHING_FACTOR", &mut config.sampling.smoothing_factor);
        set_parsed(l, "THERMOFAN_DECIMALS", &mut config.sampling.decimals);
        set_parsed(l, "THERMOFAN_PUBLISH_TIMEOUT_MS", &mut config.publish_timeout_ms);

        // MQTT configuration
        set_string(l, "THERMOFAN_MQTT_HOST", &mut config.mqtt.broker_host);
        set_parsed(l, "THERMOFAN_MQTT_PORT", &mut config.mqtt.broker_port);
        set_string(l, "THERMOFAN_MQTT_CLIENT_ID", &mut config.mqtt.client_id);
        set_optional(l, "THERMOFAN_MQTT_USERNAME", &mut config.mqtt.username);
        set_optional(l, "THERMOFAN_MQTT_PASSWORD", &mut config.mqtt.password);

        let topics = &mut config.topics;
        set_string(l, "THERMOFAN_TOPIC_DATA_TEMP", &mut topics.data_temp);
        set_string(l, "THERMOFAN_TOPIC_STATUS_FAN", &mut topics.status_fan);
        set_string(l, "THERMOFAN_TOPIC_COMMAND", &mut topics.command);
        set_string(l, "THERMOFAN_TOPIC_COMMAND_TEST", &mut topics.command_test);
        set_string(l, "THERMOFAN_TOPIC_COMMAND_FAN", &mut topics.command_fan);
        set_string(l, "THERMOFAN_TOPIC_COMMAND_FAN_PERCON", &mut topics.command_fan_percon);
        set_string(l, "THERMOFAN_TOPIC_COMMAND_FAN_PERCOFF", &mut topics.command_fan_percoff);

        // ThingSpeak
        let thingspeak = &mut config.thingspeak;
        set_flag(l, "THERMOFAN_THINGSPEAK_ENABLED", &mut thingspeak.enabled);
        set_string(l, "THERMOFAN_THINGSPEAK_HOST", &mut thingspeak.mqtt.broker_host);
        set_parsed(l, "THERMOFAN_THINGSPEAK_PORT", &mut thingspeak.mqtt.broker_port);
        set_string(l, "THERMOFAN_THINGSPEAK_CLIENT_ID", &mut thingspeak.mqtt.client_id);
        set_optional(l, "THERMOFAN_THINGSPEAK_USERNAME", &mut thingspeak.mqtt.username);
        set_optional(l, "THERMOFAN_THINGSPEAK_PASSWORD", &mut thingspeak.mqtt.password);
        set_optional(l, "THERMOFAN_THINGSPEAK_CHANNEL", &mut thingspeak.channel_id);
        set_parsed(l, "THERMOFAN_THINGSPEAK_FIELD_TEMP", &mut thingspeak.field_temp);
        set_parsed(l, "THERMOFAN_THINGSPEAK_FIELD_FAN", &mut thingspeak.field_fan);
        set_parsed(l, "THERMOFAN_THINGSPEAK_PERIOD", &mut thingspeak.period_secs);

        // Blynk
        let blynk = &mut config.blynk;
        set_flag(l, "THERMOFAN_BLYNK_ENABLED", &mut blynk.enabled);
        set_optional(l, "THERMOFAN_BLYNK_TOKEN", &mut blynk.auth_token);
        set_string(l, "THERMOFAN_BLYNK_HOST", &mut blynk.host);
        set_parsed(l, "THERMOFAN_BLYNK_PORT", &mut blynk.port);
        set_parsed(l, "THERMOFAN_BLYNK_HEARTBEAT", &mut blynk.heartbeat_secs);
        set_parsed(l, "THERMOFAN_BLYNK_VPIN_TEMP", &mut blynk.pins.temperature);
        set_parsed(l, "THERMOFAN_BLYNK_VPIN_FAN_LED", &mut blynk.pins.fan_led);
        set_parsed(l, "THERMOFAN_BLYNK_VPIN_FAN_BUTTON", &mut blynk.pins.fan_button);
        set_parsed(l, "THERMOFAN_BLYNK_VPIN_PERCON", &mut blynk.pins.percent_on);
        set_parsed(l, "THERMOFAN_BLYNK_VPIN_PERCOFF", &mut blynk.pins.percent_off);

        config.sanitize();
        config
    }

    /// Force every numeric option into its usable range.
    pub fn sanitize(&mut self) {
        let sampling = &mut self.sampling;
        sampling.period_secs = sampling.period_secs.clamp(1, 60);
        sampling.prescale_publish = sampling.prescale_publish.clamp(1, 10);
        sampling.prescale_triggers = sampling.prescale_triggers.clamp(1, 1000);
        if !(sampling.smoothing_factor.is_finite() && sampling.smoothing_factor > 0.0) {
            sampling.smoothing_factor = 0.2;
        }
        sampling.smoothing_factor = sampling.smoothing_factor.min(1.0);
        sampling.decimals = sampling.decimals.min(10);

        let fan = &mut self.fan;
        fan.max_temperature = fan.max_temperature.abs();
        fan.percent_on = fan.percent_on.abs();
        fan.percent_off = fan.percent_off.abs();

        let min_period = thingspeak::MIN_INTERVAL.as_secs();
        if self.thingspeak.period_secs < min_period {
            warn!(
                "[Config] ThingSpeak period {}s raised to {}s",
                self.thingspeak.period_secs, min_period
            );
            self.thingspeak.period_secs = min_period;
        }

        self.blynk.heartbeat_secs = self.blynk.heartbeat_secs.max(1);
        self.publish_timeout_ms = self.publish_timeout_ms.max(100);
    }

    /// Report missing required options and inconsistent ranges.
    pub fn validate(&self, simulate: bool) -> Result<()> {
        if !simulate && self.fan.pin.is_none() {
            return Err(ControllerError::Config(
                "fan pin is required (THERMOFAN_FAN_PIN)".to_string(),
            ));
        }
        if self.thingspeak.enabled && self.thingspeak.channel_id.is_none() {
            return Err(ControllerError::Config(
                "ThingSpeak is enabled but has no channel (THERMOFAN_THINGSPEAK_CHANNEL)"
                    .to_string(),
            ));
        }
        if self.blynk.enabled && self.blynk.auth_token.is_none() {
            return Err(ControllerError::Config(
                "Blynk is enabled but has no token (THERMOFAN_BLYNK_TOKEN)".to_string(),
            ));
        }
        self.threshold_policy()
            .check()
            .map_err(ControllerError::Config)
    }

    pub fn threshold_policy(&self) -> ThresholdPolicy {
        ThresholdPolicy {
            max_temperature: self.fan.max_temperature,
            default_on: self.fan.percent_on,
            default_off: self.fan.percent_off,
            on_range: self.fan.on_range,
            off_range: self.fan.off_range,
        }
    }

    pub fn sampling_period(&self) -> Duration {
        Duration::from_secs(self.sampling.period_secs)
    }

    pub fn telemetry_period(&self) -> Duration {
        Duration::from_secs(self.thingspeak.period_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.sampling.period_secs, 5);
        assert_eq!(config.sampling.prescale_publish, 3);
        assert_eq!(config.sampling.prescale_triggers, 6);
        assert_eq!(config.thingspeak.period_secs, 60);
        assert_eq!(config.fan.percent_on, 85.0);
        assert_eq!(config.fan.percent_off, 75.0);
        assert_eq!(config.topics.command_fan_percon, "server/command/fan/percon");
        assert!(config.validate(true).is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = config_from(&[
            ("THERMOFAN_FAN_PIN", "PA13"),
            ("THERMOFAN_MQTT_HOST", "10.0.0.2"),
            ("THERMOFAN_MQTT_PORT", "1884"),
            ("THERMOFAN_BLYNK_ENABLED", "yes"),
            ("THERMOFAN_BLYNK_TOKEN", "token"),
            ("THERMOFAN_BLYNK_VPIN_FAN_BUTTON", "9"),
            ("THERMOFAN_TOPIC_STATUS_FAN", "rack/fan"),
        ]);
        assert_eq!(config.fan.pin.as_deref(), Some("PA13"));
        assert_eq!(config.mqtt.broker_host, "10.0.0.2");
        assert_eq!(config.mqtt.broker_port, 1884);
        assert!(config.blynk.enabled);
        assert_eq!(config.blynk.pins.fan_button, 9);
        assert_eq!(config.topics.status_fan, "rack/fan");
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("THERMOFAN_PERIOD", "soon"),
            ("THERMOFAN_MQTT_PORT", "99999"),
            ("THERMOFAN_THINGSPEAK_ENABLED", "maybe"),
        ]);
        assert_eq!(config.sampling.period_secs, 5);
        assert_eq!(config.mqtt.broker_port, 1883);
        assert!(!config.thingspeak.enabled);
    }

    #[test]
    fn test_sanitize_clamps() {
        let config = config_from(&[
            ("THERMOFAN_PERIOD", "600"),
            ("THERMOFAN_PRESCALE_PUBLISH", "0"),
            ("THERMOFAN_PRESCALE_TRIGGERS", "5000"),
            ("THERMOFAN_THINGSPEAK_PERIOD", "5"),
            ("THERMOFAN_SMOOTHING_FACTOR", "-3"),
            ("THERMOFAN_PERCENT_ON", "-90"),
        ]);
        assert_eq!(config.sampling.period_secs, 60);
        assert_eq!(config.sampling.prescale_publish, 1);
        assert_eq!(config.sampling.prescale_triggers, 1000);
        assert_eq!(config.thingspeak.period_secs, 15);
        assert_eq!(config.sampling.smoothing_factor, 0.2);
        assert_eq!(config.fan.percent_on, 90.0);
    }

    #[test]
    fn test_validate_reports_missing_options() {
        let config = config_from(&[]);
        assert!(matches!(
            config.validate(false),
            Err(ControllerError::Config(msg)) if msg.contains("fan pin")
        ));

        let config = config_from(&[("THERMOFAN_THINGSPEAK_ENABLED", "1")]);
        assert!(config.validate(true).is_err());

        let config = config_from(&[("THERMOFAN_BLYNK_ENABLED", "true")]);
        assert!(config.validate(true).is_err());
    }

    #[test]
    fn test_validate_rejects_overlapping_ranges() {
        let config = config_from(&[("THERMOFAN_PERCENT_OFF_MAX", "98")]);
        assert!(matches!(
            config.validate(true),
            Err(ControllerError::Config(_))
        ));
    }

    #[test]
    fn test_parse_dotenv() {
        let pairs = parse_dotenv(
            "# comment\n\nTHERMOFAN_FAN_PIN = PA13\nTHERMOFAN_BLYNK_TOKEN=\"a b c\"\nbroken line\nEMPTY=\n",
        );
        assert_eq!(
            pairs,
            vec![
                ("THERMOFAN_FAN_PIN".to_string(), "PA13".to_string()),
                ("THERMOFAN_BLYNK_TOKEN".to_string(), "a b c".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_config_serializes_to_json() {
        let json = serde_json::to_string_pretty(&Config::default()).unwrap();
        assert!(json.contains("\"prescale_triggers\": 6"));
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.blynk.pins, BlynkPins::default());
    }
}
