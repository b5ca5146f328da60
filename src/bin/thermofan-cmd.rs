//! Send commands to a running thermofan through the MQTT broker.
//!
//! Usage:
//!   thermofan-cmd on
//!   thermofan-cmd percon 90
//!   thermofan-cmd exit
//!
//! Broker address and topics come from the same environment as the
//! controller itself.

use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;
use thermofan::config::{self, Config};
use thermofan::sinks::BrokerSink;
use thermofan::sinks::mqtt::MqttClient;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "thermofan-cmd")]
#[command(about = "Send a command to a running thermofan")]
struct Cli {
    /// Environment file loaded before configuration is read
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Switch the fan on
    On,
    /// Switch the fan off
    Off,
    /// Toggle the fan
    Toggle,
    /// Restore the default thresholds
    Reset,
    /// Stop the controller
    Exit,
    /// Set the fan-on threshold in percent of the maximum temperature
    Percon { value: f64 },
    /// Set the fan-off threshold in percent of the maximum temperature
    Percoff { value: f64 },
}

impl Commands {
    /// Topic and payload for this command.
    fn message(&self, config: &Config) -> (String, String) {
        let topics = &config.topics;
        match self {
            Commands::On => (topics.command_fan.clone(), "ON".into()),
            Commands::Off => (topics.command_fan.clone(), "OFF".into()),
            Commands::Toggle => (topics.command_fan.clone(), "TOGGLE".into()),
            Commands::Reset => (topics.command_fan.clone(), "RESET".into()),
            Commands::Exit => (topics.command.clone(), "EXIT".into()),
            Commands::Percon { value } => (topics.command_fan_percon.clone(), value.to_string()),
            Commands::Percoff { value } => {
                (topics.command_fan_percoff.clone(), value.to_string())
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    config::load_dotenv(&cli.env_file);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = Config::from_env();
    config.mqtt.client_id = format!("{}-cmd", config.mqtt.client_id);
    let (topic, payload) = cli.command.message(&config);

    let client = MqttClient::new(&config.mqtt);
    let broker = client.handle();
    let event_loop = tokio::spawn(client.run(None));

    let connected = tokio::time::timeout(CONNECT_TIMEOUT, async {
        while !broker.is_connected() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if connected.is_err() {
        error!(
            "Could not reach MQTT broker at {}:{}",
            config.mqtt.broker_host, config.mqtt.broker_port
        );
        std::process::exit(1);
    }

    if let Err(e) = broker.publish(&topic, &payload).await {
        error!("Failed to publish {} to {}: {}", payload, topic, e);
        std::process::exit(1);
    }
    info!("Sent {} to {}", payload, topic);

    // Give the event loop a moment to flush the outgoing packet.
    tokio::time::sleep(Duration::from_millis(500)).await;
    event_loop.abort();
}
