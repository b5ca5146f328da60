use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use thermofan::command::{CommandRouter, RouteTable};
use thermofan::config::{self, Config};
use thermofan::control::{ActuatorController, SmoothingFilter};
use thermofan::controller::Controller;
use thermofan::error::{ControllerError, Result};
use thermofan::hw::{
    MemoryPin, OutputPin, SimulatedSensor, SysfsPin, TemperatureSensor, ThermalZone,
};
use thermofan::instance_lock::InstanceLock;
use thermofan::scheduler::Scheduler;
use thermofan::sinks::blynk::BlynkClient;
use thermofan::sinks::mqtt::MqttClient;
use thermofan::sinks::thingspeak::ThingSpeakSink;
use thermofan::sinks::{AppPins, PublishCoordinator, PublishTopics};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Starting temperature of the simulated sensor.
const SIMULATED_START: f64 = 45.0;
/// How far the simulated sensor overshoots the switching levels, in °C.
const SIMULATED_MARGIN: f64 = 5.0;

#[derive(Parser)]
#[command(name = "thermofan")]
#[command(about = "Temperature driven fan controller with MQTT, ThingSpeak and Blynk reporting")]
struct Cli {
    /// Log filter, e.g. `info` or `thermofan=debug`
    #[arg(long, env = "THERMOFAN_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Drive an in-memory pin and a synthetic sensor instead of hardware
    #[arg(long)]
    simulate: bool,

    /// Environment file loaded before configuration is read
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

fn init_logger(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn main() {
    let cli = Cli::parse();
    config::load_dotenv(&cli.env_file);
    init_logger(&cli.log_level);

    let config = Config::from_env();
    if cli.print_config {
        if let Err(e) = print_config(&config) {
            error!("{}", e);
            std::process::exit(1);
        }
        return;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config, cli.simulate)) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn print_config(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

async fn run(config: Config, simulate: bool) -> Result<()> {
    info!("Starting thermofan");
    config.validate(simulate)?;
    let _lock = InstanceLock::acquire()?;

    let (pin, sensor): (Box<dyn OutputPin>, Arc<dyn TemperatureSensor>) = if simulate {
        warn!("Simulation mode: no hardware is touched");
        let pin = MemoryPin::new("simulated", false);
        // Swing past both switching levels so the fan actually cycles.
        let policy = config.threshold_policy();
        let sensor = SimulatedSensor::new(SIMULATED_START, pin.level()).with_targets(
            policy.to_raw(policy.off_range.min) - SIMULATED_MARGIN,
            policy.to_raw(policy.on_range.max) + SIMULATED_MARGIN,
        );
        (Box::new(pin), Arc::new(sensor))
    } else {
        let name = config
            .fan
            .pin
            .clone()
            .ok_or_else(|| ControllerError::Config("THERMOFAN_FAN_PIN is not set".into()))?;
        if !nix::unistd::geteuid().is_root() {
            return Err(ControllerError::PrivilegeRequired(name));
        }
        let pin = SysfsPin::open(&name)?;
        let sensor = ThermalZone::new(config.fan.thermal_zone.clone());
        (Box::new(pin), Arc::new(sensor))
    };

    let filter = Arc::new(SmoothingFilter::new(
        config.sampling.smoothing_factor,
        config.sampling.decimals,
    ));
    let actuator = Arc::new(ActuatorController::new(pin));
    info!("Fan is {}", actuator.state());

    let routes = RouteTable::from_config(
        &config.topics,
        config.blynk.enabled.then_some(&config.blynk.pins),
    );
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Local broker: status publishing and the command topics.
    let (broker_tx, broker_rx) = mpsc::channel(100);
    let mqtt = MqttClient::new(&config.mqtt).with_subscriptions(routes.broker_topics());
    let mut coordinator = PublishCoordinator::new(
        filter.clone(),
        actuator.clone(),
        PublishTopics {
            temperature: config.topics.data_temp.clone(),
            fan_status: config.topics.status_fan.clone(),
        },
        AppPins {
            temperature: config.blynk.pins.temperature,
            fan_led: config.blynk.pins.fan_led,
            percent_on: config.blynk.pins.percent_on,
            percent_off: config.blynk.pins.percent_off,
        },
        config.publish_timeout(),
    )
    .with_broker(Arc::new(mqtt.handle()));
    tasks.push(tokio::spawn(mqtt.run(Some(broker_tx))));

    if config.thingspeak.enabled
        && let Some(channel_id) = &config.thingspeak.channel_id
    {
        let client = MqttClient::new(&config.thingspeak.mqtt).with_label("ThingSpeak");
        let sink = ThingSpeakSink::new(
            Arc::new(client.handle()),
            channel_id,
            config.thingspeak.field_temp,
            config.thingspeak.field_fan,
        );
        info!("[ThingSpeak] Publishing to {}", sink.topic());
        coordinator = coordinator.with_telemetry(Arc::new(sink));
        tasks.push(tokio::spawn(client.run(None)));
    }

    let mut bridge_rx = None;
    if config.blynk.enabled {
        let client = BlynkClient::new(&config.blynk);
        let (events_tx, events_rx) = mpsc::channel(32);
        coordinator = coordinator.with_bridge(Arc::new(client.handle()));
        tasks.push(tokio::spawn(client.run(events_tx)));
        bridge_rx = Some(events_rx);
    }

    let controller = Arc::new(Controller::new(
        filter,
        sensor,
        actuator,
        config.threshold_policy(),
        Arc::new(coordinator),
    ));
    let thresholds = controller.thresholds();
    let (on_level, off_level) = controller.raw_levels();
    info!(
        "Fan switches on at {}% ({:.1}°C) and off at {}% ({:.1}°C)",
        thresholds.on_percent, on_level, thresholds.off_percent, off_level
    );

    let router = Arc::new(CommandRouter::new(routes, controller.clone()));
    tasks.push(tokio::spawn(router.clone().run_broker(broker_rx)));
    if let Some(rx) = bridge_rx {
        tasks.push(tokio::spawn(router.run_bridge(rx)));
    }
    tasks.push(controller.spawn_fan_worker());

    let mut scheduler = Scheduler::new();
    controller.register_tasks(&mut scheduler, &config)?;
    scheduler.start()?;
    controller.publish_initial_state().await;

    info!("thermofan is running");
    info!("  - Press Ctrl+C to exit");

    let running = controller.running();
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = running.cancelled() => info!("Stopping on command"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        },
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    controller.stop();
    scheduler.stop_all().await;
    for task in tasks {
        task.abort();
    }

    info!("thermofan finished");
    Ok(())
}
