//! The fan controller context.
//!
//! Owns the smoothing filter, the actuator, the hysteresis state and the
//! publish coordinator, and wires them into scheduler tasks. Trigger
//! callbacks only enqueue fan commands; a worker task applies them, so
//! trigger evaluation never waits on the pin or on publishing.

use crate::config::Config;
use crate::control::{
    ActuatorController, ActuatorState, FanCommand, FanHysteresis, FanTrigger, SmoothingFilter,
    ThresholdPolicy, Thresholds, TriggerCallback,
};
use crate::hw::TemperatureSensor;
use crate::scheduler::{Scheduler, SchedulerError, TaskId, callback};
use crate::sinks::PublishCoordinator;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Scheduler tasks registered by [`Controller::register_tasks`].
#[derive(Debug, Clone, Copy)]
pub struct ControllerTasks {
    pub temperature: TaskId,
    pub telemetry: TaskId,
}

pub struct Controller {
    filter: Arc<SmoothingFilter>,
    sensor: Arc<dyn TemperatureSensor>,
    actuator: Arc<ActuatorController>,
    hysteresis: Mutex<FanHysteresis>,
    coordinator: Arc<PublishCoordinator>,
    fan_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FanCommand>>,
    running: CancellationToken,
}

impl Controller {
    pub fn new(
        filter: Arc<SmoothingFilter>,
        sensor: Arc<dyn TemperatureSensor>,
        actuator: Arc<ActuatorController>,
        policy: ThresholdPolicy,
        coordinator: Arc<PublishCoordinator>,
    ) -> Self {
        let (trigger_tx, fan_rx) = mpsc::unbounded_channel();
        let on_trigger: TriggerCallback<FanTrigger> =
            Arc::new(move |trigger: FanTrigger, value: f64| {
                let command = match trigger {
                    FanTrigger::On => FanCommand::On,
                    FanTrigger::Off => FanCommand::Off,
                };
                info!("[Trigger] Fan {} triggered at {}°C", command, value);
                if trigger_tx.send(command).is_err() {
                    warn!("[Trigger] Fan worker gone, dropping {}", command);
                }
            });

        Self {
            filter,
            sensor,
            actuator,
            hysteresis: Mutex::new(FanHysteresis::new(policy, on_trigger)),
            coordinator,
            fan_rx: tokio::sync::Mutex::new(fan_rx),
            running: CancellationToken::new(),
        }
    }

    pub fn filter(&self) -> &Arc<SmoothingFilter> {
        &self.filter
    }

    pub fn actuator(&self) -> &Arc<ActuatorController> {
        &self.actuator
    }

    pub fn coordinator(&self) -> &Arc<PublishCoordinator> {
        &self.coordinator
    }

    pub fn thresholds(&self) -> Thresholds {
        self.hysteresis.lock().thresholds()
    }

    /// Raw on/off levels in °C.
    pub fn raw_levels(&self) -> (f64, f64) {
        self.hysteresis.lock().raw_levels()
    }

    /// Cancelled once the process should stop.
    pub fn running(&self) -> CancellationToken {
        self.running.clone()
    }

    /// Request process shutdown.
    pub fn stop(&self) {
        info!("[Command] Stop requested");
        self.running.cancel();
    }

    /// Read the sensor and feed the filter.
    pub fn sample(&self) -> Option<f64> {
        let reading = match self.sensor.read() {
            Ok(reading) => reading,
            Err(e) => {
                error!("[Temp] Reading temperature failed: {}", e);
                return None;
            }
        };
        match self.filter.sample(reading.celsius) {
            Ok(smoothed) => {
                debug!(
                    "[Temp] Measured {}°C, smoothed {}°C",
                    reading.celsius, smoothed
                );
                Some(smoothed)
            }
            Err(e) => {
                warn!("[Temp] Dropping sample: {}", e);
                None
            }
        }
    }

    /// Evaluate the fan triggers against the smoothed temperature.
    /// Returns the number of triggers fired.
    pub fn evaluate_triggers(&self) -> usize {
        let Some(value) = self.filter.current() else {
            return 0;
        };
        self.hysteresis.lock().evaluate(value)
    }

    /// Apply a fan command and announce a resulting change to all sinks.
    pub async fn apply_fan(&self, command: FanCommand) -> Option<ActuatorState> {
        let changed = self.actuator.apply(command);
        if let Some(state) = changed {
            self.coordinator.announce_actuator_change(state).await;
        }
        changed
    }

    /// Change one or both threshold percentages and publish the result.
    pub async fn set_percentages(&self, on: Option<f64>, off: Option<f64>) -> Thresholds {
        let thresholds = self.hysteresis.lock().set_percentages(on, off);
        info!(
            "[Fan] Thresholds set to ON={}%, OFF={}%",
            thresholds.on_percent, thresholds.off_percent
        );
        self.coordinator.publish_thresholds(thresholds).await;
        thresholds
    }

    /// Restore the default percentages and publish them.
    pub async fn reset_thresholds(&self) -> Thresholds {
        let thresholds = self.hysteresis.lock().reset();
        info!(
            "[Fan] Thresholds reset to ON={}%, OFF={}%",
            thresholds.on_percent, thresholds.off_percent
        );
        self.coordinator.publish_thresholds(thresholds).await;
        thresholds
    }

    /// Apply every queued fan command. Returns how many were taken.
    pub async fn process_pending_fan_commands(&self) -> usize {
        let mut rx = self.fan_rx.lock().await;
        let mut processed = 0;
        while let Ok(command) = rx.try_recv() {
            self.apply_fan(command).await;
            processed += 1;
        }
        processed
    }

    /// Spawn the task applying queued fan commands until shutdown.
    pub fn spawn_fan_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            let mut rx = controller.fan_rx.lock().await;
            loop {
                tokio::select! {
                    _ = controller.running.cancelled() => break,
                    command = rx.recv() => match command {
                        Some(command) => {
                            controller.apply_fan(command).await;
                        }
                        None => break,
                    },
                }
            }
            debug!("[Fan] Fan worker stopped");
        })
    }

    /// Register the temperature and telemetry tasks.
    pub fn register_tasks(
        self: &Arc<Self>,
        scheduler: &mut Scheduler,
        config: &Config,
    ) -> Result<ControllerTasks, SchedulerError> {
        let controller = self.clone();
        let temperature = scheduler.register_task(
            "temperature",
            config.sampling_period(),
            callback(move || {
                let controller = controller.clone();
                async move {
                    controller.sample();
                }
            }),
        )?;

        let controller = self.clone();
        scheduler.add_prescaled(
            temperature,
            config.sampling.prescale_publish,
            callback(move || {
                let controller = controller.clone();
                async move { controller.coordinator.publish_temperature().await }
            }),
        )?;

        let controller = self.clone();
        scheduler.add_prescaled(
            temperature,
            config.sampling.prescale_triggers,
            callback(move || {
                let controller = controller.clone();
                async move {
                    controller.evaluate_triggers();
                }
            }),
        )?;

        let controller = self.clone();
        let telemetry = scheduler.register_task(
            "telemetry",
            config.telemetry_period(),
            callback(move || {
                let controller = controller.clone();
                async move { controller.coordinator.publish_telemetry(false).await }
            }),
        )?;

        Ok(ControllerTasks {
            temperature,
            telemetry,
        })
    }

    /// Initial state for the app once the sinks are wired.
    pub async fn publish_initial_state(&self) {
        self.coordinator.publish_actuator_status().await;
        self.coordinator.publish_thresholds(self.thresholds()).await;
    }

    /// Fan LED and thresholds for a freshly logged-in app session.
    pub async fn publish_bridge_state(&self) {
        self.coordinator.publish_bridge_status().await;
        self.coordinator.publish_thresholds(self.thresholds()).await;
    }
}
