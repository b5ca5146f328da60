//! Best-effort fan-out of temperature and fan state to every sink.
//!
//! Each sink call is guarded on its own: a disconnected sink is skipped
//! silently, a failing or slow one is logged and abandoned after the
//! publish timeout. No call is retried and no failure reaches the caller.

use super::{AppBridge, BrokerSink, SinkError, TelemetryBatch, TelemetrySink};
use crate::control::{ActuatorController, ActuatorState, SmoothingFilter, Thresholds};
use chrono::{Local, NaiveDateTime};
use log::{debug, error};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use strum::Display;
use tokio::time::Instant;

/// Broker topics the coordinator publishes to.
#[derive(Debug, Clone)]
pub struct PublishTopics {
    pub temperature: String,
    pub fan_status: String,
}

/// App bridge output channels.
#[derive(Debug, Clone, Copy)]
pub struct AppPins {
    pub temperature: u8,
    pub fan_led: u8,
    pub percent_on: u8,
    pub percent_off: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum SinkKind {
    #[strum(serialize = "MQTT")]
    Broker,
    #[strum(serialize = "ThingSpeak")]
    Telemetry,
    #[strum(serialize = "Blynk")]
    App,
}

/// What was last delivered to one sink. Only used to suppress duplicates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LastPublished {
    pub temperature: Option<f64>,
    pub fan: Option<ActuatorState>,
}

/// Cloud status line, e.g. `FAN-ON: 48.5°C Fri Oct 16 12:00:00 2026`.
pub fn status_line(state: ActuatorState, temperature: f64, at: NaiveDateTime) -> String {
    format!(
        "{}: {}°C {}",
        state.status(),
        temperature,
        at.format("%a %b %e %H:%M:%S %Y")
    )
}

pub struct PublishCoordinator {
    filter: Arc<SmoothingFilter>,
    actuator: Arc<ActuatorController>,
    topics: PublishTopics,
    pins: AppPins,
    timeout: Duration,
    broker: Option<Arc<dyn BrokerSink>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    bridge: Option<Arc<dyn AppBridge>>,
    last: Mutex<HashMap<SinkKind, LastPublished>>,
    /// Serializes change detection and delivery of telemetry batches.
    telemetry_gate: tokio::sync::Mutex<()>,
    /// When the telemetry sink last accepted a batch.
    telemetry_sent: Mutex<Option<Instant>>,
    /// A status line was held back by the sink's minimum interval.
    status_pending: AtomicBool,
}

impl PublishCoordinator {
    pub fn new(
        filter: Arc<SmoothingFilter>,
        actuator: Arc<ActuatorController>,
        topics: PublishTopics,
        pins: AppPins,
        timeout: Duration,
    ) -> Self {
        Self {
            filter,
            actuator,
            topics,
            pins,
            timeout,
            broker: None,
            telemetry: None,
            bridge: None,
            last: Mutex::new(HashMap::new()),
            telemetry_gate: tokio::sync::Mutex::new(()),
            telemetry_sent: Mutex::new(None),
            status_pending: AtomicBool::new(false),
        }
    }

    pub fn with_broker(mut self, broker: Arc<dyn BrokerSink>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn AppBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn last_published(&self, sink: SinkKind) -> LastPublished {
        self.last.lock().get(&sink).copied().unwrap_or_default()
    }

    /// Publish the smoothed temperature to the broker data topic.
    pub async fn publish_temperature(&self) {
        let Some(temperature) = self.filter.current() else {
            debug!("[MQTT] No temperature measured yet, nothing to publish");
            return;
        };
        let Some(broker) = self.connected_broker() else {
            return;
        };
        let payload = temperature.to_string();
        if self
            .guarded(
                SinkKind::Broker,
                broker.publish(&self.topics.temperature, &payload),
            )
            .await
        {
            debug!(
                "[MQTT] Published temperature {}°C to {}",
                temperature, self.topics.temperature
            );
            self.record(SinkKind::Broker, |last| last.temperature = Some(temperature));
        }
    }

    /// Publish the current fan state to the broker and the app LED.
    pub async fn publish_actuator_status(&self) {
        let state = self.actuator.state();
        tokio::join!(self.broker_status(state), self.bridge_led(state));
    }

    /// Write the current fan state to the app LED only.
    pub async fn publish_bridge_status(&self) {
        self.bridge_led(self.actuator.state()).await;
    }

    /// Fan-out after the actuator changed: broker status, a telemetry
    /// batch with status line and the app LED, all at once.
    pub async fn announce_actuator_change(&self, state: ActuatorState) {
        tokio::join!(
            self.broker_status(state),
            self.publish_telemetry(true),
            self.bridge_led(state)
        );
    }

    /// Publish a telemetry batch. The fan field is only included when the
    /// fan state differs from what this sink last received.
    ///
    /// A batch inside the sink's minimum interval is skipped without
    /// touching the recorded state, so the next accepted batch still
    /// carries the fan change and the status line.
    pub async fn publish_telemetry(&self, include_status: bool) {
        let Some(sink) = self.telemetry.as_ref().filter(|s| s.is_connected()) else {
            return;
        };
        let Some(temperature) = self.filter.current() else {
            debug!("[ThingSpeak] No temperature measured yet, nothing to publish");
            return;
        };

        let _gate = self.telemetry_gate.lock().await;
        let last_sent = *self.telemetry_sent.lock();
        if let Some(sent) = last_sent
            && sent.elapsed() < sink.min_interval()
        {
            if include_status {
                self.status_pending.store(true, Ordering::SeqCst);
            }
            debug!(
                "[ThingSpeak] Last batch {:?} ago, within the {:?} minimum interval",
                sent.elapsed(),
                sink.min_interval()
            );
            return;
        }

        let include_status = include_status || self.status_pending.load(Ordering::SeqCst);
        let state = self.actuator.state();
        let previous = self.last_published(SinkKind::Telemetry).fan;
        let changed = previous.is_some_and(|p| p != state);
        if changed {
            debug!(
                "[ThingSpeak] Fan state change {:?} -> {} detected",
                previous, state
            );
        }

        let batch = TelemetryBatch {
            temperature,
            fan: changed.then(|| state.as_number()),
            status: include_status
                .then(|| status_line(state, temperature, Local::now().naive_local())),
        };

        if self.guarded(SinkKind::Telemetry, sink.publish(&batch)).await {
            debug!("[ThingSpeak] Published {:?}", batch);
            *self.telemetry_sent.lock() = Some(Instant::now());
            if include_status {
                self.status_pending.store(false, Ordering::SeqCst);
            }
            self.record(SinkKind::Telemetry, |last| {
                last.temperature = Some(temperature);
                last.fan = Some(state);
            });
        }
    }

    /// Write the current threshold percentages to the app.
    pub async fn publish_thresholds(&self, thresholds: Thresholds) {
        let Some(bridge) = self.session() else {
            return;
        };
        let on = thresholds.on_percent.to_string();
        if !self
            .guarded(SinkKind::App, bridge.virtual_write(self.pins.percent_on, &on))
            .await
        {
            return;
        }
        let off = thresholds.off_percent.to_string();
        if self
            .guarded(SinkKind::App, bridge.virtual_write(self.pins.percent_off, &off))
            .await
        {
            debug!(
                "[Blynk] Published fan percentages ON={}%, OFF={}%",
                thresholds.on_percent, thresholds.off_percent
            );
        }
    }

    /// Answer an app read request on the temperature channel.
    pub async fn publish_bridge_temperature(&self) {
        let Some(temperature) = self.filter.current() else {
            return;
        };
        let Some(bridge) = self.session() else {
            return;
        };
        let value = temperature.to_string();
        let write = bridge.virtual_write(self.pins.temperature, &value);
        if self.guarded(SinkKind::App, write).await {
            self.record(SinkKind::App, |last| last.temperature = Some(temperature));
        }
    }

    async fn broker_status(&self, state: ActuatorState) {
        let Some(broker) = self.connected_broker() else {
            return;
        };
        if self
            .guarded(
                SinkKind::Broker,
                broker.publish(&self.topics.fan_status, state.status()),
            )
            .await
        {
            debug!(
                "[MQTT] Published fan status {} to {}",
                state.status(),
                self.topics.fan_status
            );
            self.record(SinkKind::Broker, |last| last.fan = Some(state));
        }
    }

    async fn bridge_led(&self, state: ActuatorState) {
        let Some(bridge) = self.session() else {
            return;
        };
        let value = state.led_value().to_string();
        let write = bridge.virtual_write(self.pins.fan_led, &value);
        if self.guarded(SinkKind::App, write).await {
            debug!("[Blynk] Published fan status {}", state);
            self.record(SinkKind::App, |last| last.fan = Some(state));
        }
    }

    fn connected_broker(&self) -> Option<&Arc<dyn BrokerSink>> {
        self.broker.as_ref().filter(|b| b.is_connected())
    }

    fn session(&self) -> Option<&Arc<dyn AppBridge>> {
        self.bridge.as_ref().filter(|b| b.has_session())
    }

    fn record(&self, sink: SinkKind, update: impl FnOnce(&mut LastPublished)) {
        update(self.last.lock().entry(sink).or_default());
    }

    async fn guarded<F>(&self, sink: SinkKind, publish: F) -> bool
    where
        F: Future<Output = Result<(), SinkError>>,
    {
        let result = match tokio::time::timeout(self.timeout, publish).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(self.timeout)),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("[{}] Publishing failed: {}", sink, e);
                false
            }
        }
    }
}
