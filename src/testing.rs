//! Recording doubles shared by the unit tests.

use crate::control::{ActuatorController, PercentRange, SmoothingFilter, ThresholdPolicy};
use crate::hw::{HwError, OutputPin, TemperatureSensor};
use crate::sinks::{
    AppBridge, AppPins, BrokerSink, PublishCoordinator, PublishTopics, SinkError, TelemetryBatch,
    TelemetrySink,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Shared counter handle.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Shared boolean switch handle.
#[derive(Debug, Clone, Default)]
pub struct Flag(Arc<AtomicBool>);

impl Flag {
    pub fn new(value: bool) -> Self {
        Self(Arc::new(AtomicBool::new(value)))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::SeqCst);
    }
}

fn injected(what: &str) -> HwError {
    HwError::io(what, std::io::Error::other("injected failure"))
}

/// Output pin counting its writes, with switchable I/O failure.
pub struct CountingPin {
    level: Flag,
    writes: Counter,
    failing: Flag,
}

impl CountingPin {
    pub fn new(on: bool) -> Self {
        Self {
            level: Flag::new(on),
            writes: Counter::default(),
            failing: Flag::default(),
        }
    }

    pub fn writes(&self) -> Counter {
        self.writes.clone()
    }

    pub fn failing(&self) -> Flag {
        self.failing.clone()
    }
}

impl OutputPin for CountingPin {
    fn name(&self) -> &str {
        "counting"
    }

    fn is_on(&self) -> Result<bool, HwError> {
        if self.failing.get() {
            return Err(injected("counting/value"));
        }
        Ok(self.level.get())
    }

    fn set(&mut self, on: bool) -> Result<(), HwError> {
        if self.failing.get() {
            return Err(injected("counting/value"));
        }
        self.writes.incr();
        self.level.set(on);
        Ok(())
    }
}

/// Sensor replaying a fixed list of readings, failing once exhausted.
pub struct FixedSensor {
    readings: Mutex<VecDeque<f64>>,
}

impl FixedSensor {
    pub fn new(readings: &[f64]) -> Self {
        Self {
            readings: Mutex::new(readings.iter().copied().collect()),
        }
    }
}

impl TemperatureSensor for FixedSensor {
    fn read_celsius(&self) -> Result<f64, HwError> {
        self.readings.lock().pop_front().ok_or_else(|| HwError::Parse {
            path: "fixed".into(),
            value: "exhausted".to_string(),
        })
    }
}

pub struct RecordingBroker {
    pub connected: Flag,
    pub failing: Flag,
    published: Mutex<Vec<(String, String)>>,
}

impl RecordingBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: Flag::new(true),
            failing: Flag::default(),
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl BrokerSink for RecordingBroker {
    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), SinkError> {
        if self.failing.get() {
            return Err(SinkError::Client("injected failure".to_string()));
        }
        self.published
            .lock()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

/// Broker that accepts publishes and never completes them.
pub struct StalledBroker {
    pub attempts: Counter,
}

#[async_trait]
impl BrokerSink for StalledBroker {
    fn is_connected(&self) -> bool {
        true
    }

    async fn publish(&self, _topic: &str, _payload: &str) -> Result<(), SinkError> {
        self.attempts.incr();
        std::future::pending().await
    }
}

pub struct RecordingTelemetry {
    pub connected: Flag,
    pub failing: Flag,
    min_interval: Duration,
    batches: Mutex<Vec<TelemetryBatch>>,
}

impl RecordingTelemetry {
    /// Accepts batches at any rate.
    pub fn new() -> Arc<Self> {
        Self::with_min_interval(Duration::ZERO)
    }

    pub fn with_min_interval(min_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            connected: Flag::new(true),
            failing: Flag::default(),
            min_interval,
            batches: Mutex::new(Vec::new()),
        })
    }

    pub fn batches(&self) -> Vec<TelemetryBatch> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl TelemetrySink for RecordingTelemetry {
    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    fn min_interval(&self) -> Duration {
        self.min_interval
    }

    async fn publish(&self, batch: &TelemetryBatch) -> Result<(), SinkError> {
        if self.failing.get() {
            return Err(SinkError::Client("injected failure".to_string()));
        }
        self.batches.lock().push(batch.clone());
        Ok(())
    }
}

pub struct RecordingBridge {
    pub session: Flag,
    writes: Mutex<Vec<(u8, String)>>,
}

impl RecordingBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            session: Flag::new(true),
            writes: Mutex::new(Vec::new()),
        })
    }

    pub fn writes(&self) -> Vec<(u8, String)> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl AppBridge for RecordingBridge {
    fn has_session(&self) -> bool {
        self.session.get()
    }

    async fn virtual_write(&self, pin: u8, value: &str) -> Result<(), SinkError> {
        self.writes.lock().push((pin, value.to_string()));
        Ok(())
    }
}

pub fn policy() -> ThresholdPolicy {
    ThresholdPolicy {
        max_temperature: 100.0,
        default_on: 85.0,
        default_off: 75.0,
        on_range: PercentRange::new(80.0, 95.0),
        off_range: PercentRange::new(60.0, 75.0),
    }
}

pub fn topics() -> PublishTopics {
    PublishTopics {
        temperature: "server/data/temp".to_string(),
        fan_status: "server/status/fan".to_string(),
    }
}

pub fn pins() -> AppPins {
    AppPins {
        temperature: 0,
        fan_led: 1,
        percent_on: 3,
        percent_off: 4,
    }
}

/// A coordinator wired to recording sinks over a counting pin.
pub struct Fixture {
    pub filter: Arc<SmoothingFilter>,
    pub actuator: Arc<ActuatorController>,
    pub pin_writes: Counter,
    pub pin_failing: Flag,
    pub broker: Arc<RecordingBroker>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub bridge: Arc<RecordingBridge>,
    pub coordinator: Arc<PublishCoordinator>,
}

impl Fixture {
    pub const TIMEOUT: Duration = Duration::from_millis(200);

    pub fn new(pin_on: bool) -> Self {
        Self::build(pin_on, true, None, Self::TIMEOUT)
    }

    pub fn without_bridge(pin_on: bool) -> Self {
        Self::build(pin_on, false, None, Self::TIMEOUT)
    }

    /// Telemetry sink rejecting batches closer than `interval`.
    pub fn with_telemetry_interval(interval: Duration) -> Self {
        Self::build_with(
            false,
            true,
            None,
            Self::TIMEOUT,
            RecordingTelemetry::with_min_interval(interval),
        )
    }

    pub fn with_stalled_broker(pin_on: bool, timeout: Duration) -> Self {
        let stalled = Arc::new(StalledBroker {
            attempts: Counter::default(),
        });
        Self::build(pin_on, true, Some(stalled), timeout)
    }

    fn build(
        pin_on: bool,
        with_bridge: bool,
        stalled: Option<Arc<StalledBroker>>,
        timeout: Duration,
    ) -> Self {
        Self::build_with(pin_on, with_bridge, stalled, timeout, RecordingTelemetry::new())
    }

    fn build_with(
        pin_on: bool,
        with_bridge: bool,
        stalled: Option<Arc<StalledBroker>>,
        timeout: Duration,
        telemetry: Arc<RecordingTelemetry>,
    ) -> Self {
        let pin = CountingPin::new(pin_on);
        let pin_writes = pin.writes();
        let pin_failing = pin.failing();
        let filter = Arc::new(SmoothingFilter::new(0.2, 3));
        let actuator = Arc::new(ActuatorController::new(Box::new(pin)));
        let broker = RecordingBroker::new();
        let bridge = RecordingBridge::new();

        let broker_sink: Arc<dyn BrokerSink> = match stalled {
            Some(stalled) => stalled,
            None => broker.clone(),
        };
        let mut coordinator =
            PublishCoordinator::new(filter.clone(), actuator.clone(), topics(), pins(), timeout)
                .with_broker(broker_sink)
                .with_telemetry(telemetry.clone());
        if with_bridge {
            coordinator = coordinator.with_bridge(bridge.clone());
        }

        Self {
            filter,
            actuator,
            pin_writes,
            pin_failing,
            broker,
            telemetry,
            bridge,
            coordinator: Arc::new(coordinator),
        }
    }
}
