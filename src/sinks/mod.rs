//! Publish sinks and the coordinator that fans data out to them.
//!
//! Three independent consumers receive the controller's data:
//! - `mqtt`: the local broker (temperature, fan status, inbound commands)
//! - `thingspeak`: cloud telemetry fields plus an optional status line
//! - `blynk`: the mobile app bridge with its virtual pins
//!
//! The coordinator only sees the capability traits below.

pub mod blynk;
pub mod coordinator;
pub mod mqtt;
pub mod thingspeak;

pub use coordinator::{AppPins, LastPublished, PublishCoordinator, PublishTopics, SinkKind};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single publish attempt. Never retried.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink is not connected")]
    NotConnected,

    #[error("no app session")]
    NoSession,

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("client error: {0}")]
    Client(String),
}

/// Message broker capability.
#[async_trait]
pub trait BrokerSink: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), SinkError>;
}

/// One batch for the cloud telemetry sink.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryBatch {
    pub temperature: f64,
    /// Fan state as a number, only present when it changed.
    pub fan: Option<u8>,
    /// Free text channel status.
    pub status: Option<String>,
}

/// Cloud telemetry capability.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// The service rejects updates more frequent than this.
    fn min_interval(&self) -> Duration;

    async fn publish(&self, batch: &TelemetryBatch) -> Result<(), SinkError>;
}

/// Mobile app bridge capability.
#[async_trait]
pub trait AppBridge: Send + Sync {
    /// Whether a logged-in session with the app server exists.
    fn has_session(&self) -> bool;

    async fn virtual_write(&self, pin: u8, value: &str) -> Result<(), SinkError>;
}
