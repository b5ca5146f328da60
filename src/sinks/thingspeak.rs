//! ThingSpeak channel updates over its MQTT API.
//!
//! One batch is one message on `channels/<id>/publish` with a form encoded
//! body such as `field1=48.5&field2=1&status=...`.

use super::{BrokerSink, SinkError, TelemetryBatch, TelemetrySink};
use async_trait::async_trait;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

/// ThingSpeak drops channel updates arriving faster than this.
pub const MIN_INTERVAL: Duration = Duration::from_secs(15);

pub struct ThingSpeakSink {
    broker: Arc<dyn BrokerSink>,
    topic: String,
    field_temp: u8,
    field_fan: u8,
}

impl ThingSpeakSink {
    pub fn new(broker: Arc<dyn BrokerSink>, channel_id: &str, field_temp: u8, field_fan: u8) -> Self {
        Self {
            broker,
            topic: format!("channels/{}/publish", channel_id),
            field_temp,
            field_fan,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Form encoded message body for one batch.
    pub fn payload(&self, batch: &TelemetryBatch) -> String {
        let mut payload = format!("field{}={}", self.field_temp, batch.temperature);
        if let Some(fan) = batch.fan {
            let _ = write!(payload, "&field{}={}", self.field_fan, fan);
        }
        if let Some(status) = &batch.status {
            payload.push_str("&status=");
            form_encode(status, &mut payload);
        }
        payload
    }
}

#[async_trait]
impl TelemetrySink for ThingSpeakSink {
    fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    fn min_interval(&self) -> Duration {
        MIN_INTERVAL
    }

    async fn publish(&self, batch: &TelemetryBatch) -> Result<(), SinkError> {
        self.broker.publish(&self.topic, &self.payload(batch)).await
    }
}

/// `application/x-www-form-urlencoded` encoding of `value` into `out`.
fn form_encode(value: &str, out: &mut String) {
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => {
                let _ = write!(out, "%{:02X}", byte);
            }
        }
    }
}
