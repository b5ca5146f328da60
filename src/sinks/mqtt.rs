//! MQTT client wrapper for the local broker and the ThingSpeak MQTT API.

use super::{BrokerSink, SinkError};
use crate::config::MqttConfig;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Message received from MQTT broker.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

/// MQTT connection plus the topics to (re)subscribe on every connect.
pub struct MqttClient {
    client: AsyncClient,
    event_loop: EventLoop,
    connected: Arc<AtomicBool>,
    subscriptions: Vec<String>,
    label: &'static str,
}

impl MqttClient {
    /// Create a new MQTT client from configuration.
    pub fn new(config: &MqttConfig) -> Self {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(30));

        // Set credentials if provided
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 100);

        Self {
            client,
            event_loop,
            connected: Arc::new(AtomicBool::new(false)),
            subscriptions: Vec::new(),
            label: "MQTT",
        }
    }

    /// Topics subscribed after every successful connect.
    pub fn with_subscriptions(mut self, topics: Vec<String>) -> Self {
        self.subscriptions = topics;
        self
    }

    /// Log prefix, for clients talking to something else than the local broker.
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Publishing handle for other tasks.
    pub fn handle(&self) -> MqttBroker {
        MqttBroker {
            client: self.client.clone(),
            connected: self.connected.clone(),
        }
    }

    /// Run the MQTT event loop and forward messages to the provided channel.
    ///
    /// Runs until the message channel closes. Connection errors are retried
    /// every 5 seconds; rumqttc reconnects on the next poll.
    pub async fn run(mut self, tx: Option<mpsc::Sender<MqttMessage>>) {
        info!("[{}] Starting MQTT event loop", self.label);

        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        info!("[{}] Connected to broker", self.label);
                        self.connected.store(true, Ordering::SeqCst);
                        self.subscribe_all();
                    } else {
                        error!("[{}] Connection refused: {:?}", self.label, ack.code);
                        self.connected.store(false, Ordering::SeqCst);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let Some(tx) = &tx else {
                        continue;
                    };
                    let payload = match String::from_utf8(publish.payload.to_vec()) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("[{}] Invalid UTF-8 in MQTT payload: {}", self.label, e);
                            continue;
                        }
                    };

                    debug!(
                        "[{}] Received MQTT message on {}: {}",
                        self.label, publish.topic, payload
                    );

                    let msg = MqttMessage {
                        topic: publish.topic,
                        payload,
                    };
                    if tx.send(msg).await.is_err() {
                        error!("[{}] MQTT message channel closed", self.label);
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("[{}] Broker closed the connection", self.label);
                    self.connected.store(false, Ordering::SeqCst);
                }
                Ok(_) => {}
                Err(e) => {
                    if self.connected.swap(false, Ordering::SeqCst) {
                        warn!("[{}] Disconnected from broker", self.label);
                    }
                    error!("[{}] MQTT connection error: {:?}", self.label, e);
                    // Wait before reconnecting
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    fn subscribe_all(&self) {
        for topic in &self.subscriptions {
            match self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                Ok(()) => debug!("[{}] Subscribed to {}", self.label, topic),
                Err(e) => warn!("[{}] Failed to subscribe to {}: {}", self.label, topic, e),
            }
        }
    }
}

/// Cloneable publishing side of an [`MqttClient`].
#[derive(Clone)]
pub struct MqttBroker {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerSink for MqttBroker {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queues the message without waiting for the event loop.
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::NotConnected);
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| SinkError::Client(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn config() -> MqttConfig {
        MqttConfig {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "thermofan-test".to_string(),
            username: None,
            password: None,
        }
    }

    #[tokio::test]
    async fn test_publish_before_connect_is_rejected() {
        let client = MqttClient::new(&config()).with_subscriptions(vec!["a/b".to_string()]);
        let broker = client.handle();

        assert!(!broker.is_connected());
        assert!(matches!(
            broker.publish("server/data/temp", "48.5").await,
            Err(SinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connected_publish_is_queued() {
        let client = MqttClient::new(&config());
        let broker = client.handle();
        client.connected.store(true, Ordering::SeqCst);

        assert_ok!(broker.publish("server/status/fan", "FAN-ON").await);
    }
}
