//! Blynk TCP session: login, heartbeat, pin requests and reconnects.

use super::protocol::{Frame, PinRequest, ProtocolError, STATUS_OK, read_frame};
use crate::config::BlynkConfig;
use crate::sinks::{AppBridge, SinkError};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum BlynkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("login rejected with status {0}")]
    LoginRejected(u16),

    #[error("no login response within {0:?}")]
    LoginTimeout(Duration),

    #[error("unexpected frame during login: {0:?}")]
    Unexpected(Frame),

    #[error("server silent for {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("connection closed")]
    Closed,
}

/// Inbound event from the app server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// A session was (re)established.
    Connected,
    /// A widget wrote a value to a virtual pin.
    Write { pin: u8, value: String },
    /// A widget asks for the value of a virtual pin.
    Read { pin: u8 },
}

impl From<PinRequest> for BridgeEvent {
    fn from(request: PinRequest) -> Self {
        match request {
            PinRequest::Write { pin, value } => BridgeEvent::Write { pin, value },
            PinRequest::Read { pin } => BridgeEvent::Read { pin },
        }
    }
}

/// Message id source shared by the session and its handles. Ids are never 0.
#[derive(Clone, Default)]
struct MessageIds(Arc<AtomicU16>);

impl MessageIds {
    fn next(&self) -> u16 {
        loop {
            let id = self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }
}

/// Cloneable writing side of a [`BlynkClient`].
#[derive(Clone)]
pub struct BlynkBridge {
    session: Arc<AtomicBool>,
    outbound: mpsc::Sender<Frame>,
    ids: MessageIds,
}

#[async_trait]
impl AppBridge for BlynkBridge {
    fn has_session(&self) -> bool {
        self.session.load(Ordering::SeqCst)
    }

    /// Queues the write for the session task.
    async fn virtual_write(&self, pin: u8, value: &str) -> Result<(), SinkError> {
        if !self.has_session() {
            return Err(SinkError::NoSession);
        }
        self.outbound
            .try_send(Frame::virtual_write(self.ids.next(), pin, value))
            .map_err(|e| SinkError::Client(e.to_string()))
    }
}

pub struct BlynkClient {
    host: String,
    port: u16,
    token: String,
    heartbeat: Duration,
    session: Arc<AtomicBool>,
    ids: MessageIds,
    outbound_tx: mpsc::Sender<Frame>,
    outbound_rx: mpsc::Receiver<Frame>,
}

impl BlynkClient {
    pub fn new(config: &BlynkConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        Self {
            host: config.host.clone(),
            port: config.port,
            token: config.auth_token.clone().unwrap_or_default(),
            heartbeat: Duration::from_secs(config.heartbeat_secs.max(1)),
            session: Arc::new(AtomicBool::new(false)),
            ids: MessageIds::default(),
            outbound_tx,
            outbound_rx,
        }
    }

    pub fn handle(&self) -> BlynkBridge {
        BlynkBridge {
            session: self.session.clone(),
            outbound: self.outbound_tx.clone(),
            ids: self.ids.clone(),
        }
    }

    /// Keep a session alive and forward app requests to `events`.
    ///
    /// Runs until the event channel closes.
    pub async fn run(mut self, events: mpsc::Sender<BridgeEvent>) {
        info!("[Blynk] Starting session loop for {}:{}", self.host, self.port);

        loop {
            let result = self.session(&events).await;
            self.session.store(false, Ordering::SeqCst);
            // Writes queued for a dead session are stale.
            while self.outbound_rx.try_recv().is_ok() {}

            match result {
                Ok(()) => {
                    info!("[Blynk] Event channel closed, stopping");
                    break;
                }
                Err(e) => error!("[Blynk] Session ended: {}", e),
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn session(&mut self, events: &mpsc::Sender<BridgeEvent>) -> Result<(), BlynkError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        let login = Frame::Login {
            id: self.ids.next(),
            token: self.token.clone(),
        };
        writer.write_all(&login.encode()).await?;
        let reply = tokio::time::timeout(LOGIN_TIMEOUT, read_frame(&mut reader))
            .await
            .map_err(|_| BlynkError::LoginTimeout(LOGIN_TIMEOUT))??;
        match reply {
            Frame::Response {
                status: STATUS_OK, ..
            } => {}
            Frame::Response { status, .. } => return Err(BlynkError::LoginRejected(status)),
            other => return Err(BlynkError::Unexpected(other)),
        }
        info!("[Blynk] Logged in to {}:{}", self.host, self.port);
        self.session.store(true, Ordering::SeqCst);
        if events.send(BridgeEvent::Connected).await.is_err() {
            return Ok(());
        }

        // Reading a frame is not cancel safe, so it gets its own task.
        let (frame_tx, mut frames) = mpsc::channel(16);
        let reader_task = tokio::spawn(async move {
            loop {
                let frame = read_frame(&mut reader).await;
                let failed = frame.is_err();
                if frame_tx.send(frame).await.is_err() || failed {
                    break;
                }
            }
        });

        let result = self.serve(&mut writer, &mut frames, events).await;
        reader_task.abort();
        result
    }

    async fn serve(
        &mut self,
        writer: &mut OwnedWriteHalf,
        frames: &mut mpsc::Receiver<Result<Frame, ProtocolError>>,
        events: &mpsc::Sender<BridgeEvent>,
    ) -> Result<(), BlynkError> {
        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let frame = frame.ok_or(BlynkError::Closed)??;
                    last_seen = Instant::now();
                    match frame {
                        Frame::Hardware { args, .. } => match PinRequest::from_args(&args) {
                            Some(request) => {
                                debug!("[Blynk] App request {:?}", request);
                                if events.send(request.into()).await.is_err() {
                                    return Ok(());
                                }
                            }
                            None => debug!("[Blynk] Ignoring hardware command {:?}", args),
                        },
                        Frame::Ping { id } => {
                            let pong = Frame::Response { id, status: STATUS_OK };
                            writer.write_all(&pong.encode()).await?;
                        }
                        Frame::Response { id, status } if status != STATUS_OK => {
                            warn!("[Blynk] Message {} answered with status {}", id, status);
                        }
                        other => debug!("[Blynk] Ignoring frame {:?}", other),
                    }
                }
                Some(frame) = self.outbound_rx.recv() => {
                    writer.write_all(&frame.encode()).await?;
                }
                _ = heartbeat.tick() => {
                    let silent = last_seen.elapsed();
                    if silent > self.heartbeat * 2 {
                        return Err(BlynkError::HeartbeatTimeout(silent));
                    }
                    writer.write_all(&Frame::Ping { id: self.ids.next() }.encode()).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlynkConfig, BlynkPins};
    use tokio::net::TcpListener;

    fn config(port: u16) -> BlynkConfig {
        BlynkConfig {
            enabled: true,
            auth_token: Some("secret".to_string()),
            host: "127.0.0.1".to_string(),
            port,
            heartbeat_secs: 10,
            pins: BlynkPins::default(),
        }
    }

    #[test]
    fn test_message_ids_skip_zero() {
        let ids = MessageIds(Arc::new(AtomicU16::new(u16::MAX - 1)));
        assert_eq!(ids.next(), u16::MAX);
        assert_eq!(ids.next(), 1);
    }

    #[tokio::test]
    async fn test_write_without_session_fails() {
        let client = BlynkClient::new(&config(1));
        let bridge = client.handle();
        assert!(!bridge.has_session());
        assert!(matches!(
            bridge.virtual_write(1, "255").await,
            Err(SinkError::NoSession)
        ));
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = BlynkClient::new(&config(port));
        let bridge = client.handle();
        let (events_tx, mut events) = mpsc::channel(8);
        let session = tokio::spawn(client.run(events_tx));

        let (mut server, _) = listener.accept().await.unwrap();
        let login = read_frame(&mut server).await.unwrap();
        assert!(matches!(login, Frame::Login { ref token, .. } if token == "secret"));
        server
            .write_all(&Frame::Response { id: login.id(), status: STATUS_OK }.encode())
            .await
            .unwrap();

        assert_eq!(events.recv().await, Some(BridgeEvent::Connected));

        // App presses the fan button.
        server
            .write_all(&Frame::virtual_write(7, 2, "1").encode())
            .await
            .unwrap();
        assert_eq!(
            events.recv().await,
            Some(BridgeEvent::Write {
                pin: 2,
                value: "1".to_string()
            })
        );
        assert!(bridge.has_session());

        bridge.virtual_write(1, "255").await.unwrap();
        let frame = read_frame(&mut server).await.unwrap();
        assert!(matches!(
            frame,
            Frame::Hardware { ref args, .. } if args == &["vw", "1", "255"]
        ));

        session.abort();
    }
}
