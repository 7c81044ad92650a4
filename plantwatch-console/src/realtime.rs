//! Realtime telemetry stream
//!
//! One Socket.IO connection per [`RealtimeHandle`]. The handle owns the
//! supervisor task; dropping it tears the connection down.
//!
//! Published through `watch` channels (latest value only, no queue):
//! - connection state
//! - latest normalized metric (`new_metric`)
//! - latest weather report (`weather_update`)
//!
//! Reconnect policy: after a lost or failed connection the supervisor waits
//! `reconnect_delay` and tries again, at most `reconnect_attempts` times in a
//! row. A connection that reached `Connected` resets the count. Once
//! exhausted the handle stays `Disconnected` until [`RealtimeHandle::restart`].

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::ConsoleConfig;
use crate::engineio::{EnginePacket, ProtocolError, SocketPacket};
use crate::models::{MetricRecord, WeatherReport};
use crate::normalize::normalize_value;

pub const METRIC_EVENT: &str = "new_metric";
pub const WEATHER_EVENT: &str = "weather_update";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("unexpected first frame: {0}")]
    Handshake(String),
    #[error("connection refused by server: {0}")]
    Refused(String),
    #[error("no frame from server within {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct RealtimeOptions {
    pub url: String,
    pub namespace: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// Bound on the websocket upgrade and the engine handshake
    pub connect_timeout: Duration,
}

impl RealtimeOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: "/".to_string(),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(20),
        }
    }
}

impl From<&ConsoleConfig> for RealtimeOptions {
    fn from(config: &ConsoleConfig) -> Self {
        Self {
            url: config.socket_url(),
            namespace: "/".to_string(),
            reconnect_attempts: config.realtime.reconnect_attempts,
            reconnect_delay: config.reconnect_delay(),
            connect_timeout: config.api.timeout(),
        }
    }
}

struct Channels {
    state: watch::Sender<ConnectionState>,
    metric: watch::Sender<Option<MetricRecord>>,
    weather: watch::Sender<Option<WeatherReport>>,
    exhausted: AtomicBool,
}

impl Channels {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }
}

/// How a session that did not fail ended
enum SessionEnd {
    /// Server sent a namespace disconnect; not retried
    ServerDisconnect,
}

pub struct RealtimeHandle {
    options: RealtimeOptions,
    channels: Arc<Channels>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeHandle {
    /// Start connecting in the background
    pub fn spawn(options: RealtimeOptions) -> Self {
        let channels = Arc::new(Channels {
            state: watch::channel(ConnectionState::Disconnected).0,
            metric: watch::channel(None).0,
            weather: watch::channel(None).0,
            exhausted: AtomicBool::new(false),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervise(options.clone(), channels.clone(), shutdown_rx));
        Self {
            options,
            channels,
            shutdown,
            task: Some(task),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.channels.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True once the reconnect budget ran out
    pub fn is_exhausted(&self) -> bool {
        self.channels.exhausted.load(Ordering::SeqCst)
    }

    pub fn latest_metric(&self) -> Option<MetricRecord> {
        self.channels.metric.borrow().clone()
    }

    pub fn latest_weather(&self) -> Option<WeatherReport> {
        self.channels.weather.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.channels.state.subscribe()
    }

    pub fn subscribe_metrics(&self) -> watch::Receiver<Option<MetricRecord>> {
        self.channels.metric.subscribe()
    }

    pub fn subscribe_weather(&self) -> watch::Receiver<Option<WeatherReport>> {
        self.channels.weather.subscribe()
    }

    /// Spawn a fresh supervisor once the previous one has given up or the
    /// server closed the session. Returns false when a connection is still
    /// being managed.
    pub fn restart(&mut self) -> bool {
        let running = self.task.as_ref().is_some_and(|task| !task.is_finished());
        if running && !self.is_exhausted() {
            return false;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        info!("restarting realtime stream");
        self.channels.exhausted.store(false, Ordering::SeqCst);
        let (shutdown, shutdown_rx) = watch::channel(false);
        self.shutdown = shutdown;
        self.task = Some(tokio::spawn(supervise(self.options.clone(), self.channels.clone(), shutdown_rx)));
        true
    }

    /// Close the connection and wait for the supervisor to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("realtime supervisor ended abnormally: {e}");
            }
        }
        self.channels.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.channels.set_state(ConnectionState::Disconnected);
    }
}

async fn supervise(options: RealtimeOptions, channels: Arc<Channels>, mut shutdown: watch::Receiver<bool>) {
    let mut failures = 0u32;

    loop {
        channels.set_state(ConnectionState::Connecting);
        let mut established = false;

        let outcome = tokio::select! {
            outcome = run_session(&options, &channels, &mut established) => outcome,
            _ = shutdown.changed() => {
                info!("realtime stream shut down");
                channels.set_state(ConnectionState::Disconnected);
                return;
            }
        };
        if established {
            failures = 0;
        }

        match outcome {
            Ok(SessionEnd::ServerDisconnect) => {
                info!("server closed the realtime session");
                channels.set_state(ConnectionState::Disconnected);
                return;
            }
            Err(e) => warn!("realtime connection lost: {e}"),
        }

        // exhausted is visible before subscribers see the final Disconnected
        if failures >= options.reconnect_attempts {
            error!(
                "realtime stream gave up after {} reconnect attempts",
                options.reconnect_attempts
            );
            channels.exhausted.store(true, Ordering::SeqCst);
            channels.set_state(ConnectionState::Disconnected);
            return;
        }
        channels.set_state(ConnectionState::Disconnected);
        failures += 1;
        debug!(
            "reconnecting in {:?} (attempt {}/{})",
            options.reconnect_delay, failures, options.reconnect_attempts
        );

        tokio::select! {
            _ = tokio::time::sleep(options.reconnect_delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn run_session(
    options: &RealtimeOptions,
    channels: &Channels,
    established: &mut bool,
) -> Result<SessionEnd, StreamError> {
    let (ws, _) = tokio::time::timeout(
        options.connect_timeout,
        tokio_tungstenite::connect_async(options.url.as_str()),
    )
    .await
    .map_err(|_| StreamError::Timeout(options.connect_timeout))??;
    let (mut sink, mut stream) = ws.split();

    let handshake = match tokio::time::timeout(options.connect_timeout, stream.next()).await {
        Err(_) => return Err(StreamError::Timeout(options.connect_timeout)),
        Ok(None) => return Err(StreamError::Closed),
        Ok(Some(frame)) => match frame? {
            Message::Text(text) => match EnginePacket::decode(text.as_str())? {
                EnginePacket::Open(handshake) => handshake,
                other => return Err(StreamError::Handshake(format!("{other:?}"))),
            },
            other => return Err(StreamError::Handshake(format!("{other:?}"))),
        },
    };
    debug!("engine session {} opened", handshake.sid);

    sink.send(Message::Text(SocketPacket::connect(&options.namespace).to_frame().into()))
        .await?;

    let liveness = handshake.liveness_timeout();
    loop {
        let frame = match tokio::time::timeout(liveness, stream.next()).await {
            Err(_) => return Err(StreamError::Timeout(liveness)),
            Ok(None) => return Err(StreamError::Closed),
            Ok(Some(frame)) => frame?,
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => return Err(StreamError::Closed),
            _ => continue,
        };

        let packet = match EnginePacket::decode(text.as_str()) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("ignoring engine frame: {e}");
                continue;
            }
        };

        match packet {
            EnginePacket::Ping(data) => {
                sink.send(Message::Text(EnginePacket::Pong(data).encode().into())).await?;
            }
            EnginePacket::Close => return Err(StreamError::Closed),
            EnginePacket::Message(payload) => match SocketPacket::decode(&payload) {
                Ok(packet) if packet.namespace() != options.namespace => {
                    debug!("ignoring packet for namespace {}", packet.namespace());
                }
                Ok(SocketPacket::Connect { .. }) => {
                    *established = true;
                    info!("realtime stream connected to {}", options.url);
                    channels.set_state(ConnectionState::Connected);
                }
                Ok(SocketPacket::ConnectError { message, .. }) => return Err(StreamError::Refused(message)),
                Ok(SocketPacket::Disconnect { .. }) => return Ok(SessionEnd::ServerDisconnect),
                Ok(SocketPacket::Event { name, args, .. }) => dispatch_event(channels, &name, args),
                Ok(SocketPacket::Ack { .. }) => {}
                Err(e) => warn!("ignoring socket packet: {e}"),
            },
            _ => {}
        }
    }
}

fn dispatch_event(channels: &Channels, name: &str, args: Vec<Value>) {
    let Some(payload) = args.into_iter().next() else {
        debug!("event {name} without payload");
        return;
    };

    match name {
        METRIC_EVENT => match normalize_value(&payload, Utc::now()) {
            Ok(record) => {
                channels.metric.send_replace(Some(record));
            }
            Err(e) => warn!("dropping {METRIC_EVENT}: {e}"),
        },
        WEATHER_EVENT => {
            let parsed = match payload {
                Value::String(text) => serde_json::from_str::<WeatherReport>(&text),
                other => serde_json::from_value::<WeatherReport>(other),
            };
            match parsed {
                Ok(report) => {
                    channels.weather.send_replace(Some(report));
                }
                Err(e) => warn!("dropping {WEATHER_EVENT}: {e}"),
            }
        }
        other => debug!("ignoring event {other}"),
    }
}
