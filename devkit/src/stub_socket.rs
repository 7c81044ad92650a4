/*!
Serveur Socket.IO simulé (Engine.IO v4, transport websocket uniquement)

Suffisant pour la console :
- handshake `0{...}` à l'ouverture, `40{"sid":..}` en réponse au connect
- émission d'événements `42["name", payload]` vers tous les clients
- ping périodique, comptage des pongs, mode silencieux sans ping
- déconnexion serveur (`41`), fermeture brutale
- refus des nouvelles connexions pour tester l'épuisement des reconnexions
*/

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use anyhow::Result;

/// Ordre envoyé à une connexion active
#[derive(Debug, Clone)]
enum Outbound {
    Frame(String),
    Close,
}

#[derive(Default)]
struct Shared {
    clients: Mutex<Vec<mpsc::UnboundedSender<Outbound>>>,
    /// Connexions ayant terminé le connect namespace
    connections: AtomicUsize,
    /// Tentatives TCP reçues, refusées comprises
    attempts: AtomicUsize,
    /// Pongs (`3`) reçus, tous clients confondus
    pongs: AtomicUsize,
    refuse: AtomicBool,
    silent: AtomicBool,
}

#[derive(Clone)]
pub struct StubSocket {
    addr: SocketAddr,
    shared: Arc<Shared>,
    ping_interval: Duration,
    ping_timeout: Duration,
}

impl StubSocket {
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with_ping(Duration::from_secs(25), Duration::from_secs(20)).await
    }

    pub async fn spawn_with_ping(ping_interval: Duration, ping_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let stub = Self {
            addr,
            shared: Arc::new(Shared::default()),
            ping_interval,
            ping_timeout,
        };

        let server = stub.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let server = server.clone();
                        tokio::spawn(async move {
                            if let Err(e) = server.serve(stream).await {
                                log::debug!("stub socket client {} ended: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        log::error!("stub socket accept failed: {}", e);
                        break;
                    }
                }
            }
        });

        log::info!("🧪 Stub Socket.IO listening on {}", addr);
        Ok(stub)
    }

    /// URL websocket Engine.IO v4
    pub fn url(&self) -> String {
        format!("ws://{}/socket.io/?EIO=4&transport=websocket", self.addr)
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn attempt_count(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn pong_count(&self) -> usize {
        self.shared.pongs.load(Ordering::SeqCst)
    }

    /// Attend qu'au moins `count` clients aient rejoint le namespace
    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.connection_count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.connection_count() >= count
    }

    /// Émet `event` avec un payload objet
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        self.broadcast(Outbound::Frame(format!("42{}", json!([event, payload]))))
    }

    /// Émet `event` avec le payload sérialisé en texte JSON
    pub fn emit_text_payload(&self, event: &str, payload: &Value) -> usize {
        self.broadcast(Outbound::Frame(format!("42{}", json!([event, payload.to_string()]))))
    }

    /// Déconnexion côté serveur (`41`)
    pub fn disconnect_all(&self) -> usize {
        self.broadcast(Outbound::Frame("41".to_string()))
    }

    /// Ferme les websockets sans déconnexion namespace
    pub fn drop_all(&self) -> usize {
        self.broadcast(Outbound::Close)
    }

    /// Les nouvelles connexions TCP sont fermées immédiatement
    pub fn refuse_new(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Suspend les pings tant que le mode est actif
    pub fn go_silent(&self, silent: bool) {
        self.shared.silent.store(silent, Ordering::SeqCst);
    }

    fn broadcast(&self, outbound: Outbound) -> usize {
        let mut clients = self.shared.clients.lock();
        clients.retain(|tx| tx.send(outbound.clone()).is_ok());
        clients.len()
    }

    async fn serve(&self, stream: TcpStream) -> Result<()> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if self.shared.refuse.load(Ordering::SeqCst) {
            drop(stream);
            return Ok(());
        }

        let ws = tokio_tungstenite::accept_async(stream).await?;
        let (mut sink, mut source) = ws.split();

        let sid = uuid::Uuid::new_v4().to_string();
        let open = json!({
            "sid": sid,
            "upgrades": [],
            "pingInterval": self.ping_interval.as_millis() as u64,
            "pingTimeout": self.ping_timeout.as_millis() as u64,
            "maxPayload": 1_000_000,
        });
        sink.send(Message::Text(format!("0{open}").into())).await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ping = tokio::time::interval(self.ping_interval);
        ping.tick().await;

        loop {
            tokio::select! {
                frame = source.next() => {
                    let Some(frame) = frame else { break };
                    let text = match frame? {
                        Message::Text(text) => text.to_string(),
                        Message::Close(_) => break,
                        _ => continue,
                    };
                    if text == "40" || text.starts_with("40/") {
                        sink.send(Message::Text(format!("40{}", json!({ "sid": sid })).into())).await?;
                        self.shared.clients.lock().push(tx.clone());
                        self.shared.connections.fetch_add(1, Ordering::SeqCst);
                    } else if text.starts_with('3') {
                        self.shared.pongs.fetch_add(1, Ordering::SeqCst);
                    } else if text == "41" {
                        break;
                    }
                }
                outbound = rx.recv() => match outbound {
                    Some(Outbound::Frame(frame)) => sink.send(Message::Text(frame.into())).await?,
                    Some(Outbound::Close) | None => {
                        sink.send(Message::Close(None)).await.ok();
                        break;
                    }
                },
                _ = ping.tick() => {
                    if !self.shared.silent.load(Ordering::SeqCst) {
                        sink.send(Message::Text("2".to_string().into())).await?;
                    }
                }
            }
        }
        Ok(())
    }
}
