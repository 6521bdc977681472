//! WebSocket front of the version ledger.
//!
//! Architecture:
//! ```text
//! Editor A ──┐                       ┌── DocumentStore (RocksDB)
//!            ├── SyncServer ── Ledger┤
//! Editor B ──┘        ▲              └── BroadcastGroup
//!                     │                       │
//!                     └──── StateUpdate ◄─────┘ (to every editor)
//! ```
//!
//! Per connection: `Hello` registers the editor and is answered with a
//! `StateInit` snapshot; `Submit` goes through `Ledger::apply` and is
//! answered with `Ack` or `Rejected`; `Fetch` is answered with `Snapshot`.
//! Every accepted write is pushed to all registered editors, the writer
//! included.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::ledger::Ledger;
use crate::protocol::{EditorInfo, MessageType, SyncMessage};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames above this size are dropped unread (default: 16MB)
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            max_frame_bytes: 1024 * 1024,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub accepted_writes: u64,
    pub rejected_writes: u64,
}

type Outgoing = SplitSink<WebSocketStream<TcpStream>, Message>;
type Incoming = SplitStream<WebSocketStream<TcpStream>>;

async fn send(ws_sender: &mut Outgoing, msg: &SyncMessage) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let encoded = msg.encode()?;
    ws_sender.send(Message::Binary(encoded.into())).await?;
    Ok(())
}

pub struct SyncServer {
    config: ServerConfig,
    ledger: Arc<Ledger>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig, ledger: Arc<Ledger>) -> Self {
        Self {
            config,
            ledger,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!(
            "Ledger server listening on {} (version {})",
            listener.local_addr()?,
            self.ledger.version().await
        );

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let ledger = self.ledger.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, ledger, stats.clone(), config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
                let mut s = stats.write().await;
                s.active_connections = s.active_connections.saturating_sub(1);
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        ledger: Arc<Ledger>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut peer_id: Option<Uuid> = None;
        let result = Self::serve_editor(
            &mut ws_sender,
            &mut ws_receiver,
            addr,
            &ledger,
            &stats,
            &config,
            &mut peer_id,
        )
        .await;

        // Cleanup: stop pushing to this editor
        if let Some(pid) = peer_id {
            ledger.unsubscribe(&pid).await;
            log::info!("Editor {pid} left, {} still connected", ledger.group().peer_count().await);
        }
        result
    }

    async fn serve_editor(
        ws_sender: &mut Outgoing,
        ws_receiver: &mut Incoming,
        addr: SocketAddr,
        ledger: &Ledger,
        stats: &RwLock<ServerStats>,
        config: &ServerConfig,
        peer_id: &mut Option<Uuid>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut updates: Option<broadcast::Receiver<Arc<Vec<u8>>>> = None;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            if data.len() > config.max_frame_bytes {
                                log::warn!("Dropping {} byte frame from {addr}", data.len());
                                continue;
                            }
                            let sync_msg = match SyncMessage::decode(&data) {
                                Ok(m) => m,
                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                    continue;
                                }
                            };
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += data.len() as u64;
                            }

                            match sync_msg.msg_type {
                                MessageType::Hello => {
                                    let info = sync_msg.editor_info().unwrap_or_else(|_| {
                                        EditorInfo::with_id(sync_msg.peer_id, "Anonymous")
                                    });
                                    if let Some(previous) = peer_id.replace(info.peer_id) {
                                        ledger.unsubscribe(&previous).await;
                                    }
                                    let name = info.name.clone();
                                    let pid = info.peer_id;

                                    let (snapshot, rx) = ledger.subscribe(info).await;
                                    log::info!(
                                        "Editor {name} ({pid}) connected from {addr}, {} editors online",
                                        ledger.group().peer_count().await
                                    );
                                    updates = Some(rx);
                                    send(ws_sender, &SyncMessage::state_init(Uuid::nil(), &snapshot)?).await?;
                                }

                                MessageType::Submit => {
                                    let request = sync_msg.seq;
                                    let reply = match sync_msg.candidate() {
                                        Ok(candidate) => match ledger.apply(&candidate).await {
                                            Ok(accepted) => {
                                                stats.write().await.accepted_writes += 1;
                                                SyncMessage::ack(Uuid::nil(), request, &accepted)?
                                            }
                                            Err(e) => {
                                                stats.write().await.rejected_writes += 1;
                                                SyncMessage::rejected(Uuid::nil(), request, e.to_string())
                                            }
                                        },
                                        Err(e) => {
                                            log::warn!("Rejecting unreadable submit from {addr}: {e}");
                                            stats.write().await.rejected_writes += 1;
                                            SyncMessage::rejected(Uuid::nil(), request, e.to_string())
                                        }
                                    };
                                    send(ws_sender, &reply).await?;
                                }

                                MessageType::Fetch => {
                                    let snapshot = ledger.read().await;
                                    send(ws_sender, &SyncMessage::snapshot(Uuid::nil(), sync_msg.seq, &snapshot)?).await?;
                                }

                                MessageType::Ping => {
                                    send(ws_sender, &SyncMessage::pong(Uuid::nil())).await?;
                                }

                                other => {
                                    log::debug!("Unhandled message type from {addr}: {other:?}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            return Ok(());
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            return Ok(());
                        }

                        _ => {}
                    }
                }

                update = async {
                    match updates.as_mut() {
                        Some(rx) => rx.recv().await,
                        // No receiver until Hello
                        None => std::future::pending().await,
                    }
                } => {
                    match update {
                        Ok(frame) => {
                            ws_sender.send(Message::Binary(frame.to_vec().into())).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            ledger.group().record_lag(n);
                            log::warn!("Editor {peer_id:?} lagged by {n} updates");
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }
            }
        }
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerConfig;
    use crate::storage::MemoryStore;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.max_frame_bytes, 16 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let ledger = Ledger::open(Arc::new(MemoryStore::new()), LedgerConfig::for_testing())
            .await
            .unwrap();
        let server = SyncServer::new(ServerConfig::for_testing(), Arc::new(ledger));
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.accepted_writes, 0);
        assert_eq!(server.bind_addr(), "127.0.0.1:0");
        assert_eq!(server.ledger().version().await, 1);
    }
}
