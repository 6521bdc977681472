//! WebSocket link to a remote ledger server.
//!
//! Provides:
//! - Connection lifecycle with an automatic reconnect loop
//! - Request/response correlation for Submit and Fetch by `seq`
//! - Online/offline events and the pushed snapshots as [`LinkEvent`]s
//!
//! Every successful (re)connect sends `Hello`, which the server answers
//! with a fresh `StateInit`; that push is the re-fetch after a drop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use riglog_core::StateEnvelope;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{EditorInfo, MessageType, ProtocolError, SyncMessage};
use crate::sync::{LedgerLink, LinkError, LinkEvent, SyncConfig};

enum RequestKind {
    Submit(StateEnvelope),
    Fetch,
}

struct Request {
    kind: RequestKind,
    reply: oneshot::Sender<Result<SyncMessage, LinkError>>,
}

type Waiters = HashMap<u64, oneshot::Sender<Result<SyncMessage, LinkError>>>;

/// Websocket [`LedgerLink`].
pub struct LedgerConnection {
    url: String,
    editor: EditorInfo,
    requests: mpsc::Sender<Request>,
    events: broadcast::Sender<LinkEvent>,
    connected: Arc<AtomicBool>,
    request_timeout: Duration,
    task: JoinHandle<()>,
}

impl LedgerConnection {
    /// Start the connection task and wait for its first attempt.
    ///
    /// Never fails: an unreachable server leaves the link offline and the
    /// task keeps retrying every `reconnect_interval`.
    pub async fn connect(url: impl Into<String>, editor: EditorInfo, config: &SyncConfig) -> Self {
        let url = url.into();
        let (requests_tx, requests_rx) = mpsc::channel(64);
        let (events, _) = broadcast::channel(64);
        let connected = Arc::new(AtomicBool::new(false));
        let (first_attempt_tx, first_attempt_rx) = oneshot::channel();

        let task = tokio::spawn(
            ConnectionTask {
                url: url.clone(),
                editor: editor.clone(),
                reconnect_interval: config.reconnect_interval,
                events: events.clone(),
                connected: connected.clone(),
                first_attempt: Some(first_attempt_tx),
            }
            .run(requests_rx),
        );
        let _ = first_attempt_rx.await;

        Self {
            url,
            editor,
            requests: requests_tx,
            events,
            connected,
            request_timeout: config.request_timeout,
            task,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn editor(&self) -> &EditorInfo {
        &self.editor
    }

    async fn request(&self, kind: RequestKind) -> Result<SyncMessage, LinkError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request { kind, reply })
            .await
            .map_err(|_| LinkError::ConnectionClosed)?;
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LinkError::ConnectionClosed),
            Err(_) => Err(LinkError::Timeout),
        }
    }
}

#[async_trait]
impl LedgerLink for LedgerConnection {
    async fn submit(&self, candidate: &StateEnvelope) -> Result<StateEnvelope, LinkError> {
        let reply = self.request(RequestKind::Submit(candidate.clone())).await?;
        match reply.msg_type {
            MessageType::Ack => Ok(reply.envelope()?),
            MessageType::Rejected => Err(LinkError::Rejected(reply.reason()?)),
            _ => Err(ProtocolError::InvalidMessageType.into()),
        }
    }

    async fn fetch(&self) -> Result<StateEnvelope, LinkError> {
        let reply = self.request(RequestKind::Fetch).await?;
        Ok(reply.envelope()?)
    }

    fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }
}

impl Drop for LedgerConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct ConnectionTask {
    url: String,
    editor: EditorInfo,
    reconnect_interval: Duration,
    events: broadcast::Sender<LinkEvent>,
    connected: Arc<AtomicBool>,
    first_attempt: Option<oneshot::Sender<()>>,
}

impl ConnectionTask {
    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        // None until the first attempt settles.
        let mut announced_online: Option<bool> = None;

        loop {
            match tokio_tungstenite::connect_async(self.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    let (mut sink, mut stream) = ws_stream.split();
                    let hello = SyncMessage::hello(&self.editor).encode();
                    let greeted = match hello {
                        Ok(frame) => sink.send(Message::Binary(frame.into())).await.is_ok(),
                        Err(e) => {
                            log::error!("Failed to encode hello: {e}");
                            false
                        }
                    };

                    if greeted {
                        log::info!("Connected to ledger at {}", self.url);
                        self.connected.store(true, Ordering::Release);
                        announced_online = Some(true);
                        let _ = self.events.send(LinkEvent::Online);
                        self.settle_first_attempt();

                        let mut waiters = Waiters::new();
                        let owner_gone = self
                            .serve(&mut sink, &mut stream, &mut requests, &mut waiters)
                            .await;

                        self.connected.store(false, Ordering::Release);
                        for (_, waiter) in waiters.drain() {
                            let _ = waiter.send(Err(LinkError::ConnectionClosed));
                        }
                        if owner_gone {
                            return;
                        }
                        log::warn!("Lost connection to ledger at {}", self.url);
                    }
                }
                Err(e) => log::debug!("Connect to {} failed: {e}", self.url),
            }

            if announced_online != Some(false) {
                announced_online = Some(false);
                let _ = self.events.send(LinkEvent::Offline);
            }
            self.settle_first_attempt();

            // Fail requests fast while waiting to reconnect.
            let wait = tokio::time::sleep(self.reconnect_interval);
            tokio::pin!(wait);
            loop {
                tokio::select! {
                    _ = &mut wait => break,
                    request = requests.recv() => match request {
                        Some(request) => {
                            let _ = request.reply.send(Err(LinkError::Offline));
                        }
                        None => return,
                    }
                }
            }
        }
    }

    fn settle_first_attempt(&mut self) {
        if let Some(done) = self.first_attempt.take() {
            let _ = done.send(());
        }
    }

    /// Pump one live connection.  Returns true when the owning
    /// [`LedgerConnection`] was dropped.
    async fn serve<S, R>(
        &self,
        sink: &mut S,
        stream: &mut R,
        requests: &mut mpsc::Receiver<Request>,
        waiters: &mut Waiters,
    ) -> bool
    where
        S: futures_util::Sink<Message> + Unpin,
        R: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let mut next_seq: u64 = 1;
        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else { return true };
                    let seq = next_seq;
                    next_seq += 1;

                    let msg = match &request.kind {
                        RequestKind::Submit(candidate) => SyncMessage::submit(self.editor.peer_id, seq, candidate),
                        RequestKind::Fetch => Ok(SyncMessage::fetch(self.editor.peer_id, seq)),
                    };
                    let frame = match msg.and_then(|m| m.encode()) {
                        Ok(frame) => frame,
                        Err(e) => {
                            let _ = request.reply.send(Err(e.into()));
                            continue;
                        }
                    };
                    if sink.send(Message::Binary(frame.into())).await.is_err() {
                        let _ = request.reply.send(Err(LinkError::ConnectionClosed));
                        return false;
                    }
                    waiters.insert(seq, request.reply);
                }

                frame = stream.next() => match frame {
                    Some(Ok(Message::Binary(data))) => self.dispatch(&data, waiters),
                    Some(Ok(Message::Close(_))) | None => return false,
                    Some(Err(e)) => {
                        log::debug!("WebSocket error from {}: {e}", self.url);
                        return false;
                    }
                    _ => {}
                }
            }
        }
    }

    fn dispatch(&self, data: &[u8], waiters: &mut Waiters) {
        let msg = match SyncMessage::decode(data) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Skipping undecodable frame from ledger: {e}");
                return;
            }
        };

        match msg.msg_type {
            MessageType::StateInit | MessageType::StateUpdate => match msg.envelope() {
                Ok(envelope) => {
                    let _ = self.events.send(LinkEvent::Remote(envelope));
                }
                Err(e) => log::warn!("Skipping unreadable ledger push: {e}"),
            },
            kind if kind.is_reply() => match waiters.remove(&msg.seq) {
                Some(waiter) => {
                    let _ = waiter.send(Ok(msg));
                }
                None => log::debug!("Reply for unknown request {}", msg.seq),
            },
            MessageType::Pong => {}
            other => log::debug!("Ignoring {other:?} from ledger"),
        }
    }
}
