//! How a client reaches the ledger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use riglog_core::StateEnvelope;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::ledger::{Ledger, LedgerError};
use crate::protocol::{EditorInfo, ProtocolError, SyncMessage};

/// Unsolicited news from the ledger side.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Pushed snapshot (initial or after a write).
    Remote(StateEnvelope),
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkError {
    /// Not connected; the request was never sent.
    Offline,
    Timeout,
    ConnectionClosed,
    Rejected(String),
    Protocol(ProtocolError),
    Ledger(LedgerError),
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::Offline => write!(f, "Ledger is offline"),
            LinkError::Timeout => write!(f, "Ledger request timed out"),
            LinkError::ConnectionClosed => write!(f, "Ledger connection closed"),
            LinkError::Rejected(reason) => write!(f, "Ledger rejected the write: {reason}"),
            LinkError::Protocol(e) => write!(f, "Protocol error: {e}"),
            LinkError::Ledger(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<ProtocolError> for LinkError {
    fn from(e: ProtocolError) -> Self {
        LinkError::Protocol(e)
    }
}

/// Read/write access to the ledger plus its push stream.
#[async_trait]
pub trait LedgerLink: Send + Sync {
    /// Submit a candidate; returns the accepted envelope.
    async fn submit(&self, candidate: &StateEnvelope) -> Result<StateEnvelope, LinkError>;

    /// Current ledger envelope.
    async fn fetch(&self) -> Result<StateEnvelope, LinkError>;

    /// Pushes and connectivity changes from now on.
    fn events(&self) -> broadcast::Receiver<LinkEvent>;
}

/// Link to a ledger in the same process.
///
/// Can be switched offline to simulate a dropped network: requests fail
/// with [`LinkError::Offline`] and pushes are lost, as they would be.
pub struct LocalLink {
    ledger: Arc<Ledger>,
    editor: EditorInfo,
    online: Arc<AtomicBool>,
    events: broadcast::Sender<LinkEvent>,
    forward: JoinHandle<()>,
}

impl LocalLink {
    pub async fn connect(ledger: Arc<Ledger>, editor: EditorInfo) -> Self {
        let (events, _) = broadcast::channel(64);
        let (_, mut updates) = ledger.subscribe(editor.clone()).await;
        let online = Arc::new(AtomicBool::new(true));

        let forward = tokio::spawn({
            let events = events.clone();
            let online = online.clone();
            async move {
                loop {
                    match updates.recv().await {
                        Ok(frame) => {
                            if !online.load(Ordering::Acquire) {
                                continue;
                            }
                            match SyncMessage::decode(&frame).and_then(|msg| msg.envelope()) {
                                Ok(envelope) => {
                                    let _ = events.send(LinkEvent::Remote(envelope));
                                }
                                Err(e) => log::warn!("Dropping unreadable ledger push: {e}"),
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Local link lagged by {n} ledger pushes");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        Self {
            ledger,
            editor,
            online,
            events,
            forward,
        }
    }

    /// Flip connectivity.  Coming back online re-reads the ledger and
    /// pushes the snapshot, like a reconnecting socket would.
    pub async fn set_online(&self, online: bool) {
        if self.online.swap(online, Ordering::AcqRel) == online {
            return;
        }
        if online {
            let _ = self.events.send(LinkEvent::Online);
            let _ = self.events.send(LinkEvent::Remote(self.ledger.read().await));
        } else {
            let _ = self.events.send(LinkEvent::Offline);
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn editor(&self) -> &EditorInfo {
        &self.editor
    }
}

#[async_trait]
impl LedgerLink for LocalLink {
    async fn submit(&self, candidate: &StateEnvelope) -> Result<StateEnvelope, LinkError> {
        if !self.is_online() {
            return Err(LinkError::Offline);
        }
        self.ledger.apply_envelope(candidate).await.map_err(LinkError::Ledger)
    }

    async fn fetch(&self) -> Result<StateEnvelope, LinkError> {
        if !self.is_online() {
            return Err(LinkError::Offline);
        }
        Ok(self.ledger.read().await)
    }

    fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }
}

impl Drop for LocalLink {
    fn drop(&mut self) {
        self.forward.abort();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let ledger = self.ledger.clone();
            let peer_id = self.editor.peer_id;
            runtime.spawn(async move { ledger.unsubscribe(&peer_id).await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerConfig;
    use crate::storage::MemoryStore;
    use chrono::Utc;

    async fn ledger() -> Arc<Ledger> {
        Arc::new(
            Ledger::open(Arc::new(MemoryStore::new()), LedgerConfig::for_testing())
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_local_link_submit_and_push() {
        let ledger = ledger().await;
        let link = LocalLink::connect(ledger.clone(), EditorInfo::new("Alice")).await;
        let mut events = link.events();

        let candidate = StateEnvelope::new(1, Vec::new());
        let accepted = link.submit(&candidate).await.unwrap();
        assert_eq!(accepted.version, 2);

        match events.recv().await.unwrap() {
            LinkEvent::Remote(pushed) => assert_eq!(pushed.version, 2),
            other => panic!("expected push, got {other:?}"),
        }
        assert_eq!(link.fetch().await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_offline_link_refuses_requests() {
        let ledger = ledger().await;
        let link = LocalLink::connect(ledger.clone(), EditorInfo::new("Bob")).await;
        let mut events = link.events();

        link.set_online(false).await;
        assert_eq!(events.recv().await.unwrap(), LinkEvent::Offline);
        let candidate = StateEnvelope::with_default_decks(1, Utc::now());
        assert_eq!(link.submit(&candidate).await, Err(LinkError::Offline));
        assert_eq!(link.fetch().await, Err(LinkError::Offline));

        ledger.apply_envelope(&candidate).await.unwrap();
        // Let the forwarder see (and drop) the push while offline.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        link.set_online(true).await;
        assert_eq!(events.recv().await.unwrap(), LinkEvent::Online);
        match events.recv().await.unwrap() {
            LinkEvent::Remote(snapshot) => assert_eq!(snapshot.version, 2),
            other => panic!("expected snapshot, got {other:?}"),
        }
    }
}
