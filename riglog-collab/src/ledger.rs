//! The version ledger: single source of truth for the layout document.
//!
//! `apply` normalizes a candidate, stamps it with `current + 1`, persists
//! it and pushes it to every subscriber.  Candidates replace the deck list
//! wholesale; there is no merge.  A candidate built from a stale read
//! silently drops concurrent edits to decks it did not know about.
//!
//! The current version is read before the candidate is persisted and the
//! lock is not held across the write, so two near-simultaneous applies
//! can compute the same next version.  Both writes persist; the later one
//! wins.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use riglog_core::StateEnvelope;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::broadcast::BroadcastGroup;
use crate::protocol::{EditorInfo, SyncMessage};
use crate::storage::{LedgerMetadata, LedgerStore, StoreError};

/// Ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// JSON document used when the store is empty
    pub seed_path: Option<PathBuf>,
    /// Revisions kept in the store (default: 100)
    pub revision_retention: usize,
    /// Frames buffered per subscriber (default: 256)
    pub broadcast_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            seed_path: None,
            revision_retention: 100,
            broadcast_capacity: 256,
        }
    }
}

impl LedgerConfig {
    pub fn for_testing() -> Self {
        Self {
            seed_path: None,
            revision_retention: 10,
            broadcast_capacity: 64,
        }
    }

    pub fn with_seed(mut self, path: impl Into<PathBuf>) -> Self {
        self.seed_path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerError {
    Store(StoreError),
    SerializationError(String),
    /// The current version is `u64::MAX`; no further write can be numbered.
    VersionExhausted(u64),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Store(e) => write!(f, "Ledger store error: {e}"),
            LedgerError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            LedgerError::VersionExhausted(v) => write!(f, "Ledger version {v} cannot be incremented"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        LedgerError::Store(e)
    }
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    current: RwLock<StateEnvelope>,
    group: Arc<BroadcastGroup>,
    config: LedgerConfig,
}

impl Ledger {
    /// Open the ledger over `store`.
    ///
    /// Startup order: the stored envelope (its version kept), else the
    /// seed file, else the default decks at version 1.  A freshly seeded
    /// state is persisted immediately.
    pub async fn open(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Result<Self, LedgerError> {
        let stored = match store.load_state()? {
            Some(bytes) => match StateEnvelope::from_json(&bytes, 1) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    log::warn!("Stored ledger state is not JSON ({e}), reseeding");
                    None
                }
            },
            None => None,
        };

        let current = match stored {
            Some(envelope) => {
                log::info!(
                    "Loaded ledger at version {} with {} decks",
                    envelope.version,
                    envelope.decks.len()
                );
                envelope
            }
            None => {
                let floor = store.metadata()?.map_or(0, |meta| meta.version);
                let mut envelope = Self::initial_state(&config);
                envelope.version = envelope.version.max(floor.saturating_add(1));
                let json = envelope
                    .to_json()
                    .map_err(|e| LedgerError::SerializationError(e.to_string()))?;
                store.save_state(envelope.version, &json)?;
                log::info!("Seeded ledger at version {}", envelope.version);
                envelope
            }
        };

        Ok(Self {
            store,
            current: RwLock::new(current),
            group: Arc::new(BroadcastGroup::new(config.broadcast_capacity)),
            config,
        })
    }

    fn initial_state(config: &LedgerConfig) -> StateEnvelope {
        let now = Utc::now();
        let Some(path) = &config.seed_path else {
            return StateEnvelope::with_default_decks(1, now);
        };
        match std::fs::read(path) {
            Ok(bytes) => match StateEnvelope::from_json(&bytes, 1) {
                Ok(envelope) => {
                    log::info!("Seeding ledger from {}", path.display());
                    envelope
                }
                Err(e) => {
                    log::warn!("Seed file {} is not JSON ({e}), using default decks", path.display());
                    StateEnvelope::with_default_decks(1, now)
                }
            },
            Err(e) => {
                log::warn!("Seed file {} unreadable ({e}), using default decks", path.display());
                StateEnvelope::with_default_decks(1, now)
            }
        }
    }

    /// Current envelope, verbatim.
    pub async fn read(&self) -> StateEnvelope {
        self.current.read().await.clone()
    }

    pub async fn version(&self) -> u64 {
        self.current.read().await.version
    }

    /// Accept a candidate document.
    ///
    /// Any `version` in the candidate is ignored.  Malformed fields are
    /// normalized, never rejected.
    pub async fn apply(&self, candidate: &Value) -> Result<StateEnvelope, LedgerError> {
        let current = self.current.read().await.version;
        let next = current
            .checked_add(1)
            .ok_or(LedgerError::VersionExhausted(current))?;

        let mut accepted = StateEnvelope::from_value(candidate, next);
        accepted.version = next;
        accepted.mutation_timestamp.get_or_insert_with(Utc::now);

        let json = accepted
            .to_json()
            .map_err(|e| LedgerError::SerializationError(e.to_string()))?;
        if let Err(e) = self.store.save_state(next, &json) {
            log::error!("Failed to persist ledger version {next}: {e}");
            return Err(e.into());
        }
        *self.current.write().await = accepted.clone();

        self.compact();
        match SyncMessage::state_update(Uuid::nil(), &accepted) {
            Ok(msg) => {
                let _ = self.group.broadcast(&msg);
            }
            Err(e) => log::warn!("Failed to encode update for version {next}: {e}"),
        }

        log::info!("Accepted ledger version {next} ({} decks)", accepted.decks.len());
        Ok(accepted)
    }

    /// Accept a typed candidate.
    pub async fn apply_envelope(&self, candidate: &StateEnvelope) -> Result<StateEnvelope, LedgerError> {
        let value = candidate
            .to_value()
            .map_err(|e| LedgerError::SerializationError(e.to_string()))?;
        self.apply(&value).await
    }

    fn compact(&self) {
        match self.store.compact_revisions(self.config.revision_retention) {
            Ok(0) => {}
            Ok(removed) => log::debug!("Dropped {removed} old revisions"),
            Err(e) => log::warn!("Revision compaction failed: {e}"),
        }
    }

    /// Register an editor for pushes.  Returns the snapshot to send as the
    /// initial state together with the receiver for later updates.
    pub async fn subscribe(
        &self,
        editor: EditorInfo,
    ) -> (StateEnvelope, broadcast::Receiver<Arc<Vec<u8>>>) {
        // Subscribe before reading so no update falls in between.
        let rx = self.group.add_peer(editor).await;
        (self.read().await, rx)
    }

    pub async fn unsubscribe(&self, peer_id: &Uuid) {
        self.group.remove_peer(peer_id).await;
    }

    /// A stored past revision.
    pub fn revision(&self, version: u64) -> Result<StateEnvelope, LedgerError> {
        let bytes = self.store.load_revision(version)?;
        StateEnvelope::from_json(&bytes, version)
            .map_err(|e| LedgerError::SerializationError(e.to_string()))
    }

    pub fn revisions(&self) -> Result<Vec<u64>, LedgerError> {
        Ok(self.store.revisions()?)
    }

    pub fn metadata(&self) -> Result<Option<LedgerMetadata>, LedgerError> {
        Ok(self.store.metadata()?)
    }

    pub fn group(&self) -> &Arc<BroadcastGroup> {
        &self.group
    }
}
