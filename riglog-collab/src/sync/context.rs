//! Per-client synchronization context.
//!
//! Owns everything a client knows about the document: its local decks,
//! the last ledger version it saw, the pending queue and which deck is
//! open.  One instance per client, passed by reference to whoever needs it.

use chrono::{DateTime, Utc};
use riglog_core::{Deck, StateEnvelope};

use super::queue::PendingQueue;

#[derive(Debug, Clone)]
pub struct SyncContext {
    decks: Vec<Deck>,
    ledger_version: u64,
    pending: PendingQueue,
    open_deck: Option<String>,
}

impl SyncContext {
    /// Start from a ledger snapshot.
    pub fn new(snapshot: StateEnvelope) -> Self {
        Self {
            decks: snapshot.decks,
            ledger_version: snapshot.version,
            pending: PendingQueue::new(),
            open_deck: None,
        }
    }

    pub fn decks(&self) -> &[Deck] {
        &self.decks
    }

    pub(crate) fn decks_mut(&mut self) -> &mut Vec<Deck> {
        &mut self.decks
    }

    pub fn deck(&self, id: &str) -> Option<&Deck> {
        self.decks.iter().find(|deck| deck.id == id)
    }

    pub fn ledger_version(&self) -> u64 {
        self.ledger_version
    }

    pub(crate) fn set_ledger_version(&mut self, version: u64) {
        self.ledger_version = version;
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub(crate) fn pending_mut(&mut self) -> &mut PendingQueue {
        &mut self.pending
    }

    /// Version the next local snapshot is tagged with.
    pub fn next_local_version(&self) -> u64 {
        self.pending
            .latest_version()
            .unwrap_or(0)
            .max(self.ledger_version)
            + 1
    }

    /// Whole local state as an envelope.
    pub fn snapshot(&self, version: u64, now: DateTime<Utc>) -> StateEnvelope {
        StateEnvelope {
            version,
            decks: self.decks.clone(),
            mutation_timestamp: Some(now),
        }
    }

    /// Replace the local decks wholesale.
    pub(crate) fn replace_decks(&mut self, decks: Vec<Deck>) {
        self.decks = decks;
    }

    pub fn open_deck(&self) -> Option<&str> {
        self.open_deck.as_deref()
    }

    /// Open a deck by id.  False when no such deck exists.
    pub fn open(&mut self, deck_id: &str) -> bool {
        if self.deck(deck_id).is_none() {
            return false;
        }
        self.open_deck = Some(deck_id.to_string());
        true
    }

    pub fn close(&mut self) -> Option<String> {
        self.open_deck.take()
    }
}
