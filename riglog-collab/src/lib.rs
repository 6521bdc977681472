//! # riglog-collab: Multi-editor synchronization for deck layouts
//!
//! Editors apply edits optimistically, queue whole-state snapshots and
//! flush them to a single version ledger, which stamps, persists and
//! pushes every accepted state to all connected editors.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   Submit / Fetch   ┌─────────────┐
//! │ SyncClient   │ ─────────────────► │ SyncServer  │
//! │ (per editor) │ ◄───────────────── │ (central)   │
//! └──────┬───────┘  Ack / StateUpdate └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌──────────────┐                    ┌─────────────┐
//! │ SyncEngine   │                    │ Ledger      │
//! │ + queue file │                    │ (versions)  │
//! └──────────────┘                    └──────┬──────┘
//!                                     ┌──────┴──────┐
//!                                     │ RocksDB     │
//!                                     │ Broadcast   │
//!                                     └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Binary wire protocol (bincode-encoded SyncMessage)
//! - [`broadcast`]: Fan-out of accepted states
//! - [`storage`]: Ledger persistence (RocksDB, in-memory)
//! - [`ledger`]: Version assignment and normalization of writes
//! - [`server`]: WebSocket front of the ledger
//! - [`client`]: WebSocket link with reconnect
//! - [`sync`]: Client state machine, durable queue and its tokio driver
//! - [`scenario`]: Planning scenario edit sessions
//!
//! Concurrent writes are not merged: the newest accepted snapshot wins.

pub mod broadcast;
pub mod client;
pub mod ledger;
pub mod protocol;
pub mod scenario;
pub mod server;
pub mod storage;
pub mod sync;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats};
pub use client::LedgerConnection;
pub use ledger::{Ledger, LedgerConfig, LedgerError};
pub use protocol::{EditorInfo, MessageType, ProtocolError, SyncMessage};
pub use scenario::{EditSession, ScenarioError, ScenarioSession, ScenarioView};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use storage::{
    DocumentStore, LedgerMetadata, LedgerStore, MemoryStore, StoreConfig, StoreError,
};
pub use sync::{
    FileQueueStore, LedgerLink, LinkError, LinkEvent, LocalLink, MemoryQueueStore,
    PendingOperation, QueueStore, SyncClient, SyncConfig, SyncEngine, SyncHandle, SyncState,
    ViewChange,
};
