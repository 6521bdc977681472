//! Client-side synchronization.
//!
//! - [`engine`]: Pure Idle/PendingLocal/Flushing/Retrying state machine
//! - [`context`]: Per-client local state the engine owns
//! - [`queue`]: Durable pending-operation queue
//! - [`timer`]: Debounce and retry tokens
//! - [`link`]: Ledger access (`LedgerLink`, in-process `LocalLink`)
//! - [`driver`]: Tokio task running the engine (`SyncClient`, `SyncHandle`)

pub mod context;
pub mod driver;
pub mod engine;
pub mod link;
pub mod queue;
pub mod timer;

pub use context::SyncContext;
pub use driver::{ClientError, ClientSnapshot, SyncClient, SyncHandle};
pub use engine::{SyncConfig, SyncEffect, SyncEngine, SyncInput, SyncState, ViewChange};
pub use link::{LedgerLink, LinkError, LinkEvent, LocalLink};
pub use queue::{
    FileQueueStore, MemoryQueueStore, PendingOperation, PendingQueue, QueueError, QueueStore,
};
pub use timer::{TimerKind, TimerToken};
