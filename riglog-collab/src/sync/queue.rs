//! Durable queue of pending full-state snapshots.
//!
//! Every entry is a whole envelope, so only the newest one ever needs to be
//! submitted; older entries are kept until the ledger acknowledges a write
//! that covers them.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use riglog_core::StateEnvelope;
use serde::{Deserialize, Serialize};

/// A locally queued, not yet acknowledged snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingOperation {
    /// Client-local version, above the last known ledger version.
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub state: StateEnvelope,
}

/// On-disk shape; `state` is normalized again when read back.
#[derive(Deserialize)]
struct StoredOperation {
    version: u64,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    state: serde_json::Value,
}

impl From<StoredOperation> for PendingOperation {
    fn from(stored: StoredOperation) -> Self {
        let mut state = StateEnvelope::from_value(&stored.state, stored.version);
        state.version = stored.version;
        Self {
            version: stored.version,
            timestamp: stored.timestamp,
            state,
        }
    }
}

/// Ordered pending operations, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingQueue {
    entries: Vec<PendingOperation>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from restored entries, sorted by version.
    pub fn from_operations(mut entries: Vec<PendingOperation>) -> Self {
        entries.sort_by_key(|op| op.version);
        Self { entries }
    }

    pub fn push(&mut self, op: PendingOperation) {
        self.entries.push(op);
    }

    /// The newest entry, the only one worth submitting.
    pub fn latest(&self) -> Option<&PendingOperation> {
        self.entries.last()
    }

    pub fn latest_version(&self) -> Option<u64> {
        self.latest().map(|op| op.version)
    }

    /// Remove every entry at or below `version`.  Returns how many went.
    pub fn drop_through(&mut self, version: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|op| op.version > version);
        before - self.entries.len()
    }

    /// Give the surviving entries consecutive versions above `ledger_version`.
    pub fn renumber_above(&mut self, ledger_version: u64) {
        for (offset, op) in self.entries.iter_mut().enumerate() {
            op.version = ledger_version + offset as u64 + 1;
            op.state.version = op.version;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn operations(&self) -> &[PendingOperation] {
        &self.entries
    }
}

#[derive(Debug)]
pub enum QueueError {
    Io(std::io::Error),
    Serialization(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Io(e) => write!(f, "Queue I/O error: {e}"),
            QueueError::Serialization(e) => write!(f, "Queue serialization error: {e}"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<std::io::Error> for QueueError {
    fn from(e: std::io::Error) -> Self {
        QueueError::Io(e)
    }
}

/// Where the pending queue survives restarts.
pub trait QueueStore: Send + Sync {
    fn load(&self) -> Result<Vec<PendingOperation>, QueueError>;
    fn save(&self, ops: &[PendingOperation]) -> Result<(), QueueError>;
}

/// JSON file store.  Writes go to a sibling temp file that is then renamed
/// over the target, so a crash never leaves a half-written queue.
pub struct FileQueueStore {
    path: PathBuf,
}

impl FileQueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "pending-queue.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl QueueStore for FileQueueStore {
    fn load(&self) -> Result<Vec<PendingOperation>, QueueError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let stored: Vec<StoredOperation> = match serde_json::from_slice(&bytes) {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!("Discarding unreadable pending queue {}: {e}", self.path.display());
                return Ok(Vec::new());
            }
        };
        Ok(stored.into_iter().map(PendingOperation::from).collect())
    }

    fn save(&self, ops: &[PendingOperation]) -> Result<(), QueueError> {
        let json = serde_json::to_vec(ops).map_err(|e| QueueError::Serialization(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let temp = self.temp_path();
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

/// Volatile store for tests.
#[derive(Default)]
pub struct MemoryQueueStore {
    ops: Mutex<Vec<PendingOperation>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with entries left over from an earlier session.
    pub fn with_operations(ops: Vec<PendingOperation>) -> Self {
        Self { ops: Mutex::new(ops) }
    }

    pub fn snapshot(&self) -> Vec<PendingOperation> {
        self.ops.lock().map(|ops| ops.clone()).unwrap_or_default()
    }
}

impl QueueStore for MemoryQueueStore {
    fn load(&self) -> Result<Vec<PendingOperation>, QueueError> {
        Ok(self.snapshot())
    }

    fn save(&self, ops: &[PendingOperation]) -> Result<(), QueueError> {
        let mut guard = self.ops.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = ops.to_vec();
        Ok(())
    }
}
