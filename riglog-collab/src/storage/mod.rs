//! Persistent storage for the version ledger.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐   accepted envelope   ┌───────────────┐
//! │ Ledger      │ ────────────────────► │ LedgerStore   │
//! │ (in-memory) │                       │ RocksDB / mem │
//! └──────┬──────┘                       └──────┬────────┘
//!        │ on startup                          │
//!        ▼                                     ▼
//! ┌─────────────┐     ┌─────────────────────────────────────────┐
//! │ normalized  │     │ "state": current envelope JSON          │
//! │ envelope    │     │ "revisions": LZ4 envelopes by version   │
//! └─────────────┘     │ "metadata": bincode LedgerMetadata      │
//!                     └─────────────────────────────────────────┘
//! ```

pub mod memory;
pub mod rocks;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;
pub use rocks::{DocumentStore, StoreConfig};

/// Durable home of the ledger document.
///
/// Every write stores the current envelope, its revision and the updated
/// metadata as one atomic unit.
pub trait LedgerStore: Send + Sync {
    /// Current envelope JSON, if anything was ever saved.
    fn load_state(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Persist an accepted envelope as the current state and as a revision.
    fn save_state(&self, version: u64, json: &[u8]) -> Result<LedgerMetadata, StoreError>;

    /// Envelope JSON of a stored revision.
    fn load_revision(&self, version: u64) -> Result<Vec<u8>, StoreError>;

    /// Stored revision versions, ascending.
    fn revisions(&self) -> Result<Vec<u64>, StoreError>;

    /// Drop all but the newest `keep` revisions.  Returns how many were
    /// removed.
    fn compact_revisions(&self, keep: usize) -> Result<u64, StoreError>;

    fn metadata(&self) -> Result<Option<LedgerMetadata>, StoreError>;
}

/// Bookkeeping stored next to the ledger document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerMetadata {
    /// Version of the current state
    pub version: u64,
    /// Total accepted writes since the store was created
    pub write_count: u64,
    /// Uncompressed size of the current state in bytes
    pub state_size: u64,
    /// Compressed size of the newest revision in bytes
    pub compressed_size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerMetadata {
    pub(crate) fn new() -> Self {
        let now = Utc::now();
        Self {
            version: 0,
            write_count: 0,
            state_size: 0,
            compressed_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a write of `state_size` bytes compressed to `compressed_size`.
    pub(crate) fn record_write(&mut self, version: u64, state_size: usize, compressed_size: usize) {
        self.version = version;
        self.write_count += 1;
        self.state_size = state_size as u64;
        self.compressed_size = compressed_size as u64;
        self.updated_at = Utc::now();
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(meta)
    }
}

/// Compress a revision for storage.
pub(crate) fn compress_revision(json: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(json)
}

pub(crate) fn decompress_revision(bytes: &[u8]) -> Result<Vec<u8>, StoreError> {
    lz4_flex::decompress_size_prepended(bytes).map_err(|e| StoreError::CompressionError(e.to_string()))
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Revision not stored (never written or compacted away)
    RevisionNotFound(u64),
    SerializationError(String),
    DeserializationError(String),
    CompressionError(String),
    IoError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::RevisionNotFound(v) => write!(f, "Revision not found: {v}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::IoError(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::IoError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_bincode_roundtrip() {
        let mut meta = LedgerMetadata::new();
        meta.record_write(7, 2048, 300);
        let decoded = LedgerMetadata::decode(&meta.encode().unwrap()).unwrap();
        assert_eq!(decoded, meta);
        assert_eq!(decoded.write_count, 1);
    }

    #[test]
    fn test_revision_compression() {
        let json = br#"{"version":3,"decks":[]}"#.repeat(20);
        let compressed = compress_revision(&json);
        assert!(compressed.len() < json.len());
        assert_eq!(decompress_revision(&compressed).unwrap(), json);
        assert!(decompress_revision(&[1, 2]).is_err());
    }
}
