//! In-memory ledger store for tests and ephemeral servers.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{compress_revision, decompress_revision, LedgerMetadata, LedgerStore, StoreError};

#[derive(Default)]
struct Inner {
    state: Option<Vec<u8>>,
    revisions: BTreeMap<u64, Vec<u8>>,
    metadata: Option<LedgerMetadata>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LedgerStore for MemoryStore {
    fn load_state(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock().state.clone())
    }

    fn save_state(&self, version: u64, json: &[u8]) -> Result<LedgerMetadata, StoreError> {
        let compressed = compress_revision(json);
        let mut inner = self.lock();
        let mut meta = inner.metadata.take().unwrap_or_else(LedgerMetadata::new);
        meta.record_write(version, json.len(), compressed.len());

        inner.state = Some(json.to_vec());
        inner.revisions.insert(version, compressed);
        inner.metadata = Some(meta.clone());
        Ok(meta)
    }

    fn load_revision(&self, version: u64) -> Result<Vec<u8>, StoreError> {
        match self.lock().revisions.get(&version) {
            Some(compressed) => decompress_revision(compressed),
            None => Err(StoreError::RevisionNotFound(version)),
        }
    }

    fn revisions(&self) -> Result<Vec<u64>, StoreError> {
        Ok(self.lock().revisions.keys().copied().collect())
    }

    fn compact_revisions(&self, keep: usize) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let mut removed = 0;
        while inner.revisions.len() > keep {
            inner.revisions.pop_first();
            removed += 1;
        }
        Ok(removed)
    }

    fn metadata(&self) -> Result<Option<LedgerMetadata>, StoreError> {
        Ok(self.lock().metadata.clone())
    }
}
