//! RocksDB-backed ledger store.
//!
//! Column families:
//! - `state`: Current envelope JSON under a single key
//! - `revisions`: Accepted envelopes (LZ4 compressed, keyed by version BE)
//! - `metadata`: `LedgerMetadata` (bincode)

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};

use super::{compress_revision, decompress_revision, LedgerMetadata, LedgerStore, StoreError};

const CF_STATE: &str = "state";
const CF_REVISIONS: &str = "revisions";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_STATE, CF_REVISIONS, CF_METADATA];

const STATE_KEY: &[u8] = b"current";
const METADATA_KEY: &[u8] = b"ledger";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: true)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/ledger"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// RocksDB-backed ledger store.
///
/// Writes go through a single `WriteBatch` so the current state, its
/// revision and the metadata never disagree after a crash.
pub struct DocumentStore {
    /// RocksDB instance (single-threaded; callers serialize through the ledger)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl DocumentStore {
    /// Open the store at the configured path, creating the database and
    /// column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.set_max_total_wal_size(64 * 1024 * 1024);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened ledger store at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_STATE | CF_METADATA => {
                // One hot key each
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_REVISIONS => {
                // Values are already LZ4 compressed
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(3);
            }
            _ => {}
        }

        opts
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Force a flush of memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    fn write_options(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }

    fn version_from_key(key: &[u8]) -> Option<u64> {
        let bytes: [u8; 8] = key.get(..8)?.try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }
}

impl LedgerStore for DocumentStore {
    fn load_state(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(CF_STATE)?;
        Ok(self.db.get_cf(cf, STATE_KEY)?)
    }

    fn save_state(&self, version: u64, json: &[u8]) -> Result<LedgerMetadata, StoreError> {
        let cf_state = self.cf(CF_STATE)?;
        let cf_revisions = self.cf(CF_REVISIONS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let compressed = compress_revision(json);
        let mut meta = self.metadata()?.unwrap_or_else(LedgerMetadata::new);
        meta.record_write(version, json.len(), compressed.len());

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_state, STATE_KEY, json);
        batch.put_cf(cf_revisions, version.to_be_bytes(), &compressed);
        batch.put_cf(cf_meta, METADATA_KEY, meta.encode()?);
        self.db.write_opt(batch, &self.write_options())?;

        Ok(meta)
    }

    fn load_revision(&self, version: u64) -> Result<Vec<u8>, StoreError> {
        let cf = self.cf(CF_REVISIONS)?;
        match self.db.get_cf(cf, version.to_be_bytes())? {
            Some(compressed) => decompress_revision(&compressed),
            None => Err(StoreError::RevisionNotFound(version)),
        }
    }

    fn revisions(&self) -> Result<Vec<u64>, StoreError> {
        let cf = self.cf(CF_REVISIONS)?;
        let mut versions = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            if let Some(version) = Self::version_from_key(&key) {
                versions.push(version);
            }
        }
        Ok(versions)
    }

    fn compact_revisions(&self, keep: usize) -> Result<u64, StoreError> {
        let versions = self.revisions()?;
        if versions.len() <= keep {
            return Ok(0);
        }

        let cf = self.cf(CF_REVISIONS)?;
        let doomed = &versions[..versions.len() - keep];
        let mut batch = WriteBatch::default();
        for version in doomed {
            batch.delete_cf(cf, version.to_be_bytes());
        }
        self.db.write_opt(batch, &self.write_options())?;

        log::debug!("Compacted {} ledger revisions", doomed.len());
        Ok(doomed.len() as u64)
    }

    fn metadata(&self) -> Result<Option<LedgerMetadata>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(cf, METADATA_KEY)? {
            Some(bytes) => Ok(Some(LedgerMetadata::decode(&bytes)?)),
            None => Ok(None),
        }
    }
}
