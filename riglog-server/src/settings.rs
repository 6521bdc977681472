//! Environment-driven settings for the ledger server.

use std::path::{Path, PathBuf};

use riglog_collab::{LedgerConfig, ServerConfig, StoreConfig};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DATA_DIR: &str = "data";
const SEED_FILE: &str = "default-state.json";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    /// Seed document for an empty ledger.
    pub seed: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings from any variable source.
    ///
    /// `RIGLOG_BIND` wins over `PORT`.  Without `RIGLOG_SEED` the data
    /// directory's `default-state.json` is used when it exists.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let bind_addr = match lookup("RIGLOG_BIND").filter(|v| !v.trim().is_empty()) {
            Some(addr) => addr.trim().to_string(),
            None => {
                let port = lookup("PORT")
                    .and_then(|raw| match raw.trim().parse::<u16>() {
                        Ok(port) => Some(port),
                        Err(e) => {
                            log::warn!("Ignoring PORT={raw:?} ({e}), using {DEFAULT_PORT}");
                            None
                        }
                    })
                    .unwrap_or(DEFAULT_PORT);
                format!("0.0.0.0:{port}")
            }
        };

        let data_dir = lookup("RIGLOG_DATA_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let seed = match lookup("RIGLOG_SEED").filter(|v| !v.trim().is_empty()) {
            Some(path) => Some(PathBuf::from(path)),
            None => Some(data_dir.join(SEED_FILE)).filter(|path| path.is_file()),
        };

        Self {
            bind_addr,
            data_dir,
            seed,
        }
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            path: self.store_dir(),
            ..StoreConfig::default()
        }
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        match &self.seed {
            Some(path) => LedgerConfig::default().with_seed(path),
            None => LedgerConfig::default(),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind_addr.clone(),
            ..ServerConfig::default()
        }
    }

    pub fn seed_path(&self) -> Option<&Path> {
        self.seed.as_deref()
    }
}
