//! RigLogistics ledger server.
//!
//! Opens the RocksDB-backed ledger under `RIGLOG_DATA_DIR` and serves it
//! to editors over websocket.  Log level comes from `RUST_LOG`
//! (default `info`).

mod settings;

use std::sync::Arc;

use riglog_collab::{DocumentStore, Ledger, SyncServer};
use settings::Settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::from_env();
    std::fs::create_dir_all(&settings.data_dir)?;
    if let Some(seed) = settings.seed_path() {
        log::info!("Seed document: {}", seed.display());
    }

    let store = Arc::new(DocumentStore::open(settings.store_config())?);
    log::info!("Ledger store at {}", store.path().display());
    let ledger = Arc::new(Ledger::open(store.clone(), settings.ledger_config()).await?);

    let server = SyncServer::new(settings.server_config(), ledger);
    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            let pushes = server.ledger().group().stats().await;
            log::info!(
                "Shutting down after {} connections, {} accepted writes, {} pushes ({} dropped)",
                stats.total_connections,
                stats.accepted_writes,
                pushes.messages_sent,
                pushes.messages_dropped
            );
            store.sync()?;
            Ok(())
        }
    }
}
