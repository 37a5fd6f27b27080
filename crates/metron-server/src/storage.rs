use crate::config::ServerConfig;
use anyhow::Context;
use metron_storage::{FileConfig, FileStorage, MemStorage, SqliteStorage, Storage};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Picks the backend: SQLite when `database_path` is set, else the snapshot
/// file when `file_storage_path` is non-empty, else memory only.
///
/// The store gets a token of its own, so stopping the listeners does not
/// abort writes still in flight; only `close()` cancels it.
pub async fn build_storage(config: &ServerConfig) -> anyhow::Result<Arc<dyn Storage>> {
    if let Some(db) = config.database_path.as_deref().filter(|p| !p.is_empty()) {
        let store = SqliteStorage::open(Path::new(db))
            .with_context(|| format!("Failed to open database {db}"))?;
        tracing::info!(path = db, "Using SQLite storage");
        return Ok(Arc::new(store));
    }

    if !config.file_storage_path.is_empty() {
        let file_config = FileConfig {
            path: config.file_storage_path.clone().into(),
            store_interval: config.store_interval(),
            restore: config.restore,
            backoff: config.backoff(),
        };
        let store = FileStorage::open(file_config, CancellationToken::new())
            .await
            .with_context(|| format!("Failed to open snapshot {}", config.file_storage_path))?;
        return Ok(Arc::new(store));
    }

    tracing::info!("Using in-memory storage, metrics are lost on restart");
    Ok(Arc::new(MemStorage::new()))
}
