use crate::error::{Result, StorageError};
use crate::mem::{MemStorage, Snapshot};
use crate::{validate_batch, validate_counter, validate_gauge, Storage};
use async_trait::async_trait;
use metron_common::retry::{self, Backoff, RetryError};
use metron_common::task::spawn_periodic;
use metron_common::types::Metric;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Settings for [`FileStorage`].
#[derive(Debug, Clone)]
pub struct FileConfig {
    /// Snapshot file location.
    pub path: PathBuf,
    /// Zero means every mutation is written through before it returns.
    pub store_interval: Duration,
    /// Load the snapshot file on open.
    pub restore: bool,
    /// Delays between retried snapshot writes.
    pub backoff: Backoff,
}

impl FileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            store_interval: Duration::ZERO,
            restore: true,
            backoff: Backoff::default(),
        }
    }
}

/// A [`MemStorage`] mirrored to a JSON snapshot file.
///
/// In synchronous mode the snapshot is rewritten while the write lock is
/// still held, so a mutation returns only once the file reflects it. In
/// interval mode a background task rewrites the file every `store_interval`
/// and [`Storage::close`] writes a final snapshot.
pub struct FileStorage {
    inner: Arc<MemStorage>,
    path: PathBuf,
    sync: bool,
    backoff: Backoff,
    cancel: CancellationToken,
    saver: Mutex<Option<JoinHandle<()>>>,
}

impl FileStorage {
    /// Opens the store, restoring from disk when configured.
    ///
    /// `cancel` stops the background saver and aborts pending retry waits;
    /// closing the store cancels only a child of it.
    pub async fn open(config: FileConfig, cancel: CancellationToken) -> Result<Self> {
        let inner = Arc::new(MemStorage::new());

        if config.restore {
            match load_snapshot(&config.path).await? {
                Some(snapshot) => {
                    tracing::info!(
                        path = %config.path.display(),
                        gauges = snapshot.gauge.len(),
                        counters = snapshot.counter.len(),
                        "Restored metrics from snapshot"
                    );
                    inner.replace(snapshot).await;
                }
                None => {
                    tracing::info!(path = %config.path.display(), "No snapshot to restore, starting empty");
                }
            }
        }

        let cancel = cancel.child_token();
        let sync = config.store_interval.is_zero();
        let saver = if sync {
            None
        } else {
            let inner = inner.clone();
            let path = config.path.clone();
            let backoff = config.backoff.clone();
            let token = cancel.clone();
            Some(spawn_periodic(
                "snapshot-saver",
                config.store_interval,
                cancel.clone(),
                move || {
                    let inner = inner.clone();
                    let path = path.clone();
                    let backoff = backoff.clone();
                    let token = token.clone();
                    async move {
                        // Copy out so writers are not held up by retries.
                        let tables = inner.snapshot().await;
                        match write_snapshot(&path, &tables, &backoff, &token).await {
                            Ok(()) => tracing::debug!(path = %path.display(), "Snapshot saved"),
                            Err(e) => tracing::error!(error = %e, "Periodic snapshot failed"),
                        }
                    }
                },
            ))
        };

        tracing::info!(
            path = %config.path.display(),
            sync,
            interval_secs = config.store_interval.as_secs(),
            "File storage opened"
        );

        Ok(Self {
            inner,
            path: config.path,
            sync,
            backoff: config.backoff,
            cancel,
            saver: Mutex::new(saver),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_sync(&self) -> bool {
        self.sync
    }

    async fn write_through(&self, tables: &Snapshot) -> Result<()> {
        if self.sync {
            write_snapshot(&self.path, tables, &self.backoff, &self.cancel).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn set_gauge(&self, name: &str, value: f64) -> Result<()> {
        validate_gauge(name, value)?;
        let mut tables = self.inner.write().await;
        tables.set_gauge(name, value);
        self.write_through(&tables).await
    }

    async fn get_gauge(&self, name: &str) -> Result<f64> {
        self.inner.get_gauge(name).await
    }

    async fn add_counter(&self, name: &str, delta: i64) -> Result<()> {
        validate_counter(name, delta)?;
        let mut tables = self.inner.write().await;
        tables.add_counter(name, delta);
        self.write_through(&tables).await
    }

    async fn get_counter(&self, name: &str) -> Result<i64> {
        self.inner.get_counter(name).await
    }

    async fn save_batch(&self, batch: &[Metric]) -> Result<()> {
        validate_batch(batch)?;
        let mut tables = self.inner.write().await;
        for metric in batch {
            tables.apply(metric);
        }
        self.write_through(&tables).await
    }

    async fn get_all(&self) -> Result<BTreeMap<String, String>> {
        self.inner.get_all().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let saver = self
            .saver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = saver {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Snapshot saver task panicked");
            }
        }

        // The store's own token is already cancelled; the final write still
        // gets the full retry schedule.
        let tables = self.inner.snapshot().await;
        write_snapshot(&self.path, &tables, &self.backoff, &CancellationToken::new()).await?;
        tracing::info!(path = %self.path.display(), "Final snapshot written");
        Ok(())
    }
}

/// Reads a snapshot file.
///
/// A missing or empty file, or one cut off mid-document, yields `None`.
/// Anything else that fails to parse is a [`StorageError::Consistency`].
pub async fn load_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::UnexpectedEof
            ) =>
        {
            return Ok(None)
        }
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    match serde_json::from_slice::<Snapshot>(&bytes) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(e) if e.is_eof() => {
            tracing::warn!(path = %path.display(), error = %e, "Snapshot is truncated, starting empty");
            Ok(None)
        }
        Err(source) => Err(StorageError::Consistency {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Serializes `tables` and replaces the snapshot file, retrying failed
/// writes on `backoff`.
pub async fn write_snapshot(
    path: &Path,
    tables: &Snapshot,
    backoff: &Backoff,
    cancel: &CancellationToken,
) -> Result<()> {
    let bytes = serde_json::to_vec(tables)?;
    retry::retry(backoff, cancel, || replace_file(path, &bytes))
        .await
        .map_err(|e| match e {
            RetryError::Cancelled { .. } => StorageError::Cancelled {
                path: path.to_path_buf(),
            },
            other => StorageError::Io {
                path: path.to_path_buf(),
                source: other.into_inner(),
            },
        })
}

async fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}
