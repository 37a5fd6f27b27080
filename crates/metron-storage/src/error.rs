use metron_common::types::{InvalidMetric, MetricKind};
use std::path::PathBuf;

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use metron_common::types::MetricKind;
/// use metron_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     kind: MetricKind::Gauge,
///     name: "Alloc".to_string(),
/// };
/// assert!(err.is_not_found());
/// assert!(err.to_string().contains("Alloc"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A read asked for a metric that was never written.
    #[error("Storage: {kind} '{name}' not found")]
    NotFound { kind: MetricKind, name: String },

    /// The update itself is malformed (unknown kind, missing payload, ...).
    #[error("Storage: invalid metric: {0}")]
    InvalidArgument(#[from] InvalidMetric),

    /// Reading or writing the snapshot file failed, after retries for writes.
    #[error("Storage: I/O failure on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot file exists but does not hold a valid snapshot.
    #[error("Storage: snapshot {} is malformed: {source}", .path.display())]
    Consistency {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Serializing the in-memory tables failed.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Shutdown interrupted a retried write.
    #[error("Storage: cancelled while retrying write to {}", .path.display())]
    Cancelled { path: PathBuf },
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, StorageError::InvalidArgument(_))
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
