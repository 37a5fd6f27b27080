//! Metric storage for the metron collector.
//!
//! Every backend implements [`Storage`], so handlers never know which one is
//! active:
//!
//! - [`mem::MemStorage`]: two maps behind one reader/writer lock.
//! - [`file::FileStorage`]: wraps a `MemStorage` and mirrors it to a JSON
//!   snapshot file, either on every write or on a fixed interval.
//! - [`sqlite::SqliteStorage`]: a single SQLite connection.

pub mod error;
pub mod file;
pub mod mem;
pub mod sqlite;

#[cfg(test)]
mod tests;

pub use error::{Result, StorageError};
pub use file::{FileConfig, FileStorage};
pub use mem::{MemStorage, Snapshot};
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use metron_common::types::Metric;
use std::collections::BTreeMap;

/// The capability set shared by all metric backends.
///
/// Implementations must be safe to share across tasks (`Send + Sync`)
/// because the HTTP and gRPC listeners call into the same instance
/// concurrently.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Overwrites the gauge `name`.
    async fn set_gauge(&self, name: &str, value: f64) -> Result<()>;

    /// Returns the gauge `name`, or [`StorageError::NotFound`].
    async fn get_gauge(&self, name: &str) -> Result<f64>;

    /// Adds `delta` to the counter `name`, starting from 0 when absent.
    async fn add_counter(&self, name: &str, delta: i64) -> Result<()>;

    /// Returns the counter `name`, or [`StorageError::NotFound`].
    async fn get_counter(&self, name: &str) -> Result<i64>;

    /// Applies all metrics as one unit. The batch is validated up front; an
    /// invalid record rejects the whole batch without touching storage.
    async fn save_batch(&self, batch: &[Metric]) -> Result<()>;

    /// Dumps every metric as `name -> rendered value`, sorted by name.
    async fn get_all(&self) -> Result<BTreeMap<String, String>>;

    /// Health probe.
    async fn ping(&self) -> Result<()>;

    /// Stops background work and flushes anything pending.
    async fn close(&self) -> Result<()>;
}

/// Renders a gauge the way it is served back: the shortest form that parses
/// to the same `f64`.
///
/// ```
/// assert_eq!(metron_storage::format_gauge(1.0), "1");
/// assert_eq!(metron_storage::format_gauge(0.25), "0.25");
/// ```
pub fn format_gauge(value: f64) -> String {
    value.to_string()
}

/// Validates a whole batch before any of it is applied.
pub(crate) fn validate_batch(batch: &[Metric]) -> Result<()> {
    for metric in batch {
        metric.validate()?;
    }
    Ok(())
}

pub(crate) fn validate_gauge(name: &str, value: f64) -> Result<()> {
    Metric::gauge(name, value).validate()?;
    Ok(())
}

pub(crate) fn validate_counter(name: &str, delta: i64) -> Result<()> {
    Metric::counter(name, delta).validate()?;
    Ok(())
}
