use crate::error::{Result, StorageError};
use crate::{format_gauge, validate_batch, validate_counter, validate_gauge, Storage};
use async_trait::async_trait;
use metron_common::types::{Metric, MetricKind};
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS gauges (
    name TEXT PRIMARY KEY,
    value REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS counters (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
";

const UPSERT_GAUGE: &str = "INSERT INTO gauges (name, value) VALUES (?1, ?2)
     ON CONFLICT(name) DO UPDATE SET value = excluded.value";

const SELECT_COUNTER: &str = "SELECT value FROM counters WHERE name = ?1";

// The sum is computed in Rust: SQLite turns an overflowing integer sum into REAL.
const UPSERT_COUNTER: &str = "INSERT INTO counters (name, value) VALUES (?1, ?2)
     ON CONFLICT(name) DO UPDATE SET value = excluded.value";

/// Metric tables in a SQLite database.
///
/// One connection is shared behind a mutex and every batch runs in its own
/// transaction, so concurrent writers are serialized.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        tracing::info!(path = %path.display(), "Opened SQLite metric store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Adds `delta` with `i64` wrapping. Callers hold the connection lock.
    fn bump_counter(conn: &Connection, name: &str, delta: i64) -> Result<()> {
        let current: i64 = conn
            .prepare_cached(SELECT_COUNTER)?
            .query_row([name], |row| row.get(0))
            .optional()?
            .unwrap_or_default();
        conn.prepare_cached(UPSERT_COUNTER)?
            .execute(rusqlite::params![name, current.wrapping_add(delta)])?;
        Ok(())
    }

    /// Lock the connection, recovering from a poisoned mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn set_gauge(&self, name: &str, value: f64) -> Result<()> {
        validate_gauge(name, value)?;
        self.lock()
            .execute(UPSERT_GAUGE, rusqlite::params![name, value])?;
        Ok(())
    }

    async fn get_gauge(&self, name: &str) -> Result<f64> {
        self.lock()
            .query_row("SELECT value FROM gauges WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| StorageError::NotFound {
                kind: MetricKind::Gauge,
                name: name.to_string(),
            })
    }

    async fn add_counter(&self, name: &str, delta: i64) -> Result<()> {
        validate_counter(name, delta)?;
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        Self::bump_counter(&tx, name, delta)?;
        tx.commit()?;
        Ok(())
    }

    async fn get_counter(&self, name: &str) -> Result<i64> {
        self.lock()
            .query_row(SELECT_COUNTER, [name], |row| row.get(0))
            .optional()?
            .ok_or_else(|| StorageError::NotFound {
                kind: MetricKind::Counter,
                name: name.to_string(),
            })
    }

    async fn save_batch(&self, batch: &[Metric]) -> Result<()> {
        validate_batch(batch)?;
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        {
            let mut gauge = tx.prepare_cached(UPSERT_GAUGE)?;
            for metric in batch {
                match metric.kind {
                    MetricKind::Gauge => {
                        gauge.execute(rusqlite::params![
                            &metric.id,
                            metric.value.unwrap_or_default()
                        ])?;
                    }
                    MetricKind::Counter => {
                        Self::bump_counter(&tx, &metric.id, metric.delta.unwrap_or_default())?;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_all(&self) -> Result<BTreeMap<String, String>> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let mut all = BTreeMap::new();
        {
            let mut stmt = tx.prepare_cached("SELECT name, value FROM gauges")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            for row in rows {
                let (name, value) = row?;
                all.insert(name, format_gauge(value));
            }

            let mut stmt = tx.prepare_cached("SELECT name, value FROM counters")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (name, value) = row?;
                all.insert(name, value.to_string());
            }
        }
        tx.commit()?;
        Ok(all)
    }

    async fn ping(&self) -> Result<()> {
        self.lock().query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.lock().execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}
