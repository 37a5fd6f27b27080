use crate::error::{Result, StorageError};
use crate::{format_gauge, validate_batch, validate_counter, validate_gauge, Storage};
use async_trait::async_trait;
use metron_common::types::{Metric, MetricKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The two metric tables. This is also the on-disk snapshot layout:
/// `{"gauge": {...}, "counter": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub gauge: HashMap<String, f64>,
    #[serde(default)]
    pub counter: HashMap<String, i64>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.gauge.is_empty() && self.counter.is_empty()
    }

    pub(crate) fn set_gauge(&mut self, name: &str, value: f64) {
        self.gauge.insert(name.to_string(), value);
    }

    pub(crate) fn add_counter(&mut self, name: &str, delta: i64) {
        let slot = self.counter.entry(name.to_string()).or_insert(0);
        *slot = slot.wrapping_add(delta);
    }

    /// Applies an already validated metric.
    pub(crate) fn apply(&mut self, metric: &Metric) {
        match metric.kind {
            MetricKind::Gauge => self.set_gauge(&metric.id, metric.value.unwrap_or_default()),
            MetricKind::Counter => self.add_counter(&metric.id, metric.delta.unwrap_or_default()),
        }
    }

    pub(crate) fn render(&self) -> BTreeMap<String, String> {
        let gauges = self
            .gauge
            .iter()
            .map(|(name, value)| (name.clone(), format_gauge(*value)));
        let counters = self
            .counter
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()));
        gauges.chain(counters).collect()
    }
}

/// In-memory metric table guarded by a single reader/writer lock.
///
/// Every mutation, batches included, happens under one write-lock
/// acquisition, so readers never observe half of a batch.
#[derive(Debug, Default)]
pub struct MemStorage {
    tables: RwLock<Snapshot>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            tables: RwLock::new(snapshot),
        }
    }

    /// Returns a consistent copy of both tables.
    pub async fn snapshot(&self) -> Snapshot {
        self.tables.read().await.clone()
    }

    /// Replaces both tables wholesale.
    pub async fn replace(&self, snapshot: Snapshot) {
        *self.tables.write().await = snapshot;
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.tables.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.tables.write().await
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn set_gauge(&self, name: &str, value: f64) -> Result<()> {
        validate_gauge(name, value)?;
        self.write().await.set_gauge(name, value);
        Ok(())
    }

    async fn get_gauge(&self, name: &str) -> Result<f64> {
        self.read()
            .await
            .gauge
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::NotFound {
                kind: MetricKind::Gauge,
                name: name.to_string(),
            })
    }

    async fn add_counter(&self, name: &str, delta: i64) -> Result<()> {
        validate_counter(name, delta)?;
        self.write().await.add_counter(name, delta);
        Ok(())
    }

    async fn get_counter(&self, name: &str) -> Result<i64> {
        self.read()
            .await
            .counter
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::NotFound {
                kind: MetricKind::Counter,
                name: name.to_string(),
            })
    }

    async fn save_batch(&self, batch: &[Metric]) -> Result<()> {
        validate_batch(batch)?;
        let mut tables = self.write().await;
        for metric in batch {
            tables.apply(metric);
        }
        Ok(())
    }

    async fn get_all(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.read().await.render())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
