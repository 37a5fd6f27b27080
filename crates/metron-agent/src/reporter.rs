//! Report cycle: turns the local table into jobs and delivers them.
//!
//! Counters travel as deltas. When a cycle plans its jobs it takes each
//! non-zero counter out of the local table; a job that ultimately fails puts
//! its deltas back so the next cycle carries them. A delta is therefore never
//! in two jobs at once, however long a retried job takes. Gauges of a failed
//! job are simply dropped; the next cycle sends fresh readings.

use crate::pool::{DispatchError, Job, WorkerPool};
use crate::transport::{Transport, TransportError};
use metron_common::retry::{retry_if, Backoff, RetryError};
use metron_common::types::{Metric, MetricKind};
use metron_storage::{MemStorage, Snapshot, Storage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Flattens the local table into wire metrics, sorted by name. Zero counters
/// carry nothing and are left out.
pub fn collect_metrics(snapshot: &Snapshot) -> Vec<Metric> {
    let mut metrics: Vec<Metric> = snapshot
        .gauge
        .iter()
        .map(|(name, value)| Metric::gauge(name.clone(), *value))
        .chain(
            snapshot
                .counter
                .iter()
                .filter(|(_, delta)| **delta != 0)
                .map(|(name, delta)| Metric::counter(name.clone(), *delta)),
        )
        .collect();
    metrics.sort_by(|a, b| (&a.id, a.kind).cmp(&(&b.id, b.kind)));
    metrics
}

/// Splits `metrics` into jobs of at most `transport.batch_size()` records.
pub fn plan_jobs(metrics: Vec<Metric>, transport: &dyn Transport, cycle: u64) -> Vec<Job> {
    let size = transport.batch_size().max(1);
    metrics
        .chunks(size)
        .enumerate()
        .map(|(i, chunk)| Job {
            name: format!("{}-{cycle}-{i}", transport.name()),
            endpoint: transport.endpoint().to_string(),
            payload: chunk.to_vec(),
        })
        .collect()
}

/// Puts the counter deltas of an undelivered payload back into the table.
pub async fn restore_counters(store: &MemStorage, payload: &[Metric]) {
    for metric in payload.iter().filter(|m| m.kind == MetricKind::Counter) {
        let delta = metric.delta.unwrap_or_default();
        if let Err(e) = store.add_counter(&metric.id, delta).await {
            tracing::error!(metric = %metric.id, error = %e, "Cannot restore counter delta");
        }
    }
}

/// Sends one job, retrying retriable failures on `backoff`. On final failure
/// the job's counter deltas go back to `store`.
pub async fn deliver(
    job: Job,
    transport: Arc<dyn Transport>,
    store: Arc<MemStorage>,
    backoff: Backoff,
    cancel: CancellationToken,
) -> Result<(), DispatchError> {
    let result = retry_if(
        &backoff,
        &cancel,
        || transport.send(&job.payload),
        TransportError::is_retriable,
    )
    .await;

    match result {
        Ok(()) => {
            tracing::debug!(job = %job.name, metrics = job.payload.len(), "Job delivered");
            Ok(())
        }
        Err(e) => {
            restore_counters(&store, &job.payload).await;
            let attempts = e.attempts();
            Err(match e {
                RetryError::Cancelled { last, .. } => DispatchError::Cancelled {
                    job: job.name,
                    attempts,
                    source: last,
                },
                other => DispatchError::Send {
                    job: job.name,
                    attempts,
                    source: other.into_inner(),
                },
            })
        }
    }
}

/// Starts a pool whose workers [`deliver`] jobs through `transport`.
pub fn start_pool(
    transport: Arc<dyn Transport>,
    store: Arc<MemStorage>,
    backoff: Backoff,
    num_workers: usize,
    queue_capacity: usize,
    cancel: CancellationToken,
) -> (WorkerPool, mpsc::Receiver<DispatchError>) {
    let retry_cancel = cancel.clone();
    WorkerPool::start(
        move |job| {
            deliver(
                job,
                transport.clone(),
                store.clone(),
                backoff.clone(),
                retry_cancel.clone(),
            )
        },
        num_workers,
        queue_capacity,
        cancel,
    )
}

/// Logs every error that reaches the sink until all workers are gone.
pub fn spawn_error_drain(mut errors: mpsc::Receiver<DispatchError>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(e) = errors.recv().await {
            tracing::warn!(error = %e, "Metric delivery failed");
        }
    })
}

/// Feeds the worker pool from the local table once per report tick.
pub struct Reporter {
    store: Arc<MemStorage>,
    pool: Arc<WorkerPool>,
    transport: Arc<dyn Transport>,
    cycle: AtomicU64,
}

impl Reporter {
    pub fn new(store: Arc<MemStorage>, pool: Arc<WorkerPool>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            pool,
            transport,
            cycle: AtomicU64::new(0),
        }
    }

    /// Takes the current table, plans jobs and queues them. Returns the number
    /// of jobs queued.
    ///
    /// Waits while the queue is full. If the queue closes mid-cycle, the
    /// counter deltas of every job that was not queued are restored.
    pub async fn report(&self) -> Result<usize, DispatchError> {
        let cycle = self.cycle.fetch_add(1, Ordering::Relaxed);
        let metrics = self.take().await;
        if metrics.is_empty() {
            return Ok(0);
        }

        let jobs = plan_jobs(metrics, self.transport.as_ref(), cycle);
        let total = jobs.len();
        let mut pending = jobs.into_iter();
        while let Some(job) = pending.next() {
            let payload = job.payload.clone();
            if let Err(e) = self.pool.submit(job).await {
                restore_counters(&self.store, &payload).await;
                for job in pending {
                    restore_counters(&self.store, &job.payload).await;
                }
                return Err(e);
            }
        }

        tracing::debug!(cycle, jobs = total, transport = self.transport.name(), "Report cycle queued");
        Ok(total)
    }

    /// Reads the table and subtracts every counter delta being sent, in one
    /// write batch.
    async fn take(&self) -> Vec<Metric> {
        let snapshot = self.store.snapshot().await;
        let metrics = collect_metrics(&snapshot);

        let reserve: Vec<Metric> = metrics
            .iter()
            .filter_map(|m| match (m.kind, m.delta) {
                (MetricKind::Counter, Some(delta)) => {
                    Some(Metric::counter(m.id.clone(), delta.wrapping_neg()))
                }
                _ => None,
            })
            .collect();
        if let Err(e) = self.store.save_batch(&reserve).await {
            // Nothing was subtracted; skip this cycle rather than double count.
            tracing::error!(error = %e, "Cannot reserve counter deltas, skipping cycle");
            return Vec::new();
        }
        metrics
    }
}
