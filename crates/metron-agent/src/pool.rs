//! Bounded worker pool that drains the job queue.

use crate::transport::TransportError;
use metron_common::types::Metric;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// One unit of dispatch work, consumed by exactly one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub name: String,
    pub endpoint: String,
    pub payload: Vec<Metric>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("job queue is closed")]
    Closed,

    #[error("job {job} failed after {attempts} attempt(s): {source}")]
    Send {
        job: String,
        attempts: usize,
        #[source]
        source: TransportError,
    },

    #[error("job {job} cancelled after {attempts} attempt(s): {source}")]
    Cancelled {
        job: String,
        attempts: usize,
        #[source]
        source: TransportError,
    },
}

/// `num_workers` tasks pulling [`Job`]s from one bounded queue.
///
/// Failures are pushed into an error sink with room for `num_workers` entries;
/// when nobody drains it, extra errors are dropped. The pool never retries on
/// its own.
pub struct WorkerPool {
    tx: StdMutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<JoinSet<()>>,
    num_workers: usize,
}

impl WorkerPool {
    /// Spawns the workers and returns the pool together with the receiving
    /// end of its error sink.
    ///
    /// Cancelling `cancel` closes the queue to new jobs. Jobs already queued
    /// are still passed to `send`, which is expected to fail fast once its
    /// own retries observe the cancellation.
    pub fn start<F, Fut, E>(
        send: F,
        num_workers: usize,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<E>)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Send + 'static,
    {
        let num_workers = num_workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let (err_tx, err_rx) = mpsc::channel::<E>(num_workers);
        let rx = Arc::new(Mutex::new(rx));
        let send = Arc::new(send);

        let mut workers = JoinSet::new();
        for id in 0..num_workers {
            let rx = rx.clone();
            let send = send.clone();
            let err_tx = err_tx.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        job = async { rx.lock().await.recv().await } => job,
                    };
                    let Some(job) = next else {
                        tracing::debug!(worker = id, "Worker stopped");
                        return;
                    };
                    run_job(id, send.as_ref(), &err_tx, job).await;
                }

                // Cancelled: refuse new jobs, but still hand every queued one
                // to `send` so each is accounted for exactly once.
                loop {
                    let next = {
                        let mut rx = rx.lock().await;
                        rx.close();
                        rx.recv().await
                    };
                    let Some(job) = next else { break };
                    run_job(id, send.as_ref(), &err_tx, job).await;
                }
                tracing::debug!(worker = id, "Worker stopped after draining queue");
            });
        }

        tracing::info!(workers = num_workers, queue_capacity, "Worker pool started");

        (
            Self {
                tx: StdMutex::new(Some(tx)),
                workers: Mutex::new(workers),
                num_workers,
            },
            err_rx,
        )
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Queues a job, waiting while the queue is full.
    pub async fn submit(&self, job: Job) -> Result<(), DispatchError> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(DispatchError::Closed)?;
        tx.send(job).await.map_err(|_| DispatchError::Closed)
    }

    /// Closes the queue. Jobs already queued are still delivered.
    pub fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    /// Closes the queue and waits until every worker has exited.
    pub async fn shutdown(&self) {
        self.close();
        let mut workers = self.workers.lock().await;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn run_job<F, Fut, E>(id: usize, send: &F, err_tx: &mpsc::Sender<E>, job: Job)
where
    F: Fn(Job) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let name = job.name.clone();
    if let Err(err) = send(job).await {
        match err_tx.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!(worker = id, job = %name, "Error sink full, dropping error");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(worker = id, job = %name, "Error sink closed, dropping error");
            }
        }
    }
}
