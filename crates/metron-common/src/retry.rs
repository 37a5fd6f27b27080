//! Bounded retries over a fixed backoff schedule.
//!
//! Both the snapshot writer on the collector and the agent's dispatch path use
//! the same schedule: one initial attempt, then one retry after each delay.
//! A cancellation token aborts a pending wait immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delays (in seconds) between attempts when nothing else is configured.
pub const DEFAULT_BACKOFF_SECS: [u64; 3] = [1, 3, 5];

/// A fixed list of delays slept between consecutive attempts.
///
/// # Examples
///
/// ```
/// use metron_common::retry::Backoff;
///
/// let backoff = Backoff::default();
/// assert_eq!(backoff.attempts(), 4);
/// assert_eq!(Backoff::none().attempts(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    delays: Vec<Duration>,
}

impl Backoff {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().map(|s| Duration::from_secs(*s)).collect())
    }

    /// A single attempt with no retries.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Total number of attempts, the first one included.
    pub fn attempts(&self) -> usize {
        self.delays.len() + 1
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_secs(&DEFAULT_BACKOFF_SECS)
    }
}

/// Why a retried operation gave up. Every variant carries the last error seen.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: E },

    #[error("not retried after attempt {attempts}: {last}")]
    Permanent { attempts: usize, last: E },

    #[error("cancelled after {attempts} attempts: {last}")]
    Cancelled { attempts: usize, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> usize {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Permanent { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. }
            | RetryError::Permanent { last, .. }
            | RetryError::Cancelled { last, .. } => last,
        }
    }
}

/// Runs `op` until it succeeds or the schedule is used up.
pub async fn retry<T, E, F, Fut>(
    backoff: &Backoff,
    cancel: &CancellationToken,
    op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(backoff, cancel, op, |_| true).await
}

/// Like [`retry`], but only errors for which `retriable` returns `true` are
/// retried; anything else fails immediately with [`RetryError::Permanent`].
pub async fn retry_if<T, E, F, Fut, P>(
    backoff: &Backoff,
    cancel: &CancellationToken,
    mut op: F,
    retriable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !retriable(&err) {
            return Err(RetryError::Permanent {
                attempts: attempt,
                last: err,
            });
        }

        let Some(delay) = backoff.delays.get(attempt - 1).copied() else {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        };

        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Operation failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled {
                    attempts: attempt,
                    last: err,
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
