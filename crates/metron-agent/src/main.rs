use anyhow::{Context, Result};
use metron_agent::pool::DispatchError;
use metron_agent::reporter::{self, Reporter};
use metron_agent::{build_transport, AgentConfig};
use metron_collector::MetricSampler;
use metron_common::task::spawn_periodic;
use metron_storage::{MemStorage, Storage};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("metron=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());
    let config = AgentConfig::load(&config_path)?;

    let store = Arc::new(MemStorage::new());
    let sampler = Arc::new(Mutex::new(MetricSampler::new(
        metron_collector::default_collectors(),
    )));
    let transport = build_transport(&config).context("Failed to build transport")?;

    tracing::info!(
        transport = transport.name(),
        endpoint = transport.endpoint(),
        poll_secs = config.poll_interval_secs,
        report_secs = config.report_interval_secs,
        workers = config.num_workers,
        "metron-agent starting"
    );

    let cancel = CancellationToken::new();
    // Separate so queued jobs keep their retries until the pool is drained.
    let pool_cancel = CancellationToken::new();
    let (pool, errors) = reporter::start_pool(
        transport.clone(),
        store.clone(),
        config.backoff(),
        config.num_workers,
        config.queue_capacity(),
        pool_cancel.clone(),
    );
    let pool = Arc::new(pool);
    let drain = reporter::spawn_error_drain(errors);

    let poll_task = {
        let store = store.clone();
        spawn_periodic("poll", config.poll_interval(), cancel.clone(), move || {
            let store = store.clone();
            let sampler = sampler.clone();
            async move {
                if let Err(e) = sampler.lock().await.poll(store.as_ref()).await {
                    tracing::error!(error = %e, "Poll failed");
                }
            }
        })
    };

    let report_task = {
        let reporter = Arc::new(Reporter::new(store.clone(), pool.clone(), transport));
        spawn_periodic("report", config.report_interval(), cancel.clone(), move || {
            let reporter = reporter.clone();
            async move {
                match reporter.report().await {
                    Ok(_) => {}
                    Err(DispatchError::Closed) => tracing::debug!("Job queue closed, report skipped"),
                    Err(e) => tracing::error!(error = %e, "Report cycle failed"),
                }
            }
        })
    };

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");

    cancel.cancel();
    for (name, task) in [("poll", poll_task), ("report", report_task)] {
        if let Err(e) = task.await {
            tracing::error!(task = name, error = %e, "Periodic task panicked");
        }
    }
    if tokio::time::timeout(config.report_interval(), pool.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Worker pool still busy, cancelling in-flight retries");
        pool_cancel.cancel();
        pool.shutdown().await;
    }
    if let Err(e) = drain.await {
        tracing::error!(error = %e, "Error drain panicked");
    }
    store.close().await?;

    tracing::info!("metron-agent stopped");
    Ok(())
}
