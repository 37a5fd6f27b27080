use anyhow::{Context, Result};
use metron_common::proto::metrics_server::MetricsServer;
use metron_server::app;
use metron_server::config::ServerConfig;
use metron_server::grpc::MetricsService;
use metron_server::state::AppState;
use metron_server::storage::build_storage;
use std::net::SocketAddr;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server as TonicServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("metron=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());
    let config = ServerConfig::load(&config_path)?;

    tracing::info!(
        http = %config.http_addr,
        grpc = %config.grpc_addr,
        store_interval_secs = config.store_interval_secs,
        file = %config.file_storage_path,
        database = config.database_path.as_deref().unwrap_or("-"),
        trusted_subnet = config.trusted_subnet.as_deref().unwrap_or("-"),
        "metron-server starting"
    );

    let storage = build_storage(&config).await?;
    let cancel = CancellationToken::new();
    let state = AppState::new(storage.clone(), config.clone()).context("Invalid trusted_subnet")?;

    let grpc_addr: SocketAddr = config
        .grpc_addr
        .parse()
        .with_context(|| format!("Invalid grpc_addr {}", config.grpc_addr))?;
    let grpc_shutdown = cancel.clone();
    let grpc_server = TonicServer::builder()
        .add_service(MetricsServer::new(MetricsService::new(state.clone())))
        .serve_with_shutdown(grpc_addr, async move { grpc_shutdown.cancelled().await });

    let http_listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.http_addr))?;
    let http_shutdown = cancel.clone();
    let http_server = axum::serve(
        http_listener,
        app::build_http_app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { http_shutdown.cancelled().await });

    let mut grpc_task = tokio::spawn(grpc_server);
    let mut http_task = tokio::spawn(async move { http_server.await });

    tracing::info!(grpc = %grpc_addr, http = %config.http_addr, "Server started");

    let mut grpc_done = false;
    let mut http_done = false;
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
        result = &mut grpc_task => {
            grpc_done = true;
            tracing::error!(result = ?result, "gRPC server exited");
        }
        result = &mut http_task => {
            http_done = true;
            tracing::error!(result = ?result, "HTTP server exited");
        }
    }

    cancel.cancel();
    if !grpc_done {
        if let Ok(Err(e)) = grpc_task.await {
            tracing::error!(error = %e, "gRPC server error during shutdown");
        }
    }
    if !http_done {
        if let Ok(Err(e)) = http_task.await {
            tracing::error!(error = %e, "HTTP server error during shutdown");
        }
    }

    storage.close().await.context("Failed to close storage")?;
    tracing::info!("metron-server stopped");
    Ok(())
}
