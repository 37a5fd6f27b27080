//! The metron agent: samples host metrics into a local table and ships them
//! to the collector through a bounded worker pool.

pub mod config;
pub mod pool;
pub mod reporter;
pub mod transport;

pub use config::{AgentConfig, TransportKind};
pub use pool::{DispatchError, Job, WorkerPool};
pub use reporter::Reporter;
pub use transport::{GrpcTransport, HttpTransport, Transport, TransportError};

use std::sync::Arc;

/// Builds the transport selected in `config`.
pub fn build_transport(config: &AgentConfig) -> Result<Arc<dyn Transport>, TransportError> {
    let real_ip = config.resolve_real_ip();
    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Http => Arc::new(HttpTransport::new(
            &config.server_endpoint,
            config.request_timeout(),
            real_ip,
        )?),
        TransportKind::Grpc => Arc::new(GrpcTransport::new(
            &config.grpc_endpoint,
            config.batch_size,
            config.request_timeout(),
            real_ip,
        )?),
    };
    Ok(transport)
}
