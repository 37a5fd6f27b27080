//! Wire adapters that deliver metrics to the collector.
//!
//! Both adapters implement [`Transport`], so the reporter and worker pool are
//! unaware of which one is configured.

pub mod grpc;
pub mod http;

pub use grpc::GrpcTransport;
pub use http::HttpTransport;

use async_trait::async_trait;
use metron_common::types::{InvalidMetric, Metric};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request never got a response (refused, reset, timed out).
    #[error("cannot reach {endpoint}: {message}")]
    Connectivity { endpoint: String, message: String },

    /// The collector answered with a 5xx.
    #[error("collector error {status}: {body}")]
    Server { status: u16, body: String },

    /// The collector refused the request (4xx).
    #[error("collector rejected request with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("invalid metric: {0}")]
    InvalidArgument(#[from] InvalidMetric),

    #[error("invalid transport configuration: {0}")]
    Config(String),
}

impl TransportError {
    /// Connectivity and server-side failures are worth retrying; rejections
    /// will fail the same way again.
    pub fn is_retriable(&self) -> bool {
        match self {
            TransportError::Connectivity { .. } | TransportError::Server { .. } => true,
            TransportError::Rpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable
                    | tonic::Code::DeadlineExceeded
                    | tonic::Code::Internal
                    | tonic::Code::Unknown
                    | tonic::Code::ResourceExhausted
                    | tonic::Code::Aborted
            ),
            TransportError::Rejected { .. }
            | TransportError::InvalidArgument(_)
            | TransportError::Config(_) => false,
        }
    }
}

/// The send contract shared by every wire adapter.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short adapter name (`"http"`, `"grpc"`), used in job names and logs.
    fn name(&self) -> &str;

    /// Where requests go.
    fn endpoint(&self) -> &str;

    /// How many metrics one job may carry.
    fn batch_size(&self) -> usize;

    /// Delivers `metrics`. Either every metric was accepted or an error is
    /// returned.
    async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError>;
}

/// Prefixes `http://` when the address carries no scheme.
pub(crate) fn with_scheme(addr: &str) -> String {
    let addr = addr.trim().trim_end_matches('/');
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        let conn = TransportError::Connectivity {
            endpoint: "http://localhost:1".into(),
            message: "refused".into(),
        };
        assert!(conn.is_retriable());
        assert!(TransportError::Server {
            status: 503,
            body: String::new()
        }
        .is_retriable());
        assert!(!TransportError::Rejected {
            status: 400,
            body: String::new()
        }
        .is_retriable());
        assert!(TransportError::Rpc(tonic::Status::unavailable("down")).is_retriable());
        assert!(!TransportError::Rpc(tonic::Status::invalid_argument("bad")).is_retriable());
        assert!(!TransportError::Rpc(tonic::Status::permission_denied("no")).is_retriable());
    }

    #[test]
    fn scheme_is_added_once() {
        assert_eq!(with_scheme("localhost:8080"), "http://localhost:8080");
        assert_eq!(with_scheme("https://metrics.local/"), "https://metrics.local");
    }
}
