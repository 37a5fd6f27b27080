use super::{with_scheme, Transport, TransportError};
use async_trait::async_trait;
use metron_common::proto::metrics_client::MetricsClient;
use metron_common::proto::{self, UpdateMetricsRequest};
use metron_common::types::Metric;
use std::time::Duration;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};

pub const REAL_IP_METADATA: &str = "x-real-ip";

/// Sends up to `batch_size` metrics per `UpdateMetrics` call.
///
/// The channel connects lazily, so building the transport never fails on an
/// unreachable collector; the first send reports it instead.
pub struct GrpcTransport {
    client: MetricsClient<Channel>,
    endpoint: String,
    batch_size: usize,
    real_ip: Option<MetadataValue<Ascii>>,
}

impl GrpcTransport {
    pub fn new(
        server: &str,
        batch_size: usize,
        timeout: Duration,
        real_ip: Option<String>,
    ) -> Result<Self, TransportError> {
        let endpoint = with_scheme(server);
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| TransportError::Config(format!("{endpoint}: {e}")))?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();
        let real_ip = real_ip
            .map(|ip| {
                ip.parse::<MetadataValue<Ascii>>()
                    .map_err(|e| TransportError::Config(format!("real_ip {ip}: {e}")))
            })
            .transpose()?;

        Ok(Self {
            client: MetricsClient::new(channel),
            endpoint,
            batch_size: batch_size.max(1),
            real_ip,
        })
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    fn name(&self) -> &str {
        "grpc"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError> {
        for chunk in metrics.chunks(self.batch_size) {
            let mut request = tonic::Request::new(UpdateMetricsRequest {
                metrics: chunk.iter().map(proto::Metric::from).collect(),
            });
            if let Some(ip) = &self.real_ip {
                request.metadata_mut().insert(REAL_IP_METADATA, ip.clone());
            }

            // Clients are cheap handles over the shared channel.
            let mut client = self.client.clone();
            client.update_metrics(request).await?;
            tracing::debug!(count = chunk.len(), endpoint = %self.endpoint, "Metrics sent over gRPC");
        }
        Ok(())
    }
}
