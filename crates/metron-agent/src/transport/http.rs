use super::{with_scheme, Transport, TransportError};
use async_trait::async_trait;
use metron_common::types::Metric;
use std::time::Duration;

/// One `POST {base}/update` with a JSON body per metric.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    update_url: String,
    real_ip: Option<String>,
}

impl HttpTransport {
    pub fn new(
        server: &str,
        timeout: Duration,
        real_ip: Option<String>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;
        let endpoint = with_scheme(server);
        let update_url = format!("{endpoint}/update");
        Ok(Self {
            client,
            endpoint,
            update_url,
            real_ip,
        })
    }

    async fn send_one(&self, metric: &Metric) -> Result<(), TransportError> {
        let mut request = self.client.post(&self.update_url).json(metric);
        if let Some(ip) = &self.real_ip {
            request = request.header("X-Real-IP", ip);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| TransportError::Connectivity {
                endpoint: self.endpoint.clone(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(TransportError::Server {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn batch_size(&self) -> usize {
        1
    }

    async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError> {
        for metric in metrics {
            self.send_one(metric).await?;
        }
        tracing::debug!(count = metrics.len(), endpoint = %self.endpoint, "Metrics sent over HTTP");
        Ok(())
    }
}
