use crate::state::AppState;
use metron_common::proto::metrics_server::Metrics;
use metron_common::proto::{UpdateMetricsRequest, UpdateMetricsResponse};
use metron_common::types::Metric;
use metron_storage::StorageError;
use tonic::{Request, Response, Status};

pub const REAL_IP_METADATA: &str = "x-real-ip";

pub struct MetricsService {
    state: AppState,
}

impl MetricsService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    fn check_caller<T>(&self, request: &Request<T>) -> Result<(), Status> {
        let Some(subnet) = self.state.trusted_subnet else {
            return Ok(());
        };
        let real_ip = request
            .metadata()
            .get(REAL_IP_METADATA)
            .and_then(|v| v.to_str().ok());
        if subnet.allows(real_ip) {
            return Ok(());
        }
        tracing::warn!(
            real_ip = real_ip.unwrap_or("-"),
            subnet = %subnet,
            "RPC rejected: caller outside trusted subnet"
        );
        Err(Status::permission_denied("caller is not in the trusted subnet"))
    }
}

fn to_status(err: StorageError) -> Status {
    match err {
        StorageError::NotFound { .. } => Status::not_found(err.to_string()),
        StorageError::InvalidArgument(_) => Status::invalid_argument(err.to_string()),
        _ => {
            tracing::error!(error = %err, "Failed to apply metric batch");
            Status::internal(err.to_string())
        }
    }
}

#[tonic::async_trait]
impl Metrics for MetricsService {
    async fn update_metrics(
        &self,
        request: Request<UpdateMetricsRequest>,
    ) -> Result<Response<UpdateMetricsResponse>, Status> {
        self.check_caller(&request)?;

        // Every record must convert before anything is stored.
        let batch = request
            .into_inner()
            .metrics
            .into_iter()
            .map(Metric::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        self.state.storage.save_batch(&batch).await.map_err(to_status)?;

        tracing::debug!(count = batch.len(), "Metric batch applied");
        Ok(Response::new(UpdateMetricsResponse {}))
    }
}
