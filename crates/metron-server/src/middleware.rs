use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::api::error_response;
use crate::logging::TraceId;
use crate::state::AppState;

pub static REAL_IP_HEADER: HeaderName = HeaderName::from_static("x-real-ip");

/// Rejects requests whose `X-Real-IP` is missing or outside the trusted
/// subnet. Passes everything through when no subnet is configured.
pub async fn trusted_subnet_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(subnet) = state.trusted_subnet else {
        return next.run(req).await;
    };

    let real_ip = req
        .headers()
        .get(&REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok());
    if subnet.allows(real_ip) {
        return next.run(req).await;
    }

    let trace_id = req
        .extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default();
    tracing::warn!(
        trace_id = %trace_id,
        real_ip = real_ip.unwrap_or("-"),
        subnet = %subnet,
        "Request rejected: caller outside trusted subnet"
    );
    error_response(
        StatusCode::FORBIDDEN,
        &trace_id,
        "forbidden",
        "caller is not in the trusted subnet",
    )
}
