use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use metron_common::types::{Metric, MetricKind};
use metron_storage::{format_gauge, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Error body returned by every failing route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "forbidden" => 1003,
        "not_found" => 1004,
        "payload_too_large" => 1013,
        "internal_error" => 1500,
        "storage_error" => 1501,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiError {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
        }),
    )
        .into_response()
}

/// NotFound → 404, InvalidArgument → 400, anything else → 500.
fn storage_error(trace_id: &str, err: &StorageError) -> Response {
    match err {
        StorageError::NotFound { .. } => {
            error_response(StatusCode::NOT_FOUND, trace_id, "not_found", &err.to_string())
        }
        StorageError::InvalidArgument(_) => {
            error_response(StatusCode::BAD_REQUEST, trace_id, "bad_request", &err.to_string())
        }
        _ => {
            tracing::error!(trace_id = %trace_id, error = %err, "Storage operation failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "storage_error",
                &err.to_string(),
            )
        }
    }
}

fn bad_request(trace_id: &str, msg: impl std::fmt::Display) -> Response {
    error_response(StatusCode::BAD_REQUEST, trace_id, "bad_request", &msg.to_string())
}

fn text(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Applies one metric and reads back what is now stored under its name.
async fn apply(state: &AppState, metric: &Metric) -> Result<Metric, StorageError> {
    state.storage.save_batch(std::slice::from_ref(metric)).await?;
    stored(state, metric.kind, &metric.id).await
}

async fn stored(state: &AppState, kind: MetricKind, id: &str) -> Result<Metric, StorageError> {
    Ok(match kind {
        MetricKind::Gauge => Metric::gauge(id, state.storage.get_gauge(id).await?),
        MetricKind::Counter => Metric::counter(id, state.storage.get_counter(id).await?),
    })
}

fn render(metric: &Metric) -> String {
    match metric.kind {
        MetricKind::Gauge => format_gauge(metric.value.unwrap_or_default()),
        MetricKind::Counter => metric.delta.unwrap_or_default().to_string(),
    }
}

/// `POST /update/{kind}/{name}/{value}`
pub async fn update_by_path(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Response {
    let metric = match Metric::parse(&kind, &name, &value) {
        Ok(m) => m,
        Err(e) => return bad_request(&trace_id, e),
    };
    match state.storage.save_batch(std::slice::from_ref(&metric)).await {
        Ok(()) => text("OK".to_string()),
        Err(e) => storage_error(&trace_id, &e),
    }
}

/// `POST /update`: echoes the metric with the stored value filled in.
pub async fn update_json(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    payload: Result<Json<Metric>, JsonRejection>,
) -> Response {
    let Json(metric) = match payload {
        Ok(p) => p,
        Err(e) => return bad_request(&trace_id, e.body_text()),
    };
    match apply(&state, &metric).await {
        Ok(stored) => Json(stored).into_response(),
        Err(e) => storage_error(&trace_id, &e),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdatesResponse {
    pub accepted: usize,
}

/// `POST /updates`: the whole array is one batch.
pub async fn updates(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    payload: Result<Json<Vec<Metric>>, JsonRejection>,
) -> Response {
    let Json(batch) = match payload {
        Ok(p) => p,
        Err(e) => return bad_request(&trace_id, e.body_text()),
    };
    match state.storage.save_batch(&batch).await {
        Ok(()) => Json(UpdatesResponse {
            accepted: batch.len(),
        })
        .into_response(),
        Err(e) => storage_error(&trace_id, &e),
    }
}

/// `GET /value/{kind}/{name}`
pub async fn value_by_path(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    Path((kind, name)): Path<(String, String)>,
) -> Response {
    let kind: MetricKind = match kind.parse() {
        Ok(k) => k,
        Err(e) => return bad_request(&trace_id, e),
    };
    match stored(&state, kind, &name).await {
        Ok(metric) => text(render(&metric)),
        Err(e) => storage_error(&trace_id, &e),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValueRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
}

/// `POST /value`
pub async fn value_json(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    payload: Result<Json<ValueRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(e) => return bad_request(&trace_id, e.body_text()),
    };
    match stored(&state, req.kind, &req.id).await {
        Ok(metric) => Json(metric).into_response(),
        Err(e) => storage_error(&trace_id, &e),
    }
}

/// `GET /ping`
pub async fn ping(State(state): State<AppState>, Extension(trace_id): Extension<TraceId>) -> Response {
    match state.storage.ping().await {
        Ok(()) => text("OK".to_string()),
        Err(e) => {
            tracing::error!(trace_id = %trace_id, error = %e, "Storage ping failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "internal_error",
                &e.to_string(),
            )
        }
    }
}

/// `GET /`: every metric as an HTML table.
pub async fn index(State(state): State<AppState>, Extension(trace_id): Extension<TraceId>) -> Response {
    let all = match state.storage.get_all().await {
        Ok(all) => all,
        Err(e) => return storage_error(&trace_id, &e),
    };
    let mut page = String::from(
        "<!DOCTYPE html>\n<html><head><title>metron</title></head><body>\n<table>\n<tr><th>name</th><th>value</th></tr>\n",
    );
    for (name, value) in &all {
        let _ = writeln!(
            page,
            "<tr><td>{}</td><td>{}</td></tr>",
            escape_html(name),
            escape_html(value)
        );
    }
    page.push_str("</table>\n</body></html>\n");
    Html(page).into_response()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
