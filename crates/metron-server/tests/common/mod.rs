#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use metron_common::retry::Backoff;
use metron_server::app;
use metron_server::config::ServerConfig;
use metron_server::state::AppState;
use metron_storage::{FileConfig, FileStorage, Storage};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

impl TestContext {
    pub fn snapshot_path(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("metrics-db.json")
    }
}

/// A collector backed by a sync-mode snapshot file in a temp dir.
pub async fn build_test_context() -> Result<TestContext> {
    build_test_context_with(ServerConfig::default()).await
}

pub async fn build_test_context_with(mut config: ServerConfig) -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let path = temp_dir.path().join("metrics-db.json");
    config.file_storage_path = path.to_string_lossy().into_owned();
    config.store_interval_secs = 0;

    let file_config = FileConfig {
        backoff: Backoff::none(),
        ..FileConfig::new(path)
    };
    let storage: Arc<dyn Storage> =
        Arc::new(FileStorage::open(file_config, CancellationToken::new()).await?);
    let state = AppState::new(storage, config)?;
    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

pub struct TestResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub trace_id: Option<String>,
    pub text: String,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.text).unwrap_or(Value::Null)
    }
}

pub async fn request(
    app: &axum::Router,
    method: &str,
    uri: &str,
    real_ip: Option<&str>,
    body: Option<Value>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(ip) = real_ip {
        builder = builder.header("X-Real-IP", ip);
    }
    let req_body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let req = builder.body(req_body).expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string())
    };
    let content_type = header("content-type");
    let trace_id = header("x-trace-id");
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");

    TestResponse {
        status,
        content_type,
        trace_id,
        text: String::from_utf8_lossy(&bytes).into_owned(),
    }
}

pub async fn post_json(app: &axum::Router, uri: &str, body: Value) -> TestResponse {
    request(app, "POST", uri, None, Some(body)).await
}

pub async fn get(app: &axum::Router, uri: &str) -> TestResponse {
    request(app, "GET", uri, None, None).await
}
