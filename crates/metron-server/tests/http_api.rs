mod common;

use axum::http::StatusCode;
use common::{build_test_context, build_test_context_with, get, post_json, request};
use metron_server::config::ServerConfig;
use metron_storage::Storage;
use serde_json::json;

#[tokio::test]
async fn update_by_path_then_read_back() {
    let ctx = build_test_context().await.unwrap();

    let resp = request(&ctx.app, "POST", "/update/gauge/Alloc/12.5", None, None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.content_type.unwrap().starts_with("text/plain"));

    request(&ctx.app, "POST", "/update/counter/PollCount/3", None, None).await;
    request(&ctx.app, "POST", "/update/counter/PollCount/4", None, None).await;

    let resp = get(&ctx.app, "/value/gauge/Alloc").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text, "12.5");

    let resp = get(&ctx.app, "/value/counter/PollCount").await;
    assert_eq!(resp.text, "7");
}

#[tokio::test]
async fn update_by_path_rejects_bad_input() {
    let ctx = build_test_context().await.unwrap();

    for uri in [
        "/update/histogram/x/1",
        "/update/gauge/x/abc",
        "/update/counter/x/1.5",
        "/update/gauge/x/NaN",
    ] {
        let resp = request(&ctx.app, "POST", uri, None, None).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(resp.json()["err_code"], 1001);
    }
    assert!(ctx.state.storage.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn value_errors() {
    let ctx = build_test_context().await.unwrap();

    let resp = get(&ctx.app, "/value/gauge/Missing").await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    let body = resp.json();
    assert_eq!(body["err_code"], 1004);
    assert_eq!(body["trace_id"].as_str(), resp.trace_id.as_deref());

    let resp = get(&ctx.app, "/value/summary/x").await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_json_echoes_stored_value() {
    let ctx = build_test_context().await.unwrap();

    let resp = post_json(
        &ctx.app,
        "/update",
        json!({"id": "PollCount", "type": "counter", "delta": 5}),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json(), json!({"id": "PollCount", "type": "counter", "delta": 5}));

    let resp = post_json(
        &ctx.app,
        "/update",
        json!({"id": "PollCount", "type": "counter", "delta": 2}),
    )
    .await;
    assert_eq!(resp.json()["delta"], 7);

    let resp = post_json(
        &ctx.app,
        "/update",
        json!({"id": "Alloc", "type": "gauge", "value": 0.25}),
    )
    .await;
    assert_eq!(resp.json()["value"], 0.25);
}

#[tokio::test]
async fn update_json_rejects_malformed_records() {
    let ctx = build_test_context().await.unwrap();

    let cases = [
        json!({"id": "x", "type": "gauge"}),
        json!({"id": "x", "type": "counter", "delta": 1, "value": 1.0}),
        json!({"id": "x", "type": "histogram", "value": 1.0}),
        json!({"id": "", "type": "gauge", "value": 1.0}),
        json!("not an object"),
    ];
    for body in cases {
        let resp = post_json(&ctx.app, "/update", body.clone()).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST, "{body}");
    }
    assert!(ctx.state.storage.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn updates_apply_as_one_batch() {
    let ctx = build_test_context().await.unwrap();

    let resp = post_json(
        &ctx.app,
        "/updates",
        json!([
            {"id": "Alloc", "type": "gauge", "value": 1.5},
            {"id": "PollCount", "type": "counter", "delta": 2},
            {"id": "PollCount", "type": "counter", "delta": 3},
        ]),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json(), json!({"accepted": 3}));
    assert_eq!(ctx.state.storage.get_counter("PollCount").await.unwrap(), 5);

    // One bad record rejects the whole array.
    let resp = post_json(
        &ctx.app,
        "/updates",
        json!([
            {"id": "Alloc", "type": "gauge", "value": 9.0},
            {"id": "Broken", "type": "gauge"},
        ]),
    )
    .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(ctx.state.storage.get_gauge("Alloc").await.unwrap(), 1.5);
}

#[tokio::test]
async fn oversized_body_is_payload_too_large() {
    let ctx = build_test_context().await.unwrap();

    let huge = "x".repeat(5 * 1024 * 1024);
    let resp = post_json(&ctx.app, "/updates", json!([huge])).await;
    assert_eq!(resp.status, StatusCode::PAYLOAD_TOO_LARGE);
    let body = resp.json();
    assert_eq!(body["err_code"], 1013);
    assert_eq!(body["trace_id"].as_str(), resp.trace_id.as_deref());
    assert!(ctx.state.storage.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn value_json_fills_value() {
    let ctx = build_test_context().await.unwrap();
    ctx.state.storage.set_gauge("Alloc", 3.0).await.unwrap();

    let resp = post_json(&ctx.app, "/value", json!({"id": "Alloc", "type": "gauge"})).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json(), json!({"id": "Alloc", "type": "gauge", "value": 3.0}));

    let resp = post_json(&ctx.app, "/value", json!({"id": "Nope", "type": "counter"})).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ping_and_index() {
    let ctx = build_test_context().await.unwrap();
    ctx.state.storage.set_gauge("<script>", 1.0).await.unwrap();
    ctx.state.storage.add_counter("PollCount", 2).await.unwrap();

    let resp = get(&ctx.app, "/ping").await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = get(&ctx.app, "/").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.content_type.unwrap().starts_with("text/html"));
    assert!(resp.text.contains("<td>&lt;script&gt;</td><td>1</td>"));
    assert!(resp.text.contains("<td>PollCount</td><td>2</td>"));
    assert!(!resp.text.contains("<script>"));
}

#[tokio::test]
async fn every_response_carries_trace_id() {
    let ctx = build_test_context().await.unwrap();

    let ok = get(&ctx.app, "/ping").await;
    let missing = get(&ctx.app, "/value/gauge/x").await;
    for resp in [&ok, &missing] {
        let id = resp.trace_id.as_deref().unwrap();
        assert_eq!(id.len(), 16);
    }
    assert_ne!(ok.trace_id, missing.trace_id);
}

#[tokio::test]
async fn updates_reach_snapshot_file_before_response() {
    let ctx = build_test_context().await.unwrap();

    request(&ctx.app, "POST", "/update/gauge/x/1", None, None).await;

    let raw = std::fs::read_to_string(ctx.snapshot_path()).unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot["gauge"]["x"], 1.0);
}

#[tokio::test]
async fn trusted_subnet_guards_every_route() {
    let ctx = build_test_context_with(ServerConfig {
        trusted_subnet: Some("10.0.0.0/8".to_string()),
        ..Default::default()
    })
    .await
    .unwrap();

    let resp = request(&ctx.app, "POST", "/update/gauge/x/1", Some("10.1.1.1"), None).await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = request(&ctx.app, "POST", "/update/gauge/x/2", Some("172.16.0.1"), None).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert!(resp.trace_id.is_some());

    let resp = request(&ctx.app, "GET", "/value/gauge/x", None, None).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    assert_eq!(ctx.state.storage.get_gauge("x").await.unwrap(), 1.0);
}
