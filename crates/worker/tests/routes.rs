mod common;

use axum::http::StatusCode;
use imagegen_comfyui::mock::MockBackend;
use imagegen_worker::routes::app;
use serde_json::json;

use common::*;

// ---------------------------------------------------------------------------
// Test: health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_is_ok_when_backend_answers() {
    let app = app(handler(MockBackend::new()));

    let response = get(app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend_healthy"], true);
    assert_eq!(body["default_workflow_loaded"], true);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn health_is_degraded_when_backend_is_down() {
    let app = app(handler(MockBackend::new().unhealthy()));

    let body = body_json(get(app, "/health").await).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["backend_healthy"], false);
}

// ---------------------------------------------------------------------------
// Test: job intake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn runsync_returns_success_envelope() {
    let app = app(handler(successful_backend()));

    let response = post_json(
        app,
        "/runsync",
        json!({ "id": "job-42", "input": { "prompt": "a cat" } }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["output"]["images"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn runsync_reports_failures_in_the_envelope() {
    let app = app(handler(MockBackend::new()));

    let response = post_json(app, "/runsync", json!({ "input": { "steps": 10 } })).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["error_type"], "ValidationError");
    assert!(body.get("status").is_none());
    assert!(body.get("traceback").is_none());
}

#[tokio::test]
async fn caller_request_id_is_propagated() {
    let app = app(handler(MockBackend::new()));

    let response = tower::ServiceExt::oneshot(
        app,
        axum::http::Request::builder()
            .uri("/health")
            .header("x-request-id", "req-123")
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-123");
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = app(handler(MockBackend::new()));

    let response = get(app, "/run").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
