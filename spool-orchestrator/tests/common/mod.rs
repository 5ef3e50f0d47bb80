#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use spool_orchestrator::api;
use spool_orchestrator::config::Config;
use spool_orchestrator::repository::MemoryJobStore;
use spool_orchestrator::state::AppState;

/// Build a test state backed by the in-memory store
pub fn test_state() -> AppState {
    let mut config = Config::new(
        "127.0.0.1:0".to_string(),
        "integration-test-secret".to_string(),
    );
    config.heartbeat_interval = Duration::from_secs(15);
    AppState::new(Arc::new(MemoryJobStore::new()), config)
}

pub fn build_test_app(state: AppState) -> Router {
    api::create_router(state)
}

pub async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post(app: Router, uri: &str, body: Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Submit a tts job and return its id
pub async fn submit_tts(app: Router) -> String {
    let response = post(
        app,
        "/jobs",
        serde_json::json!({"kind": "tts", "metadata": {"text": "hello"}}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string()
}

/// Read SSE frames until `needle` appears
pub async fn read_until(body: &mut Body, buffer: &mut String, needle: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !buffer.contains(needle) {
            let frame = body
                .frame()
                .await
                .expect("stream ended early")
                .unwrap();
            if let Ok(data) = frame.into_data() {
                buffer.push_str(std::str::from_utf8(&data).unwrap());
            }
        }
    })
    .await
    .expect("timed out waiting for stream event");
}
