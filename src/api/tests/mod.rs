use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use super::create_router;
use crate::error::Result;
use crate::experiment::test_helpers::ScriptedProducer;
use crate::registry::{ModelRegistry, PullStream};
use crate::{AgentHub, Config};


/// Canned registry for router tests: instant answers, instant pulls
struct StubRegistry;

#[async_trait]
impl ModelRegistry for StubRegistry {
    async fn tags(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"models": [{"name": "llama3.2"}, {"name": "mistral"}]}))
    }

    async fn version(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"version": "0.5.1"}))
    }

    async fn pull(&self, _model: &str) -> Result<PullStream> {
        Ok(futures::stream::iter(vec![
            Ok(serde_json::json!({"status": "downloading", "completed": 512, "total": 1024})),
            Ok(serde_json::json!({"status": "success"})),
        ])
        .boxed())
    }

    async fn delete(&self, _model: &str) -> Result<()> {
        Ok(())
    }

    async fn show(&self, model: &str) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"model": model, "details": {"family": "llama"}}))
    }
}

/// Helper to create a test hub (temp-dir store, scripted producer, stub
/// registry) and the router over it
fn test_app() -> (Router, Arc<AgentHub>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.data_dir = temp_dir.path().to_path_buf();

    let hub = Arc::new(
        AgentHub::with_registry(config, Arc::new(ScriptedProducer), Arc::new(StubRegistry))
            .unwrap(),
    );
    let app = create_router(hub.clone(), hub.config());
    (app, hub, temp_dir)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn put_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let (app, _hub, _temp) = test_app();

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn cors_headers_present_when_enabled() {
    let (app, _hub, _temp) = test_app();

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn openapi_spec_endpoint_serves_the_document() {
    let (app, _hub, _temp) = test_app();

    let response = app.oneshot(get("/openapi.json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["info"]["title"], "agenthub REST API");
}

#[tokio::test]
async fn api_server_spawns_on_an_os_assigned_port() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.data_dir = temp_dir.path().to_path_buf();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();

    let hub = Arc::new(
        AgentHub::with_registry(config, Arc::new(ScriptedProducer), Arc::new(StubRegistry))
            .unwrap(),
    );
    let handle = hub.spawn_api_server();

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.abort();
}
