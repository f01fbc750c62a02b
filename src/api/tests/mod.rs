use super::*;
use crate::packaging::test_helpers::{
    FixedQuery, GatedArchiver, create_test_service, files, test_config,
};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::time::Duration;
use tower::ServiceExt;


/// Router over a test service; the archiver is returned so tests can release bundles
fn create_test_app(bundle_files: usize) -> (Router, Arc<PackagingService>, Arc<GatedArchiver>) {
    let archiver = GatedArchiver::gated();
    let (service, _outbox) = create_test_service(
        test_config(),
        FixedQuery::new(vec![files(bundle_files, 60)]),
        archiver.clone(),
    );
    let service = Arc::new(service);
    let config = service.get_config();
    (create_router(service.clone(), config), service, archiver)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&body).into_owned())
        })
    };
    (status, json)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn submit_body() -> serde_json::Value {
    serde_json::json!({
        "base_file_name": "m31",
        "title": "M31 cutouts",
        "data_source": "wise",
    })
}

#[tokio::test]
async fn test_api_server_spawns() {
    let (_app, service, _archiver) = create_test_app(1);

    let mut config = (*service.get_config()).clone();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap(); // Port 0 = OS assigns a free port
    let config = Arc::new(config);

    let api_handle = tokio::spawn({
        let service = service.clone();
        async move { start_api_server(service, config).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished(), "server should still be running");
    api_handle.abort();
}

#[tokio::test]
async fn test_cors_enabled() {
    let (app, _service, _archiver) = create_test_app(1);

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers().contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let (_app, service, _archiver) = create_test_app(1);
    let mut config = (*service.get_config()).clone();
    config.api.cors_enabled = false;
    let app = create_router(service, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert!(!response.headers().contains_key("access-control-allow-origin"));
}
