//! Local API tests

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use hostd::events::Event;
use hostd::models::server::Server;
use hostd::server::serve::router;
use hostd::server::state::ServerState;

use crate::common::Harness;

fn app(h: &Harness) -> Router {
    router(Arc::new(ServerState::new(h.app.clone())))
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new().await;

    let (status, body) = send(app(&h), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    h.cleanup().await;
}

#[tokio::test]
async fn test_unknown_server_is_404() {
    let h = Harness::new().await;

    let (status, body) = send(app(&h), get(&format!("/servers/{}", Uuid::new_v4()))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().is_some());
    h.cleanup().await;
}

#[tokio::test]
async fn test_servers_are_listed_by_name() {
    let h = Harness::new().await;
    h.add_server(Server::new("edge-2", "10.0.0.6")).await;
    h.add_server(Server::new("edge-1", "10.0.0.5")).await;

    let (status, body) = send(app(&h), get("/servers")).await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["edge-1", "edge-2"]);
    h.cleanup().await;
}

#[tokio::test]
async fn test_start_without_proxy_reports_skip() {
    let h = Harness::new().await;
    let server = h.add_server(Server::new("edge-1", "10.0.0.5")).await;

    let request = Request::post(format!("/servers/{}/proxy/start", server.id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app(&h), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "skipped");
    assert_eq!(body["reason"], "no_proxy");
    assert!(h.shell.commands().is_empty());
    h.cleanup().await;
}

#[tokio::test]
async fn test_invalid_task_status_is_rejected() {
    let h = Harness::new().await;

    let (status, _) = send(app(&h), get("/tasks?status=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(app(&h), get("/tasks")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
    h.cleanup().await;
}

#[tokio::test]
async fn test_server_validated_event_is_accepted() {
    let mut h = Harness::new().await;
    let server = h.add_server(Server::new("edge-1", "10.0.0.5")).await;

    let (status, body) = send(
        app(&h),
        post_json(
            "/events/server-validated",
            json!({ "server_uuid": server.id.to_string() }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["event"], "ServerValidated");

    h.wait_for(|e| matches!(e, Event::ServerValidated { .. }))
        .await;
    assert_eq!(h.app.pipeline.scheduled().len(), 5);
    h.cleanup().await;
}
