mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use common::{mount_happy_path, Workspace};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use veogen::proxy::{router, ProxyState};
use wiremock::MockServer;

const SECRET: &str = "proxy-secret";

async fn app(workspace: &Workspace, server: &MockServer) -> Router {
    router(Arc::new(ProxyState::new(SECRET, workspace.overrides(server)).await))
}

fn post(body: &str, auth: Option<(&str, &str)>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/")
        .header("origin", "https://shop.example")
        .header("content-type", "application/json");
    if let Some((name, value)) = auth {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn preflight_advertises_cors_policy() {
    let server = MockServer::start().await;
    let workspace = Workspace::new();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/")
        .header("origin", "https://shop.example")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();

    let response = app(&workspace, &server).await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers["access-control-allow-origin"], "*");
    let methods = headers["access-control-allow-methods"].to_str().unwrap();
    assert!(methods.contains("POST") && methods.contains("OPTIONS"));
    let allowed = headers["access-control-allow-headers"].to_str().unwrap().to_lowercase();
    for name in ["content-type", "authorization", "x-api-key"] {
        assert!(allowed.contains(name), "{allowed}");
    }
}

#[tokio::test]
async fn requests_without_the_secret_are_rejected() {
    let server = MockServer::start().await;
    let workspace = Workspace::new();
    let body = r#"{"image_path": "a.jpg", "prompt": "zoom in"}"#;

    for auth in [None, Some(("authorization", "Bearer wrong")), Some(("x-api-key", "nope"))] {
        let response = app(&workspace, &server).await.oneshot(post(body, auth)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["success"], json!(false));
    }
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_bodies_are_bad_requests() {
    let server = MockServer::start().await;
    let workspace = Workspace::new();
    let auth = Some(("x-api-key", SECRET));

    for body in ["", "{not json", r#"{"prompt": "zoom in"}"#, r#"{"image_path": "a.jpg"}"#] {
        let response = app(&workspace, &server).await.oneshot(post(body, auth)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        let json = body_json(response).await;
        assert_eq!(json["success"], json!(false));
        assert!(json["error"].is_string());
    }
}

#[tokio::test]
async fn successful_generation_wraps_the_report() {
    let server = MockServer::start().await;
    mount_happy_path(&server, 1).await;
    let workspace = Workspace::new();
    workspace.write_image("catalog/a.jpg", b"a");

    let body = r#"{"image_path": "catalog/a.jpg", "prompt": "zoom in"}"#;
    let auth = Some(("authorization", "Bearer proxy-secret"));
    let response = app(&workspace, &server).await.oneshot(post(body, auth)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let json = body_json(response).await;
    assert_eq!(json["success"], json!(true));
    assert_eq!(json["data"]["status"], json!("completed"));
    assert!(json["data"]["videoUrl"]
        .as_str()
        .unwrap()
        .starts_with("https://shop.example/pub/media/video/veo_"));
}

#[tokio::test]
async fn item_failures_are_reported_in_the_body() {
    let server = MockServer::start().await;
    let workspace = Workspace::new();

    let body = r#"{"image_path": ["catalog/none.jpg"], "prompt": "zoom in"}"#;
    let auth = Some(("authorization", SECRET));
    let response = app(&workspace, &server).await.oneshot(post(body, auth)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], json!(false));
    assert!(json["error"].as_str().unwrap().contains("catalog/none.jpg"));
    assert_eq!(json["data"]["success"], json!(false));
}
