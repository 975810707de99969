use std::{net::SocketAddr, time::Duration};

use axum::{
    body::Body,
    extract::connect_info::ConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use tower::ServiceExt;

use super::{core::AppConfig, router::build_router, types::AuthResponse};

mod auth;
mod connections;
mod search;
mod updates;

const TEST_PASSWORD: &str = "super-secure-password";

fn test_config() -> AppConfig {
    AppConfig {
        max_body_bytes: 1024 * 10,
        request_timeout: Duration::from_secs(5),
        rate_limit_requests_per_minute: 1_000,
        auth_route_requests_per_minute: 1_000,
        search_query_timeout: Duration::from_secs(2),
        ..AppConfig::default()
    }
}

fn test_app() -> Router {
    build_router(&test_config()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<Value>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return (status, None);
    }
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let payload: Value = serde_json::from_slice(&bytes).unwrap();
    (status, Some(payload))
}

async fn json_request(
    app: &Router,
    method: &str,
    uri: &str,
    access_token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Option<Value>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = access_token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let request = builder
        .body(match body {
            Some(payload) => Body::from(payload.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    send(app, request).await
}

async fn authed_json_request(
    app: &Router,
    method: &str,
    uri: String,
    auth: &AuthResponse,
    body: Option<Value>,
) -> (StatusCode, Option<Value>) {
    json_request(app, method, &uri, Some(&auth.access_token), body).await
}

fn with_connect_info(mut request: Request<Body>, peer: &str) -> Request<Body> {
    let socket = format!("{peer}:443")
        .parse::<SocketAddr>()
        .expect("peer socket must parse");
    request.extensions_mut().insert(ConnectInfo(socket));
    request
}

async fn register_with_visibility(app: &Router, username: &str, is_public: bool) {
    let (status, payload) = json_request(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"username":username,"password":TEST_PASSWORD,"is_public":is_public})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload.unwrap()["accepted"], true);
}

async fn login_as(app: &Router, username: &str, password: &str) -> AuthResponse {
    let (status, payload) = json_request(
        app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"username":username,"password":password})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_value(payload.unwrap()).unwrap()
}

async fn register_and_login_as(app: &Router, username: &str) -> AuthResponse {
    register_with_visibility(app, username, true).await;
    login_as(app, username, TEST_PASSWORD).await
}

async fn register_private_and_login_as(app: &Router, username: &str) -> AuthResponse {
    register_with_visibility(app, username, false).await;
    login_as(app, username, TEST_PASSWORD).await
}

async fn user_id_from_me(app: &Router, auth: &AuthResponse) -> String {
    let (status, payload) =
        authed_json_request(app, "GET", String::from("/auth/me"), auth, None).await;
    assert_eq!(status, StatusCode::OK);
    payload
        .as_ref()
        .and_then(|value| value["user_id"].as_str())
        .unwrap()
        .to_owned()
}

async fn post_update_for_test(app: &Router, auth: &AuthResponse, body: &str) -> String {
    let (status, payload) = authed_json_request(
        app,
        "POST",
        String::from("/updates"),
        auth,
        Some(json!({"body":body})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    payload
        .as_ref()
        .and_then(|value| value["update_id"].as_str())
        .unwrap()
        .to_owned()
}

/// Sends a request from `sender` to `recipient_id`, approves it as
/// `recipient`, and returns the pair id.
async fn connect_users(
    app: &Router,
    sender: &AuthResponse,
    recipient: &AuthResponse,
    recipient_id: &str,
) -> String {
    let (status, payload) = authed_json_request(
        app,
        "POST",
        String::from("/connections/requests"),
        sender,
        Some(json!({"recipient_user_id":recipient_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let request_id = payload.unwrap()["request_id"]
        .as_str()
        .unwrap()
        .to_owned();

    let (status, payload) = authed_json_request(
        app,
        "POST",
        format!("/connections/requests/{request_id}/approve"),
        recipient,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    payload.unwrap()["pair_id"].as_str().unwrap().to_owned()
}

async fn spawn_hcaptcha_stub(success: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request_buf = [0_u8; 4096];
        let _ = stream.read(&mut request_buf).await;
        let body = if success {
            r#"{"success":true,"hostname":"murmur.test"}"#
        } else {
            r#"{"success":false,"error-codes":["invalid-input-response"]}"#
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
    });
    format!("http://127.0.0.1:{}/siteverify", addr.port())
}

#[test]
fn partial_captcha_configuration_is_rejected() {
    let result = build_router(&AppConfig {
        captcha_hcaptcha_site_key: Some(String::from("site-key")),
        ..test_config()
    });
    assert!(result.is_err());

    let result = build_router(&AppConfig {
        captcha_hcaptcha_site_key: Some(String::from("site-key")),
        captcha_hcaptcha_secret: Some(String::from("secret")),
        captcha_verify_url: String::from("http://captcha.example/siteverify"),
        ..test_config()
    });
    assert!(result.is_err());
}
