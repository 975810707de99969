use super::*;
use crate::server::network::IpNetwork;

#[tokio::test]
async fn auth_flow_register_login_me_refresh_logout_and_replay_detection() {
    let app = test_app();
    let login = register_and_login_as(&app, "alice").await;

    let (status, me) = authed_json_request(&app, "GET", String::from("/auth/me"), &login, None).await;
    assert_eq!(status, StatusCode::OK);
    let me = me.unwrap();
    assert_eq!(me["username"], "alice");
    assert_eq!(me["is_public"], true);
    assert!(me["joined_at_unix"].as_i64().unwrap() > 0);

    let (status, rotated) = json_request(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refresh_token":login.refresh_token})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rotated: AuthResponse = serde_json::from_value(rotated.unwrap()).unwrap();
    assert_ne!(rotated.refresh_token, login.refresh_token);

    let (status, _) = json_request(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refresh_token":login.refresh_token})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Replaying a spent token revokes the whole session.
    let (status, _) = json_request(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refresh_token":rotated.refresh_token})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_refresh_token() {
    let app = test_app();
    let login = register_and_login_as(&app, "alice").await;

    let (status, payload) = json_request(
        &app,
        "POST",
        "/auth/logout",
        None,
        Some(json!({"refresh_token":login.refresh_token})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(payload.is_none());

    let (status, _) = json_request(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refresh_token":login.refresh_token})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_does_not_reveal_existing_usernames() {
    let app = test_app();
    register_with_visibility(&app, "alice", true).await;
    register_with_visibility(&app, "alice", false).await;

    let (status, payload) = json_request(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"username":"a","password":TEST_PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(payload.unwrap()["error"], "invalid_request");

    let (status, _) = json_request(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"username":"bobby","password":"short"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The second registration did not overwrite the first account.
    let login = login_as(&app, "alice", TEST_PASSWORD).await;
    let (_, me) = authed_json_request(&app, "GET", String::from("/auth/me"), &login, None).await;
    assert_eq!(me.unwrap()["is_public"], true);
}

#[tokio::test]
async fn login_failures_look_the_same_for_unknown_users() {
    let app = test_app();
    register_with_visibility(&app, "alice", true).await;

    let (wrong_status, wrong_body) = json_request(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"username":"alice","password":"not-the-right-password"})),
    )
    .await;
    let (unknown_status, unknown_body) = json_request(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"username":"nobody","password":"not-the-right-password"})),
    )
    .await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_body, unknown_body);
    assert_eq!(wrong_body.unwrap()["error"], "invalid_credentials");
}

#[tokio::test]
async fn protected_routes_reject_missing_and_malformed_tokens() {
    let app = test_app();

    let (status, _) = json_request(&app, "GET", "/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = json_request(&app, "GET", "/auth/me", Some("v4.local.garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = json_request(
        &app,
        "POST",
        "/updates",
        Some("not-a-token"),
        Some(json!({"body":"hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn change_password_keeps_current_session_and_revokes_others() {
    let app = test_app();
    let current = register_and_login_as(&app, "alice").await;
    let other = login_as(&app, "alice", TEST_PASSWORD).await;

    let (status, _) = authed_json_request(
        &app,
        "POST",
        String::from("/auth/password"),
        &current,
        Some(json!({"current_password":"wrong-password-entirely","new_password":"a-brand-new-password"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = authed_json_request(
        &app,
        "POST",
        String::from("/auth/password"),
        &current,
        Some(json!({"current_password":TEST_PASSWORD,"new_password":"short"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, payload) = authed_json_request(
        &app,
        "POST",
        String::from("/auth/password"),
        &current,
        Some(json!({"current_password":TEST_PASSWORD,"new_password":"a-brand-new-password"})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(payload.is_none());

    let (status, _) = json_request(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refresh_token":other.refresh_token})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = json_request(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refresh_token":current.refresh_token})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = json_request(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"username":"alice","password":TEST_PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let _ = login_as(&app, "alice", "a-brand-new-password").await;
}

#[tokio::test]
async fn auth_route_rate_limit_is_scoped_per_forwarded_client() {
    let app = build_router(&AppConfig {
        auth_route_requests_per_minute: 2,
        trusted_proxy_cidrs: vec!["10.0.0.0/8".parse::<IpNetwork>().unwrap()],
        ..test_config()
    })
    .unwrap();

    let login_from = |client: &str| {
        with_connect_info(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header("content-type", "application/json")
                .header("x-forwarded-for", client)
                .body(Body::from(
                    json!({"username":"nobody","password":"not-the-right-password"}).to_string(),
                ))
                .unwrap(),
            "10.0.0.5",
        )
    };

    let (first, _) = send(&app, login_from("203.0.113.10")).await;
    let (second, _) = send(&app, login_from("203.0.113.10")).await;
    let (third, third_body) = send(&app, login_from("203.0.113.10")).await;
    let (other_client, _) = send(&app, login_from("203.0.113.11")).await;

    assert_eq!(first, StatusCode::UNAUTHORIZED);
    assert_eq!(second, StatusCode::UNAUTHORIZED);
    assert_eq!(third, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(third_body.unwrap()["error"], "rate_limited");
    assert_eq!(other_client, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_requires_captcha_when_configured() {
    let verify_url = spawn_hcaptcha_stub(true).await;
    let app = build_router(&AppConfig {
        captcha_hcaptcha_site_key: Some(String::from("10000000-ffff-ffff-ffff-000000000001")),
        captcha_hcaptcha_secret: Some(String::from("0x0000000000000000000000000000000000000000")),
        captcha_verify_url: verify_url,
        ..test_config()
    })
    .unwrap();

    let (status, payload) = json_request(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"username":"alice","password":TEST_PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(payload.unwrap()["error"], "captcha_failed");

    let (status, payload) = json_request(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "username":"alice",
            "password":TEST_PASSWORD,
            "captcha_token":"10000000-aaaa-bbbb-cccc-000000000001"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload.unwrap()["accepted"], true);
}

#[tokio::test]
async fn register_is_refused_when_captcha_verification_fails() {
    let verify_url = spawn_hcaptcha_stub(false).await;
    let app = build_router(&AppConfig {
        captcha_hcaptcha_site_key: Some(String::from("10000000-ffff-ffff-ffff-000000000001")),
        captcha_hcaptcha_secret: Some(String::from("0x0000000000000000000000000000000000000000")),
        captcha_verify_url: verify_url,
        ..test_config()
    })
    .unwrap();

    let (status, payload) = json_request(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "username":"alice",
            "password":TEST_PASSWORD,
            "captcha_token":"10000000-aaaa-bbbb-cccc-000000000001"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(payload.unwrap()["error"], "captcha_failed");

    let (status, _) = json_request(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"username":"alice","password":TEST_PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
