use super::*;

fn update_bodies(results: &Value) -> Vec<String> {
    results["updates"]
        .as_array()
        .unwrap()
        .iter()
        .map(|update| update["body"].as_str().unwrap().to_owned())
        .collect()
}

#[tokio::test]
async fn search_finds_usernames_and_visible_updates() {
    let app = test_app();
    let alice = register_and_login_as(&app, "alice").await;
    let bob = register_private_and_login_as(&app, "bob").await;
    let bob_id = user_id_from_me(&app, &bob).await;
    register_and_login_as(&app, "alicia").await;

    post_update_for_test(&app, &alice, "gardening tips for spring").await;
    post_update_for_test(&app, &bob, "secret gardening plans").await;

    let (status, results) = json_request(&app, "GET", "/search?q=gardening", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        update_bodies(&results.unwrap()),
        vec!["gardening tips for spring"]
    );

    let (status, results) = authed_json_request(
        &app,
        "GET",
        String::from("/search?q=gardening"),
        &bob,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(update_bodies(&results.unwrap()).len(), 2);

    connect_users(&app, &alice, &bob, &bob_id).await;
    let (status, results) = authed_json_request(
        &app,
        "GET",
        String::from("/search?q=gardening"),
        &alice,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let mut bodies = update_bodies(&results.unwrap());
    bodies.sort();
    assert_eq!(
        bodies,
        vec!["gardening tips for spring", "secret gardening plans"]
    );

    let (status, results) = json_request(&app, "GET", "/search?q=ALI", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let results = results.unwrap();
    let usernames: Vec<&str> = results["users"]
        .as_array()
        .unwrap()
        .iter()
        .map(|user| user["username"].as_str().unwrap())
        .collect();
    assert_eq!(usernames, vec!["alice", "alicia"]);
}

#[tokio::test]
async fn deleted_updates_drop_out_of_search() {
    let app = test_app();
    let alice = register_and_login_as(&app, "alice").await;
    let update_id = post_update_for_test(&app, &alice, "ephemeral kayak trip").await;

    let (_, results) = json_request(&app, "GET", "/search?q=kayak", None, None).await;
    assert_eq!(update_bodies(&results.unwrap()).len(), 1);

    let (status, _) = authed_json_request(
        &app,
        "DELETE",
        format!("/updates/{update_id}"),
        &alice,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, results) = json_request(&app, "GET", "/search?q=kayak", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(update_bodies(&results.unwrap()).is_empty());
}

#[tokio::test]
async fn search_rejects_abusive_queries() {
    let app = test_app();

    for uri in [
        "/search?q=",
        "/search?q=%20%20",
        "/search?q=body:secret",
        "/search?q=a*%20b*%20c*%20d*%20e*",
        "/search?q=hello&limit=0",
        "/search?q=hello&limit=51",
    ] {
        let (status, body) = json_request(&app, "GET", uri, None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body.unwrap()["error"], "invalid_request");
    }

    let long_query = "a".repeat(257);
    let (status, _) = json_request(&app, "GET", &format!("/search?q={long_query}"), None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_and_metrics_are_exposed() {
    let app = test_app();

    let (status, health) = json_request(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health.unwrap()["status"], "ok");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("murmur_visibility_denials_total"));
    assert!(text.contains("murmur_auth_failures_total"));
}
