use super::*;

#[tokio::test]
async fn post_update_returns_markdown_tokens_and_validates_length() {
    let app = test_app();
    let alice = register_and_login_as(&app, "alice").await;

    let (status, payload) = authed_json_request(
        &app,
        "POST",
        String::from("/updates"),
        &alice,
        Some(json!({"body":"shipping **today**"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let payload = payload.unwrap();
    assert_eq!(payload["author_username"], "alice");
    assert_eq!(payload["body"], "shipping **today**");
    assert!(payload["body_tokens"]
        .as_array()
        .unwrap()
        .iter()
        .any(|token| token["type"] == "strong_start"));

    let (status, _) = authed_json_request(
        &app,
        "POST",
        String::from("/updates"),
        &alice,
        Some(json!({"body":"x".repeat(141)})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = authed_json_request(
        &app,
        "POST",
        String::from("/updates"),
        &alice,
        Some(json!({"body":"   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn private_updates_and_comments_are_hidden_from_strangers() {
    let app = test_app();
    let alice = register_private_and_login_as(&app, "alice").await;
    let bob = register_and_login_as(&app, "bob").await;
    let update_id = post_update_for_test(&app, &alice, "inner circle only").await;

    let (status, _) = json_request(&app, "GET", &format!("/updates/{update_id}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = authed_json_request(
        &app,
        "GET",
        format!("/updates/{update_id}/comments"),
        &bob,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.unwrap()["error"], "not_found");

    let (status, _) = authed_json_request(
        &app,
        "POST",
        format!("/updates/{update_id}/comments"),
        &bob,
        Some(json!({"body":"let me in"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, detail) = authed_json_request(
        &app,
        "GET",
        format!("/updates/{update_id}"),
        &alice,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail.unwrap()["update"]["body"], "inner circle only");
}

#[tokio::test]
async fn comments_are_listed_oldest_first_on_visible_updates() {
    let app = test_app();
    let alice = register_and_login_as(&app, "alice").await;
    let bob = register_and_login_as(&app, "bob").await;
    let update_id = post_update_for_test(&app, &alice, "what should I read next?").await;

    for (author, body) in [(&bob, "Dune"), (&alice, "already read it"), (&bob, "Hyperion")] {
        let (status, comment) = authed_json_request(
            &app,
            "POST",
            format!("/updates/{update_id}/comments"),
            author,
            Some(json!({"body":body})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(comment.unwrap()["update_id"], update_id.as_str());
    }

    let (status, _) = authed_json_request(
        &app,
        "POST",
        format!("/updates/{update_id}/comments"),
        &bob,
        Some(json!({"body":"y".repeat(281)})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, listing) = json_request(
        &app,
        "GET",
        &format!("/updates/{update_id}/comments"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let bodies: Vec<String> = listing.unwrap()["comments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|comment| comment["body"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(bodies, vec!["Dune", "already read it", "Hyperion"]);

    let (status, detail) = json_request(&app, "GET", &format!("/updates/{update_id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    let detail = detail.unwrap();
    assert_eq!(detail["comments"].as_array().unwrap().len(), 3);
    assert_eq!(detail["comments"][0]["author_username"], "bob");
}

#[tokio::test]
async fn only_the_author_can_delete_an_update() {
    let app = test_app();
    let alice = register_and_login_as(&app, "alice").await;
    let bob = register_and_login_as(&app, "bob").await;
    let update_id = post_update_for_test(&app, &alice, "temporary thought").await;
    let (status, _) = authed_json_request(
        &app,
        "POST",
        format!("/updates/{update_id}/comments"),
        &bob,
        Some(json!({"body":"noted"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = authed_json_request(
        &app,
        "DELETE",
        format!("/updates/{update_id}"),
        &bob,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body.unwrap()["error"], "forbidden");

    let (status, _) = authed_json_request(
        &app,
        "DELETE",
        format!("/updates/{update_id}"),
        &alice,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = json_request(&app, "GET", &format!("/updates/{update_id}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = json_request(
        &app,
        "GET",
        &format!("/updates/{update_id}/comments"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = authed_json_request(
        &app,
        "DELETE",
        format!("/updates/{update_id}"),
        &alice,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
