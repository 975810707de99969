use super::*;

async fn send_request(
    app: &Router,
    sender: &AuthResponse,
    recipient_id: &str,
) -> (StatusCode, Option<Value>) {
    authed_json_request(
        app,
        "POST",
        String::from("/connections/requests"),
        sender,
        Some(json!({"recipient_user_id":recipient_id})),
    )
    .await
}

#[tokio::test]
async fn request_approve_creates_single_pair() {
    let app = test_app();
    let alice = register_and_login_as(&app, "alice").await;
    let bob = register_and_login_as(&app, "bob").await;
    let charlie = register_and_login_as(&app, "charlie").await;
    let alice_id = user_id_from_me(&app, &alice).await;
    let bob_id = user_id_from_me(&app, &bob).await;

    let (status, created) = send_request(&app, &alice, &bob_id).await;
    assert_eq!(status, StatusCode::OK);
    let request_id = created.unwrap()["request_id"].as_str().unwrap().to_owned();

    let (status, _) = send_request(&app, &alice, &bob_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send_request(&app, &bob, &alice_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, listing) = authed_json_request(
        &app,
        "GET",
        String::from("/connections/requests"),
        &bob,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let listing = listing.unwrap();
    assert_eq!(listing["incoming"].as_array().unwrap().len(), 1);
    assert_eq!(listing["incoming"][0]["sender_username"], "alice");
    assert!(listing["outgoing"].as_array().unwrap().is_empty());

    let (status, _) = authed_json_request(
        &app,
        "POST",
        format!("/connections/requests/{request_id}/approve"),
        &charlie,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = authed_json_request(
        &app,
        "POST",
        format!("/connections/requests/{request_id}/approve"),
        &alice,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, pair) = authed_json_request(
        &app,
        "POST",
        format!("/connections/requests/{request_id}/approve"),
        &bob,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let pair = pair.unwrap();
    assert_eq!(pair["user_id"], alice_id.as_str());
    let pair_id = pair["pair_id"].as_str().unwrap().to_owned();

    let (status, _) = authed_json_request(
        &app,
        "POST",
        format!("/connections/requests/{request_id}/approve"),
        &bob,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_request(&app, &bob, &alice_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for (viewer, peer_name) in [(&alice, "bob"), (&bob, "alice")] {
        let (status, connections) =
            authed_json_request(&app, "GET", String::from("/connections"), viewer, None).await;
        assert_eq!(status, StatusCode::OK);
        let connections = connections.unwrap();
        let connections = connections["connections"].as_array().unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0]["username"], peer_name);
        assert_eq!(connections[0]["pair_id"], pair_id.as_str());
    }
}

#[tokio::test]
async fn requests_to_self_or_unknown_users_are_rejected() {
    let app = test_app();
    let alice = register_and_login_as(&app, "alice").await;
    let alice_id = user_id_from_me(&app, &alice).await;

    let (status, _) = send_request(&app, &alice, &alice_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_request(&app, &alice, &ulid::Ulid::new().to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_request(&app, &alice, "nope").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn request_can_be_declined_or_cancelled_by_either_party_only() {
    let app = test_app();
    let alice = register_and_login_as(&app, "alice").await;
    let bob = register_and_login_as(&app, "bob").await;
    let charlie = register_and_login_as(&app, "charlie").await;
    let bob_id = user_id_from_me(&app, &bob).await;

    let (_, created) = send_request(&app, &alice, &bob_id).await;
    let request_id = created.unwrap()["request_id"].as_str().unwrap().to_owned();

    let (status, _) = authed_json_request(
        &app,
        "DELETE",
        format!("/connections/requests/{request_id}"),
        &charlie,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = authed_json_request(
        &app,
        "DELETE",
        format!("/connections/requests/{request_id}"),
        &bob,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, listing) = authed_json_request(
        &app,
        "GET",
        String::from("/connections/requests"),
        &alice,
        None,
    )
    .await;
    assert!(listing.unwrap()["outgoing"].as_array().unwrap().is_empty());

    // A declined request can be sent again.
    let (status, created) = send_request(&app, &alice, &bob_id).await;
    assert_eq!(status, StatusCode::OK);
    let request_id = created.unwrap()["request_id"].as_str().unwrap().to_owned();
    let (status, _) = authed_json_request(
        &app,
        "DELETE",
        format!("/connections/requests/{request_id}"),
        &alice,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn removing_a_connection_restores_privacy_and_is_idempotent() {
    let app = test_app();
    let alice = register_and_login_as(&app, "alice").await;
    let bob = register_private_and_login_as(&app, "bob").await;
    let alice_id = user_id_from_me(&app, &alice).await;
    let bob_id = user_id_from_me(&app, &bob).await;
    connect_users(&app, &alice, &bob, &bob_id).await;
    post_update_for_test(&app, &bob, "for alice").await;

    let (status, _) = authed_json_request(
        &app,
        "GET",
        format!("/users/{bob_id}/updates"),
        &alice,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = authed_json_request(
        &app,
        "DELETE",
        format!("/connections/{alice_id}"),
        &bob,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = authed_json_request(
        &app,
        "GET",
        format!("/users/{bob_id}/updates"),
        &alice,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body.unwrap()["error"], "private_profile");

    let (_, connections) =
        authed_json_request(&app, "GET", String::from("/connections"), &alice, None).await;
    assert!(connections.unwrap()["connections"]
        .as_array()
        .unwrap()
        .is_empty());

    let (status, _) = authed_json_request(
        &app,
        "DELETE",
        format!("/connections/{alice_id}"),
        &bob,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
