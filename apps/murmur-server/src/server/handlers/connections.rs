use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::server::{
    auth::{authenticate, now_unix},
    core::AppState,
    errors::AuthFailure,
    graph_repository::{ConnectionRequestView, GraphPersistence, GraphRepository},
    handlers::{profile::parse_user_id, ApiJson},
    types::{
        ConnectionListResponse, ConnectionRequestCreateResponse, ConnectionRequestListResponse,
        ConnectionRequestPath, ConnectionRequestResponse, ConnectionResponse,
        CreateConnectionRequest, PairResponse, UserPath,
    },
};

fn request_response(view: ConnectionRequestView) -> ConnectionRequestResponse {
    ConnectionRequestResponse {
        request_id: view.request_id,
        sender_user_id: view.sender_user_id.to_string(),
        sender_username: view.sender_username,
        recipient_user_id: view.recipient_user_id.to_string(),
        recipient_username: view.recipient_username,
        created_at_unix: view.created_at_unix,
    }
}

pub(crate) async fn create_connection_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<CreateConnectionRequest>,
) -> Result<Json<ConnectionRequestCreateResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let recipient_user_id = parse_user_id(payload.recipient_user_id)?;
    if recipient_user_id == auth.user_id {
        return Err(AuthFailure::InvalidRequest);
    }

    let request_id = state.next_id().to_string();
    let created_at_unix = now_unix();
    GraphRepository::from_state(&state)
        .create_request(&request_id, auth.user_id, recipient_user_id, created_at_unix)
        .await?;

    tracing::info!(
        event = "connections.request",
        outcome = "created",
        request_id = %request_id,
        sender = %auth.user_id,
        recipient = %recipient_user_id
    );

    Ok(Json(ConnectionRequestCreateResponse {
        request_id,
        sender_user_id: auth.user_id.to_string(),
        recipient_user_id: recipient_user_id.to_string(),
        created_at_unix,
    }))
}

pub(crate) async fn list_connection_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ConnectionRequestListResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let (incoming, outgoing) = GraphRepository::from_state(&state)
        .list_requests(auth.user_id)
        .await?;

    Ok(Json(ConnectionRequestListResponse {
        incoming: incoming.into_iter().map(request_response).collect(),
        outgoing: outgoing.into_iter().map(request_response).collect(),
    }))
}

/// Only the recipient can approve. The pair and the request removal commit together.
pub(crate) async fn approve_connection_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<ConnectionRequestPath>,
) -> Result<Json<PairResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let pair_id = state.next_id().to_string();
    let pair = GraphRepository::from_state(&state)
        .approve_request(&path.request_id, auth.user_id, &pair_id, now_unix())
        .await?;
    let peer = pair.peer_of(auth.user_id).ok_or(AuthFailure::Internal)?;

    tracing::info!(
        event = "connections.approve",
        outcome = "paired",
        request_id = %path.request_id,
        pair_id = %pair.pair_id
    );

    Ok(Json(PairResponse {
        pair_id: pair.pair_id,
        user_id: peer.to_string(),
        created_at_unix: pair.created_at_unix,
    }))
}

/// Declines (recipient) or cancels (sender) a pending request.
pub(crate) async fn delete_connection_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<ConnectionRequestPath>,
) -> Result<StatusCode, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    GraphRepository::from_state(&state)
        .delete_request(&path.request_id, auth.user_id)
        .await?;
    tracing::info!(event = "connections.request_delete", outcome = "deleted", request_id = %path.request_id);
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn list_connections(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ConnectionListResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let connections = GraphRepository::from_state(&state)
        .list_connections(auth.user_id)
        .await?
        .into_iter()
        .map(|view| ConnectionResponse {
            user_id: view.user_id.to_string(),
            username: view.username,
            pair_id: view.pair_id,
            created_at_unix: view.created_at_unix,
        })
        .collect();

    Ok(Json(ConnectionListResponse { connections }))
}

pub(crate) async fn remove_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<UserPath>,
) -> Result<StatusCode, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let peer = parse_user_id(path.user_id)?;
    let removed = GraphRepository::from_state(&state)
        .remove_connection(auth.user_id, peer)
        .await?;
    tracing::info!(
        event = "connections.remove",
        outcome = if removed { "removed" } else { "absent" },
        user_id = %auth.user_id,
        peer = %peer
    );
    Ok(StatusCode::NO_CONTENT)
}
