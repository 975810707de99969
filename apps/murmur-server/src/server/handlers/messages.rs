use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use murmur_core::{can_message, MessageBody, UserId};
use ulid::Ulid;

use crate::server::{
    auth::{authenticate, now_unix},
    auth_repository::{AuthPersistence, AuthRepository},
    core::{AppState, AuthContext, DEFAULT_THREAD_PAGE_LIMIT, MAX_THREAD_PAGE_LIMIT},
    errors::AuthFailure,
    graph_repository::{GraphPersistence, GraphRepository},
    handlers::{profile::parse_user_id, ApiJson},
    message_repository::{MessagePersistence, MessageRepository, MessageView},
    metrics::record_visibility_denial,
    types::{
        InboxResponse, InboxThreadResponse, MessageResponse, PairMessagePath, PairPath,
        SendMessageRequest, ThreadQuery, ThreadResponse, UserPath,
    },
    visibility::{require_pair_member, SURFACE_MESSAGE},
};

fn thread_limit(limit: Option<usize>) -> Result<usize, AuthFailure> {
    let limit = limit.unwrap_or(DEFAULT_THREAD_PAGE_LIMIT);
    if limit == 0 || limit > MAX_THREAD_PAGE_LIMIT {
        return Err(AuthFailure::InvalidRequest);
    }
    Ok(limit)
}

async fn store_message(
    state: &AppState,
    auth: &AuthContext,
    recipient_id: UserId,
    body: MessageBody,
) -> Result<MessageView, AuthFailure> {
    let message_id = state.next_id().to_string();
    let sent_at_unix = now_unix();
    MessageRepository::from_state(state)
        .insert_message(
            &message_id,
            auth.user_id,
            recipient_id,
            body.as_str(),
            sent_at_unix,
        )
        .await?;
    tracing::info!(
        event = "messages.send",
        outcome = "sent",
        message_id = %message_id,
        sender = %auth.user_id,
        recipient = %recipient_id
    );
    Ok(MessageView {
        message_id,
        sender_id: auth.user_id,
        recipient_id,
        body: body.into_inner(),
        sent_at_unix,
        read: false,
    })
}

pub(crate) async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<PairPath>,
    ApiJson(payload): ApiJson<SendMessageRequest>,
) -> Result<Json<MessageResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let body = MessageBody::try_from(payload.body).map_err(|_| AuthFailure::InvalidRequest)?;
    let (_pair, peer) = require_pair_member(&state, &path.pair_id, auth.user_id).await?;
    let message = store_message(&state, &auth, peer, body).await?;
    Ok(Json(message.into()))
}

/// Composes a message to a user by id. Only paired users can be messaged.
pub(crate) async fn send_direct(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<UserPath>,
    ApiJson(payload): ApiJson<SendMessageRequest>,
) -> Result<Json<MessageResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let recipient_id = parse_user_id(path.user_id)?;
    if recipient_id == auth.user_id {
        return Err(AuthFailure::InvalidRequest);
    }
    let body = MessageBody::try_from(payload.body).map_err(|_| AuthFailure::InvalidRequest)?;
    AuthRepository::from_state(&state)
        .find_account(recipient_id)
        .await?
        .ok_or(AuthFailure::NotFound)?;

    let connected = GraphRepository::from_state(&state)
        .pair_between(auth.user_id, recipient_id)
        .await?
        .is_some();
    if !can_message(connected) {
        record_visibility_denial(SURFACE_MESSAGE);
        tracing::info!(event = "messages.send", outcome = "not_connected", sender = %auth.user_id, recipient = %recipient_id);
        return Err(AuthFailure::NotConnected);
    }

    let message = store_message(&state, &auth, recipient_id, body).await?;
    Ok(Json(message.into()))
}

/// One page of a thread, oldest first. `next_before` continues with older
/// messages. Incoming messages are marked read when the thread is viewed.
pub(crate) async fn get_thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<PairPath>,
    Query(query): Query<ThreadQuery>,
) -> Result<Json<ThreadResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let limit = thread_limit(query.limit)?;
    // Stored ids are canonical uppercase ULIDs and compare as strings.
    let before = query
        .before
        .as_deref()
        .map(Ulid::from_string)
        .transpose()
        .map_err(|_| AuthFailure::InvalidRequest)?
        .map(|cursor| cursor.to_string());
    let (pair, peer) = require_pair_member(&state, &path.pair_id, auth.user_id).await?;

    let repository = MessageRepository::from_state(&state);
    let marked = repository.mark_read(auth.user_id, peer).await?;
    let mut messages = repository
        .thread(auth.user_id, peer, before.as_deref(), limit + 1)
        .await?;
    let next_before = if messages.len() > limit {
        messages.truncate(limit);
        messages.last().map(|message| message.message_id.clone())
    } else {
        None
    };
    messages.reverse();

    tracing::debug!(event = "messages.thread", pair_id = %pair.pair_id, returned = messages.len(), marked_read = marked);

    Ok(Json(ThreadResponse {
        pair_id: pair.pair_id,
        peer_user_id: peer.to_string(),
        messages: messages.into_iter().map(Into::into).collect(),
        next_before,
    }))
}

/// Soft-deletes a message. Only its sender may delete it.
pub(crate) async fn delete_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<PairMessagePath>,
) -> Result<StatusCode, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let (pair, _peer) = require_pair_member(&state, &path.pair_id, auth.user_id).await?;

    let repository = MessageRepository::from_state(&state);
    let message = repository
        .find_message(&path.message_id)
        .await?
        .ok_or(AuthFailure::NotFound)?;
    if !pair.contains(message.sender_id) || !pair.contains(message.recipient_id) {
        return Err(AuthFailure::NotFound);
    }
    if message.sender_id != auth.user_id {
        return Err(AuthFailure::Forbidden);
    }
    if !repository.soft_delete(&message.message_id).await? {
        return Err(AuthFailure::NotFound);
    }

    tracing::info!(event = "messages.delete", outcome = "deleted", message_id = %message.message_id);
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn inbox(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<InboxResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let entries = MessageRepository::from_state(&state)
        .inbox(auth.user_id)
        .await?;
    let pair_ids: HashMap<UserId, String> = GraphRepository::from_state(&state)
        .list_connections(auth.user_id)
        .await?
        .into_iter()
        .map(|connection| (connection.user_id, connection.pair_id))
        .collect();

    let threads = entries
        .into_iter()
        .map(|entry| InboxThreadResponse {
            pair_id: pair_ids.get(&entry.peer_id).cloned(),
            peer_user_id: entry.peer_id.to_string(),
            peer_username: entry.peer_username,
            last_sent_at_unix: entry.last_sent_at_unix,
            unread_count: entry.unread_count,
        })
        .collect();

    Ok(Json(InboxResponse { threads }))
}

#[cfg(test)]
mod tests {
    use super::thread_limit;
    use crate::server::core::{DEFAULT_THREAD_PAGE_LIMIT, MAX_THREAD_PAGE_LIMIT};

    #[test]
    fn thread_limit_defaults_and_rejects_out_of_range() {
        assert_eq!(thread_limit(None).ok(), Some(DEFAULT_THREAD_PAGE_LIMIT));
        assert!(thread_limit(Some(0)).is_err());
        assert!(thread_limit(Some(MAX_THREAD_PAGE_LIMIT + 1)).is_err());
        assert_eq!(thread_limit(Some(5)).ok(), Some(5));
    }
}
