use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use murmur_core::{CommentBody, UpdateBody, UserId};

use crate::server::{
    auth::{authenticate, authenticate_optional, now_unix},
    core::{AppState, SearchOperation},
    db::ensure_db_schema,
    errors::AuthFailure,
    handlers::ApiJson,
    metrics::record_visibility_denial,
    post_repository::{CommentView, PostPersistence, PostRepository, UpdateView},
    search::enqueue_search_operation,
    types::{
        CommentListResponse, CommentResponse, CreateCommentRequest, CreateUpdateRequest,
        UpdateDetailResponse, UpdatePath, UpdateResponse,
    },
    visibility::{require_update_visible, SURFACE_UPDATE},
};

/// Index writes follow the stored row. A failed write is counted and logged
/// rather than failing the request; the index is rebuilt from storage on start.
async fn sync_search_index(state: &AppState, op: SearchOperation, update_id: &str) {
    if let Err(error) = enqueue_search_operation(state, op, true).await {
        tracing::warn!(event = "search.index", outcome = "failed", update_id = %update_id, error = %error);
    }
}

async fn load_visible_update(
    state: &AppState,
    viewer: Option<UserId>,
    update_id: &str,
) -> Result<UpdateView, AuthFailure> {
    let update = PostRepository::from_state(state)
        .find_update(update_id)
        .await?
        .ok_or(AuthFailure::NotFound)?;
    require_update_visible(state, viewer, &update).await?;
    Ok(update)
}

pub(crate) async fn post_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<CreateUpdateRequest>,
) -> Result<Json<UpdateResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let body = UpdateBody::try_from(payload.body).map_err(|_| AuthFailure::InvalidRequest)?;

    let update_id = state.next_id().to_string();
    let posted_at_unix = now_unix();
    let repository = PostRepository::from_state(&state);
    repository
        .insert_update(&update_id, auth.user_id, body.as_str(), posted_at_unix)
        .await?;
    let update = repository
        .find_update(&update_id)
        .await?
        .ok_or(AuthFailure::Internal)?;
    sync_search_index(
        &state,
        SearchOperation::Upsert(update.to_indexed()),
        &update_id,
    )
    .await;

    tracing::info!(event = "updates.create", outcome = "created", update_id = %update_id, user_id = %auth.user_id);

    Ok(Json(update.into()))
}

pub(crate) async fn get_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<UpdatePath>,
) -> Result<Json<UpdateDetailResponse>, AuthFailure> {
    ensure_db_schema(&state).await?;
    let viewer = authenticate_optional(&state, &headers)
        .await?
        .map(|auth| auth.user_id);
    let update = load_visible_update(&state, viewer, &path.update_id).await?;
    let comments = PostRepository::from_state(&state)
        .list_comments(&update.update_id)
        .await?;

    Ok(Json(UpdateDetailResponse {
        update: update.into(),
        comments: comments.into_iter().map(Into::into).collect(),
    }))
}

pub(crate) async fn delete_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<UpdatePath>,
) -> Result<StatusCode, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let update = load_visible_update(&state, Some(auth.user_id), &path.update_id).await?;
    if update.author_id != auth.user_id {
        record_visibility_denial(SURFACE_UPDATE);
        return Err(AuthFailure::Forbidden);
    }

    let deleted = PostRepository::from_state(&state)
        .delete_update(&update.update_id)
        .await?;
    if !deleted {
        return Err(AuthFailure::NotFound);
    }
    sync_search_index(
        &state,
        SearchOperation::Delete {
            update_id: update.update_id.clone(),
        },
        &update.update_id,
    )
    .await;

    tracing::info!(event = "updates.delete", outcome = "deleted", update_id = %update.update_id, user_id = %auth.user_id);
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn add_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<UpdatePath>,
    ApiJson(payload): ApiJson<CreateCommentRequest>,
) -> Result<Json<CommentResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let body = CommentBody::try_from(payload.body).map_err(|_| AuthFailure::InvalidRequest)?;
    let update = load_visible_update(&state, Some(auth.user_id), &path.update_id).await?;

    let comment_id = state.next_id().to_string();
    let posted_at_unix = now_unix();
    PostRepository::from_state(&state)
        .insert_comment(
            &comment_id,
            &update.update_id,
            auth.user_id,
            body.as_str(),
            posted_at_unix,
        )
        .await?;

    tracing::info!(event = "comments.create", outcome = "created", update_id = %update.update_id, comment_id = %comment_id);

    Ok(Json(
        CommentView {
            comment_id,
            update_id: update.update_id,
            author_id: auth.user_id,
            author_username: auth.username,
            body: body.into_inner(),
            posted_at_unix,
        }
        .into(),
    ))
}

pub(crate) async fn list_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<UpdatePath>,
) -> Result<Json<CommentListResponse>, AuthFailure> {
    ensure_db_schema(&state).await?;
    let viewer = authenticate_optional(&state, &headers)
        .await?
        .map(|auth| auth.user_id);
    let update = load_visible_update(&state, viewer, &path.update_id).await?;
    let comments = PostRepository::from_state(&state)
        .list_comments(&update.update_id)
        .await?;

    Ok(Json(CommentListResponse {
        comments: comments.into_iter().map(Into::into).collect(),
    }))
}
