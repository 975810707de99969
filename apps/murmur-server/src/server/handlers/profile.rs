use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use murmur_core::{can_view_updates, ConnectionState, PageRequest, ProfileVisibility, UserId, Username};

use crate::server::{
    auth::{authenticate, authenticate_optional},
    auth_repository::{AuthPersistence, AuthRepository},
    core::{AppState, MAX_USER_LOOKUP_IDS},
    db::ensure_db_schema,
    errors::AuthFailure,
    handlers::ApiJson,
    graph_repository::{GraphPersistence, GraphRepository, PendingRequests},
    metrics::record_visibility_denial,
    post_repository::{PostPersistence, PostRepository},
    types::{
        MeResponse, PageQuery, ProfileResponse, UpdatePageResponse, UpdateProfileRequest,
        UserLookupItem, UserLookupRequest, UserLookupResponse, UserPath,
    },
    visibility::{viewer_can_see_updates, SURFACE_PROFILE},
};

pub(crate) fn parse_user_id(raw: String) -> Result<UserId, AuthFailure> {
    UserId::try_from(raw).map_err(|_| AuthFailure::InvalidRequest)
}

/// The profile header is public. Whether the updates behind it can be read
/// is reported in `updates_visible`.
pub(crate) async fn get_user_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<UserPath>,
) -> Result<Json<ProfileResponse>, AuthFailure> {
    ensure_db_schema(&state).await?;
    let viewer = authenticate_optional(&state, &headers)
        .await?
        .map(|auth| auth.user_id);
    let owner = parse_user_id(path.user_id)?;
    let account = AuthRepository::from_state(&state)
        .find_account(owner)
        .await?
        .ok_or(AuthFailure::NotFound)?;

    let graph = GraphRepository::from_state(&state);
    let (pair, pending) = match viewer {
        Some(viewer) if viewer != owner => (
            graph.pair_between(viewer, owner).await?,
            graph.pending_requests(viewer, owner).await?,
        ),
        _ => (None, PendingRequests::default()),
    };
    let connection = ConnectionState::resolve(
        viewer,
        owner,
        pair.is_some(),
        pending.sent,
        pending.received,
    );
    let updates_visible = can_view_updates(
        viewer,
        owner,
        ProfileVisibility::from_is_public(account.is_public),
        pair.is_some(),
    );
    let update_count = PostRepository::from_state(&state)
        .count_user_updates(owner)
        .await?;

    Ok(Json(ProfileResponse {
        user_id: account.user_id.to_string(),
        username: account.username,
        is_public: account.is_public,
        joined_at_unix: account.joined_at_unix,
        connection,
        pair_id: pair.map(|pair| pair.pair_id),
        update_count,
        updates_visible,
    }))
}

pub(crate) async fn list_user_updates(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<UserPath>,
    Query(query): Query<PageQuery>,
) -> Result<Json<UpdatePageResponse>, AuthFailure> {
    ensure_db_schema(&state).await?;
    let viewer = authenticate_optional(&state, &headers)
        .await?
        .map(|auth| auth.user_id);
    let owner = parse_user_id(path.user_id)?;
    let page = PageRequest::new(query.offset, query.limit).map_err(|_| AuthFailure::InvalidRequest)?;
    let account = AuthRepository::from_state(&state)
        .find_account(owner)
        .await?
        .ok_or(AuthFailure::NotFound)?;

    if !viewer_can_see_updates(&state, viewer, owner, account.is_public).await? {
        record_visibility_denial(SURFACE_PROFILE);
        tracing::info!(event = "profile.updates", outcome = "private_profile", owner = %owner);
        return Err(AuthFailure::PrivateProfile);
    }

    let mut updates = PostRepository::from_state(&state)
        .list_user_updates(owner, page)
        .await?;
    let next_offset = page.finish(&mut updates);

    Ok(Json(UpdatePageResponse {
        updates: updates.into_iter().map(Into::into).collect(),
        next_offset,
    }))
}

pub(crate) async fn update_my_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<UpdateProfileRequest>,
) -> Result<Json<MeResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    if payload.is_public.is_none() && payload.username.is_none() {
        return Err(AuthFailure::InvalidRequest);
    }
    let username = payload
        .username
        .map(Username::try_from)
        .transpose()
        .map_err(|_| AuthFailure::InvalidRequest)?;

    let account = AuthRepository::from_state(&state)
        .update_profile(auth.user_id, payload.is_public, username.as_ref())
        .await?;

    tracing::info!(
        event = "profile.update",
        outcome = "success",
        user_id = %auth.user_id,
        is_public = account.is_public
    );

    Ok(Json(MeResponse {
        user_id: account.user_id.to_string(),
        username: account.username,
        is_public: account.is_public,
        joined_at_unix: account.joined_at_unix,
    }))
}

pub(crate) async fn lookup_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<UserLookupRequest>,
) -> Result<Json<UserLookupResponse>, AuthFailure> {
    let _auth = authenticate(&state, &headers).await?;
    if payload.user_ids.is_empty() || payload.user_ids.len() > MAX_USER_LOOKUP_IDS {
        return Err(AuthFailure::InvalidRequest);
    }

    let mut deduped = Vec::with_capacity(payload.user_ids.len());
    let mut seen = HashSet::with_capacity(payload.user_ids.len());
    for raw_user_id in payload.user_ids {
        let user_id = parse_user_id(raw_user_id)?;
        if seen.insert(user_id) {
            deduped.push(user_id);
        }
    }

    let usernames = AuthRepository::from_state(&state)
        .lookup_usernames(&deduped)
        .await?;
    let users = deduped
        .into_iter()
        .filter_map(|user_id| {
            usernames.get(&user_id).map(|username| UserLookupItem {
                user_id: user_id.to_string(),
                username: username.clone(),
            })
        })
        .collect();

    Ok(Json(UserLookupResponse { users }))
}
