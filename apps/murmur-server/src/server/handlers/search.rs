use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};

use crate::server::{
    auth::authenticate_optional,
    auth_repository::{AuthPersistence, AuthRepository},
    core::{AppState, MAX_SEARCH_CANDIDATES},
    db::ensure_db_schema,
    errors::AuthFailure,
    post_repository::{PostPersistence, PostRepository},
    search::{
        effective_search_limit, ensure_search_bootstrapped, normalize_search_query,
        run_search_query, validate_search_query,
    },
    types::{SearchQuery, SearchResponse, UserSearchItem},
    visibility::{update_visible_within, visible_author_set},
};

/// Usernames containing the query, and updates matching it that the viewer
/// is allowed to read, in index rank order.
pub(crate) async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, AuthFailure> {
    ensure_db_schema(&state).await?;
    let viewer = authenticate_optional(&state, &headers)
        .await?
        .map(|auth| auth.user_id);
    validate_search_query(&state, &query)?;
    let limit = effective_search_limit(&query);
    let needle = normalize_search_query(&query.q);

    let users = AuthRepository::from_state(&state)
        .search_usernames(&needle, limit)
        .await?
        .into_iter()
        .map(|account| UserSearchItem {
            user_id: account.user_id.to_string(),
            username: account.username,
            is_public: account.is_public,
        })
        .collect();

    ensure_search_bootstrapped(&state).await?;
    let candidates = limit.saturating_mul(4).min(MAX_SEARCH_CANDIDATES);
    let update_ids = run_search_query(&state, &needle, candidates).await?;
    let mut hydrated: HashMap<String, _> = PostRepository::from_state(&state)
        .updates_by_ids(&update_ids)
        .await?
        .into_iter()
        .map(|update| (update.update_id.clone(), update))
        .collect();
    let connected_authors = visible_author_set(&state, viewer).await?;

    let updates = update_ids
        .iter()
        .filter_map(|update_id| hydrated.remove(update_id))
        .filter(|update| update_visible_within(update, viewer, &connected_authors))
        .take(limit)
        .map(Into::into)
        .collect();

    Ok(Json(SearchResponse { users, updates }))
}
