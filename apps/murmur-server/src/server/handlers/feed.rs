use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use murmur_core::{FeedScope, PageRequest};

use crate::server::{
    auth::authenticate_optional,
    core::AppState,
    db::ensure_db_schema,
    errors::AuthFailure,
    post_repository::{PostPersistence, PostRepository},
    types::{FeedQuery, FeedResponse},
    visibility::visible_author_set,
};

/// Newest-first updates. The public scope lists public authors to anyone;
/// the connections scope lists the viewer and their pairs, private or not.
pub(crate) async fn feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedResponse>, AuthFailure> {
    ensure_db_schema(&state).await?;
    let scope = query
        .scope
        .map(FeedScope::try_from)
        .transpose()
        .map_err(|_| AuthFailure::InvalidRequest)?
        .unwrap_or_default();
    let page = PageRequest::new(query.offset, query.limit).map_err(|_| AuthFailure::InvalidRequest)?;
    let viewer = authenticate_optional(&state, &headers)
        .await?
        .map(|auth| auth.user_id);

    let repository = PostRepository::from_state(&state);
    let mut updates = match scope {
        FeedScope::Public => repository.public_feed(page).await?,
        FeedScope::Connections => {
            if viewer.is_none() {
                return Err(AuthFailure::Unauthorized);
            }
            let mut authors: Vec<_> = visible_author_set(&state, viewer)
                .await?
                .into_iter()
                .collect();
            authors.sort_unstable();
            repository.connections_feed(&authors, page).await?
        }
    };
    let next_offset = page.finish(&mut updates);

    tracing::debug!(
        event = "feed.list",
        scope = scope.as_str(),
        offset = page.offset(),
        returned = updates.len()
    );

    Ok(Json(FeedResponse {
        scope,
        updates: updates.into_iter().map(Into::into).collect(),
        next_offset,
    }))
}
