use std::collections::HashSet;

use murmur_core::{can_view_updates, ProfileVisibility, UserId};

use crate::server::{
    core::AppState,
    errors::AuthFailure,
    graph_repository::{GraphPersistence, GraphRepository, PairView},
    metrics::record_visibility_denial,
    post_repository::UpdateView,
};

pub(crate) const SURFACE_PROFILE: &str = "profile";
pub(crate) const SURFACE_UPDATE: &str = "update";
pub(crate) const SURFACE_PAIR: &str = "pair";
pub(crate) const SURFACE_MESSAGE: &str = "message";

/// Whether `viewer` may read the updates of `owner`, looking up the pair only
/// when the owner is private and the viewer is someone else.
pub(crate) async fn viewer_can_see_updates(
    state: &AppState,
    viewer: Option<UserId>,
    owner: UserId,
    owner_is_public: bool,
) -> Result<bool, AuthFailure> {
    let visibility = ProfileVisibility::from_is_public(owner_is_public);
    let connected = match viewer {
        Some(viewer) if !owner_is_public && viewer != owner => GraphRepository::from_state(state)
            .pair_between(viewer, owner)
            .await?
            .is_some(),
        _ => false,
    };
    Ok(can_view_updates(viewer, owner, visibility, connected))
}

/// Hidden updates are reported as missing.
pub(crate) async fn require_update_visible(
    state: &AppState,
    viewer: Option<UserId>,
    update: &UpdateView,
) -> Result<(), AuthFailure> {
    if viewer_can_see_updates(state, viewer, update.author_id, update.author_is_public).await? {
        return Ok(());
    }
    record_visibility_denial(SURFACE_UPDATE);
    Err(AuthFailure::NotFound)
}

/// Resolves a pair the caller belongs to, returning it with the other member.
pub(crate) async fn require_pair_member(
    state: &AppState,
    pair_id: &str,
    user_id: UserId,
) -> Result<(PairView, UserId), AuthFailure> {
    let pair = GraphRepository::from_state(state)
        .pair_by_id(pair_id)
        .await?
        .ok_or(AuthFailure::NotFound)?;
    let Some(peer) = pair.peer_of(user_id) else {
        record_visibility_denial(SURFACE_PAIR);
        return Err(AuthFailure::NotFound);
    };
    Ok((pair, peer))
}

/// Users whose updates `viewer` can read regardless of their visibility:
/// the viewer and everyone paired with them.
pub(crate) async fn visible_author_set(
    state: &AppState,
    viewer: Option<UserId>,
) -> Result<HashSet<UserId>, AuthFailure> {
    let Some(viewer) = viewer else {
        return Ok(HashSet::new());
    };
    let mut authors: HashSet<UserId> = GraphRepository::from_state(state)
        .connected_user_ids(viewer)
        .await?
        .into_iter()
        .collect();
    authors.insert(viewer);
    Ok(authors)
}

pub(crate) fn update_visible_within(
    update: &UpdateView,
    viewer: Option<UserId>,
    connected_authors: &HashSet<UserId>,
) -> bool {
    can_view_updates(
        viewer,
        update.author_id,
        ProfileVisibility::from_is_public(update.author_is_public),
        connected_authors.contains(&update.author_id),
    )
}
