//! Scavenger-hunt marks and progress views.

use crate::{
    dao::{
        models::{HuntKind, UserId},
        party_store::{DocumentWrite, WriteBatch},
    },
    dto::hunt::{HuntItemSummary, HuntProgressSummary, MarkItemRequest},
    error::ServiceError,
    state::{SharedState, completion::hunt_progress_summary},
};

/// Store or clear one hunt mark for a guest.
///
/// The item id is not checked against the catalog: the catalog is seeded
/// material that can be rewritten independently, and stray marks are simply
/// ignored by the progress views.
pub async fn mark_item(state: &SharedState, request: MarkItemRequest) -> Result<(), ServiceError> {
    let guard = state.claim_token(request.token)?;
    let store = state.require_store().await?;

    let batch = WriteBatch::new().write(DocumentWrite::SetHuntMark {
        user: request.user,
        item: request.item,
        mark: request.mark,
    });
    store.commit(batch).await?;

    guard.commit();
    Ok(())
}

/// One guest's progress through one hunt, served from the session cache.
pub fn hunt_progress(
    state: &SharedState,
    user: &UserId,
    hunt: HuntKind,
) -> Result<HuntProgressSummary, ServiceError> {
    let guest = state
        .cache()
        .user(user)
        .ok_or_else(|| ServiceError::NotFound(format!("guest {user}")))?;
    let catalog = state.cache().hunt_items();
    Ok(hunt_progress_summary(&catalog, hunt, &guest.hunt_progress))
}

/// Whether a guest has satisfied every item of a hunt.
pub fn is_hunt_complete(
    state: &SharedState,
    user: &UserId,
    hunt: HuntKind,
) -> Result<bool, ServiceError> {
    hunt_progress(state, user, hunt).map(|summary| summary.complete)
}

/// Catalog slice of one hunt, served from the session cache.
pub fn hunt_catalog(state: &SharedState, hunt: HuntKind) -> Vec<HuntItemSummary> {
    state
        .cache()
        .hunt_items_of(hunt)
        .iter()
        .map(Into::into)
        .collect()
}
