//! Party lifecycle: catalog seeding and the end-of-night reset.

use tracing::{info, warn};

use crate::{
    config::PartyCatalog,
    dao::party_store::{DocKey, DocumentWrite, WriteBatch, WritePrecondition},
    error::ServiceError,
    state::SharedState,
};

/// Seed the configured catalog into an empty store.
///
/// The first configured game doubles as the seed marker: the whole batch is
/// preconditioned on that document being absent, so concurrent first joins
/// race and exactly one of them writes the catalog. Returns whether this
/// call did the seeding.
pub async fn ensure_seeded(state: &SharedState) -> Result<bool, ServiceError> {
    let catalog = &state.config().catalog;
    let Some(marker) = catalog.seed_marker() else {
        return Ok(false);
    };
    let store = state.require_store().await?;

    let mut batch = WriteBatch::new().require(WritePrecondition::DocumentMissing(DocKey::Game(
        marker.clone(),
    )));
    for game in catalog.games() {
        batch = batch.write(DocumentWrite::PutGame(game.clone()));
    }
    for poll in catalog.polls() {
        batch = batch.write(DocumentWrite::PutPoll(poll.clone()));
    }
    for item in catalog.hunt_items() {
        batch = batch.write(DocumentWrite::PutHuntItem(item.clone()));
    }

    match store.commit(batch).await {
        Ok(()) => {
            info!(
                games = catalog.games().len(),
                polls = catalog.polls().len(),
                hunt_items = catalog.hunt_items().len(),
                "seeded party catalog"
            );
            Ok(true)
        }
        Err(err) if err.is_conflict() => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Overwrite the stored catalog with `catalog`, queues and scores included.
///
/// Guests are untouched. Poll answers do not survive because catalog polls
/// carry empty answer maps.
pub async fn reseed_catalog(
    state: &SharedState,
    catalog: &PartyCatalog,
) -> Result<(), ServiceError> {
    let store = state.require_store().await?;

    let mut batch = WriteBatch::new();
    for game in catalog.games() {
        batch = batch.write(DocumentWrite::PutGame(game.clone()));
    }
    for poll in catalog.polls() {
        batch = batch.write(DocumentWrite::PutPoll(poll.clone()));
    }
    for item in catalog.hunt_items() {
        batch = batch.write(DocumentWrite::PutHuntItem(item.clone()));
    }
    if batch.is_empty() {
        return Ok(());
    }
    store.commit(batch).await?;

    info!(
        games = catalog.games().len(),
        polls = catalog.polls().len(),
        hunt_items = catalog.hunt_items().len(),
        "reseeded party catalog"
    );
    Ok(())
}

/// Wipe every guest and all accumulated play state in one batch.
///
/// Games keep their catalog fields, polls keep their questions, and the
/// hunt catalog stays seeded.
pub async fn reset_party(state: &SharedState) -> Result<(), ServiceError> {
    let store = state.require_store().await?;

    let users = store.list_users().await?;
    let games = store.list_games().await?;
    let polls = store.list_polls().await?;

    let mut batch = WriteBatch::new();
    for user in &users {
        batch = batch.write(DocumentWrite::DeleteUser(user.id.clone()));
    }
    for game in &games {
        batch = batch.write(DocumentWrite::ResetGame(game.id.clone()));
    }
    for poll in &polls {
        batch = batch.write(DocumentWrite::ClearPollAnswers(poll.id.clone()));
    }
    if batch.is_empty() {
        return Ok(());
    }
    store.commit(batch).await?;

    warn!(
        guests = users.len(),
        games = games.len(),
        polls = polls.len(),
        "reset the party to a clean slate"
    );
    Ok(())
}
