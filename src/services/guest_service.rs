//! Guest lifecycle: enrollment, profile updates, guestbook notes, removal.

use std::time::SystemTime;

use tracing::{debug, info};
use validator::Validate;

use crate::{
    dao::{
        models::{UserEntity, UserId},
        party_store::{DocKey, DocumentWrite, WriteBatch, WritePrecondition},
    },
    dto::guest::{GuestNoteRequest, GuestSummary, JoinPartyRequest, ProfileUpdateRequest},
    error::ServiceError,
    services::party_service,
    state::SharedState,
};

/// Enroll a guest, creating their document with empty progress and no votes.
///
/// Enrollment is idempotent per guest id: if the document already exists the
/// stored guest is returned untouched, so a re-join from a second device
/// cannot wipe progress. The first successful join also seeds the party
/// catalog.
pub async fn join_party(
    state: &SharedState,
    request: JoinPartyRequest,
) -> Result<GuestSummary, ServiceError> {
    request.validate()?;
    let guard = state.claim_token(request.token)?;
    let store = state.require_store().await?;

    let user = UserEntity {
        id: request.user,
        name: request.name.trim().to_string(),
        photo_url: request.photo_url,
        language: request.language.unwrap_or_default(),
        host_comment: String::new(),
        votes_received: 0,
        has_voted_for: None,
        hunt_progress: Default::default(),
        joined_at: SystemTime::now(),
    };

    let batch = WriteBatch::new()
        .require(WritePrecondition::DocumentMissing(DocKey::User(
            user.id.clone(),
        )))
        .write(DocumentWrite::PutUser(user.clone()));

    let summary = match store.commit(batch).await {
        Ok(()) => {
            info!(user = %user.id, name = %user.name, "guest joined the party");
            GuestSummary::from(&user)
        }
        Err(err) if err.is_conflict() => {
            debug!(user = %user.id, "guest already enrolled, keeping stored document");
            let existing = store
                .find_user(user.id.clone())
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("guest {}", user.id)))?;
            GuestSummary::from(&existing)
        }
        Err(err) => return Err(err.into()),
    };

    party_service::ensure_seeded(state).await?;

    guard.commit();
    Ok(summary)
}

/// Update the profile fields present in the request.
pub async fn update_profile(
    state: &SharedState,
    request: ProfileUpdateRequest,
) -> Result<(), ServiceError> {
    request.validate()?;
    if request.name.is_none() && request.language.is_none() {
        return Err(ServiceError::InvalidInput("nothing to update".into()));
    }
    let guard = state.claim_token(request.token)?;
    let store = state.require_store().await?;

    let batch = WriteBatch::new().write(DocumentWrite::SetProfile {
        user: request.user,
        name: request.name.map(|name| name.trim().to_string()),
        language: request.language,
    });
    store.commit(batch).await?;

    guard.commit();
    Ok(())
}

/// Append one line to a guest's guestbook comment.
pub async fn append_host_note(
    state: &SharedState,
    request: GuestNoteRequest,
) -> Result<(), ServiceError> {
    request.validate()?;
    let guard = state.claim_token(request.token)?;
    let store = state.require_store().await?;

    let batch = WriteBatch::new().write(DocumentWrite::AppendHostNote {
        user: request.user,
        note: request.note.trim().to_string(),
    });
    store.commit(batch).await?;

    guard.commit();
    Ok(())
}

/// Remove a guest document. Safe to repeat.
pub async fn remove_guest(state: &SharedState, user: UserId) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    let batch = WriteBatch::new().write(DocumentWrite::DeleteUser(user.clone()));
    store.commit(batch).await?;
    info!(user = %user, "guest removed");
    Ok(())
}

/// Roster view served from the session cache.
pub fn guests(state: &SharedState) -> Vec<GuestSummary> {
    state.cache().users().iter().map(Into::into).collect()
}

/// One guest served from the session cache.
pub fn guest(state: &SharedState, user: &UserId) -> Result<GuestSummary, ServiceError> {
    state
        .cache()
        .user(user)
        .map(|entity| GuestSummary::from(&entity))
        .ok_or_else(|| ServiceError::NotFound(format!("guest {user}")))
}
