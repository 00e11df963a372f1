use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::{
    dao::models::{Language, MutationToken, UserEntity, UserId},
    dto::{format_system_time, validation::validate_display_name},
};

/// Payload a device submits to enroll its guest in the party.
#[derive(Debug, Deserialize, Validate)]
pub struct JoinPartyRequest {
    pub token: MutationToken,
    pub user: UserId,
    #[validate(custom(function = validate_display_name))]
    pub name: String,
    #[serde(default)]
    #[validate(url)]
    pub photo_url: Option<String>,
    /// Defaults to English when omitted.
    #[serde(default)]
    pub language: Option<Language>,
}

/// Partial profile update; omitted fields are left untouched.
#[derive(Debug, Deserialize)]
pub struct ProfileUpdateRequest {
    pub token: MutationToken,
    pub user: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub language: Option<Language>,
}

impl Validate for ProfileUpdateRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Some(ref name) = self.name {
            if let Err(e) = validate_display_name(name) {
                errors.add("name", e);
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// A note appended to a guest's guestbook comment.
#[derive(Debug, Deserialize, Validate)]
pub struct GuestNoteRequest {
    pub token: MutationToken,
    pub user: UserId,
    #[validate(custom(function = crate::dto::validation::validate_text_payload))]
    pub note: String,
}

/// Public projection of a guest document.
#[derive(Clone, Debug, Serialize)]
pub struct GuestSummary {
    pub id: UserId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub language: Language,
    pub host_comment: String,
    pub votes_received: i64,
    pub has_voted_for: Option<UserId>,
    pub joined_at: String,
}

impl From<&UserEntity> for GuestSummary {
    fn from(user: &UserEntity) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            photo_url: user.photo_url.clone(),
            language: user.language,
            host_comment: user.host_comment.clone(),
            votes_received: user.votes_received,
            has_voted_for: user.has_voted_for.clone(),
            joined_at: format_system_time(user.joined_at),
        }
    }
}
