//! Validation helpers for DTOs.

use validator::ValidationError;

const MAX_NAME_LENGTH: usize = 80;
const MAX_LABEL_LENGTH: usize = 64;
const MAX_ANSWER_LENGTH: usize = 500;

/// Validates that a guest display name carries both a first and a last name.
///
/// # Examples
///
/// ```ignore
/// validate_display_name("Maria Garcia")  // Ok
/// validate_display_name("Maria")         // Err - single word
/// validate_display_name("   ")           // Err - blank
/// ```
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("name_blank");
        err.message = Some("Display name must not be blank".into());
        return Err(err);
    }

    if trimmed.len() > MAX_NAME_LENGTH {
        let mut err = ValidationError::new("name_length");
        err.message = Some(
            format!(
                "Display name must be at most {MAX_NAME_LENGTH} characters (got {})",
                trimmed.len()
            )
            .into(),
        );
        return Err(err);
    }

    if trimmed.split_whitespace().count() < 2 {
        let mut err = ValidationError::new("name_incomplete");
        err.message = Some("Display name must include first and last name".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a queue signup label is non-blank and reasonably short.
pub fn validate_signup_label(label: &str) -> Result<(), ValidationError> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("label_blank");
        err.message = Some("Signup label must not be blank".into());
        return Err(err);
    }

    if trimmed.len() > MAX_LABEL_LENGTH {
        let mut err = ValidationError::new("label_length");
        err.message = Some(
            format!(
                "Signup label must be at most {MAX_LABEL_LENGTH} characters (got {})",
                trimmed.len()
            )
            .into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Validates that a poll answer or guest note has visible content.
pub fn validate_text_payload(text: &str) -> Result<(), ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("text_blank");
        err.message = Some("Text must not be blank".into());
        return Err(err);
    }

    if trimmed.len() > MAX_ANSWER_LENGTH {
        let mut err = ValidationError::new("text_length");
        err.message = Some(
            format!(
                "Text must be at most {MAX_ANSWER_LENGTH} characters (got {})",
                trimmed.len()
            )
            .into(),
        );
        return Err(err);
    }

    Ok(())
}
