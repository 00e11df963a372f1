use thiserror::Error;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, state::queue::QueueRejection};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Session is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Concurrent writers kept invalidating the operation's preconditions.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The mutation token was already committed; the operation took effect.
    #[error("mutation already applied")]
    AlreadyApplied,
    /// Invariant violation inside the session itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::PreconditionFailed { condition } => ServiceError::Conflict(condition),
            StorageError::MissingDocument { collection, key } => {
                ServiceError::NotFound(format!("{collection}/{key}"))
            }
            err => ServiceError::Unavailable(err),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {err}"))
    }
}

impl From<QueueRejection> for ServiceError {
    fn from(err: QueueRejection) -> Self {
        match err {
            QueueRejection::AlreadyQueued { .. } => ServiceError::InvalidState(err.to_string()),
            QueueRejection::NoActiveMatch => {
                ServiceError::InvalidState("no active match to conclude".into())
            }
            QueueRejection::NotInActiveMatch { .. } => ServiceError::InvalidState(err.to_string()),
            QueueRejection::UnknownSignup { signup } => {
                ServiceError::NotFound(format!("signup {signup}"))
            }
            QueueRejection::DuplicateSignupId { .. } => ServiceError::Internal(err.to_string()),
        }
    }
}
