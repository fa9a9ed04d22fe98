//! Error types for the entity engine.

use crate::entity::Snapshot;
use crate::status::Status;
use thiserror::Error;

/// Errors that can occur while handling a request.
///
/// Concurrency errors carry the current snapshot so the caller can retry
/// with a fresh token.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Precondition required: {message}")]
    PreconditionRequired {
        message: String,
        current: Box<Snapshot>,
    },

    #[error("Precondition failed: token {token} is not the current version")]
    PreconditionFailed {
        token: String,
        current: Box<Snapshot>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    StateConflict(String),

    #[error("Conflict, retry: {0}")]
    TransientConflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The response status class for this error.
    pub fn status(&self) -> Status {
        match self {
            Error::Validation(_) => Status::ValidationError,
            Error::PreconditionRequired { .. } => Status::PreconditionRequired,
            Error::PreconditionFailed { .. } => Status::PreconditionFailed,
            Error::NotFound(_) => Status::NotFound,
            Error::StateConflict(_) | Error::TransientConflict(_) => Status::Conflict,
            Error::Storage(_) | Error::Serialization(_) | Error::Config(_) => {
                Status::InternalError
            }
        }
    }

    /// The current snapshot carried by concurrency errors.
    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        match self {
            Error::PreconditionRequired { current, .. }
            | Error::PreconditionFailed { current, .. } => Some(current),
            _ => None,
        }
    }

    /// Whether the caller should simply retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientConflict(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
