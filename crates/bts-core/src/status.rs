//! Response status classes.

use serde::{Deserialize, Serialize};

/// Outcome class of a request, with its HTTP equivalent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Created,
    NotModified,
    Conflict,
    PreconditionFailed,
    PreconditionRequired,
    NotFound,
    ValidationError,
    /// Storage or encoding failure inside the engine.
    InternalError,
}

impl Status {
    pub fn http_code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::NotModified => 304,
            Status::ValidationError => 400,
            Status::NotFound => 404,
            Status::Conflict => 409,
            Status::PreconditionFailed => 412,
            Status::PreconditionRequired => 428,
            Status::InternalError => 500,
        }
    }

    /// Error-class statuses roll back the enclosing transaction.
    pub fn is_error(&self) -> bool {
        self.http_code() >= 400
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:?}", self.http_code(), self)
    }
}
