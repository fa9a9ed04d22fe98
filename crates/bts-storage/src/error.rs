//! Error types for the storage layer.

use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<StorageError> for bts_core::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Serialization(msg) => bts_core::Error::Serialization(msg),
            other => bts_core::Error::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
