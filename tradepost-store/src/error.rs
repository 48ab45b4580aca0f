//! Storage layer errors

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Record could not be decoded
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend refused the write
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            StoreError::Deserialization(err.to_string())
        } else {
            StoreError::Serialization(err.to_string())
        }
    }
}
