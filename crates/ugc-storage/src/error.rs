//! Asset storage errors.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage misconfigured: {0}")]
    Config(String),

    #[error("Asset key rejected: {0}")]
    InvalidKey(String),

    #[error("Refusing to store an empty render")]
    EmptyAsset,

    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Could not sign download URL: {0}")]
    Signing(String),

    /// The bucket did not accept or answer the request.
    #[error("Bucket request failed ({operation}): {message}")]
    Bucket {
        operation: &'static str,
        message: String,
    },
}

impl StorageError {
    pub fn bucket(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Bucket {
            operation,
            message: err.to_string(),
        }
    }

    pub fn signing(err: impl std::fmt::Display) -> Self {
        Self::Signing(err.to_string())
    }

    /// Worth retrying on a later delivery.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Bucket { .. })
    }
}
