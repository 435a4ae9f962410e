//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid id or tag '{0}': must match [a-zA-Z0-9_]+")]
    InvalidIdentifier(String),

    #[error("Id '{0}' uses the reserved internal prefix")]
    ReservedIdPrefix(String),

    #[error("Invalid data type: {0}")]
    InvalidDataType(String),

    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Not supported by the current backend: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] tagcache_storage::StorageError),
}

impl From<tagcache_storage::ParseCleaningModeError> for CacheError {
    fn from(err: tagcache_storage::ParseCleaningModeError) -> Self {
        CacheError::Configuration(err.to_string())
    }
}
