//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}
