//! Storage error types.

use std::path::PathBuf;
use thiserror::Error;

/// Artifact store errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
