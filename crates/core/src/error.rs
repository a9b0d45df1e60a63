//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid ID: {0}")]
    InvalidId(String),

    #[error("geometry type not supported: {0}")]
    UnsupportedGeometry(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
