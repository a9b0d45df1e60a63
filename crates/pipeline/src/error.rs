//! Pipeline error types.

use subarea_osm::{ConvertError, RemoteError};
use subarea_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Geometry(#[from] subarea_core::Error),

    #[error("failed to encode artifact: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to print artifact: {0}")]
    Output(#[source] std::io::Error),

    #[error("build task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// Whether the failure is the remote refusing the request, as opposed
    /// to something a retry could fix.
    pub fn is_client(&self) -> bool {
        matches!(self, Self::Remote(e) if e.is_client())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
