//! Remote dataset and conversion error types.

use subarea_core::EntityId;
use thiserror::Error;

/// Errors from the remote dataset.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("relation {0} not found")]
    NotFound(EntityId),

    #[error("access to relation {0} forbidden")]
    Forbidden(EntityId),

    #[error("relation {0} has been deleted")]
    Gone(EntityId),

    #[error("remote returned {status} for relation {id}")]
    Status { id: EntityId, status: u16 },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("undecodable response for relation {id}: {source}")]
    Decode {
        id: EntityId,
        #[source]
        source: serde_json::Error,
    },

    #[error("response does not contain relation {0}")]
    MissingRelation(EntityId),

    #[error("configuration error: {0}")]
    Config(String),
}

impl RemoteError {
    /// Whether the remote rejected the request itself. Client errors are
    /// not worth retrying until the data changes upstream.
    pub fn is_client(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Forbidden(_) | Self::Gone(_))
    }
}

/// Errors turning a relation into GeoJSON.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("relation {0} has no closed outer ring")]
    NoRings(EntityId),

    #[error("way {way} references missing node {node}")]
    MissingNode { way: i64, node: i64 },
}
