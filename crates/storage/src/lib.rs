//! Filesystem artifact store for subarea.
//!
//! Artifacts live flat under one root directory, named by
//! [`ArtifactKey::file_name`](subarea_core::ArtifactKey::file_name).
//! Writes are atomic: readers see either the previous file or the new one.

pub mod error;
pub mod filesystem;

pub use error::{StorageError, StorageResult};
pub use filesystem::ArtifactStore;
