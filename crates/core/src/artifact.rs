//! Entity identifiers, artifact addressing and build options.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a node in the remote hierarchical dataset.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    /// Identifier the converter gives to the feature representing this relation.
    pub fn feature_id(self) -> String {
        format!("relation/{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        s.parse::<i64>()
            .map(Self)
            .map_err(|_| crate::Error::InvalidId(s.to_string()))
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cache and file address of an artifact.
///
/// The rewind flag is part of the key so the same entity built under
/// different winding policies never collides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub id: EntityId,
    pub rewind: bool,
}

impl ArtifactKey {
    pub const EXTENSION: &'static str = "geojson";

    pub fn new(id: EntityId, rewind: bool) -> Self {
        Self { id, rewind }
    }

    /// File name of the artifact: `<id>.geojson` or `<id>-rewind.geojson`.
    pub fn file_name(&self) -> String {
        if self.rewind {
            format!("{}-rewind.{}", self.id, Self::EXTENSION)
        } else {
            format!("{}.{}", self.id, Self::EXTENSION)
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.id, self.rewind)
    }
}

/// Output mode flags of a single build. Immutable once the build starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Strip diacritics from whitelisted tags, keeping the original under `<key>:original`.
    pub normalize: bool,
    /// Merge all sub-entities into one artifact keyed by the parent.
    pub combine: bool,
    /// Force counter-clockwise exterior rings.
    pub rewind: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            normalize: true,
            combine: true,
            rewind: false,
        }
    }
}

impl BuildOptions {
    /// Key under which an artifact for `id` is written with these options.
    pub fn key(&self, id: EntityId) -> ArtifactKey {
        ArtifactKey::new(id, self.rewind)
    }
}
