//! Core domain types and shared logic for subarea.
//!
//! This crate defines the data model used across all other crates:
//! - Entity identifiers and artifact keys
//! - Output mode flags for a build
//! - The GeoJSON model emitted as artifacts
//! - Tag whitelisting and diacritic stripping
//! - Polygon ring rewinding
//! - Application configuration

pub mod artifact;
pub mod config;
pub mod error;
pub mod geojson;
pub mod normalize;
pub mod rewind;

pub use artifact::{ArtifactKey, BuildOptions, EntityId};
pub use error::{Error, Result};
pub use geojson::{Feature, FeatureCollection, FeatureId, Geometry, Position, Ring};
pub use normalize::{TAG_WHITELIST, Tags, normalize_tags, strip_diacritics};
pub use rewind::{
    rewind_feature, rewind_feature_collection, rewind_geometry, rewind_ring, rewind_rings,
};

/// Member role that marks a sub-entity as an artifact unit.
pub const SUBAREA_ROLE: &str = "subarea";
