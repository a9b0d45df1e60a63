//! Remote dataset collaborator for subarea.
//!
//! This crate provides:
//! - The OSM API v0.6 JSON element model
//! - `EntitySource`, the read interface the pipeline consumes, and
//!   `OsmClient`, its HTTP implementation
//! - `Converter`, the relation to GeoJSON interface, and `OsmConverter`
//! - `MemorySource`, an in-memory source for tests (`test-util` feature)

pub mod client;
pub mod convert;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod model;

pub use client::{EntitySource, OsmClient};
pub use convert::{Converter, OsmConverter};
pub use error::{ConvertError, RemoteError};
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemorySource;
pub use model::{Document, Element, ElementType, FullRelation, Member, Node, Relation, Way};
