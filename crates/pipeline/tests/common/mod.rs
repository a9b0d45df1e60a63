#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use subarea_core::config::PipelineConfig;
use subarea_core::{ArtifactKey, FeatureCollection};
use subarea_osm::{ElementType, MemorySource, OsmConverter};
use subarea_pipeline::{ArtifactSink, Pipeline, PipelineError};
use subarea_storage::StorageError;

/// Parent 123 with sub-areas 10, 20, 30 and two members in other roles.
pub fn scenario_source() -> Arc<MemorySource> {
    let source = MemorySource::new();
    source.insert_parent(
        123,
        &[10, 20, 30],
        &[(ElementType::Node, 1, "admin_centre"), (ElementType::Way, 2, "outer")],
    );
    source.insert_square(10, &[("name", "Ten"), ("type", "boundary"), ("admin_level", "6")]);
    source.insert_square(20, &[("name", "Hà Nội"), ("type", "boundary")]);
    source.insert_square(30, &[("name", "Thirty"), ("type", "boundary")]);
    Arc::new(source)
}

pub fn pipeline(source: Arc<MemorySource>, workers: usize, channel_capacity: usize) -> Pipeline {
    Pipeline::new(
        source,
        Arc::new(OsmConverter),
        &PipelineConfig {
            workers,
            channel_capacity,
        },
    )
}

/// Collects artifacts in memory; optionally refuses one key.
#[derive(Default)]
pub struct MemorySink {
    artifacts: Mutex<Vec<(ArtifactKey, Bytes)>>,
    refuse: Option<ArtifactKey>,
}

impl MemorySink {
    pub fn refusing(key: ArtifactKey) -> Self {
        Self {
            artifacts: Mutex::default(),
            refuse: Some(key),
        }
    }

    pub fn keys(&self) -> Vec<ArtifactKey> {
        let mut keys: Vec<_> = self.artifacts.lock().unwrap().iter().map(|(k, _)| *k).collect();
        keys.sort_by_key(|k| k.id);
        keys
    }

    pub fn collection(&self, key: ArtifactKey) -> FeatureCollection {
        let artifacts = self.artifacts.lock().unwrap();
        let (_, data) = artifacts
            .iter()
            .find(|(k, _)| *k == key)
            .unwrap_or_else(|| panic!("no artifact for {key}"));
        serde_json::from_slice(data).unwrap()
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn put(&self, key: ArtifactKey, data: Bytes) -> Result<(), PipelineError> {
        if self.refuse == Some(key) {
            return Err(PipelineError::Storage(StorageError::Io(std::io::Error::other(
                "disk full",
            ))));
        }
        self.artifacts.lock().unwrap().push((key, data));
        Ok(())
    }
}
