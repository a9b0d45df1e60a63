//! Destinations for encoded artifacts.

use async_trait::async_trait;
use bytes::Bytes;
use subarea_core::ArtifactKey;
use subarea_storage::ArtifactStore;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{PipelineError, Result};

/// Where the reporter delivers each finished artifact.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn put(&self, key: ArtifactKey, data: Bytes) -> Result<()>;
}

#[async_trait]
impl ArtifactSink for ArtifactStore {
    async fn put(&self, key: ArtifactKey, data: Bytes) -> Result<()> {
        self.write(key, data).await?;
        Ok(())
    }
}

/// Prints artifacts to stdout, one JSON document per line.
#[derive(Default)]
pub struct StdoutSink {
    out: Mutex<()>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactSink for StdoutSink {
    async fn put(&self, _key: ArtifactKey, data: Bytes) -> Result<()> {
        // Serialize whole documents so concurrent artifacts never interleave
        let _guard = self.out.lock().await;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(&data).await.map_err(PipelineError::Output)?;
        stdout.write_all(b"\n").await.map_err(PipelineError::Output)?;
        stdout.flush().await.map_err(PipelineError::Output)
    }
}
