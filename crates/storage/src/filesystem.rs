//! Local filesystem artifact store.

use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use std::io::Write;
use std::path::{Path, PathBuf};
use subarea_core::ArtifactKey;
use tokio::fs;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Artifact files under a single root directory.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open the store, creating the root directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        if !fs::metadata(&root).await?.is_dir() {
            return Err(StorageError::NotADirectory(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location of an artifact, whether or not it exists.
    pub fn path_for(&self, key: ArtifactKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// Path of the artifact if it is present on disk.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn locate(&self, key: ArtifactKey) -> StorageResult<Option<PathBuf>> {
        let path = self.path_for(key);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(path)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Re-check that a previously located artifact is still a regular file.
    pub async fn verify(&self, path: &Path) -> bool {
        match fs::metadata(path).await {
            Ok(meta) => meta.is_file(),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "artifact stat failed");
                }
                false
            }
        }
    }

    /// Write an artifact atomically and return its path.
    ///
    /// The temp write and rename run on one blocking task, which finishes
    /// even if the caller is dropped, so no temp file is left behind.
    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    pub async fn write(&self, key: ArtifactKey, data: Bytes) -> StorageResult<PathBuf> {
        let path = self.path_for(key);

        // Unique temp name so concurrent writers of one key never share a file
        let temp_path = self
            .root
            .join(format!("{}.tmp.{}", key.file_name(), Uuid::new_v4()));

        let final_path = path.clone();
        tokio::task::spawn_blocking(move || replace_file(&temp_path, &final_path, &data))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })??;

        debug!(path = %path.display(), "artifact written");
        Ok(path)
    }

    /// Check the root directory is still present and accessible.
    pub async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("artifact root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::NotADirectory(self.root.clone()));
        }
        Ok(())
    }
}

fn replace_file(temp_path: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    let result = write_synced(temp_path, data).and_then(|()| std::fs::rename(temp_path, path));
    if result.is_err() {
        let _ = std::fs::remove_file(temp_path);
    }
    result
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use subarea_core::EntityId;

    fn key(id: i64, rewind: bool) -> ArtifactKey {
        ArtifactKey::new(EntityId::new(id), rewind)
    }

    #[tokio::test]
    async fn test_new_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("geo");

        let store = ArtifactStore::new(&root).await.unwrap();
        assert!(root.is_dir());
        assert_eq!(store.root(), root.as_path());
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_new_rejects_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("geo");
        std::fs::write(&file, b"x").unwrap();

        assert!(ArtifactStore::new(&file).await.is_err());
    }

    #[tokio::test]
    async fn test_path_for_uses_rewind_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).await.unwrap();

        assert_eq!(store.path_for(key(123, false)), dir.path().join("123.geojson"));
        assert_eq!(
            store.path_for(key(123, true)),
            dir.path().join("123-rewind.geojson")
        );
    }

    #[tokio::test]
    async fn test_write_then_locate() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).await.unwrap();

        assert_eq!(store.locate(key(10, false)).await.unwrap(), None);

        let data = Bytes::from_static(br#"{"type":"FeatureCollection","features":[]}"#);
        let path = store.write(key(10, false), data.clone()).await.unwrap();

        assert_eq!(store.locate(key(10, false)).await.unwrap(), Some(path.clone()));
        assert_eq!(store.locate(key(10, true)).await.unwrap(), None);
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[tokio::test]
    async fn test_write_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).await.unwrap();

        store.write(key(1, false), Bytes::from("first")).await.unwrap();
        let path = store.write(key(1, false), Bytes::from("second")).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["1.geojson".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).await.unwrap();

        // Dropped after the first poll, like a build hitting its deadline
        let write = store.write(key(3, false), Bytes::from("{}"));
        let _ = tokio::time::timeout(std::time::Duration::ZERO, write).await;

        let names = || -> Vec<String> {
            std::fs::read_dir(dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        };
        for _ in 0..100 {
            if names() == vec!["3.geojson".to_string()] {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(names(), vec!["3.geojson".to_string()]);
    }

    #[tokio::test]
    async fn test_verify_detects_removal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).await.unwrap();

        let path = store.write(key(5, true), Bytes::from("{}")).await.unwrap();
        assert!(store.verify(&path).await);

        std::fs::remove_file(&path).unwrap();
        assert!(!store.verify(&path).await);
    }

    #[tokio::test]
    async fn test_directory_is_not_an_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).await.unwrap();
        std::fs::create_dir(dir.path().join("7.geojson")).unwrap();

        assert_eq!(store.locate(key(7, false)).await.unwrap(), None);
        assert!(!store.verify(&dir.path().join("7.geojson")).await);
    }

    #[tokio::test]
    async fn test_health_check_fails_when_root_removed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("geo");
        let store = ArtifactStore::new(&root).await.unwrap();

        std::fs::remove_dir(&root).unwrap();
        assert!(store.health_check().await.is_err());
    }
}
