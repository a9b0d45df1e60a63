// Concurrent writers of one artifact key must never expose a torn file.

use bytes::Bytes;
use std::sync::Arc;
use subarea_core::{ArtifactKey, EntityId};
use subarea_storage::ArtifactStore;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_same_key() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ArtifactStore::new(dir.path()).await.unwrap());
    let key = ArtifactKey::new(EntityId::new(123), false);

    let payloads: Vec<Bytes> = (0..16)
        .map(|i| Bytes::from(format!("{{\"writer\":{i},\"pad\":\"{}\"}}", "x".repeat(64 * 1024))))
        .collect();

    let mut handles = Vec::new();
    for payload in payloads.clone() {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move { store.write(key, payload).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let path = store.locate(key).await.unwrap().expect("artifact present");
    let written = Bytes::from(std::fs::read(path).unwrap());
    assert!(
        payloads.contains(&written),
        "file content must equal one complete payload"
    );

    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .contains(".tmp.")
        })
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_do_not_interfere() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ArtifactStore::new(dir.path()).await.unwrap());

    let mut handles = Vec::new();
    for id in [10, 20, 30] {
        for rewind in [false, true] {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let key = ArtifactKey::new(EntityId::new(id), rewind);
                store.write(key, Bytes::from(key.to_string())).await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for id in [10, 20, 30] {
        for rewind in [false, true] {
            let key = ArtifactKey::new(EntityId::new(id), rewind);
            let path = store.locate(key).await.unwrap().unwrap();
            assert_eq!(std::fs::read_to_string(path).unwrap(), key.to_string());
        }
    }
}
