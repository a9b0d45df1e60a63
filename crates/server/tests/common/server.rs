//! Server test utilities.

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use subarea_core::EntityId;
use subarea_core::config::AppConfig;
use subarea_osm::{ElementType, MemorySource, OsmConverter};
use subarea_pipeline::Pipeline;
use subarea_server::{AppState, create_router};
use subarea_storage::ArtifactStore;
use tempfile::TempDir;
use tower::ServiceExt;

/// Parent 123 with sub-areas 10, 20 and 30 plus two members with other
/// roles; parent 7 has no sub-areas at all.
#[allow(dead_code)]
pub fn scenario_source() -> MemorySource {
    let source = MemorySource::new();
    source.insert_parent(
        123,
        &[10, 20, 30],
        &[(ElementType::Node, 1, "label"), (ElementType::Relation, 99, "inner")],
    );
    source.insert_square(10, &[("name", "Ten"), ("type", "boundary")]);
    source.insert_square(20, &[("name", "Twenty")]);
    source.insert_square(30, &[("name", "Hà Nội")]);
    source.insert_parent(7, &[], &[(ElementType::Way, 70, "outer")]);
    source
}

#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub source: Arc<MemorySource>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        Self::with_source(scenario_source(), |_| {}).await
    }

    /// Create a test server over `source` with custom config modifications.
    pub async fn with_source<F>(source: MemorySource, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let mut config = AppConfig::for_testing(temp_dir.path().join("geo"));
        config.pipeline.workers = 2;
        modifier(&mut config);

        let store = ArtifactStore::new(&config.output.dir)
            .await
            .expect("Failed to create artifact store");

        let source = Arc::new(source);
        let pipeline = Pipeline::new(source.clone(), Arc::new(OsmConverter), &config.pipeline);
        let state = AppState::new(config, store, pipeline);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            source,
            _temp_dir: temp_dir,
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.state.store().root().to_path_buf()
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        send(&self.router, request).await
    }

    /// Wait until no build for `id` is running.
    pub async fn wait_idle(&self, id: i64) {
        let id = EntityId::new(id);
        for _ in 0..500 {
            if !self.state.coalescer.is_in_flight(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("build for {id} did not finish");
    }
}

pub async fn send(router: &axum::Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    TestResponse {
        status,
        headers,
        body,
    }
}
