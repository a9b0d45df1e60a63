//! Coalescing artifact cache in front of the build pipeline.
//!
//! Every request gets an immediate answer. At most one build per entity runs
//! at a time; its outcome is remembered in a success cache (keyed by artifact)
//! or, for a fixed cooldown, in a failure cache (keyed by entity).

use moka::sync::Cache;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use subarea_core::config::AppConfig;
use subarea_core::{ArtifactKey, BuildOptions, EntityId};
use subarea_pipeline::{ArtifactSink, Pipeline};
use subarea_storage::ArtifactStore;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::metrics;

/// Answer to a query that did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryStatus {
    /// The artifact exists on disk.
    Ready(ArtifactKey),
    /// A build for this entity is already running.
    Building,
    /// This request started a build.
    Enqueued,
}

#[derive(Clone, Debug)]
struct Failure {
    message: String,
    client: bool,
    expires_at: OffsetDateTime,
}

impl Failure {
    fn to_error(&self) -> ApiError {
        if self.client {
            ApiError::Client(self.message.clone())
        } else {
            ApiError::Unavailable {
                message: self.message.clone(),
                retry_at: self.expires_at,
            }
        }
    }
}

struct Inner {
    store: ArtifactStore,
    pipeline: Pipeline,
    successes: Cache<ArtifactKey, PathBuf>,
    failures: Cache<EntityId, Failure>,
    in_flight: RwLock<HashSet<EntityId>>,
    failure_ttl: Duration,
    build_timeout: Duration,
}

impl Inner {
    fn record_failure(&self, id: EntityId, message: String, client: bool) {
        let expires_at = OffsetDateTime::now_utc() + self.failure_ttl;
        self.failures.insert(
            id,
            Failure {
                message,
                client,
                expires_at,
            },
        );
    }
}

/// Shared handle; clones refer to the same caches and in-flight table.
#[derive(Clone)]
pub struct Coalescer {
    inner: Arc<Inner>,
}

impl Coalescer {
    pub fn new(config: &AppConfig, store: ArtifactStore, pipeline: Pipeline) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                pipeline,
                successes: Cache::builder()
                    .max_capacity(config.cache.success_capacity)
                    .build(),
                failures: Cache::builder()
                    .max_capacity(config.cache.failure_capacity)
                    .build(),
                in_flight: RwLock::new(HashSet::new()),
                failure_ttl: config.cache.failure_ttl(),
                build_timeout: config.server.build_timeout(),
            }),
        }
    }

    /// Resolve a request for the artifact of `id`, starting a build if needed.
    pub async fn query(&self, id: EntityId, rewind: bool) -> Result<QueryStatus, ApiError> {
        let inner = &self.inner;
        let key = ArtifactKey::new(id, rewind);

        if let Some(path) = inner.successes.get(&key) {
            if inner.store.verify(&path).await {
                metrics::CACHE_HITS.inc();
                return Ok(QueryStatus::Ready(key));
            }
            warn!(key = %key, path = %path.display(), "cached artifact is gone");
            inner.successes.invalidate(&key);
            return Err(ApiError::MissingOutputs);
        }

        if let Some(failure) = inner.failures.get(&id) {
            if OffsetDateTime::now_utc() < failure.expires_at {
                metrics::FAILURE_CACHE_HITS.inc();
                return Err(failure.to_error());
            }
            inner.failures.invalidate(&id);
        }

        if self.is_in_flight(id) {
            metrics::COALESCED_REQUESTS.inc();
            return Ok(QueryStatus::Building);
        }

        match inner.store.locate(key).await {
            Ok(Some(path)) => {
                debug!(key = %key, "artifact found on disk");
                inner.successes.insert(key, path);
                return Ok(QueryStatus::Ready(key));
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "artifact lookup failed, rebuilding"),
        }

        // Another request may have claimed the id since the check above.
        let Some(guard) = InFlightGuard::acquire(&self.inner, id) else {
            metrics::COALESCED_REQUESTS.inc();
            return Ok(QueryStatus::Building);
        };
        self.spawn_build(guard, key);
        Ok(QueryStatus::Enqueued)
    }

    /// Whether a build for `id` is currently running.
    pub fn is_in_flight(&self, id: EntityId) -> bool {
        self.inner
            .in_flight
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&id)
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.inner.store
    }

    fn spawn_build(&self, guard: InFlightGuard, key: ArtifactKey) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            // Released last, after the outcome is cached.
            let _guard = guard;
            let id = key.id;
            let options = BuildOptions {
                normalize: true,
                combine: true,
                rewind: key.rewind,
            };
            let sink: Arc<dyn ArtifactSink> = Arc::new(inner.store.clone());

            metrics::BUILDS_STARTED.inc();
            let timer = metrics::BUILD_DURATION.start_timer();
            let outcome =
                tokio::time::timeout(inner.build_timeout, inner.pipeline.build(id, options, sink))
                    .await;
            timer.observe_duration();

            match outcome {
                Ok(Ok(report)) if report.written.contains(&key) => {
                    info!(
                        key = %key,
                        matched = report.matched,
                        failed = report.failed.len(),
                        "build finished"
                    );
                    inner.successes.insert(key, inner.store.path_for(key));
                    metrics::BUILDS_SUCCEEDED.inc();
                }
                Ok(Ok(_)) => {
                    warn!(id = %id, "build produced no artifact");
                    inner.record_failure(id, format!("relation {id} has no sub-areas"), true);
                    metrics::record_build_failure("client");
                }
                Ok(Err(e)) => {
                    error!(id = %id, error = %e, "build failed");
                    let client = e.is_client();
                    inner.record_failure(id, e.to_string(), client);
                    metrics::record_build_failure(if client { "client" } else { "transient" });
                }
                Err(_) => {
                    let secs = inner.build_timeout.as_secs();
                    error!(id = %id, timeout_secs = secs, "build timed out");
                    inner.record_failure(id, format!("build timed out after {secs}s"), false);
                    metrics::record_build_failure("timeout");
                }
            }
        });
    }
}

/// Holds the in-flight marker of one entity; dropping it clears the marker.
struct InFlightGuard {
    inner: Arc<Inner>,
    id: EntityId,
}

impl InFlightGuard {
    fn acquire(inner: &Arc<Inner>, id: EntityId) -> Option<Self> {
        let inserted = inner
            .in_flight
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id);
        if !inserted {
            return None;
        }
        metrics::BUILDS_IN_FLIGHT.inc();
        Some(Self {
            inner: Arc::clone(inner),
            id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.id);
        metrics::BUILDS_IN_FLIGHT.dec();
    }
}
