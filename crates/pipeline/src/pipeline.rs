//! Parent fetch, bounded fan-out over sub-areas, and aggregation.
//!
//! One build runs three task groups joined by two bounded channels:
//!
//! ```text
//! pushers (one per sub-area) --ids--> workers (fixed pool) --artifacts--> reporter
//! ```
//!
//! Each stage finishes only after its upstream has closed its channel and
//! the stage has drained it, so no result is lost and no task outlives the
//! build. Dropping the build future aborts every task it spawned.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use subarea_core::config::PipelineConfig;
use subarea_core::{
    ArtifactKey, BuildOptions, EntityId, Feature, FeatureCollection, SUBAREA_ROLE,
    TAG_WHITELIST, normalize_tags, rewind_feature_collection,
};
use subarea_osm::{Converter, EntitySource};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{PipelineError, Result};
use crate::sink::ArtifactSink;

/// Exterior ring orientation applied when a build asks for rewinding.
const REWIND_OUTER_CLOCKWISE: bool = false;

/// A sub-area that could not be turned into an artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubAreaFailure {
    pub id: EntityId,
    pub error: String,
}

/// Outcome of one successful build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildReport {
    pub parent: EntityId,
    /// Number of members carrying the sub-area role.
    pub matched: usize,
    /// Artifacts delivered to the sink.
    pub written: Vec<ArtifactKey>,
    pub failed: Vec<SubAreaFailure>,
}

impl BuildReport {
    fn new(parent: EntityId, matched: usize) -> Self {
        Self {
            parent,
            matched,
            written: Vec::new(),
            failed: Vec::new(),
        }
    }
}

enum Produced {
    /// Kept as a value for merging into the combined artifact.
    Collection(FeatureCollection),
    /// Encoded by the worker, ready for the sink.
    Encoded(Bytes),
}

struct Artifact {
    /// Position of the member in the parent, for stable combined output.
    index: usize,
    id: EntityId,
    outcome: Result<Produced>,
}

/// Builds sub-area artifacts from a remote dataset.
#[derive(Clone)]
pub struct Pipeline {
    source: Arc<dyn EntitySource>,
    converter: Arc<dyn Converter>,
    workers: usize,
    channel_capacity: usize,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn EntitySource>,
        converter: Arc<dyn Converter>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            source,
            converter,
            workers: config.workers.max(1),
            channel_capacity: config.channel_capacity.max(1),
        }
    }

    /// Build the artifacts of `parent` and deliver them to `sink`.
    ///
    /// Failing to fetch the parent fails the build. A sub-area that cannot be
    /// fetched, converted or rewound is recorded in the report and skipped.
    /// A parent without sub-areas succeeds with nothing written.
    #[instrument(skip(self, sink), fields(parent = %parent))]
    pub async fn build(
        &self,
        parent: EntityId,
        options: BuildOptions,
        sink: Arc<dyn ArtifactSink>,
    ) -> Result<BuildReport> {
        let started = Instant::now();
        info!("fetching sub-areas");

        let relation = self.source.fetch_relation(parent).await?;
        let members: Vec<EntityId> = relation
            .members_with_role(SUBAREA_ROLE)
            .map(|m| EntityId::new(m.reference))
            .collect();
        debug!(total = relation.members.len(), matched = members.len(), "members fetched");

        if members.is_empty() {
            warn!("no sub-areas matched");
            return Ok(BuildReport::new(parent, 0));
        }

        let (id_tx, id_rx) = mpsc::channel::<(usize, EntityId)>(self.channel_capacity);
        let (result_tx, result_rx) = mpsc::channel::<Artifact>(self.channel_capacity);

        let mut reporter = JoinSet::new();
        reporter.spawn(report(
            parent,
            members.len(),
            options,
            Arc::clone(&sink),
            result_rx,
        ));

        let id_rx = Arc::new(Mutex::new(id_rx));
        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            workers.spawn(work(
                Arc::clone(&self.source),
                Arc::clone(&self.converter),
                options,
                Arc::clone(&id_rx),
                result_tx.clone(),
            ));
        }
        drop(result_tx);

        let mut pushers = JoinSet::new();
        for (index, id) in members.iter().copied().enumerate() {
            let tx = id_tx.clone();
            pushers.spawn(async move {
                // Waits while the channel is full; fails only if every worker is gone.
                if tx.send((index, id)).await.is_ok() {
                    debug!(id = %id, "sub-area enqueued");
                }
            });
        }
        drop(id_tx);

        join_all(&mut pushers, "pusher").await;
        join_all(&mut workers, "worker").await;

        let report = match reporter.join_next().await {
            Some(Ok(result)) => result?,
            Some(Err(e)) => return Err(PipelineError::Task(e.to_string())),
            None => return Err(PipelineError::Task("reporter missing".to_string())),
        };

        info!(
            matched = report.matched,
            written = report.written.len(),
            failed = report.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sub-areas handled"
        );
        Ok(report)
    }
}

async fn join_all(set: &mut JoinSet<()>, stage: &'static str) {
    while let Some(result) = set.join_next().await {
        if let Err(e) = result {
            error!(stage, error = %e, "pipeline task failed");
        }
    }
}

async fn work(
    source: Arc<dyn EntitySource>,
    converter: Arc<dyn Converter>,
    options: BuildOptions,
    ids: Arc<Mutex<mpsc::Receiver<(usize, EntityId)>>>,
    results: mpsc::Sender<Artifact>,
) {
    loop {
        let next = ids.lock().await.recv().await;
        let Some((index, id)) = next else { break };

        let outcome = handle_member(source.as_ref(), converter.as_ref(), options, id).await;
        debug!(id = %id, ok = outcome.is_ok(), "sub-area handled");

        if results.send(Artifact { index, id, outcome }).await.is_err() {
            break;
        }
    }
}

async fn handle_member(
    source: &dyn EntitySource,
    converter: &dyn Converter,
    options: BuildOptions,
    id: EntityId,
) -> Result<Produced> {
    let mut full = source.fetch_relation_full(id).await?;
    full.map_relation_tags(|tags| normalize_tags(tags, TAG_WHITELIST, options.normalize));

    let mut fc = converter.convert(&full)?;
    fc.retain_id(&id.feature_id());

    if options.rewind {
        rewind_feature_collection(&mut fc, REWIND_OUTER_CLOCKWISE)?;
    }

    if options.combine {
        return Ok(Produced::Collection(fc));
    }
    Ok(Produced::Encoded(Bytes::from(serde_json::to_vec(&fc)?)))
}

async fn report(
    parent: EntityId,
    matched: usize,
    options: BuildOptions,
    sink: Arc<dyn ArtifactSink>,
    mut results: mpsc::Receiver<Artifact>,
) -> Result<BuildReport> {
    let mut report = BuildReport::new(parent, matched);
    let mut parts: Vec<(usize, Vec<Feature>)> = Vec::new();

    while let Some(artifact) = results.recv().await {
        let id = artifact.id;
        match artifact.outcome {
            Ok(Produced::Collection(fc)) => parts.push((artifact.index, fc.features)),
            Ok(Produced::Encoded(data)) => {
                let key = options.key(id);
                match sink.put(key, data).await {
                    Ok(()) => {
                        info!(key = %key, "artifact written");
                        report.written.push(key);
                    }
                    Err(e) => {
                        error!(id = %id, error = %e, "failed to write artifact");
                        report.failed.push(SubAreaFailure {
                            id,
                            error: e.to_string(),
                        });
                    }
                }
            }
            Err(e) => {
                warn!(id = %id, error = %e, "sub-area skipped");
                report.failed.push(SubAreaFailure {
                    id,
                    error: e.to_string(),
                });
            }
        }
    }

    if options.combine {
        parts.sort_by_key(|(index, _)| *index);
        let combined = FeatureCollection::new(parts.into_iter().flat_map(|(_, f)| f).collect());
        if combined.is_empty() {
            warn!("combined artifact has no features");
        }

        let key = options.key(parent);
        sink.put(key, Bytes::from(serde_json::to_vec(&combined)?))
            .await?;
        info!(key = %key, features = combined.len(), "artifact written");
        report.written.push(key);
    }

    Ok(report)
}
