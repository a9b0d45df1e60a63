//! In-memory [`EntitySource`] with canned relations and injectable failures.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use subarea_core::{EntityId, SUBAREA_ROLE, Tags};

use crate::client::EntitySource;
use crate::error::RemoteError;
use crate::model::{ElementType, FullRelation, Member, Node, Relation, Way};

#[derive(Default)]
pub struct MemorySource {
    relations: RwLock<HashMap<i64, Relation>>,
    full: RwLock<HashMap<i64, FullRelation>>,
    failures: RwLock<HashMap<i64, u16>>,
    delay: Option<Duration>,
    relation_fetches: AtomicUsize,
    full_fetches: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch, to keep builds observable while they run.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Register a parent relation with `subareas` as `subarea` members and
    /// `others` as members with other roles.
    pub fn insert_parent(&self, id: i64, subareas: &[i64], others: &[(ElementType, i64, &str)]) {
        let members = subareas
            .iter()
            .map(|r| (ElementType::Relation, *r, SUBAREA_ROLE))
            .chain(others.iter().copied())
            .map(|(kind, reference, role)| Member {
                kind,
                reference,
                role: role.to_string(),
            })
            .collect();
        self.insert_relation(Relation {
            id,
            members,
            tags: Tags::new(),
        });
    }

    pub fn insert_relation(&self, relation: Relation) {
        write(&self.relations).insert(relation.id, relation);
    }

    pub fn insert_full(&self, full: FullRelation) {
        write(&self.full).insert(full.relation.id, full);
    }

    /// Register `id` as a unit square boundary offset by `id` degrees of longitude.
    pub fn insert_square(&self, id: i64, tags: &[(&str, &str)]) {
        self.insert_full(square_relation(id, tags));
    }

    /// Make every fetch of `id` fail as the API would with `status`.
    pub fn fail(&self, id: i64, status: u16) {
        write(&self.failures).insert(id, status);
    }

    pub fn clear_failure(&self, id: i64) {
        write(&self.failures).remove(&id);
    }

    pub fn relation_fetches(&self) -> usize {
        self.relation_fetches.load(Ordering::SeqCst)
    }

    pub fn full_fetches(&self) -> usize {
        self.full_fetches.load(Ordering::SeqCst)
    }

    async fn prepare(&self, id: EntityId) -> Result<(), RemoteError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let status = read(&self.failures).get(&id.get()).copied();
        match status {
            None => Ok(()),
            Some(404) => Err(RemoteError::NotFound(id)),
            Some(403) => Err(RemoteError::Forbidden(id)),
            Some(410) => Err(RemoteError::Gone(id)),
            Some(status) => Err(RemoteError::Status { id, status }),
        }
    }
}

#[async_trait]
impl EntitySource for MemorySource {
    async fn fetch_relation(&self, id: EntityId) -> Result<Relation, RemoteError> {
        self.relation_fetches.fetch_add(1, Ordering::SeqCst);
        self.prepare(id).await?;
        read(&self.relations)
            .get(&id.get())
            .cloned()
            .ok_or(RemoteError::NotFound(id))
    }

    async fn fetch_relation_full(&self, id: EntityId) -> Result<FullRelation, RemoteError> {
        self.full_fetches.fetch_add(1, Ordering::SeqCst);
        self.prepare(id).await?;
        read(&self.full)
            .get(&id.get())
            .cloned()
            .ok_or(RemoteError::NotFound(id))
    }
}

// A poisoned lock only means another test thread panicked; the map is still usable.
fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// A boundary relation whose single outer way is a clockwise unit square at
/// longitude `id`.
pub fn square_relation(id: i64, tags: &[(&str, &str)]) -> FullRelation {
    let x = id as f64;
    let base = id * 10;
    let nodes: HashMap<i64, Node> = [(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)]
        .into_iter()
        .enumerate()
        .map(|(i, (dx, lat))| {
            let node = Node {
                id: base + i as i64,
                lat,
                lon: x + dx,
                tags: Tags::new(),
            };
            (node.id, node)
        })
        .collect();
    let way = Way {
        id,
        nodes: vec![base, base + 1, base + 2, base + 3, base],
        tags: Tags::new(),
    };

    FullRelation {
        relation: Relation {
            id,
            members: vec![Member {
                kind: ElementType::Way,
                reference: way.id,
                role: "outer".to_string(),
            }],
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        },
        nodes,
        ways: HashMap::from([(way.id, way)]),
        relations: HashMap::new(),
    }
}
