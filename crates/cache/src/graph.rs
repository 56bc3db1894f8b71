//! The content model the cache validates against.
//!
//! The cache never decides on its own whether content changed; it asks a
//! [`ContentGraph`] for the global epoch and for the current state of each
//! entity a cached page depended on.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use time::OffsetDateTime;

/// Identifier of a content entity (a post, page or similar).
pub type EntityId = u64;

/// Current state of one content entity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub published: bool,
    #[serde(with = "time::serde::timestamp")]
    pub modified: OffsetDateTime,
    pub permalink: String,
}

/// Read access to the content model.
pub trait ContentGraph: Send + Sync {
    /// Time of the last mutation of any entity. Records older than this are
    /// never trusted.
    fn epoch(&self) -> OffsetDateTime;

    /// Current state of an entity, or `None` when it no longer exists.
    fn entity(&self, id: EntityId) -> Option<Entity>;
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(with = "time::serde::timestamp", default = "unix_epoch")]
    epoch: OffsetDateTime,
    #[serde(default)]
    entities: Vec<Entity>,
}

fn unix_epoch() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH
}

/// An in-memory content graph.
///
/// Used by tests, and by the CLI with a JSON snapshot exported from the
/// content system:
///
/// ```json
/// { "epoch": 1700000000, "entities": [
///     { "id": 7, "published": true, "modified": 1699990000, "permalink": "https://example.com/hello/" }
/// ] }
/// ```
#[derive(Debug)]
pub struct MemoryGraph {
    epoch: RwLock<OffsetDateTime>,
    entities: RwLock<HashMap<EntityId, Entity>>,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self { epoch: RwLock::new(OffsetDateTime::UNIX_EPOCH), entities: RwLock::new(HashMap::new()) }
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(data: &[u8], origin: &Path) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_slice(data).or_raise(|| ErrorKind::Graph(origin.to_path_buf()))?;
        let graph = Self::new();
        graph.set_epoch(snapshot.epoch);
        for entity in snapshot.entities {
            graph.insert(entity);
        }
        Ok(graph)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).or_raise(|| ErrorKind::Graph(path.to_path_buf()))?;
        Self::from_json(&data, path)
    }

    pub fn set_epoch(&self, at: OffsetDateTime) {
        if let Ok(mut epoch) = self.epoch.write() {
            *epoch = at;
        }
    }

    /// Insert or replace an entity. The epoch is left alone so callers can
    /// model untracked and tracked changes separately.
    pub fn insert(&self, entity: Entity) {
        if let Ok(mut entities) = self.entities.write() {
            entities.insert(entity.id, entity);
        }
    }

    pub fn remove(&self, id: EntityId) -> Option<Entity> {
        self.entities.write().ok()?.remove(&id)
    }

    /// Apply `change` to an existing entity; returns `false` if it is unknown.
    pub fn update(&self, id: EntityId, change: impl FnOnce(&mut Entity)) -> bool {
        let Ok(mut entities) = self.entities.write() else {
            return false;
        };
        match entities.get_mut(&id) {
            Some(entity) => {
                change(entity);
                true
            },
            None => false,
        }
    }
}

impl ContentGraph for MemoryGraph {
    fn epoch(&self) -> OffsetDateTime {
        self.epoch.read().map(|e| *e).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    fn entity(&self, id: EntityId) -> Option<Entity> {
        self.entities.read().ok()?.get(&id).cloned()
    }
}
