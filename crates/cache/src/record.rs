use crate::graph::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Upper bound on the dependencies kept per record.
pub const MAX_DEPENDENCIES: usize = 100;

/// Metadata stored next to each cached page body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub url: String,
    pub post_id: Option<EntityId>,
    #[serde(default)]
    pub dependent_posts: Vec<EntityId>,
    /// Permalink of each dependency at write time.
    #[serde(default)]
    pub dependent_posts_urls: BTreeMap<EntityId, String>,
    /// Write time as fractional unix seconds.
    pub timestamp: f64,
}

impl CacheRecord {
    pub fn written_at(&self) -> OffsetDateTime {
        let nanos = (self.timestamp * 1e9) as i128;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    pub(crate) fn timestamp_of(at: OffsetDateTime) -> f64 {
        at.unix_timestamp_nanos() as f64 / 1e9
    }

    /// Whether `id` is the page's own entity or one it depended on.
    pub fn involves(&self, id: EntityId) -> bool {
        self.post_id == Some(id) || self.dependent_posts.contains(&id)
    }
}
