//! The page cache.

use crate::error::{ErrorKind, Result};
use crate::graph::{ContentGraph, EntityId};
use crate::record::{CacheRecord, MAX_DEPENDENCIES};
use exn::ResultExt;
use freeze_storage::{BackendHandle, StorageBackend};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tracing::instrument;

const RECORD_EXT: &str = "json";
const BODY_EXT: &str = "body";

/// Totals reported by [`Cache::stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached pages.
    pub count: u64,
    /// Bytes used by records and bodies together.
    pub total_bytes: u64,
}

/// Rendered pages keyed by URL, each with a record of the content it was
/// rendered from.
///
/// A cached page is only trusted while nothing it was rendered from has
/// changed: see [`is_valid`](Self::is_valid). Dependencies are reported with
/// [`add_dependency`](Self::add_dependency) while a page is being rendered
/// and attached to it by the next [`put`](Self::put).
pub struct Cache {
    backend: BackendHandle,
    graph: Arc<dyn ContentGraph>,
    pending: Mutex<Vec<EntityId>>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("backend", &self.backend.name()).finish_non_exhaustive()
    }
}

impl Cache {
    pub fn new(backend: BackendHandle, graph: Arc<dyn ContentGraph>) -> Self {
        Self { backend, graph, pending: Mutex::new(Vec::new()) }
    }

    fn key(url: &str) -> String {
        blake3::hash(url.as_bytes()).to_hex().to_string()
    }

    fn record_path(url: &str) -> PathBuf {
        PathBuf::from(format!("{}.{RECORD_EXT}", Self::key(url)))
    }

    fn body_path(url: &str) -> PathBuf {
        PathBuf::from(format!("{}.{BODY_EXT}", Self::key(url)))
    }

    /// Read the metadata record for `url`. Unreadable records are logged and
    /// treated as absent.
    pub async fn record(&self, url: &str) -> Result<Option<CacheRecord>> {
        let path = Self::record_path(url);
        if !self.backend.exists(&path).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(None);
        }
        let data = self.backend.read(&path).await.or_raise(|| ErrorKind::Storage)?;
        Ok(Self::decode(&data, &path))
    }

    fn decode(data: &[u8], path: &Path) -> Option<CacheRecord> {
        match serde_json::from_slice(data) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable cache record");
                None
            },
        }
    }

    /// Whether the cached page for `url` may be served as it is.
    ///
    /// `primary` is the entity the page represents; when `None`, the one
    /// stored in the record is checked instead.
    #[instrument(level = "debug", skip(self))]
    pub async fn is_valid(&self, url: &str, primary: Option<EntityId>) -> Result<bool> {
        let Some(record) = self.record(url).await? else {
            return Ok(false);
        };
        if !self.backend.exists(&Self::body_path(url)).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(false);
        }
        let written = record.written_at();
        if written < self.graph.epoch() {
            tracing::debug!("Record predates the content epoch");
            return Ok(false);
        }
        if let Some(id) = primary.or(record.post_id) {
            match self.graph.entity(id) {
                Some(entity) if entity.modified <= written => {},
                _ => {
                    tracing::debug!(entity = id, "Primary entity changed or vanished");
                    return Ok(false);
                },
            }
        }
        for id in &record.dependent_posts {
            let Some(entity) = self.graph.entity(*id) else {
                tracing::debug!(entity = id, "Dependency vanished");
                return Ok(false);
            };
            if !entity.published || entity.modified > written {
                tracing::debug!(entity = id, "Dependency unpublished or modified");
                return Ok(false);
            }
            if record.dependent_posts_urls.get(id) != Some(&entity.permalink) {
                tracing::debug!(entity = id, permalink = %entity.permalink, "Dependency permalink changed");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The cached body for `url`, if any. Validity is not checked.
    pub async fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let path = Self::body_path(url);
        if !self.backend.exists(&path).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(None);
        }
        Ok(Some(self.backend.read(&path).await.or_raise(|| ErrorKind::Storage)?))
    }

    /// Record that the page currently being rendered read entity `id`.
    pub fn add_dependency(&self, id: EntityId) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(id);
        }
    }

    fn take_dependencies(&self) -> Vec<EntityId> {
        let mut pending = self.pending.lock().map(|mut p| std::mem::take(&mut *p)).unwrap_or_default();
        let mut seen = std::collections::HashSet::new();
        pending.retain(|id| seen.insert(*id));
        pending.truncate(MAX_DEPENDENCIES);
        pending
    }

    /// Store `body` for `url` together with the dependencies accumulated
    /// since the previous `put`, then reset the accumulator.
    #[instrument(level = "debug", skip(self, body), fields(len = body.len()))]
    pub async fn put(&self, url: &str, body: &[u8], primary: Option<EntityId>) -> Result<()> {
        let dependencies = self.take_dependencies();
        let dependent_posts_urls = dependencies
            .iter()
            .filter_map(|id| self.graph.entity(*id).map(|entity| (*id, entity.permalink)))
            .collect();
        let record = CacheRecord {
            url: url.to_string(),
            post_id: primary,
            dependent_posts: dependencies,
            dependent_posts_urls,
            timestamp: CacheRecord::timestamp_of(OffsetDateTime::now_utc()),
        };
        let record_path = Self::record_path(url);
        let encoded = serde_json::to_vec(&record).or_raise(|| ErrorKind::InvalidRecord(record_path.clone()))?;
        self.backend.write(&Self::body_path(url), body).await.or_raise(|| ErrorKind::Storage)?;
        self.backend.write(&record_path, &encoded).await.or_raise(|| ErrorKind::Storage)?;
        Ok(())
    }

    /// Delete every cached page, returning how many were removed.
    #[instrument(level = "info", skip(self))]
    pub async fn clear_all(&self) -> Result<u64> {
        let records = self.count_records().await?;
        self.backend.clear().await.or_raise(|| ErrorKind::Storage)?;
        Ok(records)
    }

    /// Delete every cached page that represents or depended on `id`.
    #[instrument(level = "info", skip(self))]
    pub async fn clear_by_entity(&self, id: EntityId) -> Result<u64> {
        let mut removed = 0;
        for file in self.backend.list(None).await.or_raise(|| ErrorKind::Storage)? {
            if !is_record(&file.path) {
                continue;
            }
            let data = self.backend.read(&file.path).await.or_raise(|| ErrorKind::Storage)?;
            let Some(record) = Self::decode(&data, &file.path) else {
                continue;
            };
            if record.involves(id) {
                let body = file.path.with_extension(BODY_EXT);
                if self.backend.exists(&body).await.or_raise(|| ErrorKind::Storage)? {
                    self.backend.delete(&body).await.or_raise(|| ErrorKind::Storage)?;
                }
                self.backend.delete(&file.path).await.or_raise(|| ErrorKind::Storage)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let files = self.backend.list(None).await.or_raise(|| ErrorKind::Storage)?;
        Ok(CacheStats {
            count: files.iter().filter(|f| is_record(&f.path)).count() as u64,
            total_bytes: files.iter().map(|f| f.size).sum(),
        })
    }

    async fn count_records(&self) -> Result<u64> {
        Ok(self.stats().await?.count)
    }
}

fn is_record(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == RECORD_EXT)
}
