//! Dependency-aware cache of rendered pages.
//!
//! Each cached page is stored as two files in a [`StorageBackend`]: the body,
//! and a JSON [`CacheRecord`] naming the entity the page represents, the
//! entities it read while rendering, and their permalinks at that moment.
//! Both are keyed by the BLAKE3 hash of the page URL.
//!
//! The cache is not the source of truth. Validity is always decided against
//! a [`ContentGraph`], and deleting the cache only costs a slower next run.
//!
//! [`StorageBackend`]: freeze_storage::StorageBackend

pub mod error;
mod graph;
mod record;
mod store;

pub use crate::graph::{ContentGraph, Entity, EntityId, MemoryGraph};
pub use crate::record::{CacheRecord, MAX_DEPENDENCIES};
pub use crate::store::{Cache, CacheStats};
