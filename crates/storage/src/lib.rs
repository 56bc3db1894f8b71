//! File stores for snapshot generation.
//!
//! Both the artifact cache and the per-run workspace are flat trees of files
//! addressed by relative paths. This crate provides the [`StorageBackend`]
//! abstraction over such a tree, a local filesystem implementation and (with
//! the `mock` feature) an in-memory one for tests.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::FileInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
