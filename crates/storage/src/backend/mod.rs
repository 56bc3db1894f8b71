//! Storage backend trait and implementations.

mod local;
#[cfg(feature = "mock")]
mod memory;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::memory::MemoryBackend;
use crate::error::Result;
use crate::models::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Unified interface over a tree of files addressed by relative paths.
///
/// All paths are relative to the store root and are validated with
/// [`validate_path`](crate::validate_path) by every implementation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use freeze_storage::{backend::StorageBackend, error::Result};
///
/// async fn cached_size(store: &dyn StorageBackend, key: &str) -> Result<u64> {
///     let path = Path::new(key);
///     if store.exists(path).await? {
///         Ok(store.stat(path).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the backend, used for logging only.
    fn name(&self) -> &str;

    /// List all files matching an optional prefix.
    ///
    /// Default implementation collects [`list_stream()`](Self::list_stream).
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream file metadata matching an optional prefix.
    ///
    /// Prefix matching is component-based: `assets` matches
    /// `assets/site.css` but not `assets-old/site.css`.
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents, creating parent directories as needed and
    /// overwriting any existing file.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Get file metadata without reading contents.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;

    /// Delete every file in the store, returning how many were removed.
    async fn clear(&self) -> Result<u64> {
        let files = self.list(None).await?;
        let mut removed = 0;
        for file in files {
            self.delete(&file.path).await?;
            removed += 1;
        }
        Ok(removed)
    }
}
