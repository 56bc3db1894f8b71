//! In-memory storage backend for testing.

use super::FileInfoStream;
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::sync::RwLock;

/// In-memory storage backend for testing.
///
/// Files are kept in an ordered map behind a [`RwLock`] so listings are
/// deterministic.
///
/// # Examples
///
/// ```
/// use freeze_storage::backend::{MemoryBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MemoryBackend::with_files([("index.html", b"<html></html>")]);
/// assert!(backend.exists(Path::new("index.html")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MemoryBackend {
    name: String,
    storage: RwLock<BTreeMap<PathBuf, (UtcDateTime, Vec<u8>)>>,
}

impl MemoryBackend {
    /// Create a backend pre-populated with files.
    ///
    /// Panics if any path fails validation: a broken fixture should fail the
    /// test that uses it.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let now = UtcDateTime::now();
        let mut map = BTreeMap::new();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MemoryBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "memory".to_string(),
            storage: RwLock::new(map),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
impl Default for MemoryBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        Box::pin(stream! {
            // Snapshot under the read lock; never hold it across a yield.
            let entries: Vec<FileInfo> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| validated_prefix.as_ref().is_none_or(|pfx| path.starts_with(pfx)))
                    .map(|(path, (inserted, data))| FileInfo::new(path.clone(), data.len() as u64, *inserted))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        match guard.get(&path) {
            Some((_, data)) => Ok(data.clone()),
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.storage.write().await.insert(path, (UtcDateTime::now(), data.to_vec()));
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        match self.storage.write().await.remove(&path) {
            Some(_) => Ok(()),
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        match guard.get(&path) {
            Some((inserted, data)) => Ok(FileInfo::new(path.clone(), data.len() as u64, *inserted)),
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_delete() {
        let backend = MemoryBackend::default();
        backend.write(Path::new("k.json"), b"{}").await.unwrap();
        assert_eq!(backend.read(Path::new("k.json")).await.unwrap(), b"{}");
        backend.delete(Path::new("k.json")).await.unwrap();
        let err = backend.read(Path::new("k.json")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_prefixed() {
        let backend = MemoryBackend::with_files([
            ("b/two.html", Vec::from(*b"2")),
            ("a/one.html", Vec::from(*b"1")),
            ("b/three.html", Vec::from(*b"3")),
        ]);
        let all: Vec<_> = backend.list(None).await.unwrap().into_iter().map(|f| f.path).collect();
        assert_eq!(all, vec![
            PathBuf::from("a/one.html"),
            PathBuf::from("b/three.html"),
            PathBuf::from("b/two.html")
        ]);
        assert_eq!(backend.list(Some(Path::new("b"))).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let backend = MemoryBackend::with_files([("a", Vec::from(*b"1")), ("b", Vec::from(*b"2"))]);
        assert_eq!(backend.clear().await.unwrap(), 2);
        assert!(backend.list(None).await.unwrap().is_empty());
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MemoryBackend::with_files([("../escape", Vec::from(*b"bad"))]);
    }
}
