//! The run-private directory the snapshot is assembled in.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use freeze_storage::StorageBackend;
use freeze_storage::backend::LocalBackend;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

/// A freshly created workspace, removed again when dropped.
#[derive(Debug)]
pub struct Workspace {
    backend: LocalBackend,
}

impl Workspace {
    /// Create an empty workspace at `root`, deleting whatever was there.
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_absolute() || root.parent().is_none() {
            exn::bail!(ErrorKind::Workspace(root));
        }
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => tracing::debug!(path = %root.display(), "Removed leftover workspace"),
            Err(e) if e.kind() == IoErrorKind::NotFound => {},
            Err(e) => return Err(e).or_raise(|| ErrorKind::Workspace(root.clone())),
        }
        let backend = LocalBackend::new("workspace", &root).or_raise(|| ErrorKind::Workspace(root.clone()))?;
        Ok(Self { backend })
    }

    pub fn path(&self) -> &Path {
        self.backend.root()
    }

    /// Write an artifact at a workspace-relative path. Paths that would
    /// leave the workspace are rejected.
    pub async fn write(&self, relative: &str, bytes: &[u8]) -> Result<()> {
        self.backend
            .write(Path::new(relative), bytes)
            .await
            .or_raise(|| ErrorKind::Workspace(self.path().join(relative)))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(self.path()) {
            Ok(()) => tracing::debug!(path = %self.path().display(), "Workspace removed"),
            Err(e) if e.kind() == IoErrorKind::NotFound => {},
            Err(e) => tracing::error!(path = %self.path().display(), error = %e, "Could not remove workspace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_replaces_leftovers_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("workspace");
        std::fs::create_dir_all(root.join("stale")).unwrap();
        std::fs::write(root.join("stale/index.html"), "old").unwrap();

        let workspace = Workspace::create(&root).await.unwrap();
        assert!(!root.join("stale").exists());
        workspace.write("blog/index.html", b"post").await.unwrap();
        assert_eq!(std::fs::read(root.join("blog/index.html")).unwrap(), b"post");

        drop(workspace);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::create(tmp.path().join("ws")).await.unwrap();
        let err = workspace.write("../outside.html", b"x").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Workspace(_)));
        assert!(!tmp.path().join("outside.html").exists());
    }

    #[tokio::test]
    async fn test_refuses_filesystem_root() {
        let err = Workspace::create("/").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Workspace(_)));
    }
}
