use crate::error::{ErrorKind, Result};
use crate::{Outcome, Sink, tree};
use async_trait::async_trait;
use exn::ResultExt;
use freeze_config::{DirectorySettings, SinkKind};
use std::fs;
use std::path::Path;
use tracing::instrument;

/// Replaces the contents of a local directory with the workspace.
#[derive(Debug)]
pub struct DirectorySink {
    settings: DirectorySettings,
}

impl DirectorySink {
    pub fn new(settings: DirectorySettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Sink for DirectorySink {
    fn kind(&self) -> SinkKind {
        SinkKind::Directory
    }

    #[instrument(skip(self), fields(path = %self.settings.path.display()))]
    async fn publish(&self, workspace: &Path) -> Result<Outcome> {
        let (source, destination) = (workspace.to_path_buf(), self.settings.path.clone());
        let report = tokio::task::spawn_blocking(move || -> std::io::Result<tree::CopyReport> {
            fs::create_dir_all(&destination)?;
            let removed = tree::wipe_contents(&destination, &[])?;
            tracing::debug!(removed, "Cleared previous output");
            let report = tree::copy_tree(&source, &destination);
            tree::prune_empty_dirs(&destination);
            Ok(report)
        })
        .await
        .or_raise(|| ErrorKind::Task)?
        .or_raise(|| ErrorKind::Filesystem(self.settings.path.clone()))?;
        if report.failed > 0 {
            tracing::warn!(copied = report.copied, failed = report.failed, "Some files were not copied");
        }
        Ok(Outcome::Copied { files: report.copied, failed: report.failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, data: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[tokio::test]
    async fn test_replaces_previous_output() {
        let workspace = TempDir::new().unwrap();
        write(workspace.path(), "index.html", "new home");
        write(workspace.path(), "blog/post/index.html", "post");
        write(workspace.path(), "blog/debug.log", "noise");

        let out = TempDir::new().unwrap();
        write(out.path(), "index.html", "old home");
        write(out.path(), "removed/index.html", "gone");

        let sink = DirectorySink::new(DirectorySettings { path: out.path().to_path_buf() });
        let outcome = sink.publish(workspace.path()).await.unwrap();

        assert_eq!(outcome, Outcome::Copied { files: 2, failed: 0 });
        assert_eq!(fs::read_to_string(out.path().join("index.html")).unwrap(), "new home");
        assert!(!out.path().join("removed").exists());
        assert_eq!(
            tree::relative_files(out.path()).unwrap(),
            vec![PathBuf::from("blog/post/index.html"), PathBuf::from("index.html")]
        );
        // The workspace is left as it was.
        assert!(workspace.path().join("blog/debug.log").exists());
    }

    #[tokio::test]
    async fn test_creates_missing_destination() {
        let workspace = TempDir::new().unwrap();
        write(workspace.path(), "index.html", "home");
        let out = TempDir::new().unwrap();
        let target = out.path().join("public/site");

        let sink = DirectorySink::new(DirectorySettings { path: target.clone() });
        assert_eq!(sink.publish(workspace.path()).await.unwrap(), Outcome::Copied { files: 1, failed: 0 });
        assert!(target.join("index.html").is_file());
    }
}
