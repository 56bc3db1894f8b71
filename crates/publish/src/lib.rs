//! Publish destinations for a finished snapshot workspace.
//!
//! Each destination implements [`Sink`]. A sink receives the workspace
//! directory read-only and reports an [`Outcome`]; failures are returned as
//! errors and never touch the other sinks. [`sinks`] builds the enabled
//! sinks from settings in their fixed invocation order.

mod archive;
mod directory;
pub mod error;
mod git;
mod github;
pub mod tree;

pub use crate::archive::{ArchiveSink, archive_name};
pub use crate::directory::DirectorySink;
pub use crate::git::{ALLOWED_GIT_PATHS, GitExecutable, GitSink, redact};
pub use crate::github::{GitHubSink, batches};
use crate::error::Result;
use async_trait::async_trait;
use freeze_config::{CredentialStore, GITHUB_TOKEN, SinkKind, SinkSettings};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;
use time::macros::format_description;

/// A publish destination.
#[async_trait]
pub trait Sink: Send + Sync + fmt::Debug {
    fn kind(&self) -> SinkKind;

    /// Publish the contents of `workspace`. The workspace is never modified.
    async fn publish(&self, workspace: &Path) -> Result<Outcome>;
}

/// What a sink did with the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Copied { files: usize, failed: usize },
    Committed { branch: String, files: usize, pushed: bool },
    /// The branch already matched the workspace.
    NothingToCommit,
    Uploaded { files: usize, batches: usize },
    Archived { path: PathBuf, files: usize },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Copied { files, failed: 0 } => write!(f, "copied {files} files"),
            Outcome::Copied { files, failed } => write!(f, "copied {files} files ({failed} failed)"),
            Outcome::Committed { branch, files, pushed: true } => {
                write!(f, "committed {files} files to {branch} and pushed")
            },
            Outcome::Committed { branch, files, pushed: false } => write!(f, "committed {files} files to {branch}"),
            Outcome::NothingToCommit => f.write_str("nothing to commit"),
            Outcome::Uploaded { files, batches } => write!(f, "uploaded {files} files in {batches} commits"),
            Outcome::Archived { path, files } => write!(f, "archived {files} files to {}", path.display()),
        }
    }
}

/// Commit message used when none is configured.
pub(crate) fn default_message() -> String {
    let now = OffsetDateTime::now_utc();
    let stamp = now
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC"))
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    format!("Static snapshot {stamp}")
}

/// Build every enabled sink in invocation order.
///
/// `timeout` bounds each external command and API request.
pub fn sinks(settings: &SinkSettings, credentials: &dyn CredentialStore, timeout: Duration) -> Vec<Box<dyn Sink>> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::with_capacity(4);
    if let Some(directory) = &settings.directory {
        sinks.push(Box::new(DirectorySink::new(directory.clone())));
    }
    if let Some(git) = &settings.git {
        sinks.push(Box::new(GitSink::new(git.clone(), timeout)));
    }
    if let Some(github) = &settings.github {
        sinks.push(Box::new(GitHubSink::new(github.clone(), credentials.secret(GITHUB_TOKEN), timeout)));
    }
    if let Some(archive) = &settings.archive {
        sinks.push(Box::new(ArchiveSink::new(archive.clone())));
    }
    sinks
}
