//! Committing the snapshot to a branch of a local git repository.

use crate::error::{ErrorKind, Result};
use crate::tree;
use crate::{Outcome, Sink};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use freeze_config::{GitSettings, SinkKind};
use regex::{Captures, Regex};
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::instrument;

/// The only places a git executable is accepted from.
pub const ALLOWED_GIT_PATHS: [&str; 4] = ["/usr/bin/git", "/usr/local/bin/git", "/bin/git", "/opt/homebrew/bin/git"];

/// A git executable that passed the allow-list check.
///
/// The check runs again before every invocation, so replacing the binary (or
/// a symlink to it) after resolution is caught.
#[derive(Debug, Clone)]
pub struct GitExecutable {
    path: PathBuf,
}

impl GitExecutable {
    /// The first allow-listed location holding a valid executable.
    pub fn discover() -> Option<Self> {
        let found = ALLOWED_GIT_PATHS.iter().find_map(|candidate| Self::validate(Path::new(candidate)).ok());
        if found.is_none() {
            tracing::info!("No git executable found in the allowed locations");
        }
        found.map(|path| Self { path })
    }

    /// Canonicalize `candidate` and confirm it is still a file named `git`
    /// inside one of the allowed directories.
    fn validate(candidate: &Path) -> Result<PathBuf> {
        let allowed_dirs: Vec<PathBuf> = ALLOWED_GIT_PATHS
            .iter()
            .filter_map(|p| Path::new(p).parent())
            .flat_map(|dir| [dir.to_path_buf(), dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())])
            .collect();
        let resolved = candidate.canonicalize().or_raise(|| ErrorKind::GitUnavailable)?;
        if !resolved.is_file() || resolved.file_name().and_then(|n| n.to_str()) != Some("git") {
            exn::bail!(ErrorKind::GitUnavailable);
        }
        let parent = resolved.parent().ok_or_raise(|| ErrorKind::GitUnavailable)?;
        if !allowed_dirs.iter().any(|dir| dir == parent) {
            tracing::warn!(path = %resolved.display(), "Git executable resolves outside the allowed directories");
            exn::bail!(ErrorKind::GitUnavailable);
        }
        Ok(resolved)
    }

    /// Run git with discrete arguments inside `repository`.
    async fn run(&self, repository: &Path, args: &[&str], timeout: Duration) -> Result<Output> {
        let program = Self::validate(&self.path)?;
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(repository)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let described = args.first().copied().unwrap_or_default().to_string();
        tokio::time::timeout(timeout, command.output())
            .await
            .or_raise(|| ErrorKind::Timeout(format!("git {described}")))?
            .or_raise(|| ErrorKind::Git { command: described.clone(), output: "could not start".to_string() })
    }
}

/// Commits the workspace to a branch of an existing local repository.
///
/// The working tree is replaced wholesale, so files removed from the site
/// disappear from the branch too. A branch that does not exist yet is
/// created from the current history, or as an orphan in a repository
/// without any commits.
#[derive(Debug)]
pub struct GitSink {
    settings: GitSettings,
    git: Option<GitExecutable>,
    timeout: Duration,
}

impl GitSink {
    pub fn new(settings: GitSettings, timeout: Duration) -> Self {
        Self { settings, git: GitExecutable::discover(), timeout }
    }

    fn author_args(&self) -> [String; 6] {
        [
            "-c".to_string(),
            format!("user.name={}", self.settings.author_name),
            "-c".to_string(),
            format!("user.email={}", self.settings.author_email),
            "-c".to_string(),
            "commit.gpgsign=false".to_string(),
        ]
    }

    /// Run git and fail on a non-zero exit, with redacted output.
    async fn git(&self, git: &GitExecutable, args: &[&str]) -> Result<Output> {
        let output = git.run(&self.settings.repository, args, self.timeout).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            exn::bail!(ErrorKind::Git {
                command: args.first().copied().unwrap_or_default().to_string(),
                output: redact(stderr.trim(), &[&self.settings.repository]),
            });
        }
        Ok(output)
    }

    /// Run git and report only whether it succeeded.
    async fn check(&self, git: &GitExecutable, args: &[&str]) -> Result<bool> {
        Ok(git.run(&self.settings.repository, args, self.timeout).await?.status.success())
    }

    fn message(&self) -> String {
        self.settings.message.clone().unwrap_or_else(crate::default_message)
    }
}

#[async_trait]
impl Sink for GitSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Git
    }

    #[instrument(skip(self), fields(repository = %self.settings.repository.display(), branch = %self.settings.branch))]
    async fn publish(&self, workspace: &Path) -> Result<Outcome> {
        let git = self.git.as_ref().ok_or_raise(|| ErrorKind::GitUnavailable)?;
        let repository = self.settings.repository.clone();
        if !repository.join(".git").is_dir() {
            exn::bail!(ErrorKind::NotARepository(repository));
        }

        let (source, target) = (workspace.to_path_buf(), repository.clone());
        let report = tokio::task::spawn_blocking(move || -> std::io::Result<tree::CopyReport> {
            tree::wipe_contents(&target, &[".git"])?;
            Ok(tree::copy_tree(&source, &target))
        })
        .await
        .or_raise(|| ErrorKind::Task)?
        .or_raise(|| ErrorKind::Filesystem(repository.clone()))?;
        if report.failed > 0 {
            tracing::warn!(failed = report.failed, "Some files could not be copied into the repository");
        }

        let branch = self.settings.branch.as_str();
        let branch_ref = format!("refs/heads/{branch}");
        let has_history = self.check(git, &["rev-parse", "--verify", "--quiet", "HEAD"]).await?;
        let branch_exists = self.check(git, &["rev-parse", "--verify", "--quiet", &branch_ref]).await?;
        match (has_history, branch_exists) {
            (_, true) => {
                self.git(git, &["symbolic-ref", "HEAD", &branch_ref]).await?;
                self.git(git, &["reset", "--quiet"]).await?;
            },
            (true, false) => {
                self.git(git, &["checkout", "--quiet", "-b", branch]).await?;
            },
            (false, false) => {
                tracing::info!("Empty repository; starting an orphan branch");
                self.git(git, &["symbolic-ref", "HEAD", &branch_ref]).await?;
            },
        }

        self.git(git, &["add", "--all"]).await?;
        let status = self.git(git, &["status", "--porcelain"]).await?;
        if status.stdout.iter().all(u8::is_ascii_whitespace) {
            tracing::info!("Nothing to commit");
            return Ok(Outcome::NothingToCommit);
        }
        let message = self.message();
        let author = self.author_args();
        let mut commit: Vec<&str> = author.iter().map(String::as_str).collect();
        commit.extend(["commit", "--quiet", "-m", &message]);
        self.git(git, &commit).await?;

        let pushed = match &self.settings.remote {
            Some(remote) => {
                let output = git.run(&repository, &["push", remote, &format!("HEAD:{branch_ref}")], self.timeout).await?;
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let redacted = redact(stderr.trim(), &[&repository, workspace]);
                    tracing::error!(output = %redacted, "Push failed");
                    exn::bail!(ErrorKind::Push(redacted));
                }
                true
            },
            None => false,
        };
        Ok(Outcome::Committed { branch: branch.to_string(), files: report.copied, pushed })
    }
}

static CREDENTIALS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b([a-z][a-z0-9+.-]*://)[^/\s@]+@").unwrap());
static IPV4: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());
// Candidates only; each is confirmed by parsing before it is replaced.
static IPV6: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[?\b[0-9a-f]{1,4}(?::[0-9a-f]{0,4}){2,7}\]?").unwrap());
static ABSOLUTE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<lead>^|[\s'"(=])(?:/(?:home|Users|root|var|tmp|srv|opt|etc|usr|mnt|private)|[A-Za-z]:\\)[^\s'"]*"#)
        .unwrap()
});

/// Strip filesystem paths, embedded credentials and IP addresses from
/// process output before it is logged or surfaced.
pub fn redact(output: &str, known_paths: &[&Path]) -> String {
    let mut redacted = output.to_string();
    for path in known_paths {
        let path = path.display().to_string();
        if !path.is_empty() {
            redacted = redacted.replace(&path, "[path]");
        }
    }
    let redacted = CREDENTIALS.replace_all(&redacted, "${1}[credentials]@");
    let redacted = IPV4.replace_all(&redacted, "[ip]");
    let redacted = IPV6.replace_all(&redacted, |caps: &Captures<'_>| {
        let candidate = &caps[0];
        match candidate.trim_start_matches('[').trim_end_matches(']').parse::<Ipv6Addr>() {
            Ok(_) => "[ip]".to_string(),
            Err(_) => candidate.to_string(),
        }
    });
    ABSOLUTE_PATH.replace_all(&redacted, "${lead}[path]").into_owned()
}
