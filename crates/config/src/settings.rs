//! Typed run settings.
//!
//! Every option has a documented default; [`Settings::validate`] enforces the
//! domain of the options a run depends on so the pipeline can treat the
//! struct as trusted and immutable for the duration of one run.

use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Lower bound for the per-request fetch timeout, in seconds.
pub const MIN_TIMEOUT_SECS: u64 = 60;
/// Upper bound for the per-request fetch timeout, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 18_000;
const DEFAULT_TIMEOUT_SECS: u64 = 600;
const DEFAULT_LEASE_TTL_SECS: u64 = 3_600;
const DEFAULT_BRANCH: &str = "gh-pages";
const DEFAULT_GITHUB_API: &str = "https://api.github.com";
const DEFAULT_GITHUB_BATCH: usize = 300;

/// Top-level settings for one snapshot run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Public origin of the dynamic site, e.g. `https://example.com`. Required.
    pub site_url: String,
    /// Secondary origin (front-end URL) when it differs from `site_url`.
    pub home_url: Option<String>,
    /// Run-private scratch directory; wiped at the start and end of a run.
    /// Default: `<tmp>/freeze-workspace`.
    pub workspace_dir: PathBuf,
    /// Directory for the run marker and (by default) the cache.
    /// Default: the platform data directory for `freeze`.
    pub state_dir: PathBuf,
    /// Lifetime of the run-exclusivity marker. Default: one hour.
    pub lease_ttl_secs: u64,
    pub cache: CacheSettings,
    pub fetch: FetchSettings,
    pub assets: AssetSettings,
    pub sinks: SinkSettings,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            site_url: String::new(),
            home_url: None,
            workspace_dir: std::env::temp_dir().join("freeze-workspace"),
            state_dir: default_state_dir(),
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
            cache: CacheSettings::default(),
            fetch: FetchSettings::default(),
            assets: AssetSettings::default(),
            sinks: SinkSettings::default(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "freeze")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("freeze-state"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Reuse cached artifacts when they are still valid. Default: `true`.
    pub enabled: bool,
    /// Cache location. Default: `<state_dir>/cache`.
    pub directory: Option<PathBuf>,
}
impl Default for CacheSettings {
    fn default() -> Self {
        Self { enabled: true, directory: None }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStrategy {
    /// One request at a time.
    #[default]
    Sequential,
    /// Fixed-size batches dispatched to a small worker pool.
    Concurrent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub strategy: FetchStrategy,
    /// Per-request timeout for sequential fetching and external processes.
    /// Default: 600, allowed range 60 to 18000.
    pub timeout_secs: u64,
}
impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            strategy: FetchStrategy::default(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}
impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Static files copied next to the rendered pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    /// Filesystem document root of the dynamic site. Without it no assets
    /// are copied.
    pub site_root: Option<PathBuf>,
    /// Site-wide content directories, relative to `site_root`, e.g.
    /// `wp-content/uploads`.
    pub directories: Vec<String>,
    /// Extra files or directories, relative to `site_root`.
    pub include: Vec<String>,
    /// Glob patterns (relative to the workspace) deleted before publishing,
    /// in addition to the built-in force-exclusion list.
    pub exclude: Vec<String>,
    /// Script endpoints that do not exist on a static host and are
    /// neutralized in copied JavaScript. Default: admin-ajax and the REST root.
    pub dynamic_endpoints: Vec<String>,
}
impl AssetSettings {
    /// Configured endpoints, or the defaults when none are configured.
    pub fn endpoints(&self) -> Vec<String> {
        if self.dynamic_endpoints.is_empty() {
            vec!["wp-admin/admin-ajax.php".to_string(), "wp-json".to_string()]
        } else {
            self.dynamic_endpoints.clone()
        }
    }
}

/// Publish destinations. A sink is enabled by being present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    pub directory: Option<DirectorySettings>,
    pub git: Option<GitSettings>,
    pub github: Option<GitHubSettings>,
    pub archive: Option<ArchiveSettings>,
}

/// Publish destinations in the order the pipeline invokes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    Directory,
    Git,
    GitHub,
    Archive,
}
impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Directory => "directory",
            SinkKind::Git => "git",
            SinkKind::GitHub => "github",
            SinkKind::Archive => "archive",
        }
    }
}
impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SinkSettings {
    /// Enabled sinks in their fixed invocation order.
    pub fn enabled(&self) -> Vec<SinkKind> {
        let mut kinds = Vec::with_capacity(4);
        if self.directory.is_some() {
            kinds.push(SinkKind::Directory);
        }
        if self.git.is_some() {
            kinds.push(SinkKind::Git);
        }
        if self.github.is_some() {
            kinds.push(SinkKind::GitHub);
        }
        if self.archive.is_some() {
            kinds.push(SinkKind::Archive);
        }
        kinds
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    /// Absolute output directory; its contents are replaced on every run.
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    /// Absolute path of an existing repository (with a `.git` directory).
    pub repository: PathBuf,
    /// Target branch. Default: `gh-pages`.
    pub branch: String,
    /// Commit message; generated from the run time when absent.
    pub message: Option<String>,
    /// Remote to push to after committing; no push when absent.
    pub remote: Option<String>,
    pub author_name: String,
    pub author_email: String,
}
impl Default for GitSettings {
    fn default() -> Self {
        Self {
            repository: PathBuf::new(),
            branch: DEFAULT_BRANCH.to_string(),
            message: None,
            remote: None,
            author_name: "freeze".to_string(),
            author_email: "freeze@localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSettings {
    pub owner: String,
    pub repository: String,
    /// Target branch. Default: `gh-pages`.
    pub branch: String,
    /// REST API root. Default: `https://api.github.com`.
    pub api_url: String,
    /// Visibility used when the repository has to be created.
    pub private: bool,
    pub message: Option<String>,
    /// Files per remote commit. Default: 300.
    pub batch_size: usize,
}
impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repository: String::new(),
            branch: DEFAULT_BRANCH.to_string(),
            api_url: DEFAULT_GITHUB_API.to_string(),
            private: false,
            message: None,
            batch_size: DEFAULT_GITHUB_BATCH,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveCompression {
    #[default]
    Gzip,
    Bzip2,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Absolute directory receiving the timestamped archive.
    pub directory: PathBuf,
    pub compression: ArchiveCompression,
}

impl Settings {
    /// Parsed site origins that count as "this site" when rewriting URLs.
    ///
    /// Only meaningful after [`validate`](Self::validate) succeeded; invalid
    /// entries are skipped.
    pub fn origins(&self) -> Vec<Url> {
        std::iter::once(&self.site_url)
            .chain(self.home_url.iter())
            .filter_map(|raw| Url::parse(raw).ok())
            .collect()
    }

    /// Effective cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache.directory.clone().unwrap_or_else(|| self.state_dir.join("cache"))
    }

    /// Check every constraint a run relies on.
    pub fn validate(&self) -> Result<()> {
        validate_origin("site_url", &self.site_url)?;
        if let Some(home) = &self.home_url {
            validate_origin("home_url", home)?;
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.fetch.timeout_secs) {
            exn::bail!(ErrorKind::invalid(
                "fetch.timeout_secs",
                format!("{} is outside {MIN_TIMEOUT_SECS}..={MAX_TIMEOUT_SECS}", self.fetch.timeout_secs)
            ));
        }
        if self.lease_ttl_secs == 0 {
            exn::bail!(ErrorKind::invalid("lease_ttl_secs", "must be positive"));
        }
        require_absolute("workspace_dir", &self.workspace_dir)?;
        if self.sinks.enabled().is_empty() {
            exn::bail!(ErrorKind::NoSinks);
        }
        if let Some(directory) = &self.sinks.directory {
            require_absolute("sinks.directory.path", &directory.path)?;
            if directory.path.parent().is_none() {
                exn::bail!(ErrorKind::invalid("sinks.directory.path", "refusing to publish into the filesystem root"));
            }
            self.require_disjoint("sinks.directory.path", &directory.path)?;
        }
        if let Some(git) = &self.sinks.git {
            require_absolute("sinks.git.repository", &git.repository)?;
            self.require_disjoint("sinks.git.repository", &git.repository)?;
            if git.branch.trim().is_empty() || git.branch.starts_with('-') {
                exn::bail!(ErrorKind::invalid("sinks.git.branch", "not a usable branch name"));
            }
        }
        if let Some(github) = &self.sinks.github {
            if github.owner.is_empty() || github.repository.is_empty() {
                exn::bail!(ErrorKind::invalid("sinks.github", "owner and repository are required"));
            }
            if github.batch_size == 0 {
                exn::bail!(ErrorKind::invalid("sinks.github.batch_size", "must be positive"));
            }
        }
        if let Some(archive) = &self.sinks.archive {
            require_absolute("sinks.archive.directory", &archive.directory)?;
        }
        Ok(())
    }

    /// Sinks that wipe their destination must not overlap the directories a
    /// run keeps its own state in.
    fn require_disjoint(&self, field: &'static str, destination: &Path) -> Result<()> {
        let destination = normalize(destination);
        let cache_dir = self.cache_dir();
        let internal = [("workspace_dir", &self.workspace_dir), ("state_dir", &self.state_dir), ("cache", &cache_dir)];
        for (name, dir) in internal {
            let dir = normalize(dir);
            if destination.starts_with(&dir) || dir.starts_with(&destination) {
                exn::bail!(ErrorKind::invalid(field, format!("`{}` overlaps {name} `{}`", destination.display(), dir.display())));
            }
        }
        Ok(())
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                normalized.pop();
            },
            other => normalized.push(other),
        }
    }
    normalized
}

fn validate_origin(field: &'static str, raw: &str) -> Result<()> {
    if raw.is_empty() {
        exn::bail!(ErrorKind::invalid(field, "required"));
    }
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => Ok(()),
        Ok(_) => exn::bail!(ErrorKind::invalid(field, "must be an http(s) URL with a host")),
        Err(e) => exn::bail!(ErrorKind::invalid(field, e.to_string())),
    }
}

fn require_absolute(field: &'static str, path: &Path) -> Result<()> {
    if !path.is_absolute() {
        exn::bail!(ErrorKind::invalid(field, format!("`{}` is not an absolute path", path.display())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn valid() -> Settings {
        Settings {
            site_url: "https://example.com".to_string(),
            workspace_dir: PathBuf::from("/tmp/freeze-test"),
            sinks: SinkSettings {
                directory: Some(DirectorySettings { path: PathBuf::from("/srv/www") }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_settings_pass() {
        valid().validate().unwrap();
    }

    #[rstest]
    #[case(59, false)]
    #[case(60, true)]
    #[case(600, true)]
    #[case(18_000, true)]
    #[case(18_001, false)]
    fn test_timeout_range(#[case] secs: u64, #[case] ok: bool) {
        let mut settings = valid();
        settings.fetch.timeout_secs = secs;
        assert_eq!(settings.validate().is_ok(), ok);
    }

    #[rstest]
    #[case("")]
    #[case("example.com")]
    #[case("ftp://example.com")]
    #[case("https://")]
    fn test_bad_site_url(#[case] url: &str) {
        let mut settings = valid();
        settings.site_url = url.to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_requires_a_sink() {
        let mut settings = valid();
        settings.sinks = SinkSettings::default();
        let err = settings.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::NoSinks));
    }

    #[test]
    fn test_relative_output_rejected() {
        let mut settings = valid();
        settings.sinks.directory = Some(DirectorySettings { path: PathBuf::from("public") });
        assert!(settings.validate().is_err());
    }

    #[rstest]
    #[case("/tmp/freeze-test")]
    #[case("/tmp/freeze-test/public")]
    #[case("/tmp")]
    #[case("/var/lib/freeze")]
    #[case("/var/lib/freeze/cache/pages")]
    #[case("/srv/www/../../var/lib")]
    fn test_sink_overlapping_run_state_rejected(#[case] destination: &str) {
        let mut settings = valid();
        settings.state_dir = PathBuf::from("/var/lib/freeze");
        settings.sinks.directory = Some(DirectorySettings { path: PathBuf::from(destination) });
        let err = settings.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid { field: "sinks.directory.path", .. }), "{err:?}");

        let mut settings = valid();
        settings.state_dir = PathBuf::from("/var/lib/freeze");
        settings.sinks.git = Some(GitSettings { repository: PathBuf::from(destination), ..Default::default() });
        let err = settings.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid { field: "sinks.git.repository", .. }), "{err:?}");
    }

    #[test]
    fn test_sink_beside_run_state_accepted() {
        let mut settings = valid();
        settings.state_dir = PathBuf::from("/var/lib/freeze");
        settings.sinks.directory = Some(DirectorySettings { path: PathBuf::from("/var/lib/freeze-public") });
        settings.validate().unwrap();
    }

    #[test]
    fn test_enabled_order_is_fixed() {
        let sinks = SinkSettings {
            archive: Some(ArchiveSettings::default()),
            git: Some(GitSettings::default()),
            directory: Some(DirectorySettings::default()),
            github: Some(GitHubSettings::default()),
        };
        assert_eq!(sinks.enabled(), vec![SinkKind::Directory, SinkKind::Git, SinkKind::GitHub, SinkKind::Archive]);
    }

    #[test]
    fn test_origins_include_home_url() {
        let mut settings = valid();
        settings.home_url = Some("https://www.example.com".to_string());
        let hosts: Vec<_> = settings.origins().iter().filter_map(|u| u.host_str().map(str::to_string)).collect();
        assert_eq!(hosts, vec!["example.com", "www.example.com"]);
    }

    #[test]
    fn test_cache_dir_defaults_under_state_dir() {
        let mut settings = valid();
        settings.state_dir = PathBuf::from("/var/lib/freeze");
        assert_eq!(settings.cache_dir(), PathBuf::from("/var/lib/freeze/cache"));
        settings.cache.directory = Some(PathBuf::from("/cache"));
        assert_eq!(settings.cache_dir(), PathBuf::from("/cache"));
    }
}
