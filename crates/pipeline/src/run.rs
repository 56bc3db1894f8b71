use crate::assets::{self, Exclusions};
use crate::error::{ErrorKind, Result};
use crate::lease::RunLock;
use crate::observer::{LogRecord, Observer, Progress, RunLog};
use crate::workspace::Workspace;
use exn::ResultExt;
use freeze_cache::Cache;
use freeze_config::{CredentialStore, EnvCredentials, Settings, SinkKind};
use freeze_fetch::{Fetched, Fetcher};
use freeze_publish::{Outcome, Sink};
use freeze_publish::tree::CopyReport;
use freeze_transform::{Transformer, url_to_path};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Progress scale. Fetching takes it to 80, assets to 90, sinks to 100.
const FETCH_END: u32 = 80;
const EXCLUDE_START: u32 = 85;
const SINKS_START: u32 = 90;
const TOTAL: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Finished and published, but some pages, assets or sinks failed.
    CompletedWithErrors,
    Failed(String),
    AlreadyRunning,
}

/// What one sink did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub kind: SinkKind,
    pub result: std::result::Result<Outcome, String>,
}

/// Summary of one call to [`Pipeline::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub status: RunStatus,
    /// Pages written to the workspace.
    pub pages: usize,
    /// Of those, pages served from the cache.
    pub from_cache: usize,
    pub failed_urls: Vec<String>,
    pub assets: CopyReport,
    /// Entries removed by the exclusion pass.
    pub excluded: usize,
    pub sinks: Vec<SinkReport>,
}

impl RunResult {
    fn new(status: RunStatus) -> Self {
        Self {
            status,
            pages: 0,
            from_cache: 0,
            failed_urls: Vec::new(),
            assets: CopyReport::default(),
            excluded: 0,
            sinks: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Turns a list of URLs into a published static snapshot.
///
/// A `Pipeline` holds the collaborators for a run; all per-run state lives
/// in a context created by [`run`](Self::run) and dropped with it.
pub struct Pipeline {
    settings: Settings,
    cache: Option<Arc<Cache>>,
    credentials: Arc<dyn CredentialStore>,
    observer: Arc<dyn Observer>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("settings", &self.settings).field("cache", &self.cache).finish_non_exhaustive()
    }
}

impl Pipeline {
    /// A pipeline without a cache, reading secrets from the environment and
    /// reporting into a fresh [`RunLog`].
    pub fn new(settings: Settings) -> Self {
        Self { settings, cache: None, credentials: Arc::new(EnvCredentials), observer: Arc::new(RunLog::new()) }
    }

    /// Use `cache` when the settings enable caching.
    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The exclusivity marker runs of this pipeline contend for.
    pub fn lock(&self) -> RunLock {
        RunLock::new(&self.settings.state_dir, Duration::from_secs(self.settings.lease_ttl_secs))
    }

    /// Run the whole pipeline once. Never fails: problems are reported in
    /// the result and through the observer. The workspace and the run
    /// marker are removed on every exit path.
    #[instrument(skip_all, fields(urls = urls.len()))]
    pub async fn run(&self, urls: &[String]) -> RunResult {
        let mut context =
            RunContext { pipeline: self, result: RunResult::new(RunStatus::Completed), written: HashMap::new() };
        let _lease = match self.lock().acquire() {
            Ok(lease) => lease,
            Err(e) if matches!(&*e, ErrorKind::AlreadyRunning) => {
                tracing::info!("Another run holds the lease");
                return RunResult::new(RunStatus::AlreadyRunning);
            },
            Err(e) => return context.fail(&e),
        };
        match context.execute(urls).await {
            Ok(()) => context.finish(),
            Err(e) => context.fail(&e),
        }
    }
}

/// State of the run in progress.
struct RunContext<'a> {
    pipeline: &'a Pipeline,
    result: RunResult,
    /// Workspace path of every page written so far, with the URL it came from.
    written: HashMap<String, String>,
}

impl RunContext<'_> {
    fn progress(&self, current: u32, status: impl Into<String>) {
        let progress = Progress::new(current, TOTAL, status);
        tracing::debug!(percentage = progress.percentage, status = %progress.status, "Progress");
        self.pipeline.observer.progress(&progress);
    }

    fn info(&self, message: impl Into<String>) {
        let record = LogRecord::new(message, false);
        tracing::info!("{}", record.message);
        self.pipeline.observer.log(&record);
    }

    fn warn(&self, message: impl Into<String>) {
        let record = LogRecord::new(message, false);
        tracing::warn!("{}", record.message);
        self.pipeline.observer.log(&record);
    }

    fn error(&self, message: impl Into<String>) {
        let record = LogRecord::new(message, true);
        tracing::error!("{}", record.message);
        self.pipeline.observer.log(&record);
    }

    async fn execute(&mut self, urls: &[String]) -> Result<()> {
        let pipeline = self.pipeline;
        let settings = &pipeline.settings;
        if settings.sinks.enabled().is_empty() {
            exn::bail!(ErrorKind::NoSinks);
        }
        settings.validate().or_raise(|| ErrorKind::Settings)?;
        let exclusions = Exclusions::new(settings.assets.exclude.as_slice(), &internal_paths(settings))?;
        let origins = settings.origins();
        let endpoints = settings.assets.endpoints();
        let transformer = Transformer::new(&origins, endpoints.as_slice());
        let cache = if settings.cache.enabled { pipeline.cache.clone() } else { None };
        let fetcher = Fetcher::new(&settings.fetch, cache.clone()).or_raise(|| ErrorKind::Fetcher)?;

        let workspace = Workspace::create(&settings.workspace_dir).await?;
        self.info(format!("Generating snapshot of {} with {:?} fetching", settings.site_url, fetcher.strategy()));
        self.fetch_phase(&fetcher, cache.as_deref(), &transformer, &workspace, urls).await;
        self.asset_phase(&transformer, exclusions, &workspace).await?;
        self.sink_phase(&workspace).await;
        Ok(())
    }

    #[instrument(level = "debug", skip_all)]
    async fn fetch_phase(
        &mut self,
        fetcher: &Fetcher,
        cache: Option<&Cache>,
        transformer: &Transformer,
        workspace: &Workspace,
        urls: &[String],
    ) {
        let urls = dedupe(urls);
        let total = urls.len();
        if total == 0 {
            self.warn("No URLs to fetch");
        }
        let mut index = 0;
        for batch in urls.chunks(fetcher.batch_size()) {
            self.progress(fetch_step(index, total), format!("Fetching page {} of {total}", index + 1));
            let results = fetcher.fetch_batch(batch).await;
            for (url, result) in batch.iter().zip(results) {
                match result {
                    Ok(fetched) => self.store(fetched, cache, transformer, workspace).await,
                    Err(e) => {
                        self.warn(format!("Skipping {url}: {}", &*e));
                        self.result.failed_urls.push(url.clone());
                    },
                }
            }
            index += batch.len();
        }
        self.progress(FETCH_END, format!("Fetched {} of {total} pages", self.result.pages));
    }

    /// Transform a fresh page (recording it in the cache), then write it to
    /// the workspace. Cached pages are already transformed. A page whose
    /// path is already taken by another URL is reported and not written.
    async fn store(&mut self, fetched: Fetched, cache: Option<&Cache>, transformer: &Transformer, workspace: &Workspace) {
        let path = url_to_path(&fetched.url);
        if let Some(first) = self.written.get(&path) {
            self.warn(format!("Path collision: {} and {first} both map to {path}; keeping {first}", fetched.url));
            return;
        }
        let bytes = if fetched.from_cache {
            self.result.from_cache += 1;
            fetched.body
        } else {
            let transformed = transformer.page(&fetched.body, fetched.kind);
            for warning in &transformed.warnings {
                self.warn(format!("{}: {warning}", fetched.url));
            }
            if let Some(cache) = cache {
                for id in &fetched.dependencies {
                    cache.add_dependency(*id);
                }
                if let Err(e) = cache.put(&fetched.url, &transformed.bytes, fetched.entity).await {
                    tracing::warn!(url = %fetched.url, error = %&*e, "Could not cache page");
                }
            }
            transformed.bytes
        };
        match workspace.write(&path, &bytes).await {
            Ok(()) => {
                self.result.pages += 1;
                self.written.insert(path, fetched.url);
            },
            Err(e) => {
                self.error(format!("Could not write {path}: {}", &*e));
                self.result.failed_urls.push(fetched.url);
            },
        }
    }

    #[instrument(level = "debug", skip_all)]
    async fn asset_phase(&mut self, transformer: &Transformer, exclusions: Exclusions, workspace: &Workspace) -> Result<()> {
        self.progress(FETCH_END, "Copying static assets");
        let (settings, root, transformer) =
            (self.pipeline.settings.assets.clone(), workspace.path().to_path_buf(), transformer.clone());
        let report = tokio::task::spawn_blocking(move || assets::copy_assets(&settings, &root, &transformer))
            .await
            .or_raise(|| ErrorKind::Task)?;
        self.result.assets = report;
        if report.failed > 0 {
            self.warn(format!("Copied {} asset files, {} failed", report.copied, report.failed));
        } else {
            self.info(format!("Copied {} asset files", report.copied));
        }

        self.progress(EXCLUDE_START, "Removing excluded files");
        let root = workspace.path().to_path_buf();
        let removed = tokio::task::spawn_blocking(move || exclusions.apply(&root)).await.or_raise(|| ErrorKind::Task)?;
        self.result.excluded = removed;
        if removed > 0 {
            self.info(format!("Removed {removed} excluded entries"));
        }
        Ok(())
    }

    #[instrument(level = "debug", skip_all)]
    async fn sink_phase(&mut self, workspace: &Workspace) {
        let pipeline = self.pipeline;
        let sinks =
            freeze_publish::sinks(&pipeline.settings.sinks, pipeline.credentials.as_ref(), pipeline.settings.fetch.timeout());
        let count = sinks.len().max(1) as u32;
        for (i, sink) in sinks.iter().enumerate() {
            let kind = sink.kind();
            self.progress(SINKS_START + i as u32 * (TOTAL - SINKS_START) / count, format!("Publishing to {kind}"));
            let result = match sink.publish(workspace.path()).await {
                Ok(outcome) => {
                    self.info(format!("{kind}: {outcome}"));
                    Ok(outcome)
                },
                Err(e) => {
                    self.error(format!("{kind} failed: {}", &*e));
                    Err((*e).to_string())
                },
            };
            self.result.sinks.push(SinkReport { kind, result });
        }
    }

    fn finish(mut self) -> RunResult {
        let clean = self.result.failed_urls.is_empty()
            && self.result.assets.failed == 0
            && self.result.sinks.iter().all(|report| report.result.is_ok());
        self.result.status = if clean { RunStatus::Completed } else { RunStatus::CompletedWithErrors };
        self.progress(TOTAL, "Complete");
        self.info(format!(
            "Snapshot complete: {} pages ({} from cache), {} failed",
            self.result.pages,
            self.result.from_cache,
            self.result.failed_urls.len()
        ));
        self.result
    }

    fn fail(mut self, error: &crate::error::Error) -> RunResult {
        let reason = (**error).to_string();
        self.error(format!("Run failed: {reason}"));
        self.pipeline.observer.progress(&Progress::failed());
        self.result.status = RunStatus::Failed(reason);
        self.result
    }
}

/// Progress for the page at `index`, spread over the fetch share.
fn fetch_step(index: usize, total: usize) -> u32 {
    if total == 0 {
        return FETCH_END;
    }
    (index.min(total) * FETCH_END as usize / total) as u32
}

/// Remove repeated URLs, keeping the first occurrence.
fn dedupe(urls: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.iter().filter(|url| seen.insert(url.as_str())).cloned().collect()
}

/// State and cache directories that live inside the site root and must
/// never be published.
fn internal_paths(settings: &Settings) -> Vec<PathBuf> {
    let Some(root) = settings.assets.site_root.as_deref() else {
        return Vec::new();
    };
    [settings.cache_dir(), settings.state_dir.clone()]
        .iter()
        .filter_map(|dir| dir.strip_prefix(root).ok().map(Path::to_path_buf))
        .filter(|relative| !relative.as_os_str().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use freeze_config::{DirectorySettings, GitSettings, SinkSettings};
    use rstest::rstest;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        progress: Mutex<Vec<Progress>>,
        logs: Mutex<Vec<LogRecord>>,
    }

    impl Observer for Recorder {
        fn progress(&self, progress: &Progress) {
            self.progress.lock().unwrap().push(progress.clone());
        }

        fn log(&self, record: &LogRecord) {
            self.logs.lock().unwrap().push(record.clone());
        }
    }

    fn settings(tmp: &TempDir) -> Settings {
        Settings {
            site_url: "https://example.com".to_string(),
            workspace_dir: tmp.path().join("workspace"),
            state_dir: tmp.path().join("state"),
            sinks: SinkSettings {
                directory: Some(DirectorySettings { path: tmp.path().join("public") }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[rstest]
    #[case(0, 4, 0)]
    #[case(1, 4, 20)]
    #[case(3, 4, 60)]
    #[case(4, 4, 80)]
    #[case(0, 0, 80)]
    #[case(1, 3, 26)]
    fn test_fetch_step(#[case] index: usize, #[case] total: usize, #[case] expected: u32) {
        assert_eq!(fetch_step(index, total), expected);
    }

    #[test]
    fn test_dedupe_keeps_first() {
        let urls: Vec<String> = ["a", "b", "a", "c", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(dedupe(&urls), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_internal_paths_inside_site_root() {
        let mut settings = Settings::default();
        settings.assets.site_root = Some(PathBuf::from("/var/www"));
        settings.state_dir = PathBuf::from("/var/www/wp-content/freeze");
        assert_eq!(
            internal_paths(&settings),
            vec![PathBuf::from("wp-content/freeze/cache"), PathBuf::from("wp-content/freeze")]
        );
        settings.state_dir = PathBuf::from("/srv/state");
        assert!(internal_paths(&settings).is_empty());
    }

    #[tokio::test]
    async fn test_refuses_concurrent_run() {
        let tmp = TempDir::new().unwrap();
        let pipeline = Pipeline::new(settings(&tmp));
        let _lease = pipeline.lock().acquire().unwrap();
        let result = pipeline.run(&[]).await;
        assert_eq!(result.status, RunStatus::AlreadyRunning);
        assert!(!tmp.path().join("public").exists());
    }

    #[tokio::test]
    async fn test_without_sinks_fails_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let mut settings = settings(&tmp);
        settings.sinks = SinkSettings::default();
        let recorder = Arc::new(Recorder::default());
        let pipeline = Pipeline::new(settings).with_observer(recorder.clone());

        let result = pipeline.run(&[]).await;
        assert!(matches!(result.status, RunStatus::Failed(_)));
        let last = recorder.progress.lock().unwrap().last().cloned().unwrap();
        assert_eq!((last.current, last.total, last.status.as_str()), (0, 0, "failed"));
        assert!(recorder.logs.lock().unwrap().iter().any(|r| r.is_error));
        assert!(!pipeline.lock().is_held());
        assert!(!tmp.path().join("workspace").exists());
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_stop_others() {
        let tmp = TempDir::new().unwrap();
        let mut settings = settings(&tmp);
        settings.sinks.git = Some(GitSettings { repository: tmp.path().join("not-a-repo"), ..Default::default() });
        let recorder = Arc::new(Recorder::default());
        let pipeline = Pipeline::new(settings).with_observer(recorder.clone());

        let result = pipeline.run(&[]).await;
        assert_eq!(result.status, RunStatus::CompletedWithErrors);
        assert_eq!(result.sinks.len(), 2);
        assert_eq!(result.sinks[0].kind, SinkKind::Directory);
        assert!(result.sinks[0].result.is_ok());
        assert_eq!(result.sinks[1].kind, SinkKind::Git);
        assert!(result.sinks[1].result.is_err());

        let percentages: Vec<u8> = recorder.progress.lock().unwrap().iter().map(|p| p.percentage).collect();
        assert!(percentages.windows(2).all(|w| w[0] <= w[1]), "{percentages:?}");
        assert!(percentages.contains(&90) && percentages.contains(&95));
        assert_eq!(percentages.last(), Some(&100));
        assert!(!pipeline.lock().is_held());
        assert!(!tmp.path().join("workspace").exists());
    }
}
