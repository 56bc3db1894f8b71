use freeze_cache::{Cache, Entity, MemoryGraph};
use freeze_config::{DirectorySettings, FetchStrategy, Settings, SinkSettings};
use freeze_pipeline::{LogRecord, Observer, Pipeline, Progress, RunStatus};
use freeze_storage::backend::MemoryBackend;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use time::{Duration, OffsetDateTime};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

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

struct Site {
    server: MockServer,
    tmp: TempDir,
    graph: Arc<MemoryGraph>,
    cache: Arc<Cache>,
}

impl Site {
    /// `hits` is how often `/` and `/feed/` are fetched, `about_hits` how
    /// often `/about/` is.
    async fn start(hits: u64, about_hits: u64) -> Self {
        let server = MockServer::start().await;
        let uri = server.uri();
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=UTF-8")
                    .insert_header("x-freeze-entity", "1")
                    .set_body_string(format!(
                        r#"<html><head><link rel="https://api.w.org/" href="{uri}/wp-json/"></head><body><a href="{uri}/about/">About</a></body></html>"#
                    )),
            )
            .expect(hits)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/about/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .insert_header("x-freeze-entity", "2")
                    .insert_header("x-freeze-dependencies", "1")
                    .set_body_string(format!(
                        r#"<html><head></head><body><a href="{uri}/">Home</a><img src="{uri}/wp-content/uploads/me.jpg"></body></html>"#
                    )),
            )
            .expect(about_hits)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/rss+xml")
                    .set_body_string(format!("<rss><channel><link>{uri}/</link></channel></rss>")),
            )
            .expect(hits)
            .mount(&server)
            .await;

        let graph = Arc::new(MemoryGraph::new());
        let earlier = OffsetDateTime::now_utc() - Duration::days(1);
        graph.set_epoch(earlier);
        graph.insert(Entity { id: 1, published: true, modified: earlier, permalink: format!("{uri}/") });
        graph.insert(Entity { id: 2, published: true, modified: earlier, permalink: format!("{uri}/about/") });
        let cache = Arc::new(Cache::new(Arc::new(MemoryBackend::default()), graph.clone()));
        Self { server, tmp: TempDir::new().unwrap(), graph, cache }
    }

    fn output(&self) -> PathBuf {
        self.tmp.path().join("public")
    }

    fn settings(&self) -> Settings {
        Settings {
            site_url: self.server.uri(),
            workspace_dir: self.tmp.path().join("workspace"),
            state_dir: self.tmp.path().join("state"),
            sinks: SinkSettings { directory: Some(DirectorySettings { path: self.output() }), ..Default::default() },
            ..Default::default()
        }
    }

    fn pipeline(&self, observer: Arc<Recorder>) -> Pipeline {
        self.pipeline_with(self.settings(), observer)
    }

    fn pipeline_with(&self, settings: Settings, observer: Arc<Recorder>) -> Pipeline {
        Pipeline::new(settings).with_cache(self.cache.clone()).with_observer(observer)
    }

    fn urls(&self) -> Vec<String> {
        ["/", "/about/", "/feed/"].iter().map(|p| format!("{}{p}", self.server.uri())).collect()
    }
}

fn read(root: &Path, relative: &str) -> String {
    fs::read_to_string(root.join(relative)).unwrap()
}

#[tokio::test]
async fn test_three_pages_then_all_from_cache() {
    let site = Site::start(2, 2).await;
    let uri = site.server.uri();

    let mut uncached = site.settings();
    uncached.cache.enabled = false;
    let recorder = Arc::new(Recorder::default());
    let first = site.pipeline_with(uncached, recorder.clone()).run(&site.urls()).await;
    assert_eq!(first.status, RunStatus::Completed, "{first:?}");
    assert_eq!((first.pages, first.from_cache), (3, 0));
    assert_eq!(site.cache.stats().await.unwrap().count, 0);

    let home = read(&site.output(), "index.html");
    assert!(home.contains(r#"<a href="/about/">"#), "{home}");
    assert!(!home.contains("api.w.org"));
    assert!(!home.contains(&uri));
    let about = read(&site.output(), "about/index.html");
    assert!(about.contains(r#"<img src="/wp-content/uploads/me.jpg">"#), "{about}");
    assert_eq!(read(&site.output(), "feed/index.xml"), "<rss><channel><link>/</link></channel></rss>");

    let percentages: Vec<u8> = recorder.progress.lock().unwrap().iter().map(|p| p.percentage).collect();
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]), "{percentages:?}");
    assert_eq!(percentages.last(), Some(&100));
    assert!(!site.tmp.path().join("workspace").exists());
    assert!(!site.tmp.path().join("state").join(freeze_pipeline::MARKER_FILE).exists());

    // Enabling the cache fills it on the next run.
    let warm = site.pipeline(Arc::new(Recorder::default())).run(&site.urls()).await;
    assert_eq!((warm.pages, warm.from_cache), (3, 0));
    assert_eq!(site.cache.stats().await.unwrap().count, 3);

    // Same content on a repeated run, without a single request.
    let repeat = site.pipeline(Arc::new(Recorder::default())).run(&site.urls()).await;
    assert_eq!(repeat.status, RunStatus::Completed);
    assert_eq!((repeat.pages, repeat.from_cache), (3, 3));
    assert_eq!(read(&site.output(), "index.html"), home);
    assert_eq!(read(&site.output(), "about/index.html"), about);
}

#[tokio::test]
async fn test_renamed_dependency_refetches_dependents() {
    let site = Site::start(1, 2).await;
    let first = site.pipeline(Arc::new(Recorder::default())).run(&site.urls()).await;
    assert_eq!(first.from_cache, 0);

    let renamed = format!("{}/welcome/", site.server.uri());
    assert!(site.graph.update(1, |entity| entity.permalink = renamed));

    let second = site.pipeline(Arc::new(Recorder::default())).run(&site.urls()).await;
    assert_eq!(second.status, RunStatus::Completed);
    // The home page and the feed are still valid; the about page read entity 1.
    assert_eq!((second.pages, second.from_cache), (3, 2));
}

#[tokio::test]
async fn test_failed_page_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(path("/ok/"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html").set_body_string("<p>ok</p>"))
        .mount(&server)
        .await;
    Mock::given(path("/broken/")).respond_with(ResponseTemplate::new(500)).mount(&server).await;
    let tmp = TempDir::new().unwrap();
    let settings = Settings {
        site_url: server.uri(),
        workspace_dir: tmp.path().join("workspace"),
        state_dir: tmp.path().join("state"),
        sinks: SinkSettings {
            directory: Some(DirectorySettings { path: tmp.path().join("public") }),
            ..Default::default()
        },
        ..Default::default()
    };
    let recorder = Arc::new(Recorder::default());
    let urls = vec![format!("{}/broken/", server.uri()), format!("{}/ok/", server.uri())];

    let result = Pipeline::new(settings).with_observer(recorder.clone()).run(&urls).await;
    assert_eq!(result.status, RunStatus::CompletedWithErrors);
    assert_eq!(result.pages, 1);
    assert_eq!(result.failed_urls, vec![urls[0].clone()]);
    assert!(tmp.path().join("public/ok/index.html").is_file());
    assert!(recorder.logs.lock().unwrap().iter().any(|r| r.message.contains("/broken/")));
}

#[tokio::test]
async fn test_concurrent_batches() {
    let server = MockServer::start().await;
    Mock::given(path_regex(r"^/p/\d+/$"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html").set_body_string("<p>x</p>"))
        .expect(23)
        .mount(&server)
        .await;
    let tmp = TempDir::new().unwrap();
    let mut settings = Settings {
        site_url: server.uri(),
        workspace_dir: tmp.path().join("workspace"),
        state_dir: tmp.path().join("state"),
        sinks: SinkSettings {
            directory: Some(DirectorySettings { path: tmp.path().join("public") }),
            ..Default::default()
        },
        ..Default::default()
    };
    settings.fetch.strategy = FetchStrategy::Concurrent;
    settings.cache.enabled = false;
    let recorder = Arc::new(Recorder::default());
    // One duplicate, which is fetched only once.
    let mut urls: Vec<String> = (0..23).map(|i| format!("{}/p/{i}/", server.uri())).collect();
    urls.push(urls[0].clone());

    let result = Pipeline::new(settings).with_observer(recorder.clone()).run(&urls).await;
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.pages, 23);
    // Batches of ten: progress is reported at pages 0, 10 and 20.
    let fetching: Vec<u8> = recorder
        .progress
        .lock()
        .unwrap()
        .iter()
        .filter(|p| p.status.starts_with("Fetching page"))
        .map(|p| p.percentage)
        .collect();
    assert_eq!(fetching, vec![0, 34, 69]);
}

#[tokio::test]
async fn test_colliding_urls_are_reported() {
    let server = MockServer::start().await;
    Mock::given(path("/a/"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html").set_body_string("<p>dir</p>"))
        .mount(&server)
        .await;
    Mock::given(path("/a/index.html"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html").set_body_string("<p>file</p>"))
        .mount(&server)
        .await;
    let tmp = TempDir::new().unwrap();
    let mut settings = Settings {
        site_url: server.uri(),
        workspace_dir: tmp.path().join("workspace"),
        state_dir: tmp.path().join("state"),
        sinks: SinkSettings {
            directory: Some(DirectorySettings { path: tmp.path().join("public") }),
            ..Default::default()
        },
        ..Default::default()
    };
    settings.cache.enabled = false;
    let recorder = Arc::new(Recorder::default());
    let urls = vec![format!("{}/a/", server.uri()), format!("{}/a/index.html", server.uri())];

    let result = Pipeline::new(settings).with_observer(recorder.clone()).run(&urls).await;
    assert_eq!(result.pages, 1);
    assert_eq!(read(&tmp.path().join("public"), "a/index.html"), "<p>dir</p>");
    let logs = recorder.logs.lock().unwrap();
    let collision = logs.iter().find(|r| r.message.starts_with("Path collision")).expect("collision is logged");
    assert!(collision.message.contains(&urls[0]) && collision.message.contains(&urls[1]), "{}", collision.message);
}
