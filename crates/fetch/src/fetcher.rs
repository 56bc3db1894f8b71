use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use freeze_cache::{Cache, EntityId};
use freeze_config::{FetchSettings, FetchStrategy};
use freeze_transform::{ContentKind, url_to_path};
use futures::{StreamExt, stream};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use url::{Host, Url};

/// URLs per batch in concurrent mode. Batches are barriers: the next one
/// starts only when every request in the current one has settled.
pub const BATCH_SIZE: usize = 10;
/// Requests in flight at once within a batch.
pub const WORKERS: usize = 5;
/// Per-request timeout in concurrent mode.
pub const CONCURRENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Identifying user agent sent with every request.
pub const USER_AGENT: &str = concat!("freeze/", env!("CARGO_PKG_VERSION"));

/// Entity the rendered page represents.
pub const ENTITY_HEADER: &str = "x-freeze-entity";
/// Comma-separated entities the renderer read while producing the page.
pub const DEPENDENCIES_HEADER: &str = "x-freeze-dependencies";

/// One successfully retrieved page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
    /// Served from the cache without network I/O. Cached bodies have
    /// already been transformed.
    pub from_cache: bool,
    pub kind: ContentKind,
    pub entity: Option<EntityId>,
    pub dependencies: Vec<EntityId>,
}

/// Retrieves rendered pages over HTTP, consulting the cache first.
#[derive(Debug, Clone)]
pub struct Fetcher {
    verified: Client,
    loopback: Client,
    strategy: FetchStrategy,
    timeout: Duration,
    cache: Option<Arc<Cache>>,
}

impl Fetcher {
    pub fn new(settings: &FetchSettings, cache: Option<Arc<Cache>>) -> Result<Self> {
        let verified = Self::client(false)?;
        // Local renderers commonly run with self-signed certificates.
        let loopback = Self::client(true)?;
        Ok(Self { verified, loopback, strategy: settings.strategy, timeout: settings.timeout(), cache })
    }

    fn client(accept_invalid_certs: bool) -> Result<Client> {
        Client::builder()
            .user_agent(USER_AGENT)
            .gzip(true)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .or_raise(|| ErrorKind::Client)
    }

    pub fn strategy(&self) -> FetchStrategy {
        self.strategy
    }

    /// Number of URLs the caller should hand to [`fetch_batch`](Self::fetch_batch)
    /// at a time.
    pub fn batch_size(&self) -> usize {
        match self.strategy {
            FetchStrategy::Sequential => 1,
            FetchStrategy::Concurrent => BATCH_SIZE,
        }
    }

    /// Fetch a batch of URLs. Results come back in input order, one per URL;
    /// a failed URL never affects its siblings.
    pub async fn fetch_batch(&self, urls: &[String]) -> Vec<Result<Fetched>> {
        match self.strategy {
            FetchStrategy::Sequential => {
                let mut results = Vec::with_capacity(urls.len());
                for url in urls {
                    results.push(self.fetch(url, self.timeout).await);
                }
                results
            },
            FetchStrategy::Concurrent => {
                stream::iter(urls).map(|url| self.fetch(url, CONCURRENT_TIMEOUT)).buffered(WORKERS).collect().await
            },
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Fetched> {
        if let Some(hit) = self.from_cache(url).await {
            return Ok(hit);
        }
        let client = if is_loopback(url) { &self.loopback } else { &self.verified };
        let response =
            client.get(url).timeout(timeout).send().await.or_raise(|| ErrorKind::Request(url.to_string()))?;
        let status = response.status();
        if status != StatusCode::OK {
            exn::bail!(ErrorKind::Status { url: url.to_string(), status: status.as_u16() });
        }
        let headers = response.headers().clone();
        let body = response.bytes().await.or_raise(|| ErrorKind::Request(url.to_string()))?;
        if body.is_empty() {
            exn::bail!(ErrorKind::EmptyBody(url.to_string()));
        }
        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        tracing::debug!(bytes = body.len(), "Fetched");
        Ok(Fetched {
            url: url.to_string(),
            status: status.as_u16(),
            kind: ContentKind::detect(content_type, &url_to_path(url)),
            body: body.to_vec(),
            from_cache: false,
            entity: entity_header(&headers),
            dependencies: dependencies_header(&headers),
        })
    }

    async fn from_cache(&self, url: &str) -> Option<Fetched> {
        let cache = self.cache.as_ref()?;
        match cached(cache, url).await {
            Ok(Some((body, entity))) => {
                tracing::debug!(url, "Served from cache");
                Some(Fetched {
                    url: url.to_string(),
                    status: StatusCode::OK.as_u16(),
                    kind: ContentKind::detect(None, &url_to_path(url)),
                    body,
                    from_cache: true,
                    entity,
                    dependencies: Vec::new(),
                })
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(url, error = %&*e, "Cache lookup failed; fetching instead");
                None
            },
        }
    }
}

async fn cached(cache: &Cache, url: &str) -> freeze_cache::error::Result<Option<(Vec<u8>, Option<EntityId>)>> {
    if !cache.is_valid(url, None).await? {
        return Ok(None);
    }
    let entity = cache.record(url).await?.and_then(|record| record.post_id);
    Ok(cache.get(url).await?.map(|body| (body, entity)))
}

/// `localhost`, `127.0.0.0/8` and `::1`.
fn is_loopback(url: &str) -> bool {
    match Url::parse(url).ok().as_ref().and_then(Url::host) {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn entity_header(headers: &HeaderMap) -> Option<EntityId> {
    headers.get(ENTITY_HEADER)?.to_str().ok()?.trim().parse().ok()
}

fn dependencies_header(headers: &HeaderMap) -> Vec<EntityId> {
    let Some(value) = headers.get(DEPENDENCIES_HEADER).and_then(|v| v.to_str().ok()) else {
        return Vec::new();
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .filter_map(|id| match id.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(value = id, "Ignoring malformed dependency id");
                None
            },
        })
        .collect()
}
