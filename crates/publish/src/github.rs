//! Publishing through the GitHub REST API.
//!
//! Files are uploaded in fixed-size batches, each becoming one commit on
//! the target branch (blobs, then a tree on top of the previous one, then a
//! commit, then a ref update). A failed batch leaves every earlier batch in
//! place: the branch is then valid but partial.

use crate::error::{ErrorKind, Result};
use crate::{Outcome, Sink, tree};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use exn::{OptionExt, ResultExt};
use freeze_config::{GitHubSettings, SinkKind};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::instrument;

const API_VERSION: &str = "2022-11-28";

/// Split `files` into consecutive batches of at most `size` entries. Every
/// file lands in exactly one batch, in order.
pub fn batches<T>(files: &[T], size: usize) -> Vec<&[T]> {
    files.chunks(size.max(1)).collect()
}

#[derive(Debug, Deserialize)]
struct Sha {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: Sha,
}

#[derive(Debug, Deserialize)]
struct Commit {
    tree: Sha,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

/// Pushes the workspace to a GitHub repository branch in batched commits.
pub struct GitHubSink {
    settings: GitHubSettings,
    token: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for GitHubSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubSink")
            .field("settings", &self.settings)
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GitHubSink {
    pub fn new(settings: GitHubSettings, token: Option<String>, timeout: Duration) -> Self {
        Self { settings, token, timeout }
    }

    fn client(&self) -> Result<Client> {
        let token = self.token.as_deref().ok_or_raise(|| ErrorKind::MissingCredential(freeze_config::GITHUB_TOKEN))?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .or_raise(|| ErrorKind::MissingCredential(freeze_config::GITHUB_TOKEN))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(USER_AGENT, HeaderValue::from_static(concat!("freeze/", env!("CARGO_PKG_VERSION"))));
        Client::builder()
            .default_headers(headers)
            .timeout(self.timeout)
            .build()
            .or_raise(|| ErrorKind::Request(self.settings.api_url.clone()))
    }

    fn repo_endpoint(&self, tail: &str) -> String {
        let base = self.settings.api_url.trim_end_matches('/');
        format!("{base}/repos/{}/{}{tail}", self.settings.owner, self.settings.repository)
    }

    fn message(&self) -> String {
        self.settings.message.clone().unwrap_or_else(crate::default_message)
    }
}

/// One authenticated API session.
struct Api<'a> {
    client: Client,
    sink: &'a GitHubSink,
}

impl Api<'_> {
    /// Send a request; `Ok(None)` for a 404, an error for any other failure.
    async fn send<T: DeserializeOwned>(&self, method: Method, endpoint: &str, body: Option<Value>) -> Result<Option<T>> {
        let mut request = self.client.request(method, endpoint);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.or_raise(|| ErrorKind::Request(endpoint.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            exn::bail!(ErrorKind::Api { endpoint: endpoint.to_string(), status: status.as_u16() });
        }
        let value = response.json::<T>().await.or_raise(|| ErrorKind::Request(endpoint.to_string()))?;
        Ok(Some(value))
    }

    async fn expect<T: DeserializeOwned>(&self, method: Method, endpoint: &str, body: Option<Value>) -> Result<T> {
        self.send(method, endpoint, body)
            .await?
            .ok_or_raise(|| ErrorKind::Api { endpoint: endpoint.to_string(), status: StatusCode::NOT_FOUND.as_u16() })
    }

    /// Create the repository unless it already exists.
    async fn ensure_repository(&self) -> Result<()> {
        let settings = &self.sink.settings;
        let endpoint = self.sink.repo_endpoint("");
        if self.send::<Value>(Method::GET, &endpoint, None).await?.is_some() {
            return Ok(());
        }
        let base = settings.api_url.trim_end_matches('/');
        let user: User = self.expect(Method::GET, &format!("{base}/user"), None).await?;
        let create = if user.login.eq_ignore_ascii_case(&settings.owner) {
            format!("{base}/user/repos")
        } else {
            format!("{base}/orgs/{}/repos", settings.owner)
        };
        tracing::info!(owner = %settings.owner, repository = %settings.repository, "Creating repository");
        let body = json!({ "name": settings.repository, "private": settings.private, "auto_init": true });
        self.expect::<Value>(Method::POST, &create, Some(body)).await?;
        Ok(())
    }

    /// Head commit and tree of the target branch, if the branch exists.
    async fn branch_head(&self) -> Result<Option<(String, String)>> {
        let endpoint = self.sink.repo_endpoint(&format!("/git/ref/heads/{}", self.sink.settings.branch));
        let Some(head) = self.send::<GitRef>(Method::GET, &endpoint, None).await? else {
            return Ok(None);
        };
        let commit: Commit =
            self.expect(Method::GET, &self.sink.repo_endpoint(&format!("/git/commits/{}", head.object.sha)), None).await?;
        Ok(Some((head.object.sha, commit.tree.sha)))
    }

    async fn blob(&self, data: &[u8]) -> Result<String> {
        let body = json!({ "content": STANDARD.encode(data), "encoding": "base64" });
        let blob: Sha = self.expect(Method::POST, &self.sink.repo_endpoint("/git/blobs"), Some(body)).await?;
        Ok(blob.sha)
    }

    /// Commit one batch on top of `parent`, returning the new commit and tree.
    async fn commit_batch(
        &self,
        workspace: &Path,
        files: &[PathBuf],
        parent: Option<&(String, String)>,
        message: &str,
    ) -> Result<(String, String)> {
        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let absolute = workspace.join(file);
            let data = tokio::fs::read(&absolute).await.or_raise(|| ErrorKind::Filesystem(absolute.clone()))?;
            let sha = self.blob(&data).await?;
            let path = file.to_string_lossy().replace('\\', "/");
            entries.push(json!({ "path": path, "mode": "100644", "type": "blob", "sha": sha }));
        }
        let mut tree_body = json!({ "tree": entries });
        if let Some((_, base_tree)) = parent {
            tree_body["base_tree"] = json!(base_tree);
        }
        let tree: Sha = self.expect(Method::POST, &self.sink.repo_endpoint("/git/trees"), Some(tree_body)).await?;
        let parents: Vec<&str> = parent.map(|(commit, _)| commit.as_str()).into_iter().collect();
        let commit_body = json!({ "message": message, "tree": tree.sha, "parents": parents });
        let commit: Sha = self.expect(Method::POST, &self.sink.repo_endpoint("/git/commits"), Some(commit_body)).await?;

        let branch = &self.sink.settings.branch;
        if parent.is_some() {
            let endpoint = self.sink.repo_endpoint(&format!("/git/refs/heads/{branch}"));
            self.expect::<Value>(Method::PATCH, &endpoint, Some(json!({ "sha": commit.sha, "force": false }))).await?;
        } else {
            let body = json!({ "ref": format!("refs/heads/{branch}"), "sha": commit.sha });
            self.expect::<Value>(Method::POST, &self.sink.repo_endpoint("/git/refs"), Some(body)).await?;
        }
        Ok((commit.sha, tree.sha))
    }
}

#[async_trait]
impl Sink for GitHubSink {
    fn kind(&self) -> SinkKind {
        SinkKind::GitHub
    }

    #[instrument(skip(self), fields(owner = %self.settings.owner, repository = %self.settings.repository))]
    async fn publish(&self, workspace: &Path) -> Result<Outcome> {
        let api = Api { client: self.client()?, sink: self };
        api.ensure_repository().await?;

        let root = workspace.to_path_buf();
        let files = tokio::task::spawn_blocking(move || tree::relative_files(&root))
            .await
            .or_raise(|| ErrorKind::Task)?
            .or_raise(|| ErrorKind::Filesystem(workspace.to_path_buf()))?;
        let batches = batches(&files, self.settings.batch_size);
        let message = self.message();

        let mut head = api.branch_head().await?;
        for (index, batch) in batches.iter().enumerate() {
            tracing::info!(batch = index + 1, of = batches.len(), files = batch.len(), "Uploading batch");
            head = Some(api.commit_batch(workspace, batch, head.as_ref(), &message).await?);
        }
        Ok(Outcome::Uploaded { files: files.len(), batches: batches.len() })
    }
}
