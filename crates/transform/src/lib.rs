//! Rewriting rendered pages and static assets so they can be served from
//! any static host.
//!
//! Everything here is a pure function over bytes: the [`Transformer`] holds
//! only compiled matchers, and [`url_to_path`] decides where an artifact
//! lands inside the workspace.

mod consts;
mod css;
mod html;
mod origin;
mod path;
mod script;

pub use crate::origin::Origins;
pub use crate::path::url_to_path;
use crate::script::Endpoints;
use std::path::Path;
use url::Url;

/// Kind of a fetched page, derived from its `Content-Type` or its path.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    #[default]
    Html,
    Xml,
    Other,
}

impl ContentKind {
    /// Classify a response. The header wins when present; otherwise the
    /// artifact path decides.
    pub fn detect(content_type: Option<&str>, artifact_path: &str) -> Self {
        match content_type.map(|c| c.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()) {
            Some(mime) if mime == "text/html" || mime == "application/xhtml+xml" => Self::Html,
            Some(mime) if mime.ends_with("/xml") || mime.ends_with("+xml") => Self::Xml,
            Some(mime) if !mime.is_empty() => Self::Other,
            _ => match Path::new(artifact_path).extension().and_then(|e| e.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm") => Self::Html,
                Some(ext) if ext.eq_ignore_ascii_case("xml") => Self::Xml,
                None => Self::Html,
                Some(_) => Self::Other,
            },
        }
    }
}

/// Kind of a static asset file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Css,
    Js,
    Other,
}

impl AssetKind {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        match path.as_ref().extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("css") => Self::Css,
            Some("js" | "mjs") => Self::Js,
            _ => Self::Other,
        }
    }

    /// Whether the file's bytes are rewritten at all; other assets are
    /// copied as they are.
    pub fn is_rewritten(self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// A heuristic finding about a transformed page. The content is still used.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum TransformWarning {
    #[display("output shrank from {before} to {after} bytes")]
    Shrunk { before: usize, after: usize },
    #[display("unbalanced <{tag}> tags: {opened} opened, {closed} closed")]
    Unbalanced { tag: &'static str, opened: usize, closed: usize },
}

/// The result of transforming one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub bytes: Vec<u8>,
    pub warnings: Vec<TransformWarning>,
}

/// Compiled rewriting rules for one run.
#[derive(Debug, Clone)]
pub struct Transformer {
    origins: Origins,
    endpoints: Endpoints,
}

impl Transformer {
    /// `origins` are the site's own origins (site and home URL); `endpoints`
    /// are the path fragments of dynamic endpoints to neutralize in scripts.
    pub fn new<'a, S: AsRef<str>>(origins: impl IntoIterator<Item = &'a Url>, endpoints: &[S]) -> Self {
        Self { origins: Origins::new(origins), endpoints: Endpoints::new(endpoints) }
    }

    pub fn origins(&self) -> &Origins {
        &self.origins
    }

    /// Transform a fetched page.
    #[tracing::instrument(level = "trace", skip(self, raw), fields(len = raw.len()))]
    pub fn page(&self, raw: &[u8], kind: ContentKind) -> Transformed {
        match kind {
            ContentKind::Html => {
                let (bytes, warnings) = html::rewrite(raw, &self.origins);
                Transformed { bytes, warnings }
            },
            ContentKind::Xml | ContentKind::Other => {
                Transformed { bytes: self.origins.relativize(raw).into_owned(), warnings: Vec::new() }
            },
        }
    }

    /// Transform a static asset file.
    pub fn asset(&self, raw: &[u8], kind: AssetKind) -> Vec<u8> {
        match kind {
            AssetKind::Css => self.origins.relativize(&html::rewrite_css(raw, &self.origins)).into_owned(),
            AssetKind::Js => self.endpoints.neutralize(&self.origins.relativize(raw)),
            AssetKind::Other => raw.to_vec(),
        }
    }
}
