//! Absolute to root-relative URL rewriting.

use regex::bytes::{Captures, Regex, RegexBuilder};
use std::borrow::Cow;
use url::Url;

/// Compiled matcher for every spelling of the site's own origin(s).
///
/// Matches `http://host`, `https://host`, protocol-relative `//host` and the
/// JSON-escaped `https:\/\/host`, with any port, and replaces them (plus the
/// slashes that follow) with a single `/`. `data:` URIs are matched first
/// and passed through untouched so an embedded document is never altered.
#[derive(Debug, Clone)]
pub struct Origins {
    matcher: Option<Regex>,
}

impl Origins {
    /// Build a matcher from the site's origins; hosts are compared
    /// case-insensitively and duplicates are ignored.
    pub fn new<'a>(origins: impl IntoIterator<Item = &'a Url>) -> Self {
        let mut hosts: Vec<String> =
            origins.into_iter().filter_map(|u| u.host_str()).map(|h| regex::escape(&h.to_ascii_lowercase())).collect();
        hosts.sort();
        hosts.dedup();
        if hosts.is_empty() {
            return Self { matcher: None };
        }
        let hosts = hosts.join("|");
        // The trailing alternatives stand in for a negative lookahead: the
        // host must not continue (`example.com.evil.net`, `example.community`).
        let pattern = format!(
            r#"(?P<data>\bdata:[^"'\s)]*)|(?P<escaped>(?:https?:)?\\/\\/(?:{hosts})(?::\d+)?(?:(?:\\/)+|(?P<enext>[^A-Za-z0-9.\-_:\\]|$)))|(?P<plain>(?:https?:)?//(?:{hosts})(?::\d+)?(?:/+|(?P<next>[^A-Za-z0-9.\-_:/]|$)))"#
        );
        let matcher = RegexBuilder::new(&pattern).case_insensitive(true).build().ok();
        if matcher.is_none() {
            tracing::warn!(hosts = %hosts, "Could not compile origin matcher; URLs will not be rewritten");
        }
        Self { matcher }
    }

    /// Rewrite every origin reference in `input` to root-relative form.
    ///
    /// Idempotent: the output contains no origin references, so a second
    /// pass is a no-op.
    pub fn relativize<'a>(&self, input: &'a [u8]) -> Cow<'a, [u8]> {
        let Some(matcher) = &self.matcher else {
            return Cow::Borrowed(input);
        };
        matcher.replace_all(input, |caps: &Captures<'_>| -> Vec<u8> {
            if let Some(data) = caps.name("data") {
                return data.as_bytes().to_vec();
            }
            if caps.name("escaped").is_some() {
                let mut out = b"\\/".to_vec();
                out.extend_from_slice(caps.name("enext").map(|m| m.as_bytes()).unwrap_or_default());
                return out;
            }
            let mut out = b"/".to_vec();
            out.extend_from_slice(caps.name("next").map(|m| m.as_bytes()).unwrap_or_default());
            out
        })
    }

    /// Rewrite a single URL token (a `url(...)` or `@import` target).
    ///
    /// Returns `None` when the token must stay as it is: `data:` URIs and
    /// fragment-only references, or targets that point elsewhere.
    pub fn relativize_target(&self, target: &[u8]) -> Option<Vec<u8>> {
        let trimmed = target.trim_ascii();
        if trimmed.first() == Some(&b'#') || trimmed.get(..5).is_some_and(|p| p.eq_ignore_ascii_case(b"data:")) {
            return None;
        }
        match self.relativize(trimmed) {
            Cow::Owned(rewritten) => Some(rewritten),
            Cow::Borrowed(_) => None,
        }
    }
}
