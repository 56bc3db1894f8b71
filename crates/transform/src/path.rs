//! URL to workspace path mapping.
//!
//! Static hosts serve `dir/index.html` for `dir/`, so every extensionless
//! URL becomes a directory with an index file. The mapping is total: any
//! input string produces a non-empty relative path that never leaves the
//! workspace.

use percent_encoding::percent_decode_str;
use std::borrow::Cow;
use url::Url;

/// Path segments that mark a syndication feed; anything under them is XML.
const FEED_SEGMENTS: [&str; 5] = ["feed", "rss", "rss2", "atom", "rdf"];

/// Map a crawl URL (absolute, protocol-relative or a bare path) to its
/// relative artifact path.
///
/// - query and fragment are dropped, segments are percent-decoded, and
///   empty, `.` and `..` segments are dropped
/// - an empty path becomes `index.html`
/// - a last segment containing a dot is kept as a file name
/// - otherwise `/index.xml` is appended under a feed segment and
///   `/index.html` everywhere else
///
/// # Examples
///
/// ```
/// use freeze_transform::url_to_path;
///
/// assert_eq!(url_to_path("https://example.com/"), "index.html");
/// assert_eq!(url_to_path("https://example.com/about/"), "about/index.html");
/// assert_eq!(url_to_path("https://example.com/feed/"), "feed/index.xml");
/// assert_eq!(url_to_path("/sitemap.xml?page=2"), "sitemap.xml");
/// ```
pub fn url_to_path(url: &str) -> String {
    let path = url_path(url);
    let segments: Vec<Cow<'_, str>> = path.split('/').filter_map(decode_segment).collect();
    let Some(last) = segments.last() else {
        return "index.html".to_string();
    };
    let joined = segments.join("/");
    if last.contains('.') {
        joined
    } else if segments.iter().any(|segment| is_feed_segment(segment)) {
        format!("{joined}/index.xml")
    } else {
        format!("{joined}/index.html")
    }
}

/// Percent-decode one path segment. Segments that are empty, `.` or `..`
/// once decoded, or that decode to a path separator, are dropped. A segment
/// that does not decode to UTF-8 is kept as written.
fn decode_segment(segment: &str) -> Option<Cow<'_, str>> {
    let decoded = percent_decode_str(segment).decode_utf8().unwrap_or(Cow::Borrowed(segment));
    let droppable = decoded.is_empty() || decoded == "." || decoded == ".." || decoded.contains(['/', '\\']);
    (!droppable).then_some(decoded)
}

fn is_feed_segment(segment: &str) -> bool {
    FEED_SEGMENTS.iter().any(|feed| segment.eq_ignore_ascii_case(feed))
}

/// The path component of `url`, without query or fragment.
fn url_path(url: &str) -> String {
    let trimmed = url.trim();
    let parsed = if trimmed.starts_with("//") {
        Url::parse(&format!("http:{trimmed}")).ok()
    } else {
        Url::parse(trimmed).ok().filter(|u| u.has_host())
    };
    match parsed {
        Some(url) => url.path().to_string(),
        None => trimmed.split(['?', '#']).next().unwrap_or_default().to_string(),
    }
}
