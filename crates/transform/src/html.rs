//! HTML page rewriting.

use crate::consts::{ATTRIBUTE_REGEX, INPUT_TAG_REGEX, LINK_TAG_REGEX, STRUCTURE_TAG_REGEX, STYLE_ATTR_REGEX, STYLE_BLOCK_REGEX};
use crate::css;
use crate::origin::Origins;
use crate::TransformWarning;
use regex::bytes::Captures;

/// Output smaller than this fraction of the input is reported as suspicious.
const SHRINK_THRESHOLD: f64 = 0.10;

pub(crate) fn rewrite(raw: &[u8], origins: &Origins) -> (Vec<u8>, Vec<TransformWarning>) {
    let styled = rewrite_style_blocks(raw, origins);
    let styled = rewrite_style_attributes(&styled, origins);
    let stripped = strip_nonce_inputs(&styled);
    let stripped = strip_discovery_links(&stripped);
    let output = origins.relativize(&stripped).into_owned();
    let warnings = inspect(raw, &output);
    (output, warnings)
}

/// Rewrite `url(...)` and `@import` targets inside `<style>` blocks.
fn rewrite_style_blocks(html: &[u8], origins: &Origins) -> Vec<u8> {
    STYLE_BLOCK_REGEX
        .replace_all(html, |caps: &Captures<'_>| {
            let mut out = caps["open"].to_vec();
            out.extend_from_slice(&rewrite_css(&caps["body"], origins));
            out.extend_from_slice(&caps["close"]);
            out
        })
        .into_owned()
}

fn rewrite_style_attributes(html: &[u8], origins: &Origins) -> Vec<u8> {
    STYLE_ATTR_REGEX
        .replace_all(html, |caps: &Captures<'_>| {
            let value = &caps["value"];
            let quote = value[0];
            let mut out = caps["prefix"].to_vec();
            out.push(quote);
            out.extend_from_slice(&css::rewrite_urls(&value[1..value.len() - 1], |t| origins.relativize_target(t)));
            out.push(quote);
            out
        })
        .into_owned()
}

pub(crate) fn rewrite_css(css_bytes: &[u8], origins: &Origins) -> Vec<u8> {
    let urls = css::rewrite_urls(css_bytes, |t| origins.relativize_target(t));
    css::rewrite_imports(&urls, |t| origins.relativize_target(t))
}

/// Remove hidden form fields carrying one-time tokens; a static copy would
/// serve a stale token to every visitor.
fn strip_nonce_inputs(html: &[u8]) -> Vec<u8> {
    INPUT_TAG_REGEX
        .replace_all(html, |caps: &Captures<'_>| {
            let tag = &caps[0];
            let attrs = attributes(tag);
            let hidden = attr(&attrs, "type").is_some_and(|t| t.eq_ignore_ascii_case("hidden"));
            match attr(&attrs, "name") {
                Some(name) if hidden && is_token_field(name) => Vec::new(),
                _ => tag.to_vec(),
            }
        })
        .into_owned()
}

fn is_token_field(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    matches!(name.as_str(), "_wp_http_referer" | "_token" | "authenticity_token")
        || name.contains("nonce")
        || name.starts_with("csrf")
}

/// Remove REST API discovery, RSD and oEmbed discovery `<link>` tags; their
/// targets do not exist on a static host.
fn strip_discovery_links(html: &[u8]) -> Vec<u8> {
    LINK_TAG_REGEX
        .replace_all(html, |caps: &Captures<'_>| {
            let tag = &caps[0];
            if is_discovery_link(&attributes(tag)) { Vec::new() } else { tag.to_vec() }
        })
        .into_owned()
}

fn is_discovery_link(attrs: &[(String, String)]) -> bool {
    let rel = attr(attrs, "rel").unwrap_or_default().to_ascii_lowercase();
    let kind = attr(attrs, "type").unwrap_or_default().to_ascii_lowercase();
    let rels: Vec<&str> = rel.split_ascii_whitespace().collect();
    rels.contains(&"https://api.w.org/")
        || rels.contains(&"edituri")
        || (rels.contains(&"alternate") && kind == "application/json")
        || kind.contains("json+oembed")
        || kind.contains("xml+oembed")
}

/// Attributes of a single start tag, names lowercased.
fn attributes(tag: &[u8]) -> Vec<(String, String)> {
    ATTRIBUTE_REGEX
        .captures_iter(tag)
        .filter_map(|caps| {
            let name = String::from_utf8_lossy(caps.name("name")?.as_bytes()).to_ascii_lowercase();
            let value = caps.name("dq").or_else(|| caps.name("sq")).or_else(|| caps.name("bare"))?;
            Some((name, String::from_utf8_lossy(value.as_bytes()).into_owned()))
        })
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
}

fn inspect(raw: &[u8], output: &[u8]) -> Vec<TransformWarning> {
    let mut warnings = Vec::new();
    if !raw.is_empty() && (output.len() as f64) < raw.len() as f64 * SHRINK_THRESHOLD {
        warnings.push(TransformWarning::Shrunk { before: raw.len(), after: output.len() });
    }
    for tag in ["html", "head", "body"] {
        let (mut opened, mut closed) = (0usize, 0usize);
        for caps in STRUCTURE_TAG_REGEX.captures_iter(output) {
            if caps["name"].eq_ignore_ascii_case(tag.as_bytes()) {
                if caps["close"].is_empty() { opened += 1 } else { closed += 1 }
            }
        }
        if opened != closed {
            warnings.push(TransformWarning::Unbalanced { tag, opened, closed });
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn origins() -> Origins {
        Origins::new([&Url::parse("https://example.com/").unwrap()])
    }

    fn run(html: &str) -> (String, Vec<TransformWarning>) {
        let (out, warnings) = rewrite(html.as_bytes(), &origins());
        (String::from_utf8(out).unwrap(), warnings)
    }

    #[test]
    fn test_full_document() {
        let html = concat!(
            r#"<html><head><link rel="https://api.w.org/" href="https://example.com/wp-json/">"#,
            r#"<link rel="alternate" type="application/json+oembed" href="https://example.com/wp-json/oembed">"#,
            r#"<link rel="stylesheet" href="https://example.com/style.css">"#,
            r#"<style>body{background:url("https://example.com/bg (1).png")}</style></head>"#,
            r#"<body><div style="background:url(https://example.com/x(2).png)">"#,
            r#"<form><input type="hidden" name="_wpnonce" value="abc"><input type="text" name="q"></form>"#,
            r#"<a href="https://example.com/about/">About</a></div></body></html>"#,
        );
        let (out, warnings) = run(html);
        assert_eq!(
            out,
            concat!(
                r#"<html><head>"#,
                r#"<link rel="stylesheet" href="/style.css">"#,
                r#"<style>body{background:url("/bg (1).png")}</style></head>"#,
                r#"<body><div style="background:url(/x(2).png)">"#,
                r#"<form><input type="text" name="q"></form>"#,
                r#"<a href="/about/">About</a></div></body></html>"#,
            )
        );
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn test_strips_only_hidden_token_fields() {
        let (out, _) = run(concat!(
            r#"<input type=hidden name=_wp_http_referer value="/x">"#,
            r#"<input type='HIDDEN' name='csrf_token' value='1'>"#,
            r#"<input type="hidden" name="comment_post_ID" value="7">"#,
            r#"<input type="text" name="nonce_field">"#,
        ));
        assert_eq!(
            out,
            r#"<input type="hidden" name="comment_post_ID" value="7"><input type="text" name="nonce_field">"#
        );
    }

    #[test]
    fn test_keeps_ordinary_links() {
        let html = r#"<link rel="alternate" type="application/rss+xml" href="/feed/"><link rel="icon" href="/f.ico">"#;
        assert_eq!(run(html).0, html);
    }

    #[test]
    fn test_data_and_fragment_targets_untouched() {
        let html = r#"<div style="mask:url(data:image/svg+xml;utf8,https://example.com/x);clip-path:url(#c)"></div>"#;
        assert_eq!(run(html).0, html);
    }

    #[test]
    fn test_warnings() {
        let (_, warnings) = run("<html><body><p>unterminated");
        assert!(warnings.contains(&TransformWarning::Unbalanced { tag: "html", opened: 1, closed: 0 }));
        assert!(warnings.contains(&TransformWarning::Unbalanced { tag: "body", opened: 1, closed: 0 }));
        assert!(!warnings.iter().any(|w| matches!(w, TransformWarning::Unbalanced { tag: "head", .. })));

        let padding = format!(r#"<input type="hidden" name="_wpnonce" value="{}">"#, "x".repeat(500));
        let (_, warnings) = run(&format!("{padding}<p>"));
        assert!(matches!(warnings.as_slice(), [TransformWarning::Shrunk { .. }]));
    }

    #[test]
    fn test_header_is_not_head() {
        let (_, warnings) = run("<html><head></head><body><header></header></body></html>");
        assert!(warnings.is_empty());
    }
}
