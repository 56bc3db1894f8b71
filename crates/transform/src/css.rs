//! `url(...)` and `@import` target rewriting for stylesheets.
//!
//! A small token scanner rather than a regex: unquoted `url()` targets may
//! legally contain balanced parentheses and quoted ones may contain `)`, and
//! both have to come out of the rewrite byte-for-byte intact apart from the
//! target itself.

use crate::consts::CSS_IMPORT_REGEX;
use regex::bytes::Captures;

/// Rewrite every `url(...)` target with `rewrite`; targets for which it
/// returns `None` are copied verbatim. Unterminated tokens end the scan and
/// the remainder is copied as-is.
pub fn rewrite_urls(css: &[u8], rewrite: impl Fn(&[u8]) -> Option<Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::with_capacity(css.len());
    let mut cursor = 0;
    while let Some(offset) = find_url_open(&css[cursor..]) {
        let open = cursor + offset;
        // Everything up to and including `url(`.
        let body_start = open + 4;
        out.extend_from_slice(&css[cursor..body_start]);
        let Some(token) = scan_url_body(&css[body_start..]) else {
            cursor = body_start;
            break;
        };
        let target = &css[body_start + token.target.start..body_start + token.target.end];
        match rewrite(target) {
            Some(replacement) => {
                out.extend_from_slice(&css[body_start..body_start + token.target.start]);
                out.extend_from_slice(&replacement);
                out.extend_from_slice(&css[body_start + token.target.end..body_start + token.len]);
            },
            None => out.extend_from_slice(&css[body_start..body_start + token.len]),
        }
        cursor = body_start + token.len;
    }
    out.extend_from_slice(&css[cursor..]);
    out
}

/// Rewrite the quoted form `@import "target"`; the `@import url(...)` form
/// is covered by [`rewrite_urls`].
pub fn rewrite_imports(css: &[u8], rewrite: impl Fn(&[u8]) -> Option<Vec<u8>>) -> Vec<u8> {
    CSS_IMPORT_REGEX
        .replace_all(css, |caps: &Captures<'_>| {
            let whole = caps.get(0).map(|m| m.as_bytes()).unwrap_or_default();
            let (Some(prefix), Some(target)) = (caps.name("prefix"), caps.name("dq").or_else(|| caps.name("sq")))
            else {
                return whole.to_vec();
            };
            match rewrite(target.as_bytes()) {
                Some(replacement) => {
                    let quote = whole[prefix.len()];
                    let mut out = prefix.as_bytes().to_vec();
                    out.push(quote);
                    out.extend_from_slice(&replacement);
                    out.push(quote);
                    out
                },
                None => whole.to_vec(),
            }
        })
        .into_owned()
}

struct UrlToken {
    /// Range of the target, relative to the start of the token body.
    target: std::ops::Range<usize>,
    /// Length of the body including the closing `)`.
    len: usize,
}

fn find_url_open(haystack: &[u8]) -> Option<usize> {
    haystack.windows(4).enumerate().find_map(|(i, w)| {
        let preceded_by_ident = i > 0 && matches!(haystack[i - 1], b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_');
        (w.eq_ignore_ascii_case(b"url(") && !preceded_by_ident).then_some(i)
    })
}

/// Scan the body of a `url(` token (the bytes after the opening paren).
fn scan_url_body(body: &[u8]) -> Option<UrlToken> {
    let mut i = 0;
    while i < body.len() && body[i].is_ascii_whitespace() {
        i += 1;
    }
    let quote = body.get(i).copied().filter(|c| *c == b'"' || *c == b'\'');
    let (target, mut i) = match quote {
        Some(q) => {
            let start = i + 1;
            let mut j = start;
            while j < body.len() && body[j] != q {
                j += if body[j] == b'\\' { 2 } else { 1 };
            }
            if j >= body.len() {
                return None;
            }
            (start..j, j + 1)
        },
        None => {
            let start = i;
            let mut depth = 0usize;
            let mut j = start;
            while j < body.len() {
                match body[j] {
                    b'\\' => j += 1,
                    b'(' => depth += 1,
                    b')' if depth == 0 => break,
                    b')' => depth -= 1,
                    _ => {},
                }
                j += 1;
            }
            if j >= body.len() {
                return None;
            }
            let mut end = j;
            while end > start && body[end - 1].is_ascii_whitespace() {
                end -= 1;
            }
            (start..end, j)
        },
    };
    while i < body.len() && body[i].is_ascii_whitespace() {
        i += 1;
    }
    (body.get(i) == Some(&b')')).then_some(UrlToken { target, len: i + 1 })
}
