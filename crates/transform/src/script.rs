//! Neutralizing server-side endpoints referenced from scripts.

use regex::bytes::{Captures, Regex};

/// Replaces quoted string literals that mention a dynamic endpoint with an
/// inert `"#"` (keeping the original quote character).
#[derive(Debug, Clone)]
pub(crate) struct Endpoints {
    matcher: Option<Regex>,
}

impl Endpoints {
    pub(crate) fn new<S: AsRef<str>>(endpoints: &[S]) -> Self {
        let alternatives: Vec<String> = endpoints
            .iter()
            .map(|e| e.as_ref().trim_matches('/'))
            .filter(|e| !e.is_empty())
            .map(|e| e.split('/').map(regex::escape).collect::<Vec<_>>().join(r"(?:/|\\/)"))
            .collect();
        if alternatives.is_empty() {
            return Self { matcher: None };
        }
        let endpoints = alternatives.join("|");
        let pattern = format!(r#""(?:[^"\\\n]|\\.)*(?:{endpoints})(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*(?:{endpoints})(?:[^'\\\n]|\\.)*'"#);
        let matcher = Regex::new(&pattern).ok();
        if matcher.is_none() {
            tracing::warn!(endpoints = %endpoints, "Could not compile endpoint matcher; scripts will keep dynamic endpoints");
        }
        Self { matcher }
    }

    pub(crate) fn neutralize(&self, script: &[u8]) -> Vec<u8> {
        let Some(matcher) = &self.matcher else {
            return script.to_vec();
        };
        matcher
            .replace_all(script, |caps: &Captures<'_>| {
                let quote = caps[0][0];
                vec![quote, b'#', quote]
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r#"var ajax = "/wp-admin/admin-ajax.php";"#, r##"var ajax = "#";"##)]
    #[case(r#"fetch('/wp-json/wp/v2/posts?x=1')"#, r#"fetch('#')"#)]
    #[case(r#"{"root":"https:\/\/example.com\/wp-json\/"}"#, r##"{"root":"#"}"##)]
    #[case(r#"var a = "wp-admin\/admin-ajax.php", b = "keep";"#, r##"var a = "#", b = "keep";"##)]
    #[case(r#"var s = "/wp-content/app.js";"#, r#"var s = "/wp-content/app.js";"#)]
    #[case(r#"var s = "say \"wp-json\" twice";"#, r##"var s = "#";"##)]
    fn test_neutralize(#[case] input: &str, #[case] expected: &str) {
        let endpoints = Endpoints::new(&["wp-admin/admin-ajax.php", "/wp-json/"]);
        assert_eq!(String::from_utf8(endpoints.neutralize(input.as_bytes())).unwrap(), expected);
    }

    #[test]
    fn test_no_endpoints_is_identity() {
        let endpoints = Endpoints::new::<&str>(&[]);
        assert_eq!(endpoints.neutralize(b"'/wp-json/'"), b"'/wp-json/'".to_vec());
    }
}
