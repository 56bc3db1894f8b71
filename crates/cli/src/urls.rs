//! Reading the crawl list.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::collections::HashSet;
use std::path::Path;

/// One URL per line. Blank lines and `#` comments are skipped and repeated
/// URLs keep their first position.
pub fn parse(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| seen.insert(*line))
        .map(str::to_string)
        .collect()
}

pub fn read(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).or_raise(|| ErrorKind::Urls(path.to_path_buf()))?;
    let urls = parse(&text);
    for url in urls.iter().filter(|url| !url.starts_with("http://") && !url.starts_with("https://")) {
        tracing::warn!(url = %url, "Not an http(s) URL; it will fail to fetch");
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse() {
        let text = "# pages\nhttps://example.com/\n\n  https://example.com/about/  \nhttps://example.com/\n#https://example.com/draft/\n";
        assert_eq!(parse(text), vec!["https://example.com/", "https://example.com/about/"]);
    }

    #[test]
    fn test_read_missing_file() {
        let err = read(Path::new("/definitely/not/here.txt")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Urls(_)));
    }

    #[test]
    fn test_read_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "https://example.com/feed/\n").unwrap();
        assert_eq!(read(file.path()).unwrap(), vec!["https://example.com/feed/"]);
    }
}
