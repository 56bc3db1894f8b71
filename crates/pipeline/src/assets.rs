//! Static files copied next to the rendered pages, and the exclusion pass
//! that runs before anything is published.
//!
//! Everything here blocks and is run on the blocking pool.

use crate::error::{ErrorKind, Result};
use freeze_config::AssetSettings;
use freeze_publish::tree::{self, CopyReport};
use freeze_transform::{AssetKind, Transformer};
use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Never published, whatever the configuration says: this tool's own
/// directories, the output of other static-export plugins, and translation
/// sources.
pub const FORCE_EXCLUDE: &[&str] = &[
    "**/plugins/freeze",
    "**/freeze-cache",
    "**/plugins/simply-static",
    "**/uploads/simply-static",
    "**/plugins/wp2static",
    "**/uploads/wp2static-*",
    "**/plugins/static-html-output-plugin",
    "**/uploads/static-html-output-plugin",
    "**/*.po",
    "**/*.pot",
];

const MATCH_OPTIONS: MatchOptions =
    MatchOptions { case_sensitive: true, require_literal_separator: true, require_literal_leading_dot: false };

/// Compiled exclusion patterns, matched against workspace-relative paths.
#[derive(Debug, Clone)]
pub struct Exclusions {
    patterns: Vec<Pattern>,
}

impl Exclusions {
    /// The force list plus `user` patterns and any `extra` literal paths
    /// (such as a cache directory that lives inside the site root).
    pub fn new<S: AsRef<str>>(user: &[S], extra: &[PathBuf]) -> Result<Self> {
        let mut patterns = Vec::with_capacity(FORCE_EXCLUDE.len() + user.len() + extra.len());
        for raw in FORCE_EXCLUDE.iter().copied().chain(user.iter().map(AsRef::as_ref)) {
            let trimmed = raw.trim_start_matches('/');
            let pattern = Pattern::new(trimmed).map_err(|e| exn::Exn::from(ErrorKind::Assets(format!("{raw}: {e}"))))?;
            patterns.push(pattern);
        }
        for path in extra {
            let literal = Pattern::escape(&path.to_string_lossy());
            if let Ok(pattern) = Pattern::new(&literal) {
                patterns.push(pattern);
            }
        }
        Ok(Self { patterns })
    }

    pub fn matches(&self, relative: &Path) -> bool {
        self.patterns.iter().any(|p| p.matches_path_with(relative, MATCH_OPTIONS))
    }

    /// Delete every file and directory under `root` that matches. Returns
    /// how many entries were removed.
    pub fn apply(&self, root: &Path) -> usize {
        let mut doomed: Vec<(PathBuf, bool)> = Vec::new();
        let mut walker = WalkDir::new(root).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let Ok(entry) = entry else {
                continue;
            };
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            if !self.matches(relative) {
                continue;
            }
            let is_dir = entry.file_type().is_dir();
            if is_dir {
                walker.skip_current_dir();
            }
            doomed.push((entry.into_path(), is_dir));
        }
        let mut removed = 0;
        for (path, is_dir) in doomed {
            let result = if is_dir { fs::remove_dir_all(&path) } else { fs::remove_file(&path) };
            match result {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not remove excluded entry"),
            }
        }
        removed
    }
}

/// Copy the configured asset directories and extra includes from the site
/// root into the workspace, then rewrite the stylesheets and scripts among
/// them.
pub fn copy_assets(settings: &AssetSettings, workspace: &Path, transformer: &Transformer) -> CopyReport {
    let mut report = CopyReport::default();
    let Some(site_root) = settings.site_root.as_deref() else {
        return report;
    };
    for raw in settings.directories.iter().chain(settings.include.iter()) {
        let relative = match freeze_storage::validate_path(raw) {
            Ok(relative) => relative,
            Err(e) => {
                tracing::warn!(path = raw, error = %&*e, "Skipping asset path outside the site root");
                report.failed += 1;
                continue;
            },
        };
        let source = site_root.join(&relative);
        if !source.exists() {
            tracing::warn!(path = %source.display(), "Asset path does not exist");
            continue;
        }
        let destination = workspace.join(&relative);
        let copied = tree::copy_tree(&source, &destination);
        tracing::debug!(path = raw, copied = copied.copied, failed = copied.failed, "Copied assets");
        report += copied;
        report.failed += rewrite_assets(&destination, transformer);
    }
    report
}

/// Rewrite CSS and JavaScript files under `root` (a file or a directory) in
/// place. Returns the number of files that could not be rewritten.
fn rewrite_assets(root: &Path, transformer: &Transformer) -> usize {
    let mut failed = 0;
    for entry in WalkDir::new(root).into_iter().filter_map(std::result::Result::ok) {
        let kind = AssetKind::from_path(entry.path());
        if !entry.file_type().is_file() || !kind.is_rewritten() {
            continue;
        }
        let result = fs::read(entry.path()).and_then(|raw| {
            let rewritten = transformer.asset(&raw, kind);
            if rewritten == raw { Ok(()) } else { fs::write(entry.path(), rewritten) }
        });
        if let Err(e) = result {
            tracing::warn!(path = %entry.path().display(), error = %e, "Could not rewrite asset");
            failed += 1;
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;
    use url::Url;

    fn write(root: &Path, relative: &str, data: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    fn transformer() -> Transformer {
        let origin = Url::parse("https://example.com").unwrap();
        Transformer::new([&origin], &["wp-admin/admin-ajax.php"])
    }

    #[rstest]
    #[case("wp-content/plugins/freeze", true)]
    #[case("wp-content/plugins/freeze/readme.txt", false)]
    #[case("wp-content/uploads/simply-static", true)]
    #[case("wp-content/uploads/wp2static-processed-site", true)]
    #[case("wp-content/languages/de_DE.po", true)]
    #[case("theme.pot", true)]
    #[case("wp-content/uploads/2024/photo.jpg", false)]
    #[case("drafts/notes.txt", true)]
    #[case("drafts", false)]
    #[case("var/cache/freeze", true)]
    fn test_matches(#[case] path: &str, #[case] expected: bool) {
        let exclusions = Exclusions::new(&["drafts/*"], &[PathBuf::from("var/cache/freeze")]).unwrap();
        assert_eq!(exclusions.matches(Path::new(path)), expected);
    }

    #[test]
    fn test_invalid_user_pattern() {
        let err = Exclusions::new(&["[unclosed"], &[]).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Assets(_)));
    }

    #[test]
    fn test_apply_removes_matches() {
        let ws = TempDir::new().unwrap();
        write(ws.path(), "index.html", "home");
        write(ws.path(), "wp-content/plugins/wp2static/a.js", "x");
        write(ws.path(), "wp-content/plugins/wp2static/deep/b.js", "x");
        write(ws.path(), "wp-content/languages/fr_FR.po", "x");
        write(ws.path(), "wp-content/uploads/a.png", "x");

        let removed = Exclusions::new::<&str>(&[], &[]).unwrap().apply(ws.path());
        assert_eq!(removed, 2);
        assert_eq!(
            tree::relative_files(ws.path()).unwrap(),
            vec![PathBuf::from("index.html"), PathBuf::from("wp-content/uploads/a.png")]
        );
    }

    #[test]
    fn test_copy_assets_rewrites_css_and_js() {
        let site = TempDir::new().unwrap();
        write(site.path(), "wp-content/themes/t/style.css", "body{background:url(https://example.com/bg.png)}");
        write(site.path(), "wp-content/themes/t/app.js", r#"fetch("https://example.com/wp-admin/admin-ajax.php")"#);
        write(site.path(), "wp-content/themes/t/logo.svg", "<svg/>");
        write(site.path(), "wp-content/themes/t/functions.php", "<?php");
        write(site.path(), "robots.txt", "User-agent: *");
        let ws = TempDir::new().unwrap();
        let settings = AssetSettings {
            site_root: Some(site.path().to_path_buf()),
            directories: vec!["wp-content/themes".into()],
            include: vec!["robots.txt".into(), "missing/dir".into()],
            ..Default::default()
        };

        let report = copy_assets(&settings, ws.path(), &transformer());
        assert_eq!(report, CopyReport { copied: 4, failed: 0 });
        let css = fs::read_to_string(ws.path().join("wp-content/themes/t/style.css")).unwrap();
        assert_eq!(css, "body{background:url(/bg.png)}");
        let js = fs::read_to_string(ws.path().join("wp-content/themes/t/app.js")).unwrap();
        assert_eq!(js, r##"fetch("#")"##);
        assert!(!ws.path().join("wp-content/themes/t/functions.php").exists());
        assert!(ws.path().join("robots.txt").is_file());
    }

    #[test]
    fn test_copy_assets_rejects_traversal() {
        let site = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        let settings = AssetSettings {
            site_root: Some(site.path().to_path_buf()),
            include: vec!["../../etc".into()],
            ..Default::default()
        };
        assert_eq!(copy_assets(&settings, ws.path(), &transformer()).failed, 1);
    }
}
