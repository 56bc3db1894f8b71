//! Synchronous helpers over directory trees shared by the sinks and the
//! asset phase of a run.
//!
//! All functions here block; async callers run them on the blocking pool.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File types never published: executables, server configuration, version
/// control metadata, databases and logs.
pub const EXCLUDED_EXTENSIONS: &[&str] = &[
    "php", "phtml", "phar", "exe", "dll", "so", "sh", "bash", "bat", "cmd", "ps1", "cgi", "pl", "py", "ini", "conf",
    "cfg", "env", "sql", "sqlite", "sqlite3", "db", "mdb", "log", "bak", "swp",
];

/// File and directory names never published.
pub const EXCLUDED_NAMES: &[&str] = &[".git", ".svn", ".hg", ".htaccess", ".htpasswd", ".env", ".DS_Store"];

/// Whether any component of `path` is excluded by name, or the file itself
/// by extension.
pub fn is_excluded(path: &Path) -> bool {
    let excluded_name = path.components().any(|c| EXCLUDED_NAMES.iter().any(|name| c.as_os_str() == OsStr::new(name)));
    let excluded_ext = path
        .extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| EXCLUDED_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)));
    excluded_name || excluded_ext
}

/// Outcome of a tree copy. Individual failures are logged and counted
/// rather than aborting the copy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyReport {
    pub copied: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for CopyReport {
    fn add_assign(&mut self, other: Self) {
        self.copied += other.copied;
        self.failed += other.failed;
    }
}

/// Every publishable regular file under `root`, as sorted relative paths.
pub fn relative_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if !is_excluded(relative) {
            files.push(relative.to_path_buf());
        }
    }
    Ok(files)
}

/// Copy `source` (a file or a directory) to `destination`, skipping
/// excluded entries and symbolic links.
pub fn copy_tree(source: &Path, destination: &Path) -> CopyReport {
    let mut report = CopyReport::default();
    if source.is_file() {
        match copy_file(source, destination) {
            Ok(()) => report.copied += 1,
            Err(e) => {
                tracing::warn!(path = %source.display(), error = %e, "Could not copy file");
                report.failed += 1;
            },
        }
        return report;
    }
    let walker = WalkDir::new(source).min_depth(1).into_iter().filter_entry(|entry| {
        entry.path().strip_prefix(source).map(|relative| !is_excluded(relative)).unwrap_or(false)
    });
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read directory entry");
                report.failed += 1;
                continue;
            },
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        match copy_file(entry.path(), &destination.join(relative)) {
            Ok(()) => report.copied += 1,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Could not copy file");
                report.failed += 1;
            },
        }
    }
    report
}

fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to).map(|_| ())
}

/// Delete everything directly inside `dir` except entries named in `keep`.
/// Returns the number of top-level entries removed.
pub fn wipe_contents(dir: &Path, keep: &[&str]) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if keep.iter().any(|name| entry.file_name() == OsStr::new(name)) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
        removed += 1;
    }
    Ok(removed)
}

/// Remove every empty directory below `root` (never `root` itself),
/// deepest first. Returns how many were removed.
pub fn prune_empty_dirs(root: &Path) -> usize {
    let mut removed = 0;
    let dirs: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect();
    for dir in dirs {
        let empty = fs::read_dir(&dir).map(|mut entries| entries.next().is_none()).unwrap_or(false);
        if empty && fs::remove_dir(&dir).is_ok() {
            removed += 1;
        }
    }
    removed
}

/// Whether `dir` contains, at any depth, a file `accept` lets through.
pub fn has_files(dir: &Path, accept: impl Fn(&Path) -> bool) -> bool {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| entry.file_type().is_file() && accept(entry.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, data: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[rstest]
    #[case("index.html", false)]
    #[case("wp-content/uploads/a.png", false)]
    #[case("wp-config.php", true)]
    #[case("debug.LOG", true)]
    #[case(".git/config", true)]
    #[case("sub/.htaccess", true)]
    #[case("backup/site.sql", true)]
    #[case("gitlike/file.txt", false)]
    fn test_is_excluded(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(is_excluded(Path::new(path)), expected);
    }

    #[test]
    fn test_copy_tree_skips_excluded() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "index.html", "home");
        write(src.path(), "about/index.html", "about");
        write(src.path(), "about/notes.log", "secret");
        write(src.path(), ".git/HEAD", "ref");

        let report = copy_tree(src.path(), dst.path());
        assert_eq!(report, CopyReport { copied: 2, failed: 0 });
        assert_eq!(
            relative_files(dst.path()).unwrap(),
            vec![PathBuf::from("about/index.html"), PathBuf::from("index.html")]
        );
        assert!(!dst.path().join(".git").exists());
    }

    #[test]
    fn test_copy_single_file() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "robots.txt", "User-agent: *");
        let report = copy_tree(&src.path().join("robots.txt"), &dst.path().join("nested/robots.txt"));
        assert_eq!(report.copied, 1);
        assert_eq!(fs::read_to_string(dst.path().join("nested/robots.txt")).unwrap(), "User-agent: *");
    }

    #[test]
    fn test_wipe_keeps_named_entries() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ".git/HEAD", "ref");
        write(dir.path(), "old/index.html", "x");
        write(dir.path(), "stale.txt", "x");
        assert_eq!(wipe_contents(dir.path(), &[".git"]).unwrap(), 2);
        assert!(dir.path().join(".git/HEAD").exists());
        assert!(!dir.path().join("old").exists());
    }

    #[test]
    fn test_prune_empty_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        write(dir.path(), "d/keep.txt", "x");
        assert_eq!(prune_empty_dirs(dir.path()), 3);
        assert!(!dir.path().join("a").exists());
        assert!(dir.path().join("d/keep.txt").exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn test_has_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "logs/a.log", "x");
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        assert!(!has_files(&dir.path().join("logs"), |p| !is_excluded(p)));
        assert!(!has_files(&dir.path().join("empty"), |_| true));
        assert!(has_files(dir.path(), |_| true));
    }
}
