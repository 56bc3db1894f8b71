//! Relative path validation.
//!
//! Every path handed to a backend is relative to the store root. Validation
//! resolves `.` and `..` lexically and refuses anything that would climb out
//! of the root, so a crafted URL or cache key can never address a file
//! outside the workspace.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Normalizes a store-relative path, rejecting traversal and null bytes.
///
/// Leading slashes are ignored (the path is always relative to the store
/// root) and a path that normalizes to nothing is invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use freeze_storage::validate_path;
///
/// assert!(validate_path("blog/index.html").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert_eq!(validate_path("/feed//./index.xml").unwrap(), Path::new("feed/index.xml"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(original.to_path_buf());
    let mut normalized: Vec<&std::ffi::OsStr> = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(segment) => {
                // Null bytes survive Path::components() on Unix but truncate
                // the path once it reaches a syscall.
                if segment.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                normalized.push(segment);
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if normalized.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    if normalized.is_empty() {
        exn::bail!(invalid());
    }
    Ok(normalized.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        assert_eq!(validate("about/index.html").unwrap(), Path::new("about/index.html"));
        assert_eq!(validate("index.html").unwrap(), Path::new("index.html"));
    }

    #[test]
    fn test_leading_slash_is_relative() {
        assert_eq!(validate("/feed/index.xml").unwrap(), Path::new("feed/index.xml"));
    }

    #[test]
    fn test_normalization() {
        assert_eq!(validate("a//b/./c/").unwrap(), Path::new("a/b/c"));
        assert_eq!(validate("a/b/..").unwrap(), Path::new("a"));
    }

    #[test]
    fn test_traversal_rejected() {
        assert!(validate("../secret").is_err());
        assert!(validate("assets/../../secret").is_err());
        assert!(validate("..").is_err());
    }

    #[test]
    fn test_null_and_empty_rejected() {
        assert!(validate("a\0b").is_err());
        assert!(validate("").is_err());
        assert!(validate("./").is_err());
        assert!(validate("/").is_err());
    }
}
