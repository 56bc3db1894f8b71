//! Cache Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The backing store could not be read or written.
    #[display("cache storage error")]
    Storage,
    /// A metadata record could not be encoded or decoded.
    #[display("invalid cache record: {}", _0.display())]
    InvalidRecord(#[error(not(source))] PathBuf),
    /// A content graph snapshot could not be loaded.
    #[display("could not load content graph: {}", _0.display())]
    Graph(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}
