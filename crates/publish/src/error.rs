//! Publish Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A publish error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for publish operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Reading the workspace or writing the destination failed.
    #[display("filesystem error at {}", _0.display())]
    Filesystem(#[error(not(source))] PathBuf),
    /// The destination is not an existing repository.
    #[display("not a git repository: {}", _0.display())]
    NotARepository(#[error(not(source))] PathBuf),
    /// No git executable passed validation.
    #[display("no trusted git executable found")]
    GitUnavailable,
    /// A git invocation exited unsuccessfully; the output is redacted.
    #[display("git {command} failed: {output}")]
    Git { command: String, output: String },
    /// An external process or request did not finish in time.
    #[display("timed out: {_0}")]
    Timeout(#[error(not(source))] String),
    /// Pushing to the remote failed; the output is redacted.
    #[display("push failed: {_0}")]
    Push(#[error(not(source))] String),
    /// A secret the sink needs is not available.
    #[display("missing credential: {_0}")]
    MissingCredential(#[error(not(source))] &'static str),
    /// The hosting API rejected a request.
    #[display("API request to {endpoint} failed with status {status}")]
    Api { endpoint: String, status: u16 },
    /// The hosting API could not be reached or answered garbage.
    #[display("API request to {_0} failed")]
    Request(#[error(not(source))] String),
    /// A background task panicked or was cancelled.
    #[display("background task failed")]
    Task,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Request(_) | Self::Push(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
