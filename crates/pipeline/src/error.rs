//! Pipeline Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. These never reach the caller of
//! [`Pipeline::run`](crate::Pipeline::run); they are reported through the
//! [`RunResult`](crate::RunResult) and the observer.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A pipeline error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Another run holds a live lease.
    #[display("another run is already in progress")]
    AlreadyRunning,
    /// The run marker could not be created, read or removed.
    #[display("could not manage the run marker at {}", _0.display())]
    Lease(#[error(not(source))] PathBuf),
    /// The log cannot be cleared while a run is active.
    #[display("the run log cannot be cleared while a run is active")]
    LogLocked,
    /// Settings failed validation.
    #[display("invalid settings")]
    Settings,
    /// No sink is enabled, so the run would produce nothing.
    #[display("no sink is enabled")]
    NoSinks,
    /// The workspace could not be prepared or written.
    #[display("workspace error at {}", _0.display())]
    Workspace(#[error(not(source))] PathBuf),
    /// The HTTP fetcher could not be constructed.
    #[display("could not prepare the fetcher")]
    Fetcher,
    /// An exclusion pattern or asset path is unusable.
    #[display("invalid asset configuration: {_0}")]
    Assets(#[error(not(source))] String),
    /// A background task panicked or was cancelled.
    #[display("background task failed")]
    Task,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::LogLocked)
    }
}
