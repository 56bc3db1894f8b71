//! Fetch Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A fetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a single URL could not be retrieved.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The HTTP client could not be constructed.
    #[display("could not build HTTP client")]
    Client,
    /// Connection failure, timeout or an unreadable body.
    #[display("request failed: {_0}")]
    Request(#[error(not(source))] String),
    /// The server answered with something other than `200 OK`.
    #[display("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },
    /// The server answered `200 OK` with nothing in it.
    #[display("empty response body for {_0}")]
    EmptyBody(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Client | Self::EmptyBody(_) => false,
        }
    }
}
