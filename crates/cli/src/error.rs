//! CLI Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Settings could not be loaded or failed validation.
    #[display("invalid configuration")]
    Config,
    /// The URL list could not be read.
    #[display("could not read URL list {}", _0.display())]
    Urls(#[error(not(source))] PathBuf),
    /// The content graph snapshot could not be loaded.
    #[display("could not load content graph {}", _0.display())]
    Graph(#[error(not(source))] PathBuf),
    /// The cache directory could not be opened or modified.
    #[display("cache operation failed")]
    Cache,
    /// The tracing subscriber could not be installed.
    #[display("could not initialize logging")]
    Logging,
    #[display("could not write output")]
    Output,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cache)
    }
}
