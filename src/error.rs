//! CLI Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A CLI error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for CLI commands.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not open the local store")]
    Store,
    #[display("could not set up basemap fetching")]
    Source,
    #[display("offline area operation failed")]
    Sync,
    #[display("no project configured; set `project` in the configuration file")]
    NoProject,
    #[display("invalid bounds: {_0}")]
    InvalidBounds(#[error(not(source))] &'static str),
    #[display("I/O error: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store | Self::Sync)
    }
}
