//! Sync Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. The component that failed is the
//! kind; the child error in the tree says why.

use derive_more::{Display, Error};

/// A sync error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("no active project")]
    Project,
    #[display("basemap source unavailable")]
    Source,
    #[display("basemap source could not be indexed")]
    Index,
    #[display("local store error")]
    Store,
    #[display("tile download scheduler unavailable")]
    Scheduler,
    #[display("offline area not found: ({_0})")]
    NotFound(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source | Self::Store)
    }
}
