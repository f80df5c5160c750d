//! Feature Index Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A feature index error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for feature index operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The source file could not be read from disk.
    #[display("unable to read feature file: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// The document is not a GeoJSON feature collection.
    #[display("malformed feature file")]
    Parse,
    /// A tile feature is missing its address or download location, or its
    /// geometry is unusable. The whole file is rejected.
    #[display("invalid tile feature #{_0}: {_1}")]
    InvalidFeature(#[error(not(source))] usize, #[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::Parse.to_string(), "malformed feature file");
        assert_eq!(ErrorKind::InvalidFeature(3, "missing url").to_string(), "invalid tile feature #3: missing url");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Io(PathBuf::from("tiles.geojson")).is_retryable());
        assert!(!ErrorKind::Parse.is_retryable());
    }
}
