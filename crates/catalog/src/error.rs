//! Catalog Error Types
//!
//! Everything in here happens before a build starts: loading the filter
//! file, compiling its predicate, reading records from the source.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The filter file could not be read.
    #[display("unable to read filter file: {}", _0.display())]
    FilterFile(#[error(not(source))] PathBuf),
    /// The filter file is not valid, or its predicate doesn't parse.
    #[display("malformed filter: {_0}")]
    MalformedFilter(#[error(not(source))] String),
    /// A custom predicate was given without explicitly allowing it.
    #[display("custom filter predicate requires the unsafe filter option to be enabled")]
    UnsafeFilter,
    /// The upstream record supplier failed.
    #[display("record source error: {_0}")]
    Source(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FilterFile(_) | Self::Source(_))
    }

    /// Returns `true` for errors caused by configuration rather than data.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::FilterFile(_) | Self::MalformedFilter(_) | Self::UnsafeFilter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsafe_filter_is_configuration_error() {
        assert!(ErrorKind::UnsafeFilter.is_configuration());
        assert!(!ErrorKind::UnsafeFilter.is_retryable());
        assert!(!ErrorKind::Source("eof".to_string()).is_configuration());
    }

    #[test]
    fn test_display() {
        let err = ErrorKind::FilterFile(PathBuf::from("/tmp/filter.json"));
        assert_eq!(err.to_string(), "unable to read filter file: /tmp/filter.json");
    }
}
