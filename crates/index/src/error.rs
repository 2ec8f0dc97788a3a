//! Build Error Types
//!
//! Each phase of the build pipeline has its own kind, so the error tree says
//! where a build died. Any of them means the index is not usable; readiness
//! is only ever decided by the presence of the terminal config record.

use derive_more::{Display, Error};

/// A build error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for build operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The record supplier failed mid-stream.
    #[display("record source failed")]
    Source,
    #[display("failed to build field indices")]
    Index,
    #[display("failed to optimize field index: {_0}")]
    Optimize(#[error(not(source))] &'static str),
    #[display("failed to collect corpus statistics")]
    Stats,
    #[display("failed to write index metadata")]
    Finalize,
    /// The index metadata exists but can't be read back.
    #[display("index metadata is unreadable")]
    Meta,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Builds are never retried automatically; this only tells an operator
    /// whether running the build again is worth a try.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimize_display_names_field() {
        assert_eq!(ErrorKind::Optimize("series").to_string(), "failed to optimize field index: series");
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::Source.is_retryable());
        assert!(!ErrorKind::Finalize.is_retryable());
    }
}
