//! Search Error Types

use derive_more::{Display, Error};

/// A search error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Reading an index table failed.
    #[display("index store error")]
    Store,
    /// The engine was used after [`close`](crate::SearchEngine::close).
    /// This is a bug in the caller.
    #[display("query on closed engine")]
    Closed,
    /// The index is being (re)built; try again once it is ready.
    #[display("index is busy rebuilding")]
    Busy,
    #[display("invalid query: {_0}")]
    InvalidQuery(#[error(not(source))] String),
    /// The intersection worker pool could not be started or died mid-task.
    #[display("intersection worker pool failure")]
    Pool,
    #[display("index build failed")]
    Build,
    /// Configuration or filter file problems; fix the input and retry.
    #[display("invalid configuration")]
    Config,
    /// The store holds no complete index.
    #[display("index is not ready")]
    NotReady,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store | Self::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_is_not_retryable() {
        assert!(!ErrorKind::Closed.is_retryable());
        assert!(ErrorKind::Busy.is_retryable());
    }
}
