//! Store Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Backends raise these; higher layers wrap them in their
//! own kinds with `or_raise`.

use derive_more::{Display, Error};

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Clone, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    /// Table names are interpolated into SQL, so anything outside
    /// `[a-z0-9_]` is refused before it gets near a statement.
    #[display("invalid table name: {_0}")]
    InvalidTable(#[error(not(source))] String),
    #[display("table not found: {_0}")]
    TableNotFound(#[error(not(source))] String),
    #[display("table already exists: {_0}")]
    TableExists(#[error(not(source))] String),
    /// A unique index rejected an insert.
    #[display("unique key violation in table {_0}")]
    Constraint(#[error(not(source))] String),
    #[display("key range bounds must be of the same kind")]
    MixedKeyRange,
    /// Serialization/deserialization error.
    #[display("invalid row data")]
    InvalidData,
    #[display("store is closed")]
    Closed,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}
