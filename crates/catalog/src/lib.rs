//! Book catalog records and everything that happens to them before indexing.
//!
//! - [`models`]: the [`BookRecord`](models::BookRecord) supplied by the
//!   catalog parser, the searchable [`Field`](models::Field)s and their
//!   canonical values.
//! - [`filter`]: the optional allow/deny lists and record predicate that
//!   decide which records are indexed.
//! - [`source`]: the event stream the record supplier produces.

pub mod error;
pub mod filter;
pub mod models;
pub mod source;

pub use crate::filter::RecordFilter;
pub use crate::source::{RecordSource, SourceEvent};
