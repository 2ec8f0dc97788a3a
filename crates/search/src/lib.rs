//! Multi-field author search over a folio index.
//!
//! A [`SearchQuery`] resolves each present criterion to a set of author ids,
//! intersects the sets on a small dedicated thread pool and returns one page
//! of the sorted result. Resolved id lists are cached by query signature, in
//! memory and in the index store.
//!
//! [`Service`] owns the lifecycle around it: building the index when needed,
//! swapping it in, and refusing queries while it isn't ready.

pub mod cache;
mod engine;
pub mod error;
pub mod pool;
pub mod query;
mod service;

pub use crate::engine::{AuthorSummary, BookList, EngineOptions, SearchEngine, SearchResponse, SeriesBooks};
pub use crate::query::{MatchMode, SearchQuery};
pub use crate::service::{Service, ServiceState};
