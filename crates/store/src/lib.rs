//! Persistent table store for catalog indices.
//!
//! The index builder and the search engine only ever talk to a
//! [`TableStore`]: named tables of rows carrying an id, an optional indexed
//! key, a flag bit and a JSON payload. [`Table`] layers typed rows on top.
//!
//! # Backends
//! - [`SqliteStore`]: the real thing, one SQLite database per index.
//! - [`MemoryStore`] (feature `mock`): a `HashMap` of `BTreeMap`s for tests.

pub mod backend;
pub mod error;
mod models;
mod table;

#[cfg(any(test, feature = "mock"))]
pub use crate::backend::MemoryStore;
pub use crate::backend::{SqliteStore, StoreOptions, TableStore};
pub use crate::models::{IndexKind, InsertMode, Key, RawRow, Record, Selector, TableOptions};
pub use crate::table::Table;
use std::sync::Arc;

pub type StoreHandle = Arc<dyn TableStore + Send + Sync>;
