//! Table store trait and implementations.
//!
//! This module defines the `TableStore` trait, the narrow persistence
//! interface the index builder and search engine are written against. Every
//! table has the same shape: a numeric id, an optional indexed key, a flag
//! bit, and a serialized payload. Typed access lives in [`Table`](crate::Table).

#[cfg(any(test, feature = "mock"))]
mod memory;
mod sqlite;

#[cfg(any(test, feature = "mock"))]
pub use self::memory::MemoryStore;
pub use self::sqlite::{SqliteStore, StoreOptions};
use crate::error::Result;
use crate::models::{InsertMode, Key, RawRow, Selector, TableOptions};
use async_trait::async_trait;

/// Unified interface for table stores.
///
/// All operations are asynchronous and take `&self`; implementations handle
/// their own synchronisation. Ordering guarantees are part of the contract
/// (see [`Selector`]), callers rely on them for pagination and for the
/// sorted-key invariants of the indices.
///
/// # Examples
///
/// ```
/// use folio_store::{TableStore, error::Result};
///
/// async fn count_rows(store: &dyn TableStore, table: &str) -> Result<u64> {
///     if store.has_table(table).await? {
///         store.count(table).await
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Name of the backend, used for logging only.
    fn name(&self) -> &str;

    /// Create an empty table. Fails with
    /// [`ErrorKind::TableExists`](crate::error::ErrorKind::TableExists) if the
    /// table is already present.
    async fn create_table(&self, table: &str, options: TableOptions) -> Result<()>;

    /// Drop a table. Dropping a table that does not exist is not an error.
    async fn drop_table(&self, table: &str) -> Result<()>;

    async fn has_table(&self, table: &str) -> Result<bool>;

    /// Insert rows in a single unit of work. Either all rows are written or
    /// none are.
    async fn insert(&self, table: &str, rows: Vec<RawRow>, mode: InsertMode) -> Result<()>;

    /// Read rows in the order described by the [`Selector`].
    async fn select(&self, table: &str, selector: Selector) -> Result<Vec<RawRow>>;

    /// Read only `(id, key)` pairs, for scans that don't need the payload.
    async fn keys(&self, table: &str, selector: Selector) -> Result<Vec<(u64, Option<Key>)>>;

    /// Delete the selected rows, returning how many were removed.
    async fn delete(&self, table: &str, selector: Selector) -> Result<u64>;

    async fn count(&self, table: &str) -> Result<u64>;

    /// Hand memory held by the backend back to the allocator, where the
    /// backend supports it.
    ///
    /// Default implementation of this method does nothing.
    async fn release_memory(&self) -> Result<()> {
        Ok(())
    }

    /// Release the store. Operations after closing fail with
    /// [`ErrorKind::Closed`](crate::error::ErrorKind::Closed) or a database
    /// error, depending on the backend.
    async fn close(&self);
}
