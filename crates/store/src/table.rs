//! Typed access to a single table.

use crate::StoreHandle;
use crate::error::Result;
use crate::models::{InsertMode, Key, Record, Selector, TableOptions};
use async_stream::try_stream;
use futures::Stream;
use std::marker::PhantomData;

/// A handle to one table whose rows are all of type `R`.
///
/// Cheap to clone; it only holds the store handle and the table name.
pub struct Table<R> {
    store: StoreHandle,
    name: String,
    _rows: PhantomData<fn() -> R>,
}

impl<R> Clone for Table<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            name: self.name.clone(),
            _rows: PhantomData,
        }
    }
}

impl<R: Record> Table<R> {
    pub fn new(store: &StoreHandle, name: impl Into<String>) -> Self {
        Self {
            store: store.clone(),
            name: name.into(),
            _rows: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn create(&self, options: TableOptions) -> Result<()> {
        self.store.create_table(&self.name, options).await
    }

    /// Drop the table if it exists, then create it empty.
    pub async fn recreate(&self, options: TableOptions) -> Result<()> {
        self.store.drop_table(&self.name).await?;
        self.store.create_table(&self.name, options).await
    }

    pub async fn drop_table(&self) -> Result<()> {
        self.store.drop_table(&self.name).await
    }

    pub async fn exists(&self) -> Result<bool> {
        self.store.has_table(&self.name).await
    }

    pub async fn insert(&self, rows: &[R]) -> Result<()> {
        self.write(rows, InsertMode::Fail).await
    }

    pub async fn upsert(&self, rows: &[R]) -> Result<()> {
        self.write(rows, InsertMode::Replace).await
    }

    async fn write(&self, rows: &[R], mode: InsertMode) -> Result<()> {
        let raw = rows.iter().map(Record::to_raw).collect::<Result<Vec<_>>>()?;
        self.store.insert(&self.name, raw, mode).await
    }

    pub async fn select(&self, selector: Selector) -> Result<Vec<R>> {
        let raw = self.store.select(&self.name, selector).await?;
        raw.iter().map(R::from_raw).collect()
    }

    pub async fn get(&self, id: u64) -> Result<Option<R>> {
        Ok(self.select(Selector::Ids(vec![id])).await?.into_iter().next())
    }

    /// Exact lookup by key.
    pub async fn find(&self, key: impl Into<Key>) -> Result<Option<R>> {
        Ok(self.select(Selector::Keys(vec![key.into()])).await?.into_iter().next())
    }

    pub async fn keys(&self, selector: Selector) -> Result<Vec<(u64, Option<Key>)>> {
        self.store.keys(&self.name, selector).await
    }

    pub async fn delete(&self, selector: Selector) -> Result<u64> {
        self.store.delete(&self.name, selector).await
    }

    pub async fn count(&self) -> Result<u64> {
        self.store.count(&self.name).await
    }

    /// Forward scan over the whole table in id order, `page_size` rows at a
    /// time.
    ///
    /// Each page is a separate query, so no connection or lock is held
    /// between pages; rows inserted behind the cursor are not revisited.
    pub fn pages(&self, page_size: usize) -> impl Stream<Item = Result<Vec<R>>> + Send + '_ {
        try_stream! {
            let mut after = 0;
            loop {
                let raw = self.store.select(&self.name, Selector::After { id: after, limit: page_size.max(1) }).await?;
                // The cursor follows store ids, which rows without an id of
                // their own still have.
                let Some(last) = raw.last().and_then(|row| row.id) else {
                    break;
                };
                after = last;
                yield raw.iter().map(R::from_raw).collect::<Result<Vec<_>>>()?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use crate::models::IndexKind;
    use futures::TryStreamExt;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Genre {
        id: u64,
        value: String,
    }

    impl Record for Genre {
        fn id(&self) -> Option<u64> {
            Some(self.id)
        }

        fn key(&self) -> Option<Key> {
            Some(Key::from(self.value.as_str()))
        }
    }

    fn genre(id: u64, value: &str) -> Genre {
        Genre { id, value: value.to_string() }
    }

    async fn genres(count: u64) -> Table<Genre> {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let table = Table::new(&store, "genre");
        table.create(TableOptions::unique(IndexKind::Text)).await.unwrap();
        let rows: Vec<_> = (1..=count).map(|id| genre(id, &format!("g{id:03}"))).collect();
        table.insert(&rows).await.unwrap();
        table
    }

    #[tokio::test]
    async fn test_get_and_find() {
        let table = genres(3).await;
        assert_eq!(table.get(2).await.unwrap(), Some(genre(2, "g002")));
        assert_eq!(table.find("g003").await.unwrap(), Some(genre(3, "g003")));
        assert_eq!(table.find("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pages_cover_table_once() {
        let table = genres(25).await;
        let pages: Vec<Vec<Genre>> = table.pages(10).try_collect().await.unwrap();
        assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![10, 10, 5]);
        let ids: Vec<u64> = pages.into_iter().flatten().map(|g| g.id).collect();
        assert_eq!(ids, (1..=25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_pages_of_empty_table() {
        let table = genres(0).await;
        let pages: Vec<Vec<Genre>> = table.pages(10).try_collect().await.unwrap();
        assert!(pages.is_empty());
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Setting {
        name: String,
    }

    impl Record for Setting {
        fn id(&self) -> Option<u64> {
            None
        }
    }

    #[tokio::test]
    async fn test_pages_of_rows_with_store_assigned_ids() {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let table: Table<Setting> = Table::new(&store, "setting");
        table.create(TableOptions::default()).await.unwrap();
        let rows: Vec<_> = (0..5).map(|n| Setting { name: format!("s{n}") }).collect();
        table.insert(&rows).await.unwrap();
        let pages: Vec<Vec<Setting>> = table.pages(2).try_collect().await.unwrap();
        assert_eq!(pages.into_iter().flatten().collect::<Vec<_>>(), rows);
    }

    #[tokio::test]
    async fn test_recreate_empties_table() {
        let table = genres(3).await;
        table.recreate(TableOptions::default()).await.unwrap();
        assert_eq!(table.count().await.unwrap(), 0);
        assert!(table.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let table = genres(2).await;
        table.upsert(&[genre(1, "renamed")]).await.unwrap();
        assert_eq!(table.get(1).await.unwrap(), Some(genre(1, "renamed")));
        assert_eq!(table.count().await.unwrap(), 2);
    }
}
