//! In-memory table store for testing.

use super::TableStore;
use crate::error::{ErrorKind, Result};
use crate::models::{InsertMode, Key, RawRow, Selector, TableOptions, validate_table_name};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryTable {
    options: TableOptions,
    rows: BTreeMap<u64, RawRow>,
}

fn next_id(rows: &BTreeMap<u64, RawRow>) -> u64 {
    rows.keys().next_back().map_or(1, |last| last + 1)
}

fn id_for_key(rows: &BTreeMap<u64, RawRow>, key: &Key) -> Option<u64> {
    rows.iter().find(|(_, row)| row.key.as_ref() == Some(key)).map(|(id, _)| *id)
}

impl MemoryTable {
    fn selected(&self, selector: &Selector) -> Result<Vec<&RawRow>> {
        let mut rows: Vec<&RawRow> = match selector {
            Selector::All => self.rows.values().collect(),
            Selector::Ids(ids) => {
                let mut ids = ids.clone();
                ids.sort_unstable();
                ids.dedup();
                ids.iter().filter_map(|id| self.rows.get(id)).collect()
            },
            Selector::KeyRange { from, to } => {
                if from.kind() != to.kind() {
                    exn::bail!(ErrorKind::MixedKeyRange);
                }
                self.rows
                    .values()
                    .filter(|row| row.key.as_ref().is_some_and(|key| key.kind() == from.kind() && key >= from && key <= to))
                    .collect()
            },
            Selector::Keys(keys) => self
                .rows
                .values()
                .filter(|row| row.key.as_ref().is_some_and(|key| keys.contains(key)))
                .collect(),
            Selector::After { id, limit } => self.rows.range(id.saturating_add(1)..).take(*limit).map(|(_, row)| row).collect(),
            Selector::Flagged => self.rows.values().filter(|row| row.flagged).collect(),
        };
        if matches!(selector, Selector::KeyRange { .. } | Selector::Keys(_)) {
            // Stable sort keeps id order among rows sharing a key.
            rows.sort_by(|a, b| a.key.cmp(&b.key));
        }
        Ok(rows)
    }
}

/// In-memory table store for testing.
///
/// Tables are kept in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Ordering and
/// uniqueness behave like [`SqliteStore`](super::SqliteStore).
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    tables: RwLock<HashMap<String, MemoryTable>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Change the name of the memory store.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            exn::bail!(ErrorKind::Closed);
        }
        Ok(())
    }

    fn not_found(table: &str) -> exn::Exn<ErrorKind> {
        exn::Exn::from(ErrorKind::TableNotFound(table.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            name: "memory".to_string(),
            tables: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_table(&self, table: &str, options: TableOptions) -> Result<()> {
        self.ensure_open()?;
        validate_table_name(table)?;
        let mut tables = self.tables.write().await;
        if tables.contains_key(table) {
            exn::bail!(ErrorKind::TableExists(table.to_string()));
        }
        tables.insert(table.to_string(), MemoryTable { options, rows: BTreeMap::new() });
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.ensure_open()?;
        validate_table_name(table)?;
        self.tables.write().await.remove(table);
        Ok(())
    }

    async fn has_table(&self, table: &str) -> Result<bool> {
        self.ensure_open()?;
        validate_table_name(table)?;
        Ok(self.tables.read().await.contains_key(table))
    }

    async fn insert(&self, table: &str, rows: Vec<RawRow>, mode: InsertMode) -> Result<()> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let target = tables.get_mut(table).ok_or_else(|| Self::not_found(table))?;
        // Work on a copy so a failing row leaves the table untouched.
        let mut staged = target.rows.clone();
        let unique = target.options.unique_index.is_some();
        for mut row in rows {
            let id = row.id.unwrap_or_else(|| next_id(&staged));
            let key_owner = row.key.as_ref().filter(|_| unique).and_then(|key| id_for_key(&staged, key));
            let collides = staged.contains_key(&id) || key_owner.is_some_and(|owner| owner != id);
            if collides {
                match mode {
                    InsertMode::Fail => exn::bail!(ErrorKind::Constraint(table.to_string())),
                    InsertMode::Replace => {
                        staged.remove(&id);
                        if let Some(owner) = key_owner {
                            staged.remove(&owner);
                        }
                    },
                }
            }
            row.id = Some(id);
            staged.insert(id, row);
        }
        target.rows = staged;
        Ok(())
    }

    async fn select(&self, table: &str, selector: Selector) -> Result<Vec<RawRow>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        let target = tables.get(table).ok_or_else(|| Self::not_found(table))?;
        Ok(target.selected(&selector)?.into_iter().cloned().collect())
    }

    async fn keys(&self, table: &str, selector: Selector) -> Result<Vec<(u64, Option<Key>)>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        let target = tables.get(table).ok_or_else(|| Self::not_found(table))?;
        Ok(target
            .selected(&selector)?
            .into_iter()
            .filter_map(|row| row.id.map(|id| (id, row.key.clone())))
            .collect())
    }

    async fn delete(&self, table: &str, selector: Selector) -> Result<u64> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let target = tables.get_mut(table).ok_or_else(|| Self::not_found(table))?;
        let doomed: Vec<u64> = target.selected(&selector)?.into_iter().filter_map(|row| row.id).collect();
        for id in &doomed {
            target.rows.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn count(&self, table: &str) -> Result<u64> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        let target = tables.get(table).ok_or_else(|| Self::not_found(table))?;
        Ok(target.rows.len() as u64)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndexKind;

    fn row(key: &str) -> RawRow {
        RawRow { id: None, key: Some(Key::from(key)), flagged: false, data: "{}".to_string() }
    }

    async fn store_with(table: &str, keys: &[&str]) -> MemoryStore {
        let store = MemoryStore::default();
        store.create_table(table, TableOptions::unique(IndexKind::Text)).await.unwrap();
        store.insert(table, keys.iter().map(|k| row(k)).collect(), InsertMode::Fail).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_name() {
        assert_eq!(MemoryStore::default().name(), "memory");
        assert_eq!(MemoryStore::default().with_name("test").name(), "test");
    }

    #[tokio::test]
    async fn test_ids_are_assigned_sequentially() {
        let store = store_with("author", &["b", "a"]).await;
        store.insert("author", vec![row("c")], InsertMode::Fail).await.unwrap();
        let ids: Vec<_> = store.keys("author", Selector::All).await.unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_key_range_orders_by_key() {
        let store = store_with("title", &["c", "a", "b", "d"]).await;
        let keys: Vec<_> = store
            .keys("title", Selector::KeyRange { from: Key::from("a"), to: Key::from("c") })
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(keys, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn test_unique_violation_leaves_table_untouched() {
        let store = store_with("genre", &["sf"]).await;
        let err = store.insert("genre", vec![row("new"), row("sf")], InsertMode::Fail).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Constraint(_)));
        assert_eq!(store.count("genre").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_by_key_and_id() {
        let store = store_with("genre", &["sf", "det"]).await;
        let mut by_key = row("sf");
        by_key.data = "1".to_string();
        let mut by_id = row("adv");
        by_id.id = Some(2);
        store.insert("genre", vec![by_key, by_id], InsertMode::Replace).await.unwrap();
        let rows = store.select("genre", Selector::All).await.unwrap();
        let keys: Vec<_> = rows.iter().filter_map(|r| r.key.clone()).collect();
        assert_eq!(keys, vec![Key::from("adv"), Key::from("sf")]);
    }

    #[tokio::test]
    async fn test_delete_and_after() {
        let store = store_with("book", &["a", "b", "c", "d"]).await;
        assert_eq!(store.delete("book", Selector::Ids(vec![2, 3])).await.unwrap(), 2);
        let page = store.keys("book", Selector::After { id: 0, limit: 10 }).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[1].0, 4);
    }

    #[tokio::test]
    async fn test_missing_table_and_close() {
        let store = MemoryStore::default();
        let err = store.select("book", Selector::All).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::TableNotFound(_)));
        store.close().await;
        let err = store.has_table("book").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Closed));
    }
}
