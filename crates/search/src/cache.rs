//! Two-tier search result cache.
//!
//! Results are candidate author id lists keyed by query signature. The memory
//! tier holds the most recently used [`MEMORY_CAPACITY`] lists; the store tier
//! keeps every list in `query_cache`, with its last access time in
//! `query_time`, until a sweep finds it stale.

use folio_index::tables::{QUERY_CACHE, QUERY_TIME};
use folio_store::{IndexKind, Key, Record, Selector, StoreHandle, Table, TableOptions};
use futures::TryStreamExt;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use time::UtcDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::error::{ErrorKind, Result};
use crate::pool::IdSet;
use exn::ResultExt;

/// Entries kept in the memory tier.
pub const MEMORY_CAPACITY: NonZeroUsize = NonZeroUsize::new(100).unwrap();
const SWEEP_PAGE_SIZE: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CachedResult {
    signature: String,
    author_ids: Vec<u64>,
}

impl Record for CachedResult {
    fn id(&self) -> Option<u64> {
        None
    }

    fn key(&self) -> Option<Key> {
        Some(Key::Text(self.signature.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct AccessTime {
    signature: String,
    /// Unix time in milliseconds.
    time: i64,
}

impl Record for AccessTime {
    fn id(&self) -> Option<u64> {
        None
    }

    fn key(&self) -> Option<Key> {
        Some(Key::Text(self.signature.clone()))
    }
}

fn now_millis() -> i64 {
    (UtcDateTime::now().unix_timestamp_nanos() / 1_000_000) as i64
}

pub struct ResultCache {
    memory: Mutex<LruCache<String, IdSet>>,
    results: Table<CachedResult>,
    times: Table<AccessTime>,
}

impl ResultCache {
    /// Open the cache over a store, creating its tables when missing.
    pub async fn open(store: &StoreHandle) -> Result<Self> {
        let results: Table<CachedResult> = Table::new(store, QUERY_CACHE);
        let times: Table<AccessTime> = Table::new(store, QUERY_TIME);
        for table in [results.name(), times.name()] {
            if !store.has_table(table).await.or_raise(|| ErrorKind::Store)? {
                store.create_table(table, TableOptions::unique(IndexKind::Text)).await.or_raise(|| ErrorKind::Store)?;
            }
        }
        Ok(Self {
            memory: Mutex::new(LruCache::new(MEMORY_CAPACITY)),
            results,
            times,
        })
    }

    /// Look a signature up, memory first. A store hit is promoted into
    /// memory and its access time refreshed.
    pub async fn get(&self, signature: &str) -> Result<Option<IdSet>> {
        if let Some(ids) = self.memory.lock().get(signature).cloned() {
            return Ok(Some(ids));
        }
        let Some(cached) = self.results.find(signature.to_string()).await.or_raise(|| ErrorKind::Store)? else {
            return Ok(None);
        };
        self.touch(signature).await?;
        let ids: IdSet = Arc::from(cached.author_ids);
        self.memory.lock().put(signature.to_string(), ids.clone());
        Ok(Some(ids))
    }

    pub async fn put(&self, signature: &str, ids: IdSet) -> Result<()> {
        self.memory.lock().put(signature.to_string(), ids.clone());
        let row = CachedResult {
            signature: signature.to_string(),
            author_ids: ids.to_vec(),
        };
        self.results.upsert(&[row]).await.or_raise(|| ErrorKind::Store)?;
        self.touch(signature).await
    }

    async fn touch(&self, signature: &str) -> Result<()> {
        let row = AccessTime {
            signature: signature.to_string(),
            time: now_millis(),
        };
        self.times.upsert(&[row]).await.or_raise(|| ErrorKind::Store)
    }

    /// Delete stored results not accessed within `max_age`.
    pub async fn sweep(&self, max_age: Duration) -> Result<u64> {
        let max_age = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        self.sweep_before(now_millis().saturating_sub(max_age)).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn sweep_before(&self, threshold: i64) -> Result<u64> {
        let mut stale = Vec::new();
        let mut pages = Box::pin(self.times.pages(SWEEP_PAGE_SIZE));
        while let Some(page) = pages.try_next().await.or_raise(|| ErrorKind::Store)? {
            stale.extend(page.into_iter().filter(|row| row.time < threshold).map(|row| Key::Text(row.signature)));
        }
        drop(pages);
        if stale.is_empty() {
            return Ok(0);
        }
        let removed = self.results.delete(Selector::Keys(stale.clone())).await.or_raise(|| ErrorKind::Store)?;
        self.times.delete(Selector::Keys(stale)).await.or_raise(|| ErrorKind::Store)?;
        debug!(removed, "swept stale cached results");
        Ok(removed)
    }

    /// Sweep every `interval` on a background task, starting immediately.
    /// Sweep failures are logged and the next sweep goes ahead as planned.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = cache.sweep(interval).await {
                    warn!(error = ?err, "result cache sweep failed");
                }
            }
        })
    }

    #[cfg(test)]
    fn forget_memory(&self) {
        self.memory.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_store::MemoryStore;

    async fn cache() -> (StoreHandle, ResultCache) {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let cache = ResultCache::open(&store).await.unwrap();
        (store, cache)
    }

    fn ids(ids: &[u64]) -> IdSet {
        Arc::from(ids)
    }

    #[tokio::test]
    async fn test_round_trip_across_tiers() {
        let (_store, cache) = cache().await;
        cache.put("sig", ids(&[1, 5, 9])).await.unwrap();
        assert_eq!(cache.get("sig").await.unwrap().as_deref(), Some(&[1, 5, 9][..]));

        // A memory miss falls through to the store and repopulates memory.
        cache.forget_memory();
        assert_eq!(cache.get("sig").await.unwrap().as_deref(), Some(&[1, 5, 9][..]));
        assert!(cache.memory.lock().contains("sig"));
        assert!(cache.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_keeps_existing_entries() {
        let (store, cache) = cache().await;
        cache.put("sig", ids(&[2])).await.unwrap();
        let reopened = ResultCache::open(&store).await.unwrap();
        assert_eq!(reopened.get("sig").await.unwrap().as_deref(), Some(&[2][..]));
    }

    #[tokio::test]
    async fn test_memory_tier_evicts_least_recent() {
        let (_store, cache) = cache().await;
        for n in 0..=MEMORY_CAPACITY.get() as u64 {
            if n == MEMORY_CAPACITY.get() as u64 {
                // Promote the first entry so the second one is evicted instead.
                cache.get("sig-0").await.unwrap();
            }
            cache.put(&format!("sig-{n}"), ids(&[n])).await.unwrap();
        }
        let memory = cache.memory.lock();
        assert_eq!(memory.len(), MEMORY_CAPACITY.get());
        assert!(memory.contains("sig-0"));
        assert!(!memory.contains("sig-1"));
    }

    #[tokio::test]
    async fn test_sweep_removes_both_rows() {
        let (_store, cache) = cache().await;
        cache.put("old", ids(&[1])).await.unwrap();
        assert_eq!(cache.sweep_before(i64::MIN).await.unwrap(), 0);
        assert_eq!(cache.sweep_before(i64::MAX).await.unwrap(), 1);
        assert_eq!(cache.results.count().await.unwrap(), 0);
        assert_eq!(cache.times.count().await.unwrap(), 0);
    }
}
