//! Query engine over a finished index.

use folio_catalog::models::{BookRecord, Field};
use folio_config::Config;
use folio_index::IndexMeta;
use folio_index::tables::{AuthorRow, FieldBookRow, FieldRow, book_table, search_table, to_key};
use folio_store::{Key, Selector, StoreHandle, Table};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::cache::ResultCache;
use crate::error::{ErrorKind, Result};
use crate::pool::{INTERSECTION_WORKERS, IdSet, IntersectionPool};
use crate::query::{Criterion, MatchMode, SearchQuery, series_key};
use exn::ResultExt;

/// Rows fetched per select when expanding matched field entries.
const ROW_FETCH_CHUNK: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub cache_enabled: bool,
    /// Stored results unused for this long are swept. `None` disables the
    /// sweep.
    pub cache_ttl: Option<Duration>,
    /// Release store memory after expensive scans.
    pub low_memory: bool,
    pub workers: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl: None,
            low_memory: false,
            workers: INTERSECTION_WORKERS,
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            cache_enabled: config.query_cache_enabled,
            cache_ttl: config.cache_ttl(),
            low_memory: config.low_memory_mode,
            workers: INTERSECTION_WORKERS,
        }
    }
}

/// One author in a result page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorSummary {
    pub id: u64,
    pub name: String,
    pub book_count: u64,
    pub book_deleted_count: u64,
}

impl From<AuthorRow> for AuthorSummary {
    fn from(row: AuthorRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            book_count: row.book_count,
            book_deleted_count: row.book_deleted_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<AuthorSummary>,
    /// Size of the whole candidate set, regardless of the page.
    pub total_found: u64,
    pub config_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookList {
    /// Empty when the author is unknown.
    pub author_name: String,
    pub books: Vec<BookRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesBooks {
    pub books: Vec<BookRecord>,
}

/// Counts a query in for its whole lifetime.
struct InFlight<'a> {
    engine: &'a SearchEngine,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.engine.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.engine.drained.notify_waiters();
        }
    }
}

/// Answers queries against one finished index.
///
/// Read-only towards the index tables; the only writes go to the result
/// cache tables.
pub struct SearchEngine {
    store: StoreHandle,
    meta: IndexMeta,
    options: EngineOptions,
    cache: Option<Arc<ResultCache>>,
    pool: IntersectionPool,
    /// Every author id; computed on first use.
    all_authors: OnceCell<IdSet>,
    in_flight: AtomicUsize,
    drained: Notify,
    closed: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SearchEngine {
    /// Open an engine over a store holding a complete index.
    #[instrument(level = "debug", skip_all)]
    pub async fn open(store: StoreHandle, options: EngineOptions) -> Result<Self> {
        let Some(meta) = IndexMeta::load(&store).await.or_raise(|| ErrorKind::Store)? else {
            exn::bail!(ErrorKind::NotReady);
        };
        let cache = if options.cache_enabled {
            Some(Arc::new(ResultCache::open(&store).await?))
        } else {
            None
        };
        let sweeper = match (&cache, options.cache_ttl) {
            (Some(cache), Some(ttl)) => Some(cache.spawn_sweeper(ttl)),
            _ => None,
        };
        let pool = IntersectionPool::new(options.workers)?;
        info!(hash = %meta.hash, cache = options.cache_enabled, "search engine ready");
        Ok(Self {
            store,
            meta,
            options,
            cache,
            pool,
            all_authors: OnceCell::new(),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            closed: AtomicBool::new(false),
            sweeper: Mutex::new(sweeper),
        })
    }

    /// Collection info, corpus statistics and config hash of the index.
    pub fn config(&self) -> &IndexMeta {
        &self.meta
    }

    fn enter(&self) -> Result<InFlight<'_>> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight { engine: self };
        if self.closed.load(Ordering::Acquire) {
            exn::bail!(ErrorKind::Closed);
        }
        Ok(guard)
    }

    /// Find the authors matching every criterion of `query` and return one
    /// page of them, ordered by id (which is name order).
    #[instrument(level = "debug", skip(self))]
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
        let _guard = self.enter()?;
        let signature = query.signature();
        let cached = match &self.cache {
            Some(cache) => cache.get(&signature).await?,
            None => None,
        };
        let author_ids = match cached {
            Some(ids) => ids,
            None => {
                let ids: IdSet = Arc::from(self.resolve(query).await?);
                if let Some(cache) = &self.cache {
                    cache.put(&signature, ids.clone()).await?;
                }
                ids
            },
        };

        let offset = query.offset().min(author_ids.len());
        let end = offset.saturating_add(query.limit()).min(author_ids.len());
        let page = author_ids[offset..end].to_vec();
        let authors: Table<AuthorRow> = Table::new(&self.store, search_table(Field::Author));
        let results = if page.is_empty() {
            Vec::new()
        } else {
            authors.select(Selector::Ids(page)).await.or_raise(|| ErrorKind::Store)?
        };
        Ok(SearchResponse {
            results: results.into_iter().map(AuthorSummary::from).collect(),
            total_found: author_ids.len() as u64,
            config_hash: self.meta.hash.clone(),
        })
    }

    /// Candidate author ids for a query, ascending.
    async fn resolve(&self, query: &SearchQuery) -> Result<Vec<u64>> {
        let criteria = query.criteria()?;
        let mut sets: Vec<IdSet> = Vec::with_capacity(criteria.len() + 1);
        sets.push(match query.author_mode() {
            Some(mode) => Arc::from(self.matching_ids(Field::Author, &mode).await?),
            None => self.all_authors().await?,
        });
        for criterion in &criteria {
            sets.push(Arc::from(self.criterion_authors(criterion).await?));
            if self.options.low_memory && matches!(criterion, Criterion::Match(Field::Title, mode) if mode.is_scan()) {
                self.store.release_memory().await.or_raise(|| ErrorKind::Store)?;
            }
        }
        let found = if sets.len() == 1 { sets[0].to_vec() } else { self.pool.intersect(sets).await? };
        debug!(criteria = criteria.len(), found = found.len(), "query resolved");
        Ok(found)
    }

    async fn all_authors(&self) -> Result<IdSet> {
        self.all_authors
            .get_or_try_init(|| async {
                let authors: Table<AuthorRow> = Table::new(&self.store, search_table(Field::Author));
                let keys = authors.keys(Selector::All).await.or_raise(|| ErrorKind::Store)?;
                let ids: IdSet = keys.into_iter().map(|(id, _)| id).collect::<Vec<_>>().into();
                Ok::<_, crate::error::Error>(ids)
            })
            .await
            .cloned()
    }

    /// Ids of the entries of `field` selected by `mode`, ascending.
    async fn matching_ids(&self, field: Field, mode: &MatchMode) -> Result<Vec<u64>> {
        let table: Table<FieldRow> = Table::new(&self.store, search_table(field));
        let selector = match mode.range() {
            Some((from, to)) => Selector::KeyRange {
                from: Key::Text(from),
                to: Key::Text(to),
            },
            None => Selector::All,
        };
        let keys = table.keys(selector).await.or_raise(|| ErrorKind::Store)?;
        let mut ids: Vec<u64> = keys
            .into_iter()
            .filter(|(_, key)| !mode.is_scan() || key.as_ref().and_then(Key::as_text).is_some_and(|value| mode.matches(value)))
            .map(|(id, _)| id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Union of the author sets of every entry the criterion selects.
    async fn criterion_authors(&self, criterion: &Criterion) -> Result<Vec<u64>> {
        let field = criterion.field();
        let table: Table<FieldRow> = Table::new(&self.store, search_table(field));
        let ids = match criterion {
            Criterion::Match(_, mode) => self.matching_ids(field, mode).await?,
            Criterion::AnyOf(_, values) => {
                let keys = values.iter().map(to_key).collect();
                let keys = table.keys(Selector::Keys(keys)).await.or_raise(|| ErrorKind::Store)?;
                keys.into_iter().map(|(id, _)| id).collect()
            },
        };
        let mut authors = Vec::new();
        for chunk in ids.chunks(ROW_FETCH_CHUNK) {
            let rows = table.select(Selector::Ids(chunk.to_vec())).await.or_raise(|| ErrorKind::Store)?;
            authors.extend(rows.into_iter().flat_map(|row| row.author_ids));
        }
        authors.sort_unstable();
        authors.dedup();
        Ok(authors)
    }

    /// Books of one author entry.
    #[instrument(level = "debug", skip(self))]
    pub async fn book_list(&self, author_id: u64) -> Result<BookList> {
        let _guard = self.enter()?;
        let table: Table<FieldBookRow> = Table::new(&self.store, book_table(Field::Author));
        Ok(match table.get(author_id).await.or_raise(|| ErrorKind::Store)? {
            Some(row) => BookList {
                author_name: row.name,
                books: row.books,
            },
            None => BookList::default(),
        })
    }

    /// Books of the series named exactly `series`, case-insensitively.
    #[instrument(level = "debug", skip(self))]
    pub async fn series_book_list(&self, series: &str) -> Result<SeriesBooks> {
        let _guard = self.enter()?;
        let entries: Table<FieldRow> = Table::new(&self.store, search_table(Field::Series));
        let Some(entry) = entries.find(series_key(series)).await.or_raise(|| ErrorKind::Store)? else {
            return Ok(SeriesBooks::default());
        };
        let table: Table<FieldBookRow> = Table::new(&self.store, book_table(Field::Series));
        let books = table.get(entry.id).await.or_raise(|| ErrorKind::Store)?.map(|row| row.books).unwrap_or_default();
        Ok(SeriesBooks { books })
    }

    /// Refuse new queries, wait for running ones, then stop the sweeper and
    /// close the store. Calling it again is a no-op.
    #[instrument(level = "debug", skip(self))]
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        loop {
            let drained = self.drained.notified();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                break;
            }
            drained.await;
        }
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        self.store.close().await;
        info!("search engine closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_catalog::RecordFilter;
    use folio_catalog::models::CollectionInfo;
    use folio_catalog::source::from_records;
    use folio_index::{BuildOptions, Builder, NoProgress};
    use folio_store::MemoryStore;
    use rstest::rstest;

    fn record(author: &str, title: &str, series: &str, deleted: bool) -> BookRecord {
        BookRecord {
            author: author.to_string(),
            title: title.to_string(),
            series: series.to_string(),
            genre: "sf".to_string(),
            lang: "ru".to_string(),
            deleted,
            ..Default::default()
        }
    }

    async fn engine_over(records: Vec<BookRecord>, options: EngineOptions) -> SearchEngine {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        Builder::new(store.clone(), BuildOptions::default())
            .build(from_records(records, 10, CollectionInfo::default()), &RecordFilter::accept_all(), &mut NoProgress)
            .await
            .unwrap();
        SearchEngine::open(store, options).await.unwrap()
    }

    async fn engine() -> SearchEngine {
        let records = vec![
            record("Ivanov,Petrov", "Book A", "Saga", false),
            record("Ivanov", "Book B", "", false),
            record("Sidorov", "Book C", "Saga", true),
        ];
        engine_over(records, EngineOptions::default()).await
    }

    fn names(response: &SearchResponse) -> Vec<&str> {
        response.results.iter().map(|author| author.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_author_prefix_search() {
        let engine = engine().await;
        let query = SearchQuery { author: Some("ivanov".to_string()), ..Default::default() };
        let response = engine.search(&query).await.unwrap();
        assert_eq!(response.total_found, 2);
        assert_eq!(names(&response), vec!["Ivanov", "Ivanov,Petrov"]);
        assert_eq!(response.config_hash, engine.config().hash);
    }

    #[tokio::test]
    async fn test_deleted_flag_isolates_sidorov() {
        let engine = engine().await;
        let response = engine.search(&SearchQuery { del: Some(1), ..Default::default() }).await.unwrap();
        assert_eq!(names(&response), vec!["Sidorov"]);
        let live = engine.search(&SearchQuery { del: Some(0), ..Default::default() }).await.unwrap();
        assert_eq!(live.total_found, 3);
    }

    #[rstest]
    #[case(SearchQuery { author: Some("*".to_string()), ..Default::default() }, vec!["Ivanov", "Ivanov,Petrov", "Petrov", "Sidorov"])]
    #[case(SearchQuery { author: Some("=petrov".to_string()), ..Default::default() }, vec!["Petrov"])]
    #[case(SearchQuery { author: Some("*ov,p".to_string()), ..Default::default() }, vec!["Ivanov,Petrov"])]
    #[case(SearchQuery { title: Some("=book b".to_string()), ..Default::default() }, vec!["Ivanov"])]
    #[case(SearchQuery { series: Some("saga".to_string()), author: Some("s".to_string()), ..Default::default() }, vec!["Sidorov"])]
    #[case(SearchQuery { genre: Some("fantasy,sf".to_string()), ..Default::default() }, vec!["Ivanov", "Ivanov,Petrov", "Petrov", "Sidorov"])]
    #[case(SearchQuery { lang: Some("en".to_string()), ..Default::default() }, vec![])]
    #[case(SearchQuery { title: Some("#".to_string()), ..Default::default() }, vec![])]
    #[tokio::test]
    async fn test_search(#[case] query: SearchQuery, #[case] expected: Vec<&str>) {
        let engine = engine().await;
        let response = engine.search(&query).await.unwrap();
        assert_eq!(names(&response), expected);
        assert_eq!(response.total_found, expected.len() as u64);
    }

    #[tokio::test]
    async fn test_pagination() {
        let engine = engine().await;
        let mut totals = Vec::new();
        for (offset, limit) in [(0, 2), (2, 2), (3, 10), (10, 1)] {
            let query = SearchQuery { offset: Some(offset), limit: Some(limit), ..Default::default() };
            let response = engine.search(&query).await.unwrap();
            let total = response.total_found as usize;
            assert!(response.results.len() <= limit.min(total.saturating_sub(offset)));
            totals.push(total);
        }
        assert!(totals.iter().all(|total| *total == 4));
        let second = engine.search(&SearchQuery { offset: Some(2), limit: Some(2), ..Default::default() }).await.unwrap();
        assert_eq!(names(&second), vec!["Petrov", "Sidorov"]);
    }

    #[tokio::test]
    async fn test_cache_disabled_gives_identical_results() {
        let records = || {
            vec![
                record("Ivanov,Petrov", "Book A", "Saga", false),
                record("Sidorov", "Book C", "Saga", true),
            ]
        };
        let cached = engine_over(records(), EngineOptions::default()).await;
        let uncached = engine_over(records(), EngineOptions { cache_enabled: false, ..Default::default() }).await;
        let query = SearchQuery { series: Some("=saga".to_string()), ..Default::default() };
        // Second run on the cached engine is served from the cache.
        cached.search(&query).await.unwrap();
        assert_eq!(cached.search(&query).await.unwrap(), uncached.search(&query).await.unwrap());
    }

    #[tokio::test]
    async fn test_book_lists() {
        let engine = engine().await;
        let ivanov = engine.search(&SearchQuery { author: Some("=ivanov".to_string()), ..Default::default() }).await.unwrap();
        let list = engine.book_list(ivanov.results[0].id).await.unwrap();
        assert_eq!(list.author_name, "Ivanov");
        let titles: Vec<&str> = list.books.iter().map(|book| book.title.as_str()).collect();
        assert_eq!(titles, vec!["Book A", "Book B"]);
        assert_eq!(engine.book_list(999).await.unwrap(), BookList::default());

        let saga = engine.series_book_list("SAGA").await.unwrap();
        assert_eq!(saga.books.len(), 2);
        assert!(engine.series_book_list("nothing").await.unwrap().books.is_empty());
    }

    #[tokio::test]
    async fn test_query_after_close_is_rejected() {
        let engine = engine().await;
        engine.close().await;
        let err = engine.search(&SearchQuery::default()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Closed));
        assert!(matches!(&*engine.book_list(1).await.unwrap_err(), ErrorKind::Closed));
    }

    #[tokio::test]
    async fn test_open_requires_complete_index() {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let err = SearchEngine::open(store, EngineOptions::default()).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::NotReady));
    }

    #[tokio::test]
    async fn test_close_waits_for_in_flight_queries() {
        let engine = Arc::new(engine().await);
        let guard = engine.enter().unwrap();
        let closing = tokio::spawn({
            let engine = engine.clone();
            async move { engine.close().await }
        });
        tokio::task::yield_now().await;
        assert!(!closing.is_finished());
        drop(guard);
        closing.await.unwrap();
        assert!(engine.enter().is_err());
    }
}
