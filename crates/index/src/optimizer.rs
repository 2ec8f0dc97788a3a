//! Index optimizer.
//!
//! Turns the raw `<field>_members` tables of the optimized fields into
//! `<field>_book` tables whose rows carry their books inline, so listing the
//! books of an author or series is a single row read.

use folio_catalog::models::{BookRecord, Field};
use folio_store::{Selector, StoreHandle, Table, TableOptions};
use futures::TryStreamExt;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, instrument};

use crate::error::{ErrorKind, Result};
use crate::progress::{Progress, fraction};
use crate::reclaim::Reclaimer;
use crate::tables::{AUTHOR_ID, AuthorIdRow, BOOK, BookRow, FieldBookRow, MembersRow, book_table, members_table};
use exn::ResultExt;

/// Default cumulative member count per optimizer batch.
pub const OPTIMIZE_BATCH_SIZE: usize = 50_000;
/// Member rows read per page.
const MEMBER_PAGE_SIZE: usize = 1_000;
/// Book ids looked up per select.
const BOOK_LOOKUP_CHUNK: usize = 10_000;

/// Optimized fields with their share of the optimize job's progress.
const PLAN: [(Field, f64, f64); 3] = [(Field::Author, 0.0, 0.3), (Field::Series, 0.3, 0.5), (Field::Title, 0.5, 1.0)];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeReport {
    /// Rows written to `<field>_book`.
    pub rows: u64,
    /// Rows removed for resolving to no books.
    pub swept: u64,
}

pub struct Optimizer {
    store: StoreHandle,
    batch_size: usize,
    retain_members: bool,
}

impl Optimizer {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            batch_size: OPTIMIZE_BATCH_SIZE,
            retain_members: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Keep `<field>_members` after optimizing, so the optimizer can be run
    /// again over the same input.
    pub fn retain_members(mut self, retain: bool) -> Self {
        self.retain_members = retain;
        self
    }

    /// Optimize author, series and title in that order.
    #[instrument(level = "debug", skip_all)]
    pub(crate) async fn optimize_all(&self, progress: &mut Progress<'_>, reclaimer: &mut Reclaimer) -> Result<()> {
        for (field, from, to) in PLAN {
            let report = self.optimize(field, progress, from, to, reclaimer).await?;
            info!(%field, rows = report.rows, swept = report.swept, "optimized field");
        }
        Ok(())
    }

    /// Build `<field>_book` from `<field>_members` and the book table.
    ///
    /// The output table is recreated, so running this twice over the same
    /// members and books gives the same rows.
    pub(crate) async fn optimize(
        &self,
        field: Field,
        progress: &mut Progress<'_>,
        from: f64,
        to: f64,
        reclaimer: &mut Reclaimer,
    ) -> Result<OptimizeReport> {
        let error = || ErrorKind::Optimize(field.as_str());
        let members: Table<MembersRow> = Table::new(&self.store, members_table(field));
        let output: Table<FieldBookRow> = Table::new(&self.store, book_table(field));
        let books: Table<BookRow> = Table::new(&self.store, BOOK);
        output.recreate(TableOptions::default()).await.or_raise(error)?;

        let total = members.count().await.or_raise(error)?;
        let mut report = OptimizeReport::default();
        let mut owners: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        let mut batch: Vec<MembersRow> = Vec::new();
        let mut batch_members = 0;
        let mut processed = 0;

        let mut pages = Box::pin(members.pages(MEMBER_PAGE_SIZE));
        while let Some(page) = pages.try_next().await.or_raise(error)? {
            for row in page {
                batch_members += row.book_ids.len();
                batch.push(row);
                if batch_members >= self.batch_size {
                    processed += batch.len() as u64;
                    report.rows += self.flush(field, &books, &output, &mut batch, &mut owners).await?;
                    batch_members = 0;
                    reclaimer.checkpoint("optimize batch").await?;
                    progress.span(from, to).set(fraction(processed, total));
                }
            }
        }
        drop(pages);
        if !batch.is_empty() {
            processed += batch.len() as u64;
            report.rows += self.flush(field, &books, &output, &mut batch, &mut owners).await?;
            progress.span(from, to).set(fraction(processed, total));
        }

        report.swept = output.delete(Selector::Flagged).await.or_raise(error)?;
        report.rows -= report.swept;

        if field == Field::Author {
            self.save_owners(owners).await.or_raise(error)?;
        }
        if !self.retain_members {
            members.drop_table().await.or_raise(error)?;
        }
        reclaimer.reclaim("optimized field").await?;
        progress.span(from, to).set(1.0);
        Ok(report)
    }

    /// Resolve and write one batch of member rows, returning how many rows
    /// were written.
    async fn flush(
        &self,
        field: Field,
        books: &Table<BookRow>,
        output: &Table<FieldBookRow>,
        batch: &mut Vec<MembersRow>,
        owners: &mut BTreeMap<u64, Vec<u64>>,
    ) -> Result<u64> {
        let error = || ErrorKind::Optimize(field.as_str());
        let mut ids: Vec<u64> = batch.iter().flat_map(|row| row.book_ids.iter().copied()).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut resolved: HashMap<u64, BookRecord> = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(BOOK_LOOKUP_CHUNK) {
            let rows = books.select(Selector::Ids(chunk.to_vec())).await.or_raise(error)?;
            resolved.extend(rows.into_iter().map(|BookRow(book)| (book.id, book)));
        }

        let rows: Vec<FieldBookRow> = batch
            .drain(..)
            .map(|member| {
                let mut book_ids = member.book_ids;
                book_ids.sort_unstable();
                let books: Vec<BookRecord> = book_ids.iter().filter_map(|id| resolved.get(id).cloned()).collect();
                if field == Field::Author {
                    for book in &books {
                        owners.entry(book.id).or_default().push(member.id);
                    }
                }
                let book_deleted_count = books.iter().filter(|book| book.deleted).count() as u64;
                FieldBookRow {
                    id: member.id,
                    value: member.value,
                    name: member.name,
                    book_count: books.len() as u64 - book_deleted_count,
                    book_deleted_count,
                    books,
                }
            })
            .collect();
        debug!(%field, rows = rows.len(), books = resolved.len(), "optimizer batch resolved");
        output.insert(&rows).await.or_raise(error)?;
        Ok(rows.len() as u64)
    }

    async fn save_owners(&self, owners: BTreeMap<u64, Vec<u64>>) -> folio_store::error::Result<()> {
        let table: Table<AuthorIdRow> = Table::new(&self.store, AUTHOR_ID);
        table.recreate(TableOptions::default()).await?;
        let mut owners = owners.into_iter();
        loop {
            let rows: Vec<AuthorIdRow> = owners
                .by_ref()
                .take(BOOK_LOOKUP_CHUNK)
                .map(|(id, mut author_ids)| {
                    author_ids.sort_unstable();
                    author_ids.dedup();
                    AuthorIdRow { id, author_ids }
                })
                .collect();
            if rows.is_empty() {
                return Ok(());
            }
            table.insert(&rows).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::tables::BookRow;
    use folio_catalog::models::FieldValue;
    use folio_store::MemoryStore;
    use std::sync::Arc;

    fn book(id: u64, title: &str, deleted: bool) -> BookRow {
        BookRow(BookRecord {
            id,
            title: title.to_string(),
            deleted,
            ..Default::default()
        })
    }

    fn member(id: u64, value: &str, book_ids: Vec<u64>) -> MembersRow {
        MembersRow {
            id,
            value: FieldValue::text(value),
            name: value.to_string(),
            book_ids,
        }
    }

    async fn seed(store: &StoreHandle, members: Vec<MembersRow>) {
        let books: Table<BookRow> = Table::new(store, BOOK);
        books.create(TableOptions::default()).await.unwrap();
        books
            .insert(&[book(1, "one", false), book(2, "two", true), book(3, "three", false)])
            .await
            .unwrap();
        let table: Table<MembersRow> = Table::new(store, members_table(Field::Series));
        table.create(TableOptions::default()).await.unwrap();
        table.insert(&members).await.unwrap();
    }

    async fn run(store: &StoreHandle, optimizer: &Optimizer, field: Field) -> OptimizeReport {
        let mut sink = NoProgress;
        let mut progress = Progress::new(&mut sink);
        let mut reclaimer = Reclaimer::new(store.clone(), false, 10);
        optimizer.optimize(field, &mut progress, 0.0, 1.0, &mut reclaimer).await.unwrap()
    }

    #[tokio::test]
    async fn test_books_resolved_in_id_order_with_counts() {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        seed(&store, vec![member(1, "Saga", vec![3, 1, 2])]).await;
        let optimizer = Optimizer::new(store.clone());
        let report = run(&store, &optimizer, Field::Series).await;
        assert_eq!(report, OptimizeReport { rows: 1, swept: 0 });

        let output: Table<FieldBookRow> = Table::new(&store, book_table(Field::Series));
        let row = output.get(1).await.unwrap().unwrap();
        let ids: Vec<u64> = row.books.iter().map(|book| book.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!((row.book_count, row.book_deleted_count), (2, 1));
        // Consumed input is dropped.
        assert!(!Table::<MembersRow>::new(&store, members_table(Field::Series)).exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_without_books_are_swept() {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        seed(&store, vec![member(1, "Saga", vec![1]), member(2, "Ghost", vec![99])]).await;
        let optimizer = Optimizer::new(store.clone()).with_batch_size(1);
        let report = run(&store, &optimizer, Field::Series).await;
        assert_eq!(report, OptimizeReport { rows: 1, swept: 1 });
        let output: Table<FieldBookRow> = Table::new(&store, book_table(Field::Series));
        assert_eq!(output.count().await.unwrap(), 1);
        assert!(output.get(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        seed(&store, vec![member(1, "A", vec![1, 2]), member(2, "B", vec![3]), member(3, "C", vec![])]).await;
        let optimizer = Optimizer::new(store.clone()).retain_members(true).with_batch_size(2);
        let output: Table<FieldBookRow> = Table::new(&store, book_table(Field::Series));

        run(&store, &optimizer, Field::Series).await;
        let first = output.select(Selector::All).await.unwrap();
        run(&store, &optimizer, Field::Series).await;
        let second = output.select(Selector::All).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn test_author_optimization_records_owners() {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let books: Table<BookRow> = Table::new(&store, BOOK);
        books.create(TableOptions::default()).await.unwrap();
        books.insert(&[book(1, "one", false), book(2, "two", false)]).await.unwrap();
        let members: Table<MembersRow> = Table::new(&store, members_table(Field::Author));
        members.create(TableOptions::default()).await.unwrap();
        members
            .insert(&[member(1, "ivanov", vec![1]), member(2, "petrov", vec![1, 2])])
            .await
            .unwrap();

        run(&store, &Optimizer::new(store.clone()), Field::Author).await;
        let owners: Table<AuthorIdRow> = Table::new(&store, AUTHOR_ID);
        assert_eq!(owners.get(1).await.unwrap().unwrap().author_ids, vec![1, 2]);
        assert_eq!(owners.get(2).await.unwrap().unwrap().author_ids, vec![2]);
    }
}
