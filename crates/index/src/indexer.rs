//! Field indexer.
//!
//! Ingestion assigns each accepted record its id and folds it into one
//! accumulator per [`Field`]. Finalization sorts every accumulator by value,
//! hands out ordinal ids in that order and writes the search and member
//! tables in bounded chunks.

use folio_catalog::models::{BookRecord, Field, FieldValue};
use folio_store::{StoreHandle, Table, TableOptions};
use roaring::RoaringTreemap;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::error::{ErrorKind, Result};
use crate::progress::{Job, Progress, fraction};
use crate::reclaim::Reclaimer;
use crate::tables::{AuthorRow, FieldRow, MembersRow, members_table, search_table, search_table_options};
use exn::ResultExt;

/// Entries written per insert while saving an index.
pub const SAVE_CHUNK_SIZE: usize = 10_000;

/// Fields saved together under [`Job::SaveOthers`].
const OTHER_FIELDS: [Field; 4] = [Field::Lang, Field::Deleted, Field::Date, Field::Rating];

#[derive(Debug)]
struct Entry {
    value: FieldValue,
    /// Display form; only kept for fields whose rows carry a name.
    name: Option<String>,
    books: RoaringTreemap,
    /// Provisional author ids (arena positions in the author accumulator)
    /// until finalization.
    authors: RoaringTreemap,
    book_count: u64,
    book_deleted_count: u64,
}

impl Entry {
    fn new(value: FieldValue, name: Option<String>) -> Self {
        Self {
            value,
            name,
            books: RoaringTreemap::new(),
            authors: RoaringTreemap::new(),
            book_count: 0,
            book_deleted_count: 0,
        }
    }
}

/// Arena of entries plus a hash index from canonical value to arena slot.
#[derive(Debug)]
struct Accumulator {
    field: Field,
    lookup: HashMap<FieldValue, usize>,
    entries: Vec<Entry>,
}

impl Accumulator {
    fn new(field: Field) -> Self {
        Self {
            field,
            lookup: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Arena slot for `value`, creating the entry if needed. The flag is
    /// `true` when the entry was just created.
    fn slot(&mut self, value: FieldValue, name: impl FnOnce() -> Option<String>) -> (usize, bool) {
        if let Some(&slot) = self.lookup.get(&value) {
            return (slot, false);
        }
        let slot = self.entries.len();
        self.entries.push(Entry::new(value.clone(), name()));
        self.lookup.insert(value, slot);
        (slot, true)
    }

    /// Sort entries by value. Returns the entries in ordinal order and the
    /// map from arena slot to ordinal id.
    fn into_sorted(self) -> (Field, Vec<Entry>, Vec<u64>) {
        let Self { field, lookup, entries } = self;
        drop(lookup);
        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_unstable_by(|&a, &b| entries[a].value.cmp(&entries[b].value));
        let mut ordinals = vec![0; entries.len()];
        for (rank, &slot) in order.iter().enumerate() {
            ordinals[slot] = rank as u64 + 1;
        }
        let mut slots: Vec<Option<Entry>> = entries.into_iter().map(Some).collect();
        let sorted = order.iter().filter_map(|&slot| slots[slot].take()).collect();
        (field, sorted, ordinals)
    }
}

/// Counters gathered while ingesting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestCounts {
    pub records_loaded: u64,
    pub book_count: u64,
    pub book_deleted_count: u64,
    pub no_author_book_count: u64,
    /// Distinct individual authors, not counting joined co-author strings.
    pub author_count: u64,
}

/// Distinct entries per field, known after finalization.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FieldCounts {
    pub author_count_all: u64,
    pub title_count: u64,
    pub series_count: u64,
    pub genre_count: u64,
    pub lang_count: u64,
}

/// Accumulates the per-field inverted indices of a build.
///
/// Owned by the build for the whole ingestion phase and consumed by
/// [`finish`](Self::finish), which releases every accumulator.
#[derive(Debug)]
pub struct FieldIndexer {
    accumulators: Vec<Accumulator>,
    counts: IngestCounts,
    next_id: u64,
}

impl Default for FieldIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldIndexer {
    pub fn new() -> Self {
        Self {
            accumulators: Field::ALL.into_iter().map(Accumulator::new).collect(),
            counts: IngestCounts::default(),
            next_id: 0,
        }
    }

    pub fn counts(&self) -> IngestCounts {
        self.counts
    }

    /// Count a record the filter rejected. It gets no id and is not indexed.
    pub fn skip(&mut self, record: &mut BookRecord) {
        record.id = 0;
        self.counts.records_loaded += 1;
    }

    /// Assign the record its id and index every field.
    pub fn add(&mut self, record: &mut BookRecord) {
        self.next_id += 1;
        record.id = self.next_id;
        self.counts.records_loaded += 1;
        if record.deleted {
            self.counts.book_deleted_count += 1;
        } else {
            self.counts.book_count += 1;
            if record.author.is_empty() {
                self.counts.no_author_book_count += 1;
            }
        }

        let authors = self.add_authors(record);
        for accumulator in self.accumulators.iter_mut().filter(|acc| acc.field != Field::Author) {
            let keep_books = accumulator.field.is_optimized();
            for value in accumulator.field.values(record) {
                let (slot, _) = accumulator.slot(value, || None);
                let entry = &mut accumulator.entries[slot];
                entry.authors |= &authors;
                if keep_books {
                    entry.books.insert(record.id);
                }
            }
        }
    }

    /// Index the author field, returning the record's provisional author ids.
    fn add_authors(&mut self, record: &BookRecord) -> RoaringTreemap {
        let accumulator = &mut self.accumulators[0];
        debug_assert_eq!(accumulator.field, Field::Author);
        let names = record.authors();
        let individual = names.len() == 1;
        let mut slots = RoaringTreemap::new();
        for (position, name) in names.iter().enumerate() {
            let value = FieldValue::text(name);
            let (slot, created) = accumulator.slot(value, || Some((*name).to_string()));
            // The joined co-author string (last of several) is not a person.
            if created && (individual || position + 1 < names.len()) {
                self.counts.author_count += 1;
            }
            let entry = &mut accumulator.entries[slot];
            if entry.books.insert(record.id) {
                if record.deleted {
                    entry.book_deleted_count += 1;
                } else {
                    entry.book_count += 1;
                }
            }
            slots.insert(slot as u64);
        }
        slots
    }

    /// Sort, assign ordinals and persist every field index.
    #[instrument(level = "debug", skip_all)]
    pub(crate) async fn finish(
        self,
        store: &StoreHandle,
        progress: &mut Progress<'_>,
        reclaimer: &mut Reclaimer,
    ) -> Result<FieldCounts> {
        progress.begin(Job::Sort);
        let total = self.accumulators.len() as u64;
        let mut sorted = Vec::with_capacity(self.accumulators.len());
        for (done, accumulator) in self.accumulators.into_iter().enumerate() {
            sorted.push(accumulator.into_sorted());
            progress.set(fraction(done as u64 + 1, total));
        }
        reclaimer.reclaim("sorted").await?;

        let mut counts = FieldCounts::default();
        let mut sorted = sorted.into_iter();
        let Some((_, authors, author_ordinals)) = sorted.next() else {
            exn::bail!(ErrorKind::Index);
        };
        counts.author_count_all = authors.len() as u64;
        progress.begin(Job::SaveAuthor);
        save_authors(store, authors, progress, reclaimer).await?;

        for (field, entries, _) in sorted {
            let job = match field {
                Field::Series => Job::SaveSeries,
                Field::Title => Job::SaveTitle,
                Field::Genre => Job::SaveGenre,
                _ => Job::SaveOthers,
            };
            match field {
                Field::Series => counts.series_count = entries.len() as u64,
                Field::Title => counts.title_count = entries.len() as u64,
                Field::Genre => counts.genre_count = entries.len() as u64,
                Field::Lang => counts.lang_count = entries.len() as u64,
                _ => {},
            }
            // The remaining small indices share one job.
            if job != Job::SaveOthers || field == OTHER_FIELDS[0] {
                progress.begin(job);
            }
            save_field(store, field, entries, &author_ordinals, progress, reclaimer).await?;
        }
        info!(authors = counts.author_count_all, titles = counts.title_count, "field indices saved");
        Ok(counts)
    }
}

async fn save_authors(
    store: &StoreHandle,
    entries: Vec<Entry>,
    progress: &mut Progress<'_>,
    reclaimer: &mut Reclaimer,
) -> Result<()> {
    let search: Table<AuthorRow> = Table::new(store, search_table(Field::Author));
    let members: Table<MembersRow> = Table::new(store, members_table(Field::Author));
    search.recreate(search_table_options(Field::Author)).await.or_raise(|| ErrorKind::Index)?;
    members.recreate(TableOptions::default()).await.or_raise(|| ErrorKind::Index)?;

    let total = entries.len() as u64;
    let mut saved = 0;
    let mut entries = entries.into_iter();
    loop {
        let chunk: Vec<Entry> = entries.by_ref().take(SAVE_CHUNK_SIZE).collect();
        if chunk.is_empty() {
            break;
        }
        let mut search_rows = Vec::with_capacity(chunk.len());
        let mut member_rows = Vec::with_capacity(chunk.len());
        for entry in chunk {
            saved += 1;
            let value = entry.value.as_text().unwrap_or_default().to_string();
            let name = entry.name.unwrap_or_else(|| value.clone());
            search_rows.push(AuthorRow {
                id: saved,
                value: value.clone(),
                name: name.clone(),
                book_count: entry.book_count,
                book_deleted_count: entry.book_deleted_count,
            });
            member_rows.push(MembersRow {
                id: saved,
                value: entry.value,
                name,
                book_ids: entry.books.iter().collect(),
            });
        }
        search.insert(&search_rows).await.or_raise(|| ErrorKind::Index)?;
        members.insert(&member_rows).await.or_raise(|| ErrorKind::Index)?;
        debug!(field = "author", saved, total, "saved chunk");
        reclaimer.checkpoint("save author").await?;
        progress.set(fraction(saved, total));
    }
    Ok(())
}

async fn save_field(
    store: &StoreHandle,
    field: Field,
    entries: Vec<Entry>,
    author_ordinals: &[u64],
    progress: &mut Progress<'_>,
    reclaimer: &mut Reclaimer,
) -> Result<()> {
    let search: Table<FieldRow> = Table::new(store, search_table(field));
    search.recreate(search_table_options(field)).await.or_raise(|| ErrorKind::Index)?;
    let members: Option<Table<MembersRow>> = field.is_optimized().then(|| Table::new(store, members_table(field)));
    if let Some(members) = &members {
        members.recreate(TableOptions::default()).await.or_raise(|| ErrorKind::Index)?;
    }

    // Progress for the shared "others" job is split evenly between them.
    let (from, to) = match OTHER_FIELDS.iter().position(|other| *other == field) {
        Some(index) => (index as f64 / OTHER_FIELDS.len() as f64, (index + 1) as f64 / OTHER_FIELDS.len() as f64),
        None => (0.0, 1.0),
    };
    let total = entries.len() as u64;
    let mut saved = 0;
    let mut entries = entries.into_iter();
    loop {
        let chunk: Vec<Entry> = entries.by_ref().take(SAVE_CHUNK_SIZE).collect();
        if chunk.is_empty() {
            break;
        }
        let mut search_rows = Vec::with_capacity(chunk.len());
        let mut member_rows = Vec::new();
        for entry in chunk {
            saved += 1;
            let mut author_ids: Vec<u64> =
                entry.authors.iter().filter_map(|slot| author_ordinals.get(slot as usize).copied()).collect();
            author_ids.sort_unstable();
            if members.is_some() {
                member_rows.push(MembersRow {
                    id: saved,
                    value: entry.value.clone(),
                    name: entry.value.to_string(),
                    book_ids: entry.books.iter().collect(),
                });
            }
            search_rows.push(FieldRow { id: saved, value: entry.value, author_ids });
        }
        search.insert(&search_rows).await.or_raise(|| ErrorKind::Index)?;
        if let Some(members) = &members {
            members.insert(&member_rows).await.or_raise(|| ErrorKind::Index)?;
        }
        debug!(%field, saved, total, "saved chunk");
        reclaimer.checkpoint("save field").await?;
        progress.span(from, to).set(fraction(saved, total));
    }
    Ok(())
}
