//! Corpus statistics.

use folio_store::{StoreHandle, Table};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, instrument};

use crate::error::{ErrorKind, Result};
use crate::indexer::{FieldCounts, IngestCounts};
use crate::progress::{Progress, fraction};
use crate::tables::{BOOK, BookRow};
use exn::ResultExt;

const SCAN_PAGE_SIZE: usize = 10_000;

/// Statistics persisted with a finished index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusStats {
    /// Records read from the source, including filtered ones.
    pub records_loaded: u64,
    /// Individual authors.
    pub author_count: u64,
    /// Author entries including joined co-author strings.
    pub author_count_all: u64,
    pub book_count: u64,
    pub book_count_all: u64,
    pub book_deleted_count: u64,
    /// Live books with an empty author.
    pub no_author_book_count: u64,
    pub title_count: u64,
    pub series_count: u64,
    pub genre_count: u64,
    pub lang_count: u64,
    pub files_count: u64,
    pub files_deleted_count: u64,
    pub files_count_all: u64,
}

impl CorpusStats {
    pub fn new(ingest: IngestCounts, fields: FieldCounts, files: FileStats) -> Self {
        Self {
            records_loaded: ingest.records_loaded,
            author_count: ingest.author_count,
            author_count_all: fields.author_count_all,
            book_count: ingest.book_count,
            book_count_all: ingest.book_count + ingest.book_deleted_count,
            book_deleted_count: ingest.book_deleted_count,
            no_author_book_count: ingest.no_author_book_count,
            title_count: fields.title_count,
            series_count: fields.series_count,
            genre_count: fields.genre_count,
            lang_count: fields.lang_count,
            files_count: files.files_count,
            files_deleted_count: files.files_deleted_count,
            files_count_all: files.files_count_all,
        }
    }
}

/// Distinct book files, by `folder/file.ext`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub files_count: u64,
    /// Files only present as deleted records.
    pub files_deleted_count: u64,
    pub files_count_all: u64,
}

#[derive(Debug, Default)]
struct FileTally {
    active: HashSet<String>,
    deleted: HashSet<String>,
}

impl FileTally {
    fn add(&mut self, identity: String, deleted: bool) {
        if deleted {
            if !self.active.contains(&identity) {
                self.deleted.insert(identity);
            }
        } else {
            self.deleted.remove(&identity);
            self.active.insert(identity);
        }
    }

    fn finish(self) -> FileStats {
        let files_count = self.active.len() as u64;
        let files_deleted_count = self.deleted.len() as u64;
        FileStats {
            files_count,
            files_deleted_count,
            files_count_all: files_count + files_deleted_count,
        }
    }
}

/// Count distinct files with one forward scan of the book table.
#[instrument(level = "debug", skip_all)]
pub(crate) async fn collect_file_stats(store: &StoreHandle, progress: &mut Progress<'_>) -> Result<FileStats> {
    let books: Table<BookRow> = Table::new(store, BOOK);
    let total = books.count().await.or_raise(|| ErrorKind::Stats)?;
    let mut tally = FileTally::default();
    let mut scanned = 0;
    let mut pages = Box::pin(books.pages(SCAN_PAGE_SIZE));
    while let Some(page) = pages.try_next().await.or_raise(|| ErrorKind::Stats)? {
        scanned += page.len() as u64;
        for BookRow(book) in page {
            tally.add(book.file_identity(), book.deleted);
        }
        progress.set(fraction(scanned, total));
    }
    let stats = tally.finish();
    debug!(scanned, files = stats.files_count, deleted = stats.files_deleted_count, "file stats collected");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use folio_catalog::models::BookRecord;
    use folio_store::{MemoryStore, TableOptions};
    use std::sync::Arc;

    fn book(id: u64, file: &str, deleted: bool) -> BookRow {
        BookRow(BookRecord {
            id,
            folder: "lib.zip".to_string(),
            file: file.to_string(),
            ext: "fb2".to_string(),
            deleted,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_identity_in_both_sets_counts_as_active() {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let books: Table<BookRow> = Table::new(&store, BOOK);
        books.create(TableOptions::default()).await.unwrap();
        books
            .insert(&[
                book(1, "100", true),
                book(2, "100", false),
                book(3, "101", false),
                book(4, "101", false),
                book(5, "102", true),
                book(6, "103", false),
                book(7, "103", true),
            ])
            .await
            .unwrap();

        let mut sink = NoProgress;
        let mut progress = Progress::new(&mut sink);
        let stats = collect_file_stats(&store, &mut progress).await.unwrap();
        assert_eq!(
            stats,
            FileStats {
                files_count: 3,
                files_deleted_count: 1,
                files_count_all: 4,
            }
        );
    }

    #[test]
    fn test_corpus_stats_totals() {
        let ingest = IngestCounts {
            records_loaded: 5,
            book_count: 3,
            book_deleted_count: 1,
            no_author_book_count: 1,
            author_count: 2,
        };
        let stats = CorpusStats::new(ingest, FieldCounts::default(), FileStats::default());
        assert_eq!(stats.book_count_all, 4);
        assert_eq!(stats.records_loaded, 5);
    }
}
