//! Memory-bounded index builder.
//!
//! A build reads book records from a [`RecordSource`](folio_catalog::RecordSource),
//! drops the ones the [`RecordFilter`](folio_catalog::RecordFilter) rejects
//! and leaves behind, in a [`TableStore`](folio_store::TableStore):
//!
//! 1. one sorted search table per [`Field`](folio_catalog::models::Field),
//! 2. a denormalized `<field>_book` table for author, series and title,
//! 3. the `author_id` table mapping books to their authors,
//! 4. the `config` table with collection info, [`CorpusStats`] and the
//!    config hash. It is written last and marks the index as complete.
//!
//! ```no_run
//! # async fn run(store: folio_store::StoreHandle, source: folio_catalog::RecordSource<'_>) -> folio_index::error::Result<()> {
//! use folio_catalog::RecordFilter;
//! use folio_index::{BuildOptions, Builder, NoProgress};
//!
//! let artifacts = Builder::new(store, BuildOptions::default())
//!     .build(source, &RecordFilter::accept_all(), &mut NoProgress)
//!     .await?;
//! println!("{} books, hash {}", artifacts.stats.book_count, artifacts.hash);
//! # Ok(())
//! # }
//! ```

mod builder;
pub mod error;
mod indexer;
mod optimizer;
mod progress;
mod reclaim;
mod stats;
pub mod tables;

pub use crate::builder::{BuildArtifacts, BuildOptions, Builder, DB_VERSION, IndexMeta};
pub use crate::indexer::{FieldCounts, IngestCounts, SAVE_CHUNK_SIZE};
pub use crate::optimizer::OPTIMIZE_BATCH_SIZE;
pub use crate::progress::{Job, NoProgress, ProgressEvent, ProgressSink};
pub use crate::stats::{CorpusStats, FileStats};
