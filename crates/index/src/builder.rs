//! The build pipeline: filter, index, optimize, count, finalize.

use folio_catalog::models::{BookRecord, CollectionInfo};
use folio_catalog::{RecordFilter, RecordSource, SourceEvent};
use folio_config::Config;
use folio_store::{StoreHandle, Table, TableOptions};
use futures::TryStreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::UtcDateTime;
use tracing::{debug, info, instrument};

use crate::error::{ErrorKind, Result};
use crate::indexer::{FieldIndexer, SAVE_CHUNK_SIZE};
use crate::optimizer::{OPTIMIZE_BATCH_SIZE, Optimizer};
use crate::progress::{Job, Progress, ProgressSink, fraction};
use crate::reclaim::Reclaimer;
use crate::stats::{CorpusStats, collect_file_stats};
use crate::tables::{BOOK, BookRow, CONFIG, ConfigRow, QUERY_CACHE, QUERY_TIME};
use exn::ResultExt;

/// Version of the on-disk layout. Bumping it changes every config hash.
pub const DB_VERSION: u32 = 1;

const INFO: &str = "info";
const STATS: &str = "stats";
const HASH: &str = "hash";
const VERSION: &str = "db_version";
const BUILT_AT: &str = "built_at";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub low_memory: bool,
    /// Ingested chunks between reclamation checkpoints.
    pub reclaim_every: usize,
    /// Rows per write when saving the book table and the field indices.
    pub save_chunk: usize,
    /// Cumulative member count per optimizer batch.
    pub optimize_batch: usize,
    /// Keep the `<field>_members` tables after optimizing.
    pub retain_members: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            low_memory: false,
            reclaim_every: 10,
            save_chunk: SAVE_CHUNK_SIZE,
            optimize_batch: OPTIMIZE_BATCH_SIZE,
            retain_members: false,
        }
    }
}

impl From<&Config> for BuildOptions {
    fn from(config: &Config) -> Self {
        Self {
            low_memory: config.low_memory_mode,
            reclaim_every: config.reclaim_every,
            ..Self::default()
        }
    }
}

/// What a successful build leaves behind besides its tables.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildArtifacts {
    pub info: CollectionInfo,
    pub stats: CorpusStats,
    pub hash: String,
}

/// Builds every table of an index into one store.
pub struct Builder {
    store: StoreHandle,
    options: BuildOptions,
}

impl Builder {
    pub fn new(store: StoreHandle, options: BuildOptions) -> Self {
        Self { store, options }
    }

    /// Run the whole pipeline.
    ///
    /// The `config` table is dropped first and written last, so an index
    /// whose build died at any point reads as not ready.
    #[instrument(level = "info", skip_all, fields(low_memory = self.options.low_memory))]
    pub async fn build(
        &self,
        mut source: RecordSource<'_>,
        filter: &RecordFilter,
        sink: &mut dyn ProgressSink,
    ) -> Result<BuildArtifacts> {
        let mut progress = Progress::new(sink);
        let mut reclaimer = Reclaimer::new(self.store.clone(), self.options.low_memory, self.options.reclaim_every);

        Table::<ConfigRow>::new(&self.store, CONFIG).drop_table().await.or_raise(|| ErrorKind::Index)?;
        let books: Table<BookRow> = Table::new(&self.store, BOOK);
        books.recreate(TableOptions::default()).await.or_raise(|| ErrorKind::Index)?;

        progress.begin(Job::Load);
        let mut indexer = FieldIndexer::new();
        let mut source_info = None;
        while let Some(event) = source.try_next().await.or_raise(|| ErrorKind::Source)? {
            match event {
                SourceEvent::Chunk(records) => {
                    let accepted = ingest(&mut indexer, filter, records);
                    for chunk in accepted.chunks(self.options.save_chunk.max(1)) {
                        books.insert(chunk).await.or_raise(|| ErrorKind::Index)?;
                    }
                    progress.records_loaded(indexer.counts().records_loaded);
                    reclaimer.checkpoint("ingest chunk").await?;
                },
                SourceEvent::ReadProgress { current, total_files } => progress.set(fraction(current, total_files)),
                SourceEvent::Info(info) => source_info = Some(info),
            }
        }
        drop(source);
        progress.set(1.0);
        let ingest_counts = indexer.counts();
        info!(
            records = ingest_counts.records_loaded,
            books = ingest_counts.book_count + ingest_counts.book_deleted_count,
            "records loaded"
        );

        let field_counts = indexer.finish(&self.store, &mut progress, &mut reclaimer).await?;

        // Cached results belong to the previous index.
        for table in [QUERY_CACHE, QUERY_TIME] {
            self.store.drop_table(table).await.or_raise(|| ErrorKind::Index)?;
        }

        progress.begin(Job::Optimize);
        Optimizer::new(self.store.clone())
            .with_batch_size(self.options.optimize_batch)
            .retain_members(self.options.retain_members)
            .optimize_all(&mut progress, &mut reclaimer)
            .await?;

        progress.begin(Job::Stats);
        let files = collect_file_stats(&self.store, &mut progress).await?;
        let stats = CorpusStats::new(ingest_counts, field_counts, files);
        books.drop_table().await.or_raise(|| ErrorKind::Stats)?;
        reclaimer.reclaim("book table dropped").await?;

        let info = filter.info().cloned().or(source_info).unwrap_or_default();
        let hash = config_hash(&info, filter.source(), &stats)?;
        write_meta(&self.store, &info, &stats, &hash).await?;
        progress.begin(Job::Done);
        info!(hash = %hash, authors = stats.author_count, books = stats.book_count, "index built");
        Ok(BuildArtifacts { info, stats, hash })
    }
}

/// Filter a chunk, assign ids and index it, returning the rows to persist.
fn ingest(indexer: &mut FieldIndexer, filter: &RecordFilter, records: Vec<BookRecord>) -> Vec<BookRow> {
    let mut accepted = Vec::with_capacity(records.len());
    for mut record in records {
        if filter.accepts(&record) {
            indexer.add(&mut record);
            accepted.push(BookRow(record));
        } else {
            indexer.skip(&mut record);
        }
    }
    accepted
}

/// BLAKE3 over everything that makes two indices answer queries differently.
fn config_hash(info: &CollectionInfo, filter: Option<&str>, stats: &CorpusStats) -> Result<String> {
    let payload = serde_json::to_vec(&(DB_VERSION, info, filter, stats)).or_raise(|| ErrorKind::Finalize)?;
    Ok(blake3::hash(&payload).to_hex().to_string())
}

fn config_row(name: &str, value: &impl Serialize) -> Result<ConfigRow> {
    Ok(ConfigRow {
        name: name.to_string(),
        value: serde_json::to_value(value).or_raise(|| ErrorKind::Finalize)?,
    })
}

async fn write_meta(store: &StoreHandle, info: &CollectionInfo, stats: &CorpusStats, hash: &str) -> Result<()> {
    let table: Table<ConfigRow> = Table::new(store, CONFIG);
    table
        .recreate(TableOptions::unique(folio_store::IndexKind::Text))
        .await
        .or_raise(|| ErrorKind::Finalize)?;
    let rows = [
        config_row(INFO, info)?,
        config_row(HASH, &hash)?,
        config_row(VERSION, &DB_VERSION)?,
        config_row(BUILT_AT, &UtcDateTime::now().unix_timestamp())?,
    ];
    table.insert(&rows).await.or_raise(|| ErrorKind::Finalize)?;
    // Completion marker; nothing may be written after it.
    table.insert(&[config_row(STATS, stats)?]).await.or_raise(|| ErrorKind::Finalize)?;
    debug!("index metadata written");
    Ok(())
}

/// Metadata of a finished index, read back from the `config` table.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub info: CollectionInfo,
    pub stats: CorpusStats,
    pub hash: String,
    pub db_version: u32,
    /// Unix timestamp of the end of the build.
    pub built_at: i64,
}

impl IndexMeta {
    /// `None` unless the store holds a complete index.
    #[instrument(level = "debug", skip_all)]
    pub async fn load(store: &StoreHandle) -> Result<Option<Self>> {
        let table: Table<ConfigRow> = Table::new(store, CONFIG);
        if !table.exists().await.or_raise(|| ErrorKind::Meta)? {
            return Ok(None);
        }
        let Some(stats) = read(&table, STATS).await? else {
            return Ok(None);
        };
        Ok(Some(Self {
            info: read(&table, INFO).await?.unwrap_or_default(),
            stats,
            hash: read(&table, HASH).await?.unwrap_or_default(),
            db_version: read(&table, VERSION).await?.unwrap_or_default(),
            built_at: read(&table, BUILT_AT).await?.unwrap_or_default(),
        }))
    }

    /// Whether the store holds a complete index of the current layout.
    pub async fn is_ready(store: &StoreHandle) -> Result<bool> {
        Ok(Self::load(store).await?.is_some_and(|meta| meta.db_version == DB_VERSION))
    }
}

async fn read<T: DeserializeOwned>(table: &Table<ConfigRow>, name: &str) -> Result<Option<T>> {
    let Some(row) = table.find(name.to_string()).await.or_raise(|| ErrorKind::Meta)? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_value(row.value).or_raise(|| ErrorKind::Meta)?))
}
