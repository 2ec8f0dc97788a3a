//! Upstream record supplier.
//!
//! The raw catalog parser is not part of this workspace; it hands records
//! over as a [`Stream`] of [`SourceEvent`]s.

use async_stream::stream;
use futures::Stream;
use std::pin::Pin;

use crate::error::{Error, Result};
use crate::models::{BookRecord, CollectionInfo};

/// Something the record supplier reports while reading the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// A batch of records in catalog order, `id` not yet assigned.
    Chunk(Vec<BookRecord>),
    /// Read position, in source files.
    ReadProgress { current: u64, total_files: u64 },
    /// Collection metadata; usually the last event.
    Info(CollectionInfo),
}

pub type RecordSource<'a> = Pin<Box<dyn Stream<Item = Result<SourceEvent>> + Send + 'a>>;

/// Serve an in-memory list of records as a source, `chunk_size` records per
/// chunk, reporting one "file" per chunk.
pub fn from_records(records: Vec<BookRecord>, chunk_size: usize, info: CollectionInfo) -> RecordSource<'static> {
    let chunk_size = chunk_size.max(1);
    let total_files = records.len().div_ceil(chunk_size) as u64;
    Box::pin(stream! {
        let mut records = records.into_iter().peekable();
        let mut current = 0;
        while records.peek().is_some() {
            let chunk: Vec<BookRecord> = records.by_ref().take(chunk_size).collect();
            current += 1;
            yield Ok::<_, Error>(SourceEvent::ReadProgress { current, total_files });
            yield Ok(SourceEvent::Chunk(chunk));
        }
        yield Ok(SourceEvent::Info(info));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_from_records_chunks() {
        let records: Vec<_> = (0..5).map(|n| BookRecord { title: format!("t{n}"), ..Default::default() }).collect();
        let events: Vec<SourceEvent> = from_records(records, 2, CollectionInfo::default()).try_collect().await.unwrap();
        let sizes: Vec<usize> = events
            .iter()
            .filter_map(|event| match event {
                SourceEvent::Chunk(chunk) => Some(chunk.len()),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(events.first(), Some(&SourceEvent::ReadProgress { current: 1, total_files: 3 }));
        assert!(matches!(events.last(), Some(SourceEvent::Info(_))));
    }

    #[tokio::test]
    async fn test_empty_source_only_reports_info() {
        let events: Vec<SourceEvent> = from_records(Vec::new(), 10, CollectionInfo::default()).try_collect().await.unwrap();
        assert_eq!(events, vec![SourceEvent::Info(CollectionInfo::default())]);
    }
}
