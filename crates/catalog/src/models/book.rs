use serde::{Deserialize, Serialize};

use super::split_authors;

/// One book as delivered by the record source.
///
/// `id` is zero until the record passes the filter and is assigned its
/// position in the index (starting at 1). A record with `id == 0` is never
/// persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookRecord {
    pub id: u64,
    /// Comma-joined co-authors; may be empty.
    pub author: String,
    /// Comma-joined genre codes.
    pub genre: String,
    pub title: String,
    pub series: String,
    pub series_no: Option<u32>,
    pub file: String,
    pub size: u64,
    pub lib_id: String,
    pub deleted: bool,
    pub ext: String,
    /// Arrival date as supplied, usually `YYYY-MM-DD`.
    pub date: String,
    pub lang: String,
    /// Library rating, 0 when unrated.
    pub rating: u8,
    pub keywords: String,
    /// Archive or directory the file lives in.
    pub folder: String,
}

impl BookRecord {
    /// Names this record is indexed under in the author index.
    pub fn authors(&self) -> Vec<&str> {
        split_authors(&self.author)
    }

    /// Individual genre codes, trimmed, without empty pieces.
    pub fn genres(&self) -> impl Iterator<Item = &str> {
        self.genre.split(',').map(str::trim).filter(|genre| !genre.is_empty())
    }

    /// Identity of the physical file behind this record. Several records may
    /// point at the same file.
    pub fn file_identity(&self) -> String {
        format!("{}/{}.{}", self.folder, self.file, self.ext)
    }
}
