//! Table names and row types of a finished index.
//!
//! | table | row | key |
//! |---|---|---|
//! | `book` (build only) | [`BookRow`] | none |
//! | `author` | [`AuthorRow`] | value (unique) |
//! | `series`, `title`, `genre`, `lang`, `del`, `date`, `librate` | [`FieldRow`] | value (unique) |
//! | `<field>_members` (build only) | [`MembersRow`] | none |
//! | `author_book`, `series_book`, `title_book` | [`FieldBookRow`] | none |
//! | `author_id` | [`AuthorIdRow`] | none |
//! | `query_cache`, `query_time` | owned by the result cache | signature |
//! | `config` | [`ConfigRow`] | name (unique) |

use folio_catalog::models::{BookRecord, Field, FieldValue};
use folio_store::{IndexKind, Key, Record, TableOptions};
use serde::{Deserialize, Serialize};

pub const BOOK: &str = "book";
pub const AUTHOR_ID: &str = "author_id";
pub const CONFIG: &str = "config";
pub const QUERY_CACHE: &str = "query_cache";
pub const QUERY_TIME: &str = "query_time";

/// Search table of a field; named after the field itself.
pub fn search_table(field: Field) -> &'static str {
    field.as_str()
}

/// Raw member sets of an optimized field, consumed by the optimizer.
pub fn members_table(field: Field) -> String {
    format!("{field}_members")
}

/// Denormalized table of an optimized field.
pub fn book_table(field: Field) -> String {
    format!("{field}_book")
}

pub fn search_table_options(field: Field) -> TableOptions {
    TableOptions::unique(if field.is_numeric() { IndexKind::Number } else { IndexKind::Text })
}

pub fn to_key(value: &FieldValue) -> Key {
    match value {
        FieldValue::Text(text) => Key::Text(text.clone()),
        FieldValue::Number(number) => Key::Number(*number),
    }
}

pub fn from_key(key: Key) -> FieldValue {
    match key {
        Key::Text(text) => FieldValue::Text(text),
        Key::Number(number) => FieldValue::Number(number),
    }
}

/// A filtered book record, persisted for the duration of the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookRow(pub BookRecord);

impl Record for BookRow {
    fn id(&self) -> Option<u64> {
        Some(self.0.id)
    }
}

/// Author search table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRow {
    pub id: u64,
    /// Canonical (lower-cased) name.
    pub value: String,
    /// Name as first seen in the catalog.
    pub name: String,
    pub book_count: u64,
    pub book_deleted_count: u64,
}

impl Record for AuthorRow {
    fn id(&self) -> Option<u64> {
        Some(self.id)
    }

    fn key(&self) -> Option<Key> {
        Some(Key::Text(self.value.clone()))
    }
}

/// Search table entry for every field but author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRow {
    pub id: u64,
    pub value: FieldValue,
    /// Sorted ids of the authors of every book carrying this value.
    pub author_ids: Vec<u64>,
}

impl Record for FieldRow {
    fn id(&self) -> Option<u64> {
        Some(self.id)
    }

    fn key(&self) -> Option<Key> {
        Some(to_key(&self.value))
    }
}

/// Raw member set of an optimized field entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembersRow {
    pub id: u64,
    pub value: FieldValue,
    pub name: String,
    /// Sorted book ids.
    pub book_ids: Vec<u64>,
}

impl Record for MembersRow {
    fn id(&self) -> Option<u64> {
        Some(self.id)
    }
}

/// Optimized field entry with its books resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBookRow {
    pub id: u64,
    pub value: FieldValue,
    pub name: String,
    /// Books in ascending id order.
    pub books: Vec<BookRecord>,
    pub book_count: u64,
    pub book_deleted_count: u64,
}

impl Record for FieldBookRow {
    fn id(&self) -> Option<u64> {
        Some(self.id)
    }

    /// Rows left without books are swept after optimization.
    fn flagged(&self) -> bool {
        self.books.is_empty()
    }
}

/// Owning authors of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorIdRow {
    /// Book id.
    pub id: u64,
    pub author_ids: Vec<u64>,
}

impl Record for AuthorIdRow {
    fn id(&self) -> Option<u64> {
        Some(self.id)
    }
}

/// A named metadata value. The `config` table is written last; its presence
/// marks the index as complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRow {
    pub name: String,
    pub value: serde_json::Value,
}

impl Record for ConfigRow {
    fn id(&self) -> Option<u64> {
        None
    }

    fn key(&self) -> Option<Key> {
        Some(Key::Text(self.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Field::Author, "author_members", "author_book")]
    #[case(Field::Series, "series_members", "series_book")]
    #[case(Field::Title, "title_members", "title_book")]
    fn test_table_names(#[case] field: Field, #[case] members: &str, #[case] book: &str) {
        assert_eq!(members_table(field), members);
        assert_eq!(book_table(field), book);
    }

    #[test]
    fn test_numeric_fields_get_numeric_index() {
        assert_eq!(search_table_options(Field::Rating).unique_index, Some(IndexKind::Number));
        assert_eq!(search_table_options(Field::Lang).unique_index, Some(IndexKind::Text));
    }

    #[test]
    fn test_empty_book_rows_are_flagged() {
        let row = FieldBookRow {
            id: 1,
            value: FieldValue::Text("?".to_string()),
            name: "?".to_string(),
            books: Vec::new(),
            book_count: 0,
            book_deleted_count: 0,
        };
        assert!(row.flagged());
    }

    #[test]
    fn test_field_value_key_conversion() {
        let value = FieldValue::Number(1);
        assert_eq!(from_key(to_key(&value)), value);
    }
}
