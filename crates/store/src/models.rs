use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Indexed key of a row.
///
/// A table holds keys of one kind only. Text keys compare by code point
/// (identical to SQLite's `BINARY` collation over UTF-8), numbers compare
/// numerically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Number(i64),
    Text(String),
}

impl Key {
    pub fn kind(&self) -> IndexKind {
        match self {
            Self::Text(_) => IndexKind::Text,
            Self::Number(_) => IndexKind::Number,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(number) => Some(*number),
            Self::Text(_) => None,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            // Same as SQLite: numeric values sort before text.
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Text,
    Number,
}

/// Options for [`TableStore::create_table`](crate::TableStore::create_table).
#[derive(Debug, Clone, Copy, Default)]
pub struct TableOptions {
    /// Create a unique index over the row key.
    pub unique_index: Option<IndexKind>,
}

impl TableOptions {
    pub fn unique(kind: IndexKind) -> Self {
        Self { unique_index: Some(kind) }
    }
}

/// What happens when an inserted row collides with an existing id or key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InsertMode {
    /// Collisions raise [`ErrorKind::Constraint`].
    #[default]
    Fail,
    /// Colliding rows are removed first.
    Replace,
}

/// Row selection for reads and deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every row, in id order.
    All,
    /// Rows with one of the given ids, in id order. Unknown ids are skipped.
    Ids(Vec<u64>),
    /// Rows whose key lies in the inclusive range, in key order.
    KeyRange { from: Key, to: Key },
    /// Rows whose key is one of the given keys, in key order.
    Keys(Vec<Key>),
    /// Up to `limit` rows with an id strictly greater than `id`, in id order.
    After { id: u64, limit: usize },
    /// Rows written with the flag set, in id order.
    Flagged,
}

/// A row as the backends see it: an id, an optional indexed key, a flag
/// bit, and an opaque JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// `None` lets the store assign the next id.
    pub id: Option<u64>,
    pub key: Option<Key>,
    pub flagged: bool,
    pub data: String,
}

/// A typed row that can be stored in a [`Table`](crate::Table).
///
/// The whole value is serialized into the row payload; `id`, `key` and
/// `flagged` are additionally projected into columns so the store can select
/// on them.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    fn id(&self) -> Option<u64>;

    fn key(&self) -> Option<Key> {
        None
    }

    fn flagged(&self) -> bool {
        false
    }

    fn to_raw(&self) -> Result<RawRow> {
        let data = serde_json::to_string(self).or_raise(|| ErrorKind::InvalidData)?;
        Ok(RawRow {
            id: self.id(),
            key: self.key(),
            flagged: self.flagged(),
            data,
        })
    }

    fn from_raw(raw: &RawRow) -> Result<Self> {
        serde_json::from_str(&raw.data).or_raise(|| ErrorKind::InvalidData)
    }
}

/// Check a table name before it gets interpolated into a statement.
pub(crate) fn validate_table_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        && !name.starts_with("sqlite_");
    if !valid {
        exn::bail!(ErrorKind::InvalidTable(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        id: u64,
        value: String,
    }

    impl Record for Entry {
        fn id(&self) -> Option<u64> {
            Some(self.id)
        }

        fn key(&self) -> Option<Key> {
            Some(Key::from(self.value.as_str()))
        }
    }

    #[test]
    fn test_text_keys_order_by_code_point() {
        let mut keys = vec![Key::from("б"), Key::from("b"), Key::from("B"), Key::from("?")];
        keys.sort();
        assert_eq!(keys, vec![Key::from("?"), Key::from("B"), Key::from("b"), Key::from("б")]);
    }

    #[test]
    fn test_numbers_sort_before_text() {
        assert!(Key::Number(i64::MAX) < Key::from(""));
    }

    #[test]
    fn test_record_raw_conversion() {
        let entry = Entry { id: 7, value: "ivanov".to_string() };
        let raw = entry.to_raw().unwrap();
        assert_eq!(raw.id, Some(7));
        assert_eq!(raw.key, Some(Key::from("ivanov")));
        assert!(!raw.flagged);
        assert_eq!(Entry::from_raw(&raw).unwrap(), entry);
    }

    #[test]
    fn test_invalid_payload_is_invalid_data() {
        let raw = RawRow { id: Some(1), key: None, flagged: false, data: "{".to_string() };
        let err = Entry::from_raw(&raw).unwrap_err();
        assert!(matches!(*err, ErrorKind::InvalidData));
    }

    #[rstest]
    #[case("author", true)]
    #[case("author_book", true)]
    #[case("query_cache", true)]
    #[case("", false)]
    #[case("Author", false)]
    #[case("author; DROP TABLE book", false)]
    #[case("\"author\"", false)]
    #[case("sqlite_master", false)]
    fn test_validate_table_name(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(validate_table_name(name).is_ok(), valid);
    }
}
