use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter, Result as FmtResult};

use super::{BookRecord, EMPTY_FIELD_VALUE, canonical};

/// Searchable fields of a book record. Each one gets its own index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Author,
    Series,
    Title,
    Genre,
    Lang,
    Deleted,
    Date,
    Rating,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Author,
        Field::Series,
        Field::Title,
        Field::Genre,
        Field::Lang,
        Field::Deleted,
        Field::Date,
        Field::Rating,
    ];

    /// Name of the field's search table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Author => "author",
            Field::Series => "series",
            Field::Title => "title",
            Field::Genre => "genre",
            Field::Lang => "lang",
            Field::Deleted => "del",
            Field::Date => "date",
            Field::Rating => "librate",
        }
    }

    /// Numeric fields are keyed and sorted by number instead of text.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Field::Deleted | Field::Rating)
    }

    /// Fields that get a denormalized `<field>_book` table.
    pub fn is_optimized(&self) -> bool {
        matches!(self, Field::Author | Field::Series | Field::Title)
    }

    /// Canonical values a record contributes to this field's index.
    ///
    /// An absent series contributes nothing; every other absent text value
    /// is indexed as [`EMPTY_FIELD_VALUE`].
    pub fn values(&self, record: &BookRecord) -> Vec<FieldValue> {
        match self {
            Field::Author => record.authors().into_iter().map(FieldValue::text).collect(),
            Field::Series if record.series.is_empty() => Vec::new(),
            Field::Series => vec![FieldValue::text(&record.series)],
            Field::Title => vec![FieldValue::text(&record.title)],
            Field::Genre => {
                let genres: Vec<FieldValue> = record.genres().map(FieldValue::text).collect();
                if genres.is_empty() {
                    vec![FieldValue::Text(EMPTY_FIELD_VALUE.to_string())]
                } else {
                    genres
                }
            },
            Field::Lang => vec![FieldValue::text(&record.lang)],
            Field::Deleted => vec![FieldValue::Number(i64::from(record.deleted))],
            Field::Date => vec![FieldValue::text(&record.date)],
            Field::Rating => vec![FieldValue::Number(i64::from(record.rating))],
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// A canonical field value: lower-cased text or a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(i64),
    Text(String),
}

impl FieldValue {
    /// Canonical text value (see [`canonical`]).
    pub fn text(value: &str) -> Self {
        Self::Text(canonical(value))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Number(_) => None,
        }
    }
}

impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}
