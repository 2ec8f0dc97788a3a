//! Search requests.

use folio_catalog::models::{Field, FieldValue, canonical, prefix_upper_bound};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result};

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 1000;
/// Prefix of every result cache signature.
const SIGNATURE_PREFIX: &str = "author-ids-";
/// A criterion equal to this matches everything.
const ANY: &str = "*";

/// How a text criterion is matched against canonical field values.
///
/// | input | mode |
/// |---|---|
/// | `=value` | [`Exact`](Self::Exact) |
/// | `*value` | [`Substring`](Self::Substring) |
/// | `#value` | [`NonAlphabetic`](Self::NonAlphabetic) |
/// | `value` | [`Prefix`](Self::Prefix) |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchMode {
    Exact(String),
    Substring(String),
    /// Substring match restricted to values that don't start with a Latin or
    /// Cyrillic letter.
    NonAlphabetic(String),
    Prefix(String),
}

impl MatchMode {
    /// Parse a criterion. `None` when it doesn't constrain anything.
    pub fn parse(criterion: &str) -> Option<Self> {
        if criterion.is_empty() || criterion == ANY {
            return None;
        }
        let criterion = criterion.to_lowercase();
        let mut chars = criterion.chars();
        Some(match chars.next() {
            Some('=') => Self::Exact(chars.as_str().to_string()),
            Some('*') => Self::Substring(chars.as_str().to_string()),
            Some('#') => Self::NonAlphabetic(chars.as_str().to_string()),
            _ => Self::Prefix(criterion),
        })
    }

    /// Whether resolving this mode needs a scan over every value.
    pub fn is_scan(&self) -> bool {
        matches!(self, Self::Substring(_) | Self::NonAlphabetic(_))
    }

    /// Inclusive key range for the modes answered by the unique index.
    pub fn range(&self) -> Option<(String, String)> {
        match self {
            Self::Exact(value) => Some((value.clone(), value.clone())),
            Self::Prefix(prefix) => Some((prefix.clone(), prefix_upper_bound(prefix))),
            Self::Substring(_) | Self::NonAlphabetic(_) => None,
        }
    }

    /// Match a canonical value.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(exact) => value == exact,
            Self::Prefix(prefix) => value.starts_with(prefix.as_str()),
            Self::Substring(needle) => value.contains(needle.as_str()),
            Self::NonAlphabetic(needle) => match value.chars().next() {
                None => true,
                Some(first) => !is_alphabetic(first) && value.contains(needle.as_str()),
            },
        }
    }
}

fn is_alphabetic(c: char) -> bool {
    let c = c.to_lowercase().next().unwrap_or(c);
    matches!(c, 'a'..='z' | 'а'..='я' | 'ё')
}

/// One resolved, constraining criterion over a non-author field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
    /// Values selected by a match mode.
    Match(Field, MatchMode),
    /// Any of the listed values.
    AnyOf(Field, Vec<FieldValue>),
}

impl Criterion {
    pub fn field(&self) -> Field {
        match self {
            Self::Match(field, _) | Self::AnyOf(field, _) => *field,
        }
    }
}

/// A search request. Every criterion is optional; present ones combine with
/// AND, comma-separated values within `genre`, `lang` and `librate` with OR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub author: Option<String>,
    pub series: Option<String>,
    pub title: Option<String>,
    /// Comma-separated genre codes.
    pub genre: Option<String>,
    /// Comma-separated language codes.
    pub lang: Option<String>,
    /// `0` for live books, `1` for deleted ones.
    pub del: Option<u8>,
    pub date: Option<String>,
    /// Comma-separated ratings.
    pub librate: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl SearchQuery {
    /// Result cache key: every criterion, in a fixed order, missing ones as
    /// `null`. Pagination is not part of it.
    pub fn signature(&self) -> String {
        let criteria = serde_json::json!([
            self.author,
            self.series,
            self.title,
            self.genre,
            self.lang,
            self.del,
            self.date,
            self.librate,
        ]);
        format!("{SIGNATURE_PREFIX}{criteria}")
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    /// Page size; missing or zero means the default, and it never exceeds
    /// [`MAX_LIMIT`].
    pub fn limit(&self) -> usize {
        match self.limit {
            None | Some(0) => DEFAULT_LIMIT,
            Some(limit) => limit.min(MAX_LIMIT),
        }
    }

    /// The author criterion, if it constrains.
    pub fn author_mode(&self) -> Option<MatchMode> {
        self.author.as_deref().and_then(MatchMode::parse)
    }

    /// Every constraining criterion except author, in resolution order.
    pub fn criteria(&self) -> Result<Vec<Criterion>> {
        let mut criteria = Vec::new();
        for (field, criterion) in [(Field::Series, &self.series), (Field::Title, &self.title)] {
            if let Some(mode) = criterion.as_deref().and_then(MatchMode::parse) {
                criteria.push(Criterion::Match(field, mode));
            }
        }
        for (field, criterion) in [(Field::Genre, &self.genre), (Field::Lang, &self.lang)] {
            if let Some(list) = criterion.as_deref() {
                let values: Vec<FieldValue> = split_list(list).map(FieldValue::text).collect();
                if !values.is_empty() {
                    criteria.push(Criterion::AnyOf(field, values));
                }
            }
        }
        if let Some(del) = self.del {
            if del > 1 {
                exn::bail!(ErrorKind::InvalidQuery(format!("del must be 0 or 1, got {del}")));
            }
            criteria.push(Criterion::AnyOf(Field::Deleted, vec![FieldValue::Number(i64::from(del))]));
        }
        if let Some(mode) = self.date.as_deref().and_then(MatchMode::parse) {
            criteria.push(Criterion::Match(Field::Date, mode));
        }
        if let Some(list) = self.librate.as_deref() {
            let values = split_list(list)
                .map(|rating| {
                    rating.parse::<i64>().map(FieldValue::Number).map_err(|_| {
                        exn::Exn::from(ErrorKind::InvalidQuery(format!("librate must be numeric, got {rating:?}")))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            if !values.is_empty() {
                criteria.push(Criterion::AnyOf(Field::Rating, values));
            }
        }
        Ok(criteria)
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|item| !item.is_empty() && *item != ANY)
}

/// Canonical key used by exact series lookups.
pub(crate) fn series_key(series: &str) -> String {
    canonical(series)
}
