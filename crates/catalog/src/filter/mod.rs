//! Record filtering.
//!
//! A filter file is a JSON document:
//!
//! ```json
//! {
//!     "info": { "name": "Partial collection" },
//!     "includeAuthors": ["Ivanov"],
//!     "excludeAuthors": ["Petrov"],
//!     "filter": "lang == 'ru' && deleted == 0"
//! }
//! ```
//!
//! Every property is optional. `includeAuthors` is matched against the whole
//! lower-cased author string, `excludeAuthors` against each co-author.

mod predicate;

pub use self::predicate::{Attribute, Operand, Operator, Predicate};
use crate::error::{ErrorKind, Result};
use crate::models::{BookRecord, CollectionInfo, EMPTY_FIELD_VALUE};
use exn::ResultExt;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, instrument};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FilterFile {
    info: Option<CollectionInfo>,
    include_authors: Option<Vec<String>>,
    exclude_authors: Option<Vec<String>>,
    filter: Option<String>,
}

/// Decides which records make it into the index.
///
/// The default filter accepts everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    include: Option<HashSet<String>>,
    exclude: Option<HashSet<String>>,
    predicate: Option<Predicate>,
    info: Option<CollectionInfo>,
    /// Source text the filter was built from, if any.
    source: Option<String>,
}

impl RecordFilter {
    /// Accept every record.
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Load a filter file.
    ///
    /// A custom `filter` predicate is refused with
    /// [`ErrorKind::UnsafeFilter`] unless `allow_predicate` is set, and a
    /// predicate outside the restricted grammar is always refused.
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>, allow_predicate: bool) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).or_raise(|| ErrorKind::FilterFile(path.to_path_buf()))?;
        Self::from_json(&contents, allow_predicate)
    }

    /// Load a filter if the file exists, otherwise accept every record.
    pub fn load_optional(path: impl AsRef<Path>, allow_predicate: bool) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path, allow_predicate)
        } else {
            debug!(path = %path.display(), "no filter file, accepting all records");
            Ok(Self::accept_all())
        }
    }

    pub fn from_json(contents: &str, allow_predicate: bool) -> Result<Self> {
        let file: FilterFile = serde_json::from_str(contents)
            .or_raise(|| ErrorKind::MalformedFilter("filter file is not a valid filter document".to_string()))?;
        let predicate = match file.filter.as_deref() {
            None => None,
            Some(_) if !allow_predicate => exn::bail!(ErrorKind::UnsafeFilter),
            Some(source) => Some(Predicate::parse(source)?),
        };
        let lowercase = |names: Vec<String>| -> HashSet<String> { names.into_iter().map(|name| name.to_lowercase()).collect() };
        Ok(Self {
            include: file.include_authors.map(lowercase),
            exclude: file.exclude_authors.map(lowercase),
            predicate,
            info: file.info,
            source: Some(contents.to_string()),
        })
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Collection info that overrides whatever the source reports.
    pub fn info(&self) -> Option<&CollectionInfo> {
        self.info.as_ref()
    }

    /// Text of the filter file, used to fingerprint a build.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn accepts(&self, record: &BookRecord) -> bool {
        if self.include.is_none() && self.exclude.is_none() && self.predicate.is_none() {
            return true;
        }
        let author = if record.author.is_empty() {
            EMPTY_FIELD_VALUE.to_string()
        } else {
            record.author.to_lowercase()
        };
        if let Some(include) = &self.include
            && !include.contains(&author)
        {
            return false;
        }
        if let Some(exclude) = &self.exclude
            && author.split(',').any(|name| exclude.contains(name.trim()))
        {
            return false;
        }
        self.predicate.as_ref().is_none_or(|predicate| predicate.matches(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn book(author: &str, lang: &str) -> BookRecord {
        BookRecord {
            author: author.to_string(),
            lang: lang.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_accepts_everything() {
        let filter = RecordFilter::default();
        assert!(filter.accepts(&book("", "")));
        assert!(filter.source().is_none());
    }

    #[test]
    fn test_include_matches_whole_author_string() {
        let filter = RecordFilter::from_json(r#"{"includeAuthors": ["IVANOV"]}"#, false).unwrap();
        assert!(filter.accepts(&book("Ivanov", "ru")));
        assert!(!filter.accepts(&book("Ivanov,Petrov", "ru")));
        assert!(!filter.accepts(&book("Sidorov", "ru")));
    }

    #[test]
    fn test_exclude_matches_any_co_author() {
        let filter = RecordFilter::from_json(r#"{"excludeAuthors": ["petrov"]}"#, false).unwrap();
        assert!(filter.accepts(&book("Ivanov", "ru")));
        assert!(!filter.accepts(&book("Ivanov,Petrov", "ru")));
    }

    #[test]
    fn test_empty_author_matches_sentinel() {
        let filter = RecordFilter::from_json(r#"{"excludeAuthors": ["?"]}"#, false).unwrap();
        assert!(!filter.accepts(&book("", "ru")));
    }

    #[test]
    fn test_predicate_requires_opt_in() {
        let json = r#"{"filter": "lang == 'ru'"}"#;
        let err = RecordFilter::from_json(json, false).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsafeFilter));

        let filter = RecordFilter::from_json(json, true).unwrap();
        assert!(filter.accepts(&book("Ivanov", "RU")));
        assert!(!filter.accepts(&book("Ivanov", "en")));
    }

    #[test]
    fn test_predicate_outside_grammar_is_refused_even_when_allowed() {
        let err = RecordFilter::from_json(r#"{"filter": "(r) => true"}"#, true).unwrap_err();
        assert!(matches!(&*err, ErrorKind::MalformedFilter(_)));
    }

    #[test]
    fn test_unknown_property_is_malformed() {
        let err = RecordFilter::from_json(r#"{"includeAuthor": []}"#, false).unwrap_err();
        assert!(matches!(&*err, ErrorKind::MalformedFilter(_)));
    }

    #[test]
    fn test_info_override() {
        let filter = RecordFilter::from_json(r#"{"info": {"name": "Subset"}}"#, false).unwrap();
        assert_eq!(filter.info().map(|info| info.name.as_str()), Some("Subset"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"excludeAuthors": ["Sidorov"]}}"#).unwrap();
        let filter = RecordFilter::load(file.path(), false).unwrap();
        assert!(!filter.accepts(&book("Sidorov", "ru")));
    }

    #[test]
    fn test_load_optional_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let filter = RecordFilter::load_optional(dir.path().join("filter.json"), false).unwrap();
        assert!(filter.accepts(&book("anyone", "")));
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RecordFilter::load(dir.path().join("filter.json"), false).unwrap_err();
        assert!(matches!(&*err, ErrorKind::FilterFile(_)));
    }
}
