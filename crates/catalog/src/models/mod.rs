mod author;
mod book;
mod field;
mod info;

pub use self::author::split_authors;
pub use self::book::BookRecord;
pub use self::field::{Field, FieldValue};
pub use self::info::CollectionInfo;

/// Stand-in for a field that is absent or empty.
pub const EMPTY_FIELD_VALUE: &str = "?";

/// Highest code point appended to a prefix to form the upper bound of a
/// prefix range scan: `[prefix, prefix + MAX_CODEPOINT]`.
pub const MAX_CODEPOINT: char = '\u{FFFFF}';

/// Canonical form of a text field value: lower-cased, with empty values
/// replaced by [`EMPTY_FIELD_VALUE`].
pub fn canonical(value: &str) -> String {
    if value.is_empty() {
        EMPTY_FIELD_VALUE.to_string()
    } else {
        value.to_lowercase()
    }
}

/// Inclusive upper bound for a prefix range scan.
pub fn prefix_upper_bound(prefix: &str) -> String {
    let mut bound = String::with_capacity(prefix.len() + MAX_CODEPOINT.len_utf8());
    bound.push_str(prefix);
    bound.push(MAX_CODEPOINT);
    bound
}
