use serde::{Deserialize, Serialize};

/// Descriptive information about the collection being indexed, as reported
/// by the record source or overridden by the filter file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionInfo {
    pub name: String,
    pub description: String,
    /// Collection identifier assigned by the publisher.
    pub id: String,
    pub version: String,
}
