//! Common types used across the import pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a remote file as reported by its source.
///
/// Size and modification time together identify one physical version of
/// the file; the idempotency lock key is derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub modified: DateTime<Utc>,
}

impl FileStat {
    pub fn new(size: u64, modified: DateTime<Utc>) -> Self {
        Self { size, modified }
    }

    /// Modification time in milliseconds since the Unix epoch
    pub fn modified_millis(&self) -> i64 {
        self.modified.timestamp_millis()
    }
}

/// Identifier handed out by the downstream importer for one import
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportId(String);

impl ImportId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ImportId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
