//! Coverage data model.
//!
//! Records are whatever the in-browser instrumenter produced for one source
//! file (statement, function and branch counters). They are never inspected
//! here, only stored, replaced and written back out.

use crate::error::{CovsinkError, CovsinkResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Opaque per-file coverage record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageRecord(Value);

impl CoverageRecord {
    /// Wrap an instrumenter record
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// Borrow the raw JSON value
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Mapping from source file path to its coverage record.
///
/// Keys are kept sorted so the persisted document is stable between writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageMap(BTreeMap<String, CoverageRecord>);

impl CoverageMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no file has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up the record for a file
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&CoverageRecord> {
        self.0.get(path)
    }

    /// Iterate over recorded file paths
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Replace-union `other` into `self`.
    ///
    /// Every file in `other` overwrites the existing record wholesale; files
    /// only present in `self` are untouched. Returns the resulting file count.
    pub fn absorb(&mut self, other: Self) -> usize {
        self.0.extend(other.0);
        self.0.len()
    }
}

impl FromIterator<(String, CoverageRecord)> for CoverageMap {
    fn from_iter<I: IntoIterator<Item = (String, CoverageRecord)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for CoverageMap {
    type Item = (String, CoverageRecord);
    type IntoIter = std::collections::btree_map::IntoIter<String, CoverageRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// One coverage report posted by a browser page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageSubmission {
    /// Per-file coverage collected by the page
    pub coverage: CoverageMap,
    /// Client-side timestamp of the snapshot
    pub timestamp: Option<String>,
    /// URL of the reporting page
    pub url: Option<String>,
}

impl CoverageSubmission {
    /// Parse a raw request body.
    ///
    /// Malformed JSON yields [`CovsinkError::Json`]; a body whose `coverage`
    /// field is absent or not a JSON object yields
    /// [`CovsinkError::InvalidSubmission`].
    pub fn from_slice(body: &[u8]) -> CovsinkResult<Self> {
        let value: Value = serde_json::from_slice(body)?;
        let Value::Object(mut fields) = value else {
            return Err(CovsinkError::invalid_submission(
                "request body must be a JSON object",
            ));
        };

        let coverage = match fields.remove("coverage") {
            Some(Value::Object(files)) => files
                .into_iter()
                .map(|(path, record)| (path, CoverageRecord::new(record)))
                .collect(),
            Some(_) => {
                return Err(CovsinkError::invalid_submission(
                    "`coverage` must be an object",
                ))
            }
            None => {
                return Err(CovsinkError::invalid_submission(
                    "missing `coverage` field",
                ))
            }
        };

        Ok(Self {
            coverage,
            timestamp: take_string(&mut fields, "timestamp"),
            url: take_string(&mut fields, "url"),
        })
    }
}

fn take_string(fields: &mut serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}
