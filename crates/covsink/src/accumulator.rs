//! Cumulative coverage store.
//!
//! ## Lifecycle
//!
//! ```text
//!   load() ──► merge() ──► persist()
//!                 ▲            ▲
//!   POST /api/coverage    flush timer / shutdown
//! ```
//!
//! The in-memory [`CoverageMap`] is authoritative; the JSON file on disk is a
//! durable copy that is rewritten whole on every accepted submission.

use crate::coverage::CoverageMap;
use crate::error::{CovsinkError, CovsinkResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// File name of the persisted coverage map inside the coverage directory
pub const COVERAGE_FILE_NAME: &str = "coverage.json";

/// Result of merging one partial map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    /// False when the partial map was empty and nothing changed
    pub accepted: bool,
    /// Total number of files after the merge
    pub file_count: usize,
}

/// Read-only snapshot for status queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageStats {
    /// Number of files in the cumulative map
    pub file_count: usize,
    /// Modification time of the persisted file, if it exists
    pub last_modified: Option<DateTime<Utc>>,
}

impl CoverageStats {
    /// `last_modified` as ISO-8601 with millisecond precision, e.g.
    /// `2024-05-01T10:00:00.000Z`
    #[must_use]
    pub fn last_update(&self) -> Option<String> {
        self.last_modified
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

/// Owns the cumulative coverage map and its backing file
#[derive(Debug)]
pub struct CoverageAccumulator {
    path: PathBuf,
    map: CoverageMap,
}

impl CoverageAccumulator {
    /// Create an empty accumulator backed by `path` without touching disk
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map: CoverageMap::new(),
        }
    }

    /// Create an accumulator seeded from the file at `path`.
    ///
    /// A missing, unreadable or unparseable file yields an empty map. This
    /// never fails; problems are logged as warnings.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<CoverageMap>(&bytes) {
                Ok(map) => {
                    tracing::info!(
                        path = %path.display(),
                        file_count = map.len(),
                        "Loaded existing coverage data"
                    );
                    map
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Existing coverage data is unreadable, starting empty"
                    );
                    CoverageMap::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No existing coverage data");
                CoverageMap::new()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to read existing coverage data, starting empty"
                );
                CoverageMap::new()
            }
        };

        Self { path, map }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current cumulative map
    #[must_use]
    pub const fn map(&self) -> &CoverageMap {
        &self.map
    }

    /// Number of files recorded
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.map.len()
    }

    /// True if nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Replace-union `partial` into the cumulative map and persist.
    ///
    /// An empty `partial` is the normal "page loaded, nothing executed yet"
    /// report: it is rejected without touching the map or the disk.
    pub fn merge(&mut self, partial: CoverageMap) -> MergeOutcome {
        if partial.is_empty() {
            return MergeOutcome {
                accepted: false,
                file_count: self.map.len(),
            };
        }

        let received = partial.len();
        let file_count = self.map.absorb(partial);
        tracing::debug!(received, file_count, "Merged coverage submission");

        self.persist();

        MergeOutcome {
            accepted: true,
            file_count,
        }
    }

    /// Write the whole map to the backing file.
    ///
    /// Returns false on failure; the failure is logged and the in-memory map
    /// stays authoritative.
    pub fn persist(&self) -> bool {
        match self.try_persist() {
            Ok(()) => {
                tracing::info!(file_count = self.map.len(), "Coverage data saved");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to save coverage data");
                false
            }
        }
    }

    /// Persist only when there is something to write. Used by the flush timer.
    ///
    /// Returns `None` if the map was empty and nothing was written.
    pub fn flush(&self) -> Option<bool> {
        if self.map.is_empty() {
            None
        } else {
            Some(self.persist())
        }
    }

    /// Write the map to a sibling temp file, then rename it over the target
    /// so an interrupted write never truncates the previous document.
    pub fn try_persist(&self) -> CovsinkResult<()> {
        let json = serde_json::to_vec_pretty(&self.map)?;
        let tmp = self.temp_path();

        if let Err(e) = fs::write(&tmp, &json).and_then(|()| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(CovsinkError::storage(&self.path, e.to_string()));
        }

        Ok(())
    }

    /// Snapshot for status queries
    #[must_use]
    pub fn stats(&self) -> CoverageStats {
        let last_modified = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        CoverageStats {
            file_count: self.map.len(),
            last_modified,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_else(|| COVERAGE_FILE_NAME.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::coverage::CoverageRecord;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn map(entries: &[(&str, Value)]) -> CoverageMap {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), CoverageRecord::new(v.clone())))
            .collect()
    }

    fn scratch() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(COVERAGE_FILE_NAME);
        (dir, path)
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let (_dir, path) = scratch();
        let acc = CoverageAccumulator::load(&path);
        assert!(acc.is_empty());
        assert_eq!(acc.path(), path.as_path());
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let (_dir, path) = scratch();
        fs::write(&path, "{\"a.js\": {\"s\": ").unwrap();

        let acc = CoverageAccumulator::load(&path);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_load_wrong_shape_is_empty() {
        let (_dir, path) = scratch();
        fs::write(&path, "[1, 2, 3]").unwrap();

        let acc = CoverageAccumulator::load(&path);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_merge_empty_is_noop() {
        let (_dir, path) = scratch();
        let mut acc = CoverageAccumulator::new(&path);

        let outcome = acc.merge(CoverageMap::new());

        assert!(!outcome.accepted);
        assert_eq!(outcome.file_count, 0);
        assert_eq!(acc.stats().file_count, 0);
        assert!(!path.exists(), "empty merge must not persist");
    }

    #[test]
    fn test_merge_empty_keeps_existing_count() {
        let (_dir, path) = scratch();
        let mut acc = CoverageAccumulator::new(&path);
        acc.merge(map(&[("a.js", json!({"s": {"0": 1}}))]));

        let outcome = acc.merge(CoverageMap::new());
        assert!(!outcome.accepted);
        assert_eq!(outcome.file_count, 1);
    }

    #[test]
    fn test_merge_persists_and_counts() {
        let (_dir, path) = scratch();
        let mut acc = CoverageAccumulator::new(&path);

        let first = acc.merge(map(&[("a.js", json!({"s": {"0": 1}}))]));
        assert_eq!(
            first,
            MergeOutcome {
                accepted: true,
                file_count: 1
            }
        );
        assert!(path.exists());

        let second = acc.merge(map(&[("b.js", json!({"s": {"0": 2}}))]));
        assert_eq!(second.file_count, 2);

        let third = acc.merge(map(&[("a.js", json!({"s": {"0": 5}}))]));
        assert_eq!(third.file_count, 2);
        assert_eq!(
            acc.map().get("a.js").unwrap().as_value(),
            &json!({"s": {"0": 5}})
        );
    }

    #[test]
    fn test_persist_then_load_roundtrip() {
        let (_dir, path) = scratch();
        let mut acc = CoverageAccumulator::new(&path);
        acc.merge(map(&[
            ("src/utils.js", json!({"path": "src/utils.js", "s": {"0": 3}, "b": {"0": [1, 0]}})),
            ("src/index.js", json!({"path": "src/index.js", "f": {"0": 1}})),
        ]));
        assert!(acc.persist());

        let reloaded = CoverageAccumulator::load(&path);
        assert_eq!(reloaded.map(), acc.map());
    }

    #[test]
    fn test_persisted_file_is_pretty_printed() {
        let (_dir, path) = scratch();
        let mut acc = CoverageAccumulator::new(&path);
        acc.merge(map(&[("a.js", json!({"s": {"0": 1}}))]));

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains('\n'));
        assert!(text.starts_with("{\n  \"a.js\""));
    }

    #[test]
    fn test_persist_leaves_no_temp_file() {
        let (dir, path) = scratch();
        let mut acc = CoverageAccumulator::new(&path);
        acc.merge(map(&[("a.js", json!(1))]));

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![COVERAGE_FILE_NAME.to_string()]);
    }

    #[test]
    fn test_persist_failure_returns_false() {
        let (dir, _) = scratch();
        let path = dir.path().join("missing-dir").join(COVERAGE_FILE_NAME);
        let mut acc = CoverageAccumulator::new(&path);

        let outcome = acc.merge(map(&[("a.js", json!(1))]));
        // Write failure is not surfaced through merge
        assert!(outcome.accepted);
        assert!(!acc.persist());
        assert!(matches!(
            acc.try_persist().unwrap_err(),
            CovsinkError::Storage { .. }
        ));
    }

    #[test]
    fn test_flush_skips_empty_map() {
        let (_dir, path) = scratch();
        let acc = CoverageAccumulator::new(&path);
        assert_eq!(acc.flush(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_flush_writes_non_empty_map() {
        let (_dir, path) = scratch();
        let mut acc = CoverageAccumulator::new(&path);
        acc.merge(map(&[("a.js", json!(1))]));
        fs::remove_file(&path).unwrap();

        assert_eq!(acc.flush(), Some(true));
        assert!(path.exists());
    }

    #[test]
    fn test_stats_without_file_has_no_timestamp() {
        let (_dir, path) = scratch();
        let acc = CoverageAccumulator::load(&path);
        let stats = acc.stats();

        assert_eq!(stats.file_count, 0);
        assert!(stats.last_modified.is_none());
        assert!(stats.last_update().is_none());
    }

    #[test]
    fn test_stats_after_persist_has_iso_timestamp() {
        let (_dir, path) = scratch();
        let mut acc = CoverageAccumulator::new(&path);
        acc.merge(map(&[("a.js", json!(1))]));

        let stamp = acc.stats().last_update().unwrap();
        assert!(stamp.ends_with('Z'));
        assert!(DateTime::parse_from_rfc3339(&stamp).is_ok());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeMap;

        fn submission() -> impl Strategy<Value = Vec<(String, u32)>> {
            prop::collection::vec(("f[0-5]\\.js", 0u32..1000), 0..6)
        }

        proptest! {
            #[test]
            fn prop_merge_is_last_write_wins_union(
                submissions in prop::collection::vec(submission(), 1..8)
            ) {
                let (_dir, path) = scratch();
                let mut acc = CoverageAccumulator::new(&path);
                let mut model: BTreeMap<String, u32> = BTreeMap::new();

                for files in submissions {
                    let partial: CoverageMap = files
                        .iter()
                        .map(|(k, v)| (k.clone(), CoverageRecord::new(json!({"s": {"0": v}}))))
                        .collect();
                    let was_empty = partial.is_empty();
                    let before = acc.file_count();

                    let outcome = acc.merge(partial);

                    if was_empty {
                        prop_assert!(!outcome.accepted);
                        prop_assert_eq!(outcome.file_count, before);
                    } else {
                        prop_assert!(outcome.accepted);
                    }
                    for (k, v) in files {
                        model.insert(k, v);
                    }
                    prop_assert_eq!(acc.file_count(), model.len());
                }

                for (k, v) in &model {
                    let record = acc.map().get(k).unwrap();
                    prop_assert_eq!(record.as_value(), &json!({"s": {"0": v}}));
                }
            }
        }
    }
}
