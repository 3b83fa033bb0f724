//! Sources: where incoming snapshots come from.
//!
//! A source names the label it feeds and an opaque schedule string, and produces
//! a normalized snapshot on demand. Scheduling itself is left to the caller;
//! [`sync`] runs a single pull-and-update tick.

use ledger_common::{NormalizeError, Snapshot, columns, normalize_json, normalize_snapshot};
use ledger_kernel::{Clock, DiffStats, Timestamp};
use ledger_persist::{Ledger, LedgerError, Storage};
use std::path::{Path, PathBuf};

/// Errors from pulling source data.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

/// Normalized data handed over by a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceData {
    /// Sorted union of record field names.
    pub fields: Vec<String>,
    pub records: Snapshot,
}

impl SourceData {
    pub fn new(records: Snapshot) -> Self {
        Self {
            fields: columns(&records),
            records,
        }
    }
}

/// A provider of snapshots for one label.
pub trait Source {
    fn label(&self) -> &str;

    /// When the source wants to be pulled, in whatever notation the scheduler uses.
    fn schedule(&self) -> &str;

    fn get_data(&self) -> Result<SourceData, SourceError>;
}

/// Reads a JSON document of record ID to string or object of strings.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    label: String,
    path: PathBuf,
    schedule: String,
}

impl JsonFileSource {
    pub fn new(label: impl Into<String>, path: impl AsRef<Path>, schedule: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            path: path.as_ref().to_path_buf(),
            schedule: schedule.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Source for JsonFileSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn schedule(&self) -> &str {
        &self.schedule
    }

    fn get_data(&self) -> Result<SourceData, SourceError> {
        let file = std::fs::File::open(&self.path).map_err(|source| SourceError::Io {
            path: self.path.clone(),
            source,
        })?;
        let raw: serde_json::Value =
            serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| {
                SourceError::Json {
                    path: self.path.clone(),
                    source,
                }
            })?;
        let records = normalize_json(&raw)?;
        tracing::debug!(path = %self.path.display(), records = records.len(), "read json source");
        Ok(SourceData::new(records))
    }
}

/// An in-memory source returning a fixed snapshot.
#[derive(Debug, Clone)]
pub struct StaticSource {
    label: String,
    schedule: String,
    records: Snapshot,
}

impl StaticSource {
    pub fn new(label: impl Into<String>, records: Snapshot) -> Self {
        Self {
            label: label.into(),
            schedule: String::new(),
            records,
        }
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = schedule.into();
        self
    }

    /// Swap the snapshot returned by later pulls.
    pub fn set_records(&mut self, records: Snapshot) {
        self.records = records;
    }
}

impl Source for StaticSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn schedule(&self) -> &str {
        &self.schedule
    }

    fn get_data(&self) -> Result<SourceData, SourceError> {
        Ok(SourceData::new(normalize_snapshot(self.records.clone())?))
    }
}

/// Errors from one sync tick.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("source {label:?} failed: {source}")]
    Source {
        label: String,
        #[source]
        source: SourceError,
    },
    #[error("ledger update of {label:?} failed: {source}")]
    Ledger {
        label: String,
        #[source]
        source: LedgerError,
    },
}

/// Result of one sync tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub label: String,
    pub records: usize,
    pub fields: usize,
    pub timestamp: Timestamp,
    pub stats: DiffStats,
}

/// Pull `source` once and record the result in `ledger`.
pub fn sync<S: Storage, C: Clock>(
    source: &dyn Source,
    ledger: &mut Ledger<S, C>,
) -> Result<SyncReport, SyncError> {
    let label = source.label().to_string();
    let data = source.get_data().map_err(|source| SyncError::Source {
        label: label.clone(),
        source,
    })?;
    let report = ledger
        .update(&label, &data.records)
        .map_err(|source| SyncError::Ledger {
            label: label.clone(),
            source,
        })?;
    tracing::info!(label = %label, records = data.records.len(), stats = %report.stats, "synced source");
    Ok(SyncReport {
        label,
        records: data.records.len(),
        fields: data.fields.len(),
        timestamp: report.timestamp,
        stats: report.stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_common::Value;
    use ledger_kernel::ManualClock;
    use ledger_persist::MemoryStorage;

    fn ledger() -> Ledger<MemoryStorage, ManualClock> {
        Ledger::with_clock(
            MemoryStorage::new(),
            ManualClock::new(Timestamp::from_unix_nanos(1_000_000_000)),
        )
    }

    #[test]
    fn json_source_normalizes_input() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("people.json");
        std::fs::write(
            &path,
            r#"{
                "abc": {"Name": "Joe", "E-mail": "j@x.io", "User": "joe"},
                "foo": "it's\tplain"
            }"#,
        )
        .unwrap();

        let source = JsonFileSource::new("people", &path, "@every 1h");
        assert_eq!(source.label(), "people");
        assert_eq!(source.schedule(), "@every 1h");

        let data = source.get_data().unwrap();
        assert_eq!(data.fields, vec!["email", "name", "user_"]);
        assert_eq!(data.records["foo"], Value::scalar("itsplain"));
        assert_eq!(data.records["abc"].field("user_"), Some("joe"));
    }

    #[test]
    fn json_source_reports_bad_input() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = JsonFileSource::new("x", tmp.path().join("nope.json"), "");
        assert!(matches!(missing.get_data(), Err(SourceError::Io { .. })));

        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let bad = JsonFileSource::new("x", &path, "");
        assert!(matches!(bad.get_data(), Err(SourceError::Json { .. })));

        std::fs::write(&path, r#"{"a": 1}"#).unwrap();
        assert!(matches!(bad.get_data(), Err(SourceError::Normalize(_))));
    }

    #[test]
    fn sync_records_changes_once() {
        let mut ledger = ledger();
        let mut source = StaticSource::new(
            "people",
            [("abc".to_string(), Value::record([("name", "Joe")]))].into(),
        );

        let first = sync(&source, &mut ledger).unwrap();
        assert_eq!(first.records, 1);
        assert_eq!(first.fields, 1);
        assert_eq!(first.stats.additions, 1);

        let again = sync(&source, &mut ledger).unwrap();
        assert!(again.stats.is_empty());
        assert_eq!(ledger.changes("people").unwrap().len(), 1);

        source.set_records([("abc".to_string(), Value::record([("name", "Jo")]))].into());
        let third = sync(&source, &mut ledger).unwrap();
        assert_eq!(third.stats.modifications, 1);
    }

    #[test]
    fn sync_surfaces_ledger_failures() {
        let mut ledger = ledger();
        ledger.storage_mut().fail_next_writes(1);
        let source = StaticSource::new("people", [("a".to_string(), Value::scalar("1"))].into());
        assert!(matches!(
            sync(&source, &mut ledger),
            Err(SyncError::Ledger { .. })
        ));
    }
}
