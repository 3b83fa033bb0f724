//! Storage collaborator: three tables per label, read whole and written in batches.

use ledger_common::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The tables kept for every label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    /// Current state.
    Live,
    /// Append-only changelog.
    Changes,
    /// Destination of archive restores.
    Archive,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Live, Table::Changes, Table::Archive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Live => "live",
            Table::Changes => "changes",
            Table::Archive => "archive",
        }
    }

    pub fn is_append_only(&self) -> bool {
        matches!(self, Table::Changes)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One table write inside a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct TableWrite {
    pub table: Table,
    pub rows: Snapshot,
    /// Replace the whole table instead of merging rows into it.
    pub replace: bool,
}

impl TableWrite {
    pub fn replace(table: Table, rows: Snapshot) -> Self {
        Self {
            table,
            rows,
            replace: true,
        }
    }

    pub fn append(table: Table, rows: Snapshot) -> Self {
        Self {
            table,
            rows,
            replace: false,
        }
    }
}

/// Errors from storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("invalid label {0:?}: expected [0-9A-Za-z_-]+")]
    InvalidLabel(String),
    #[error("the changes table of {label:?} is append-only and cannot be replaced")]
    ReplaceAppendOnly { label: String },
    #[error("change {id} already exists in the changes table of {label:?}")]
    DuplicateChange { label: String, id: String },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Backend holding the live, changes and archive tables of each label.
///
/// A table that was never written reads as empty.
pub trait Storage {
    /// Read every row of a table.
    fn read(&self, label: &str, table: Table) -> Result<Snapshot, StorageError>;

    /// Apply several writes to one label as a single unit: either all of them
    /// become visible or none do.
    fn commit(&mut self, label: &str, writes: Vec<TableWrite>) -> Result<(), StorageError>;

    /// Labels that hold at least one table.
    fn labels(&self) -> Result<Vec<String>, StorageError>;

    /// Write one table.
    fn write(
        &mut self,
        label: &str,
        table: Table,
        rows: Snapshot,
        replace: bool,
    ) -> Result<(), StorageError> {
        self.commit(
            label,
            vec![TableWrite {
                table,
                rows,
                replace,
            }],
        )
    }
}

/// Labels are used as directory names, so keep them to a portable alphabet.
pub fn validate_label(label: &str) -> Result<(), StorageError> {
    let ok = !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidLabel(label.to_string()))
    }
}

/// Apply `write` onto the staged contents of its table.
///
/// `staged` must already hold the current contents of every table touched by
/// the commit. Enforces the append-only rule for the changelog.
pub(crate) fn stage_write(
    label: &str,
    staged: &mut BTreeMap<Table, Snapshot>,
    write: TableWrite,
) -> Result<(), StorageError> {
    let current = staged.entry(write.table).or_default();
    if write.table.is_append_only() {
        if write.replace {
            return Err(StorageError::ReplaceAppendOnly {
                label: label.to_string(),
            });
        }
        if let Some(id) = write.rows.keys().find(|id| current.contains_key(*id)) {
            return Err(StorageError::DuplicateChange {
                label: label.to_string(),
                id: id.clone(),
            });
        }
    }
    if write.replace {
        *current = write.rows;
    } else {
        current.extend(write.rows);
    }
    Ok(())
}

/// In-memory backend for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: BTreeMap<(String, Table), Snapshot>,
    failures: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail with [`StorageError::Unavailable`] without
    /// touching any table.
    pub fn fail_next_writes(&mut self, n: usize) {
        self.failures = n;
    }
}

impl Storage for MemoryStorage {
    fn read(&self, label: &str, table: Table) -> Result<Snapshot, StorageError> {
        validate_label(label)?;
        Ok(self
            .tables
            .get(&(label.to_string(), table))
            .cloned()
            .unwrap_or_default())
    }

    fn commit(&mut self, label: &str, writes: Vec<TableWrite>) -> Result<(), StorageError> {
        validate_label(label)?;
        if self.failures > 0 {
            self.failures -= 1;
            return Err(StorageError::Unavailable(format!(
                "injected failure committing to {label:?}"
            )));
        }

        let mut staged = BTreeMap::new();
        for write in &writes {
            if !staged.contains_key(&write.table) {
                staged.insert(write.table, self.read(label, write.table)?);
            }
        }
        for write in writes {
            stage_write(label, &mut staged, write)?;
        }
        for (table, rows) in staged {
            self.tables.insert((label.to_string(), table), rows);
        }
        Ok(())
    }

    fn labels(&self) -> Result<Vec<String>, StorageError> {
        let mut labels: Vec<String> = self.tables.keys().map(|(l, _)| l.clone()).collect();
        labels.dedup();
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_common::Value;

    fn rows(entries: &[(&str, &str)]) -> Snapshot {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Value::scalar(*v)))
            .collect()
    }

    #[test]
    fn missing_table_reads_empty() {
        let storage = MemoryStorage::new();
        for table in Table::ALL {
            assert!(storage.read("people", table).unwrap().is_empty());
        }
    }

    #[test]
    fn replace_and_merge() {
        let mut storage = MemoryStorage::new();
        storage
            .write("people", Table::Live, rows(&[("a", "1"), ("b", "2")]), true)
            .unwrap();
        storage
            .write("people", Table::Live, rows(&[("b", "3"), ("c", "4")]), false)
            .unwrap();
        assert_eq!(
            storage.read("people", Table::Live).unwrap(),
            rows(&[("a", "1"), ("b", "3"), ("c", "4")])
        );

        storage
            .write("people", Table::Live, rows(&[("z", "9")]), true)
            .unwrap();
        assert_eq!(storage.read("people", Table::Live).unwrap(), rows(&[("z", "9")]));
    }

    #[test]
    fn changes_are_append_only() {
        let mut storage = MemoryStorage::new();
        storage
            .write("people", Table::Changes, rows(&[("c1", "x")]), false)
            .unwrap();

        assert!(matches!(
            storage.write("people", Table::Changes, rows(&[("c2", "y")]), true),
            Err(StorageError::ReplaceAppendOnly { .. })
        ));
        assert!(matches!(
            storage.write("people", Table::Changes, rows(&[("c1", "z")]), false),
            Err(StorageError::DuplicateChange { .. })
        ));
        assert_eq!(storage.read("people", Table::Changes).unwrap(), rows(&[("c1", "x")]));
    }

    #[test]
    fn commit_is_all_or_nothing() {
        let mut storage = MemoryStorage::new();
        storage
            .write("people", Table::Changes, rows(&[("c1", "x")]), false)
            .unwrap();

        let result = storage.commit(
            "people",
            vec![
                TableWrite::replace(Table::Live, rows(&[("a", "1")])),
                TableWrite::append(Table::Changes, rows(&[("c1", "again")])),
            ],
        );
        assert!(result.is_err());
        assert!(storage.read("people", Table::Live).unwrap().is_empty());
    }

    #[test]
    fn injected_failures_leave_tables_alone() {
        let mut storage = MemoryStorage::new();
        storage.fail_next_writes(1);
        assert!(matches!(
            storage.write("people", Table::Live, rows(&[("a", "1")]), true),
            Err(StorageError::Unavailable(_))
        ));
        assert!(storage.read("people", Table::Live).unwrap().is_empty());

        storage
            .write("people", Table::Live, rows(&[("a", "1")]), true)
            .unwrap();
        assert_eq!(storage.read("people", Table::Live).unwrap().len(), 1);
    }

    #[test]
    fn labels_are_validated_and_listed() {
        let mut storage = MemoryStorage::new();
        assert!(matches!(
            storage.read("../etc", Table::Live),
            Err(StorageError::InvalidLabel(_))
        ));
        storage.write("b-2", Table::Live, rows(&[("a", "1")]), true).unwrap();
        storage.write("a_1", Table::Archive, rows(&[("a", "1")]), true).unwrap();
        storage.write("a_1", Table::Live, rows(&[("a", "1")]), true).unwrap();
        assert_eq!(storage.labels().unwrap(), vec!["a_1", "b-2"]);
    }
}
