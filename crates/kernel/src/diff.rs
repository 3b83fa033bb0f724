use crate::change::{Change, Operation};
use crate::keychain::Keychain;
use crate::time::Timestamp;
use ledger_common::{Record, Snapshot, Value, ValueKind};
use std::fmt;

/// Errors from comparing two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    #[error("record {id:?} is a {current} in the current snapshot but a {incoming} in the incoming one")]
    TypeMismatch {
        id: String,
        current: ValueKind,
        incoming: ValueKind,
    },
}

/// Compute every addition, modification and deletion between two snapshots.
///
/// Records present in both snapshots are compared one level deep: scalars as a
/// whole, records field by field. Every emitted change carries `timestamp`. The
/// result is a set; its order (additions, modifications, deletions, each by
/// record ID) carries no meaning.
///
/// A record that is a scalar on one side and a record on the other fails the
/// whole comparison.
pub fn compare(
    current: &Snapshot,
    incoming: &Snapshot,
    timestamp: Timestamp,
) -> Result<Vec<Change>, DiffError> {
    let mut changes = Vec::new();

    for (id, value) in incoming {
        if !current.contains_key(id) {
            changes.push(Change::addition(
                Keychain::record(id.as_str()),
                value.clone(),
                timestamp,
            ));
        }
    }

    for (id, incoming_value) in incoming {
        let Some(current_value) = current.get(id) else {
            continue;
        };
        match (current_value, incoming_value) {
            (Value::Scalar(old), Value::Scalar(new)) => {
                if old != new {
                    changes.push(Change::modification(
                        Keychain::record(id.as_str()),
                        current_value.clone(),
                        incoming_value.clone(),
                        timestamp,
                    ));
                }
            }
            (Value::Record(old), Value::Record(new)) => {
                compare_fields(id, old, new, timestamp, &mut changes);
            }
            (old, new) => {
                return Err(DiffError::TypeMismatch {
                    id: id.clone(),
                    current: old.kind(),
                    incoming: new.kind(),
                });
            }
        }
    }

    for (id, value) in current {
        if !incoming.contains_key(id) {
            changes.push(Change::deletion(
                Keychain::record(id.as_str()),
                value.clone(),
                timestamp,
            ));
        }
    }

    tracing::debug!(changes = changes.len(), %timestamp, "compared snapshots");
    Ok(changes)
}

fn compare_fields(
    id: &str,
    current: &Record,
    incoming: &Record,
    timestamp: Timestamp,
    changes: &mut Vec<Change>,
) {
    for (field, value) in incoming {
        if !current.contains_key(field) {
            changes.push(Change::addition(
                Keychain::cell(id, field.as_str()),
                Value::scalar(value.as_str()),
                timestamp,
            ));
        }
    }
    for (field, new) in incoming {
        if let Some(old) = current.get(field) {
            if old != new {
                changes.push(Change::modification(
                    Keychain::cell(id, field.as_str()),
                    Value::scalar(old.as_str()),
                    Value::scalar(new.as_str()),
                    timestamp,
                ));
            }
        }
    }
    for (field, value) in current {
        if !incoming.contains_key(field) {
            changes.push(Change::deletion(
                Keychain::cell(id, field.as_str()),
                Value::scalar(value.as_str()),
                timestamp,
            ));
        }
    }
}

/// Per-operation counts for a batch of changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub additions: usize,
    pub modifications: usize,
    pub deletions: usize,
}

impl DiffStats {
    pub fn from_changes(changes: &[Change]) -> Self {
        let mut stats = Self::default();
        for change in changes {
            match change.operation() {
                Operation::Addition => stats.additions += 1,
                Operation::Modification => stats.modifications += 1,
                Operation::Deletion => stats.deletions += 1,
            }
        }
        stats
    }

    pub fn total(&self) -> usize {
        self.additions + self.modifications + self.deletions
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for DiffStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{} ~{} -{}",
            self.additions, self.modifications, self.deletions
        )
    }
}
