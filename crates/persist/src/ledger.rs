//! Live/archive coordinator: records updates as changes and rebuilds past states.

use crate::codec::{self, DecodeError};
use crate::storage::{Storage, StorageError, Table, TableWrite};
use ledger_common::{Snapshot, validate_field_name, validate_record_id};
use ledger_kernel::{
    Change, Clock, DiffError, DiffStats, ReplayError, SystemClock, Timestamp, compare, rewind,
};
use std::collections::BTreeMap;

/// Errors from ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),
    #[error(transparent)]
    TypeMismatch(#[from] DiffError),
    #[error("malformed keychain: {0}")]
    MalformedKeychain(#[from] ReplayError),
    #[error("changelog row cannot be decoded: {0}")]
    Decode(#[from] DecodeError),
    #[error("record id {0:?} is empty or contains the reserved separator '.'")]
    InvalidRecordId(String),
    #[error("record {id:?} has field {field:?} that is empty or contains the reserved separator '.'")]
    InvalidField { id: String, field: String },
}

/// Outcome of one [`Ledger::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReport {
    /// Stamp shared by every change of this update.
    pub timestamp: Timestamp,
    pub stats: DiffStats,
}

impl UpdateReport {
    /// Whether anything was written.
    pub fn changed(&self) -> bool {
        !self.stats.is_empty()
    }
}

/// Coordinates the live, changes and archive tables of every label in one storage.
pub struct Ledger<S, C = SystemClock> {
    storage: S,
    clock: C,
    /// Last stamp issued or found in storage, per label.
    last_stamps: BTreeMap<String, Timestamp>,
}

impl<S: Storage> Ledger<S, SystemClock> {
    pub fn new(storage: S) -> Self {
        Self::with_clock(storage, SystemClock)
    }
}

impl<S: Storage, C: Clock> Ledger<S, C> {
    pub fn with_clock(storage: S, clock: C) -> Self {
        Self {
            storage,
            clock,
            last_stamps: BTreeMap::new(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    /// Next update stamp for `label`, strictly after every stamp already in its
    /// changelog. The stored maximum is read once per label, so a ledger opened
    /// over existing storage never issues a stamp behind earlier ledgers.
    fn stamp(&mut self, label: &str) -> Result<Timestamp, LedgerError> {
        let last = match self.last_stamps.get(label) {
            Some(last) => Some(*last),
            None => self.read_changes(label)?.iter().map(Change::timestamp).max(),
        };
        let now = self.clock.now();
        let stamp = match last {
            Some(last) if now <= last => {
                tracing::debug!(%now, %last, "clock behind last stamp; stepping past it");
                last.next()
            }
            _ => now,
        };
        self.last_stamps.insert(label.to_string(), stamp);
        Ok(stamp)
    }

    /// Record the difference between the live table and `incoming`, then make
    /// `incoming` the live table.
    ///
    /// Changes and the new live table are committed together. When nothing
    /// differs, storage is not written at all.
    pub fn update(&mut self, label: &str, incoming: &Snapshot) -> Result<UpdateReport, LedgerError> {
        let _span = tracing::info_span!("update", label).entered();

        validate_incoming(incoming)?;

        let current = self.storage.read(label, Table::Live)?;
        let timestamp = self.stamp(label)?;
        let changes = compare(&current, incoming, timestamp)?;
        let stats = DiffStats::from_changes(&changes);

        if changes.is_empty() {
            tracing::debug!(records = incoming.len(), "no changes; live table left as is");
            return Ok(UpdateReport { timestamp, stats });
        }

        self.storage.commit(
            label,
            vec![
                TableWrite::append(Table::Changes, codec::encode_changes(&changes)),
                TableWrite::replace(Table::Live, incoming.clone()),
            ],
        )?;
        tracing::info!(%stats, %timestamp, records = incoming.len(), "recorded changes");
        Ok(UpdateReport { timestamp, stats })
    }

    /// Rebuild the state of `label` as it was just before `target`.
    ///
    /// Every change stamped at or after `target` is undone. Storage is not
    /// written.
    pub fn restore(&self, label: &str, target: Timestamp) -> Result<Snapshot, LedgerError> {
        let _span = tracing::info_span!("restore", label, %target).entered();

        let live = self.storage.read(label, Table::Live)?;
        let changes = self.read_changes(label)?;
        let snapshot = rewind(live, &changes, target)?;
        tracing::info!(records = snapshot.len(), changes = changes.len(), "restored");
        Ok(snapshot)
    }

    /// Restore and store the result as the archive table of `label`.
    pub fn restore_into_archive(
        &mut self,
        label: &str,
        target: Timestamp,
    ) -> Result<Snapshot, LedgerError> {
        let snapshot = self.restore(label, target)?;
        self.storage
            .write(label, Table::Archive, snapshot.clone(), true)?;
        tracing::info!(label, %target, records = snapshot.len(), "archived restore");
        Ok(snapshot)
    }

    pub fn live(&self, label: &str) -> Result<Snapshot, LedgerError> {
        Ok(self.storage.read(label, Table::Live)?)
    }

    pub fn read_archive(&self, label: &str) -> Result<Snapshot, LedgerError> {
        Ok(self.storage.read(label, Table::Archive)?)
    }

    /// Every recorded change of `label`, oldest first.
    pub fn changes(&self, label: &str) -> Result<Vec<Change>, LedgerError> {
        let mut changes = self.read_changes(label)?;
        changes.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then_with(|| a.keychain().cmp(b.keychain()))
        });
        Ok(changes)
    }

    /// Changes touching one record, at record or cell level, oldest first.
    pub fn history(&self, label: &str, record_id: &str) -> Result<Vec<Change>, LedgerError> {
        let mut changes = self.changes(label)?;
        changes.retain(|c| c.keychain().record_id() == record_id);
        Ok(changes)
    }

    fn read_changes(&self, label: &str) -> Result<Vec<Change>, LedgerError> {
        let rows = self.storage.read(label, Table::Changes)?;
        Ok(codec::decode_changes(&rows)?)
    }
}

/// Reject IDs and field names that would produce keychains the changelog
/// cannot parse back.
fn validate_incoming(incoming: &Snapshot) -> Result<(), LedgerError> {
    for (id, value) in incoming {
        if validate_record_id(id).is_err() {
            return Err(LedgerError::InvalidRecordId(id.clone()));
        }
        let Some(fields) = value.as_record() else {
            continue;
        };
        if let Some(field) = fields.keys().find(|f| validate_field_name(f).is_err()) {
            return Err(LedgerError::InvalidField {
                id: id.clone(),
                field: field.clone(),
            });
        }
    }
    Ok(())
}
