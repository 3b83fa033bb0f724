use crate::schema::{FieldType, infer_field_types};
use ledger_common::columns;
use ledger_kernel::{Change, Clock, Operation, Timestamp};
use ledger_persist::{Ledger, LedgerError, Storage};
use std::collections::BTreeMap;
use std::fmt;

/// Label inspector for developer tooling.
///
/// Read-only queries against a ledger for debugging and the CLI.
pub struct LedgerInspector;

impl LedgerInspector {
    /// Produce a summary of one label.
    pub fn summary<S: Storage, C: Clock>(
        ledger: &Ledger<S, C>,
        label: &str,
    ) -> Result<LabelSummary, LedgerError> {
        let live = ledger.live(label)?;
        let archive = ledger.read_archive(label)?;
        let changes = ledger.changes(label)?;

        let mut updates = 0;
        let mut previous = None;
        for change in &changes {
            if previous != Some(change.timestamp()) {
                updates += 1;
                previous = Some(change.timestamp());
            }
        }

        Ok(LabelSummary {
            label: label.to_string(),
            live_records: live.len(),
            archive_records: archive.len(),
            fields: columns(&live),
            field_types: infer_field_types(&live),
            changes: changes.len(),
            updates,
            first_change: changes.first().map(Change::timestamp),
            last_change: changes.last().map(Change::timestamp),
        })
    }

    /// All changes touching one record, oldest first.
    pub fn history<S: Storage, C: Clock>(
        ledger: &Ledger<S, C>,
        label: &str,
        record_id: &str,
    ) -> Result<RecordHistory, LedgerError> {
        let changes = ledger.history(label, record_id)?;
        let live = ledger.live(label)?;
        Ok(RecordHistory {
            record_id: record_id.to_string(),
            present: live.contains_key(record_id),
            changes,
        })
    }
}

/// Summary of a label for the inspector.
#[derive(Debug, Clone)]
pub struct LabelSummary {
    pub label: String,
    pub live_records: usize,
    pub archive_records: usize,
    pub fields: Vec<String>,
    pub field_types: BTreeMap<String, FieldType>,
    pub changes: usize,
    /// Distinct update stamps in the changelog.
    pub updates: usize,
    pub first_change: Option<Timestamp>,
    pub last_change: Option<Timestamp>,
}

impl fmt::Display for LabelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Label {}: live={} archive={} changes={} updates={}",
            self.label, self.live_records, self.archive_records, self.changes, self.updates
        )?;
        match (self.first_change, self.last_change) {
            (Some(first), Some(last)) => writeln!(f, "  history: {first} .. {last}")?,
            _ => writeln!(f, "  history: empty")?,
        }
        for field in &self.fields {
            let ty = self
                .field_types
                .get(field)
                .copied()
                .unwrap_or(FieldType::String);
            writeln!(f, "  {field:<24} {ty}")?;
        }
        Ok(())
    }
}

/// Change history of a single record.
#[derive(Debug, Clone)]
pub struct RecordHistory {
    pub record_id: String,
    /// Whether the record is in the live table now.
    pub present: bool,
    pub changes: Vec<Change>,
}

impl RecordHistory {
    /// When the record was last added at record level, if ever.
    pub fn created(&self) -> Option<Timestamp> {
        self.changes
            .iter()
            .rev()
            .find(|c| c.operation() == Operation::Addition && !c.keychain().is_cell())
            .map(Change::timestamp)
    }
}

impl fmt::Display for RecordHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.present { "live" } else { "gone" };
        writeln!(
            f,
            "Record {} ({state}, {} changes)",
            self.record_id,
            self.changes.len()
        )?;
        for change in &self.changes {
            writeln!(f, "  {change}")?;
        }
        Ok(())
    }
}
