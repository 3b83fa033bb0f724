//! Persistence: changelog rows, storage backends, and the live/archive coordinator.
//!
//! # Invariants
//! - The changes table is append-only.
//! - An update commits its changes and the new live table together, or not at all.
//! - Restore never writes, except `restore_into_archive` which replaces the archive.

pub mod codec;
pub mod ledger;
pub mod storage;
pub mod store;

pub use codec::{DecodeError, decode_change, decode_changes, encode_change, encode_changes};
pub use ledger::{Ledger, LedgerError, UpdateReport};
pub use storage::{MemoryStorage, Storage, StorageError, Table, TableWrite, validate_label};
pub use store::{FileStorage, LabelMeta};
