//! Developer tooling: label inspector, record history, field type inference.
//!
//! # Invariants
//! - Tools only read; nothing here writes to storage.

pub mod inspector;
pub mod schema;

pub use inspector::{LabelSummary, LedgerInspector, RecordHistory};
pub use schema::{FieldType, infer_field_types, infer_scalar};
