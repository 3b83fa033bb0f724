//! Shared value model: scalars, one-level records, and snapshots keyed by record ID.

pub mod normalize;
pub mod types;

pub use normalize::{
    NormalizeError, columns, normalize_json, normalize_snapshot, sanitize_field, sanitize_scalar,
    validate_field_name, validate_record_id,
};
pub use types::{KEY_SEPARATOR, Record, Snapshot, Value, ValueKind};
