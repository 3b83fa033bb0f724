//! Boundary normalization: raw source data becomes a typed [`Snapshot`] exactly once.
//!
//! Field names are reduced to `[0-9a-z_]` so they are safe as storage columns and
//! can never contain the keychain separator. Scalar values lose quote and
//! control characters. Everything past this module works on typed values only.

use crate::types::{KEY_SEPARATOR, Record, Snapshot, Value};
use std::collections::BTreeSet;

/// Column names that collide with SQL keywords in the storage layer.
const RESERVED_WORDS: &[&str] = &["user", "order", "group", "select", "table", "from", "where"];

/// Errors raised while turning raw input into a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("expected an object of records at the top level")]
    NotAnObject,
    #[error("record id {0:?} is empty or contains the reserved separator '.'")]
    InvalidRecordId(String),
    #[error("field name {0:?} is empty after sanitization")]
    EmptyField(String),
    #[error("field name {0:?} is empty or contains the reserved separator '.'")]
    InvalidFieldName(String),
    #[error("record {id:?} has duplicate field {field:?} after sanitization")]
    DuplicateField { id: String, field: String },
    #[error("record {id:?} holds a non-string value (field: {field:?})")]
    NonStringLeaf { id: String, field: Option<String> },
    #[error("record {id:?}: field {field:?} nests deeper than one level")]
    NestedTooDeep { id: String, field: String },
}

/// Reduce a raw field name to a storage-safe column name.
pub fn sanitize_field(name: &str) -> Result<String, NormalizeError> {
    let mut out: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if out.is_empty() {
        return Err(NormalizeError::EmptyField(name.to_string()));
    }
    if RESERVED_WORDS.contains(&out.as_str()) {
        out.push('_');
    }
    Ok(out)
}

/// Strip quote and control characters from a scalar value.
pub fn sanitize_scalar(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '\'' | '\r' | '\n' | '\t'))
        .collect()
}

/// Record IDs must be non-empty and free of the keychain separator.
pub fn validate_record_id(id: &str) -> Result<(), NormalizeError> {
    if id.is_empty() || id.contains(KEY_SEPARATOR) {
        return Err(NormalizeError::InvalidRecordId(id.to_string()));
    }
    Ok(())
}

/// Field names must be non-empty and free of the keychain separator, or their
/// cell keychains could not be parsed back.
pub fn validate_field_name(field: &str) -> Result<(), NormalizeError> {
    if field.is_empty() || field.contains(KEY_SEPARATOR) {
        return Err(NormalizeError::InvalidFieldName(field.to_string()));
    }
    Ok(())
}

/// Convert an untyped JSON document into a snapshot.
///
/// The document must be an object of record ID to either a string or an object
/// of strings.
pub fn normalize_json(raw: &serde_json::Value) -> Result<Snapshot, NormalizeError> {
    let serde_json::Value::Object(entries) = raw else {
        return Err(NormalizeError::NotAnObject);
    };

    let mut snapshot = Snapshot::new();
    for (id, value) in entries {
        validate_record_id(id)?;
        let value = match value {
            serde_json::Value::String(s) => Value::Scalar(sanitize_scalar(s)),
            serde_json::Value::Object(fields) => {
                let mut record = Record::new();
                for (field, cell) in fields {
                    let cell = match cell {
                        serde_json::Value::String(s) => sanitize_scalar(s),
                        serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                            return Err(NormalizeError::NestedTooDeep {
                                id: id.clone(),
                                field: field.clone(),
                            });
                        }
                        _ => {
                            return Err(NormalizeError::NonStringLeaf {
                                id: id.clone(),
                                field: Some(field.clone()),
                            });
                        }
                    };
                    insert_field(&mut record, id, field, cell)?;
                }
                Value::Record(record)
            }
            _ => {
                return Err(NormalizeError::NonStringLeaf {
                    id: id.clone(),
                    field: None,
                });
            }
        };
        snapshot.insert(id.clone(), value);
    }
    Ok(snapshot)
}

/// Apply the same sanitization to an already-typed snapshot.
pub fn normalize_snapshot(snapshot: Snapshot) -> Result<Snapshot, NormalizeError> {
    let mut out = Snapshot::new();
    for (id, value) in snapshot {
        validate_record_id(&id)?;
        let value = match value {
            Value::Scalar(s) => Value::Scalar(sanitize_scalar(&s)),
            Value::Record(fields) => {
                let mut record = Record::new();
                for (field, cell) in &fields {
                    insert_field(&mut record, &id, field, sanitize_scalar(cell))?;
                }
                Value::Record(record)
            }
        };
        out.insert(id, value);
    }
    Ok(out)
}

fn insert_field(
    record: &mut Record,
    id: &str,
    raw_field: &str,
    cell: String,
) -> Result<(), NormalizeError> {
    let field = sanitize_field(raw_field)?;
    if record.contains_key(&field) {
        return Err(NormalizeError::DuplicateField {
            id: id.to_string(),
            field,
        });
    }
    record.insert(field, cell);
    Ok(())
}

/// Sorted union of field names across all records: the column set of a table.
pub fn columns(snapshot: &Snapshot) -> Vec<String> {
    snapshot
        .values()
        .filter_map(Value::as_record)
        .flat_map(|r| r.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_field_strips_and_lowercases() {
        assert_eq!(sanitize_field("Opportunity ID").unwrap(), "opportunityid");
        assert_eq!(sanitize_field("e-mail.addr").unwrap(), "emailaddr");
        assert_eq!(sanitize_field("first_name").unwrap(), "first_name");
    }

    #[test]
    fn sanitize_field_renames_reserved_words() {
        assert_eq!(sanitize_field("User").unwrap(), "user_");
        assert_eq!(sanitize_field("order").unwrap(), "order_");
    }

    #[test]
    fn sanitize_field_rejects_empty() {
        assert_eq!(
            sanitize_field("?!"),
            Err(NormalizeError::EmptyField("?!".into()))
        );
    }

    #[test]
    fn sanitize_scalar_drops_quotes_and_controls() {
        assert_eq!(sanitize_scalar("it's\r\na\ttest"), "itsatest");
        assert_eq!(sanitize_scalar("a=b&c"), "a=b&c");
    }

    #[test]
    fn record_ids_with_separator_rejected() {
        assert!(validate_record_id("abc").is_ok());
        assert!(validate_record_id("").is_err());
        assert!(validate_record_id("a.b").is_err());
    }

    #[test]
    fn field_names_with_separator_rejected() {
        assert!(validate_field_name("email").is_ok());
        assert_eq!(
            validate_field_name(""),
            Err(NormalizeError::InvalidFieldName(String::new()))
        );
        assert!(validate_field_name("x.y").is_err());
        // Sanitized names always pass.
        assert!(validate_field_name(&sanitize_field("e-mail.addr").unwrap()).is_ok());
    }

    #[test]
    fn normalize_json_builds_typed_snapshot() {
        let raw = json!({
            "abc": { "Name": "Joe Schmoe", "E-mail": "j@protonmail.ch" },
            "foo": "a,b,c",
        });
        let snap = normalize_json(&raw).unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["abc"].field("name"), Some("Joe Schmoe"));
        assert_eq!(snap["abc"].field("email"), Some("j@protonmail.ch"));
        assert_eq!(snap["foo"].as_scalar(), Some("a,b,c"));
    }

    #[test]
    fn normalize_json_rejects_bad_shapes() {
        assert_eq!(
            normalize_json(&json!(["a"])),
            Err(NormalizeError::NotAnObject)
        );
        assert_eq!(
            normalize_json(&json!({ "1": 5 })),
            Err(NormalizeError::NonStringLeaf {
                id: "1".into(),
                field: None
            })
        );
        assert_eq!(
            normalize_json(&json!({ "1": { "a": true } })),
            Err(NormalizeError::NonStringLeaf {
                id: "1".into(),
                field: Some("a".into())
            })
        );
        assert_eq!(
            normalize_json(&json!({ "1": { "a": { "b": "c" } } })),
            Err(NormalizeError::NestedTooDeep {
                id: "1".into(),
                field: "a".into()
            })
        );
    }

    #[test]
    fn normalize_json_detects_colliding_fields() {
        let raw = json!({ "1": { "Name": "a", "name": "b" } });
        assert!(matches!(
            normalize_json(&raw),
            Err(NormalizeError::DuplicateField { .. })
        ));
    }

    #[test]
    fn normalize_snapshot_sanitizes_typed_input() {
        let mut snap = Snapshot::new();
        snap.insert("1".into(), Value::record([("User", "o'neil")]));
        let out = normalize_snapshot(snap).unwrap();
        assert_eq!(out["1"].field("user_"), Some("oneil"));
    }

    #[test]
    fn columns_is_sorted_union() {
        let mut snap = Snapshot::new();
        snap.insert("1".into(), Value::record([("b", "x"), ("a", "y")]));
        snap.insert("2".into(), Value::record([("c", "z")]));
        snap.insert("3".into(), Value::scalar("s"));
        assert_eq!(columns(&snap), vec!["a", "b", "c"]);
    }
}
