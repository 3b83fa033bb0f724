//! Flat changelog rows.
//!
//! A change is stored as one row of the `changes` table, keyed by change ID, with
//! the text columns `keychain`, `timestamp`, `operation`, `old` and `new`.
//!
//! Value columns:
//! - absent values are the empty string; the operation says which side exists,
//! - scalars are written as-is, except that a leading `&` or `\` is escaped
//!   with one extra `\`,
//! - records are `&` followed by `field=value` pairs joined with `&`, with keys
//!   and values percent-encoded. The empty record is a lone `&`.

use ledger_common::{Record, Snapshot, Value};
use ledger_kernel::{
    Change, ChangeId, Keychain, KeychainError, Operation, ParseOperationError,
    ParseTimestampError, Timestamp,
};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

pub const COL_KEYCHAIN: &str = "keychain";
pub const COL_TIMESTAMP: &str = "timestamp";
pub const COL_OPERATION: &str = "operation";
pub const COL_OLD: &str = "old";
pub const COL_NEW: &str = "new";

/// Column layout of the `changes` table, excluding the row ID.
pub const CHANGE_COLUMNS: [&str; 5] = [COL_KEYCHAIN, COL_TIMESTAMP, COL_OPERATION, COL_OLD, COL_NEW];

const RECORD_MARKER: char = '&';
const PAIR_SEPARATOR: char = '&';
const ESCAPE: char = '\\';

const FIELD_SET: &AsciiSet = &CONTROLS.add(b'%').add(b'&').add(b'=').add(b'\\');

/// Errors turning a stored row back into a [`Change`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("change row {id:?} is not a record")]
    NotARecord { id: String },
    #[error("change row {id:?} is missing column {column}")]
    MissingColumn { id: String, column: &'static str },
    #[error("change id {id:?} is not a valid uuid")]
    BadId { id: String },
    #[error("change row {id:?}: {source}")]
    Operation {
        id: String,
        #[source]
        source: ParseOperationError,
    },
    #[error("change row {id:?}: {source}")]
    Timestamp {
        id: String,
        #[source]
        source: ParseTimestampError,
    },
    #[error("change row {id:?}: {source}")]
    Keychain {
        id: String,
        #[source]
        source: KeychainError,
    },
    #[error("change row {id:?}: column {column}: {reason}")]
    Value {
        id: String,
        column: &'static str,
        reason: String,
    },
}

/// Encode a value into its single text column.
pub fn encode_value(value: &Value) -> String {
    match value {
        Value::Scalar(s) => {
            if s.starts_with(RECORD_MARKER) || s.starts_with(ESCAPE) {
                format!("{ESCAPE}{s}")
            } else {
                s.clone()
            }
        }
        Value::Record(fields) => {
            let pairs: Vec<String> = fields
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}={}",
                        utf8_percent_encode(k, FIELD_SET),
                        utf8_percent_encode(v, FIELD_SET)
                    )
                })
                .collect();
            format!("{RECORD_MARKER}{}", pairs.join("&"))
        }
    }
}

/// Decode a text column produced by [`encode_value`].
///
/// Accepts every record `encode_value` can produce, including an empty field
/// name. Whether a field name is usable in a keychain is checked before
/// anything is encoded, in `Ledger::update`.
pub fn decode_value(text: &str) -> Result<Value, String> {
    if let Some(rest) = text.strip_prefix(ESCAPE) {
        return Ok(Value::Scalar(rest.to_string()));
    }
    let Some(list) = text.strip_prefix(RECORD_MARKER) else {
        return Ok(Value::Scalar(text.to_string()));
    };

    let mut record = Record::new();
    if list.is_empty() {
        return Ok(Value::Record(record));
    }
    for pair in list.split(PAIR_SEPARATOR) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("pair {pair:?} has no '='"))?;
        let key = percent_decode(key)?;
        let value = percent_decode(value)?;
        if record.insert(key, value).is_some() {
            return Err(format!("pair {pair:?} repeats a field"));
        }
    }
    Ok(Value::Record(record))
}

fn percent_decode(s: &str) -> Result<String, String> {
    percent_decode_str(s)
        .decode_utf8()
        .map(|c| c.into_owned())
        .map_err(|e| format!("invalid utf-8 in {s:?}: {e}"))
}

/// Flatten a change into its row ID and row value.
pub fn encode_change(change: &Change) -> (String, Value) {
    let text = |v: Option<&Value>| v.map(encode_value).unwrap_or_default();
    let row = Value::record([
        (COL_KEYCHAIN, change.keychain().to_string()),
        (COL_TIMESTAMP, change.timestamp().to_string()),
        (COL_OPERATION, change.operation().as_str().to_string()),
        (COL_OLD, text(change.old())),
        (COL_NEW, text(change.new_value())),
    ]);
    (change.id().to_string(), row)
}

/// Rebuild a change from a stored row.
pub fn decode_change(id: &str, row: &Value) -> Result<Change, DecodeError> {
    let fields = row
        .as_record()
        .ok_or_else(|| DecodeError::NotARecord { id: id.to_string() })?;
    let column = |name: &'static str| {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| DecodeError::MissingColumn {
                id: id.to_string(),
                column: name,
            })
    };

    let change_id = ChangeId::parse(id).map_err(|_| DecodeError::BadId { id: id.to_string() })?;
    let keychain = Keychain::parse(column(COL_KEYCHAIN)?).map_err(|source| DecodeError::Keychain {
        id: id.to_string(),
        source,
    })?;
    let timestamp: Timestamp =
        column(COL_TIMESTAMP)?
            .parse()
            .map_err(|source| DecodeError::Timestamp {
                id: id.to_string(),
                source,
            })?;
    let operation: Operation =
        column(COL_OPERATION)?
            .parse()
            .map_err(|source| DecodeError::Operation {
                id: id.to_string(),
                source,
            })?;

    let value = |name: &'static str| -> Result<Value, DecodeError> {
        let value = decode_value(column(name)?).map_err(|reason| DecodeError::Value {
            id: id.to_string(),
            column: name,
            reason,
        })?;
        if keychain.is_cell() && value.is_record() {
            return Err(DecodeError::Value {
                id: id.to_string(),
                column: name,
                reason: "cell-level change carries a record".into(),
            });
        }
        Ok(value)
    };

    let change = match operation {
        Operation::Addition => Change::addition(keychain.clone(), value(COL_NEW)?, timestamp),
        Operation::Modification => {
            Change::modification(keychain.clone(), value(COL_OLD)?, value(COL_NEW)?, timestamp)
        }
        Operation::Deletion => Change::deletion(keychain.clone(), value(COL_OLD)?, timestamp),
    };
    Ok(change.with_id(change_id))
}

/// Encode a batch of changes as `changes` table rows.
pub fn encode_changes(changes: &[Change]) -> Snapshot {
    changes.iter().map(encode_change).collect()
}

/// Decode a whole `changes` table. Order follows row ID, not time.
pub fn decode_changes(rows: &Snapshot) -> Result<Vec<Change>, DecodeError> {
    rows.iter().map(|(id, row)| decode_change(id, row)).collect()
}
