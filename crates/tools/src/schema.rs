//! Column type inference over string-valued records.
//!
//! Each cell is classified on its own, then each field takes the type most of
//! its cells agree on. Ties go to the type declared first in [`FieldType`].

use chrono::NaiveDate;
use ledger_common::{Snapshot, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Month/day/year, leading zeros optional.
const DATE_FORMAT: &str = "%m/%d/%Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int,
    Float,
    Bool,
    Date,
    String,
}

impl FieldType {
    pub const ALL: [FieldType; 5] = [
        FieldType::Int,
        FieldType::Float,
        FieldType::Bool,
        FieldType::Date,
        FieldType::String,
    ];

    /// Column type name in a SQL table definition.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Int => "integer",
            FieldType::Float => "decimal",
            FieldType::Bool => "boolean",
            FieldType::Date => "date",
            FieldType::String => "text",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Date => "date",
            FieldType::String => "string",
        };
        f.pad(name)
    }
}

/// Classify one cell. Integers win over floats, and `1`/`0` stay integers.
pub fn infer_scalar(value: &str) -> FieldType {
    if value.parse::<i64>().is_ok() {
        FieldType::Int
    } else if value.parse::<f64>().is_ok() {
        FieldType::Float
    } else if parse_bool(value) {
        FieldType::Bool
    } else if NaiveDate::parse_from_str(value, DATE_FORMAT).is_ok() {
        FieldType::Date
    } else {
        FieldType::String
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value,
        "t" | "T" | "true" | "TRUE" | "True" | "f" | "F" | "false" | "FALSE" | "False"
    )
}

/// Majority type per field across every record of `snapshot`. Scalar records
/// have no fields and are skipped.
pub fn infer_field_types(snapshot: &Snapshot) -> BTreeMap<String, FieldType> {
    let mut counts: BTreeMap<&str, [usize; FieldType::ALL.len()]> = BTreeMap::new();
    for fields in snapshot.values().filter_map(Value::as_record) {
        for (field, cell) in fields {
            let tally = counts.entry(field.as_str()).or_default();
            tally[infer_scalar(cell) as usize] += 1;
        }
    }

    counts
        .into_iter()
        .map(|(field, tally)| {
            let mut best = FieldType::String;
            let mut best_count = 0;
            for ty in FieldType::ALL {
                if tally[ty as usize] > best_count {
                    best = ty;
                    best_count = tally[ty as usize];
                }
            }
            (field.to_string(), best)
        })
        .collect()
}
