use ledger_common::KEY_SEPARATOR;
use std::fmt;
use std::str::FromStr;

/// Address of a change: a whole record, or one field inside a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Keychain {
    Record(String),
    Cell { record: String, field: String },
}

/// Errors parsing a keychain from its text form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeychainError {
    #[error("empty keychain")]
    Empty,
    #[error("keychain {0:?} has an empty segment")]
    EmptySegment(String),
    #[error("keychain {0:?} is nested deeper than record.field")]
    TooDeep(String),
}

impl Keychain {
    pub fn record(id: impl Into<String>) -> Self {
        Self::Record(id.into())
    }

    pub fn cell(record: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Cell {
            record: record.into(),
            field: field.into(),
        }
    }

    /// The record this keychain points into.
    pub fn record_id(&self) -> &str {
        match self {
            Self::Record(id) => id,
            Self::Cell { record, .. } => record,
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Record(_) => None,
            Self::Cell { field, .. } => Some(field),
        }
    }

    pub fn is_cell(&self) -> bool {
        matches!(self, Self::Cell { .. })
    }

    pub fn parse(s: &str) -> Result<Self, KeychainError> {
        if s.is_empty() {
            return Err(KeychainError::Empty);
        }
        match s.split_once(KEY_SEPARATOR) {
            None => Ok(Self::Record(s.to_string())),
            Some((record, field)) => {
                if record.is_empty() || field.is_empty() {
                    return Err(KeychainError::EmptySegment(s.to_string()));
                }
                if field.contains(KEY_SEPARATOR) {
                    return Err(KeychainError::TooDeep(s.to_string()));
                }
                Ok(Self::cell(record, field))
            }
        }
    }
}

impl fmt::Display for Keychain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record(id) => f.write_str(id),
            Self::Cell { record, field } => write!(f, "{record}{KEY_SEPARATOR}{field}"),
        }
    }
}

impl FromStr for Keychain {
    type Err = KeychainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
