use crate::keychain::Keychain;
use crate::time::Timestamp;
use ledger_common::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of change recorded at a keychain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Addition,
    Modification,
    Deletion,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation {0:?}")]
pub struct ParseOperationError(pub String);

impl Operation {
    pub const ALL: [Operation; 3] = [Self::Addition, Self::Modification, Self::Deletion];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Addition => "addition",
            Self::Modification => "modification",
            Self::Deletion => "deletion",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ParseOperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| ParseOperationError(s.to_string()))
    }
}

/// Unique identifier of a change event (not of the record it touches).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeId(pub Uuid);

impl ChangeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for ChangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A single atomic change to a record or to one field of a record.
///
/// The constructors are the only way to build one, which keeps the value
/// presence rules intact: an addition has no old value, a deletion has no new
/// value, a modification has both. Changes are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    id: ChangeId,
    keychain: Keychain,
    timestamp: Timestamp,
    operation: Operation,
    old: Option<Value>,
    new: Option<Value>,
}

impl Change {
    pub fn addition(keychain: Keychain, new: Value, timestamp: Timestamp) -> Self {
        Self {
            id: ChangeId::new(),
            keychain,
            timestamp,
            operation: Operation::Addition,
            old: None,
            new: Some(new),
        }
    }

    pub fn modification(keychain: Keychain, old: Value, new: Value, timestamp: Timestamp) -> Self {
        Self {
            id: ChangeId::new(),
            keychain,
            timestamp,
            operation: Operation::Modification,
            old: Some(old),
            new: Some(new),
        }
    }

    pub fn deletion(keychain: Keychain, old: Value, timestamp: Timestamp) -> Self {
        Self {
            id: ChangeId::new(),
            keychain,
            timestamp,
            operation: Operation::Deletion,
            old: Some(old),
            new: None,
        }
    }

    /// Replace the generated ID, used when loading a persisted change.
    pub fn with_id(mut self, id: ChangeId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> ChangeId {
        self.id
    }

    pub fn keychain(&self) -> &Keychain {
        &self.keychain
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn old(&self) -> Option<&Value> {
        self.old.as_ref()
    }

    pub fn new_value(&self) -> Option<&Value> {
        self.new.as_ref()
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:<12} {}", self.timestamp, self.operation, self.keychain)?;
        match (&self.old, &self.new) {
            (Some(old), Some(new)) => write!(f, ": {old} -> {new}"),
            (None, Some(new)) => write!(f, ": {new}"),
            (Some(old), None) => write!(f, ": was {old}"),
            (None, None) => Ok(()),
        }
    }
}
