//! Ledger kernel: change detection between snapshots and backward replay.
//!
//! # Invariants
//! - `compare` is pure: inputs are borrowed, never mutated.
//! - Every change from one `compare` call carries the same timestamp.
//! - Undoing every change of `compare(a, b)` on `b` yields `a`.

pub mod change;
pub mod diff;
pub mod keychain;
pub mod replay;
pub mod time;

pub use change::{Change, ChangeId, Operation, ParseOperationError};
pub use diff::{DiffError, DiffStats, compare};
pub use keychain::{Keychain, KeychainError};
pub use replay::{ReplayError, revert, rewind};
pub use time::{Clock, ManualClock, ParseTimestampError, SystemClock, Timestamp};
