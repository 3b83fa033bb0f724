//! Backward replay: undo changes against a snapshot to reach an earlier state.

use crate::change::{Change, Operation};
use crate::keychain::Keychain;
use crate::time::Timestamp;
use ledger_common::{Snapshot, Value};

/// Errors from undoing a change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("keychain {keychain} addresses a field of {record:?}, which is not currently a record")]
    NotARecord { keychain: String, record: String },
    #[error("keychain {keychain} addresses a field but carries a record value")]
    NonScalarCell { keychain: String },
}

/// Undo one change on `snapshot`.
///
/// Record level: an addition removes the record, a modification or deletion
/// puts the old value back. Cell level: an addition removes the field, a
/// modification or deletion puts the old field value back.
pub fn revert(snapshot: &mut Snapshot, change: &Change) -> Result<(), ReplayError> {
    match change.keychain() {
        Keychain::Record(id) => match change.operation() {
            Operation::Addition => {
                snapshot.remove(id);
            }
            Operation::Modification | Operation::Deletion => {
                if let Some(old) = change.old() {
                    snapshot.insert(id.clone(), old.clone());
                }
            }
        },
        Keychain::Cell { record, field } => {
            let Some(fields) = snapshot.get_mut(record).and_then(Value::as_record_mut) else {
                return Err(ReplayError::NotARecord {
                    keychain: change.keychain().to_string(),
                    record: record.clone(),
                });
            };
            match change.operation() {
                Operation::Addition => {
                    fields.remove(field);
                }
                Operation::Modification | Operation::Deletion => match change.old() {
                    Some(Value::Scalar(old)) => {
                        fields.insert(field.clone(), old.clone());
                    }
                    Some(Value::Record(_)) => {
                        return Err(ReplayError::NonScalarCell {
                            keychain: change.keychain().to_string(),
                        });
                    }
                    None => {}
                },
            }
        }
    }
    Ok(())
}

/// Reconstruct the state as of `target` from the present state and the changelog.
///
/// Changes are walked newest first and undone while their timestamp is at or
/// after `target`; the walk stops at the first older change. Changes sharing a
/// timestamp came from one diff pass and touch disjoint keychains, so their
/// relative order does not matter.
pub fn rewind(
    live: Snapshot,
    changes: &[Change],
    target: Timestamp,
) -> Result<Snapshot, ReplayError> {
    let mut ordered: Vec<&Change> = changes.iter().collect();
    ordered.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));

    let mut snapshot = live;
    let mut reverted = 0usize;
    for change in ordered {
        if change.timestamp() < target {
            break;
        }
        revert(&mut snapshot, change)?;
        reverted += 1;
    }
    tracing::debug!(reverted, %target, "rewound snapshot");
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compare;

    fn at(n: i64) -> Timestamp {
        Timestamp::from_unix_nanos(n)
    }

    fn snap(entries: &[(&str, Value)]) -> Snapshot {
        entries
            .iter()
            .map(|(id, v)| (id.to_string(), v.clone()))
            .collect()
    }

    fn revert_all(mut b: Snapshot, changes: &[Change]) -> Snapshot {
        for c in changes {
            revert(&mut b, c).unwrap();
        }
        b
    }

    #[test]
    fn inverse_of_compare_restores_original() {
        let pairs = [
            (Snapshot::new(), snap(&[("a", Value::scalar("1"))])),
            (snap(&[("a", Value::scalar("1"))]), Snapshot::new()),
            (
                snap(&[("foo", Value::scalar("a,b,c")), ("bar", Value::scalar("a,b,c"))]),
                snap(&[("foo", Value::scalar("c,b,a")), ("baz", Value::scalar("a,b,c"))]),
            ),
            (
                snap(&[("abc", Value::record([("name", "Joe"), ("email", "j@g.com")]))]),
                snap(&[("abc", Value::record([("name", "Joe"), ("phone", "012")]))]),
            ),
            (
                snap(&[
                    ("r", Value::record([("a", "1"), ("b", "2")])),
                    ("s", Value::scalar("x")),
                ]),
                snap(&[
                    ("r", Value::record([("a", "9"), ("c", "3")])),
                    ("t", Value::record([("z", "z")])),
                ]),
            ),
        ];
        for (a, b) in pairs {
            let changes = compare(&a, &b, at(1)).unwrap();
            assert_eq!(revert_all(b, &changes), a);
        }
    }

    #[test]
    fn cell_change_on_scalar_parent_is_malformed() {
        let mut s = snap(&[("a", Value::scalar("1"))]);
        let change = Change::modification(
            Keychain::cell("a", "f"),
            Value::scalar("old"),
            Value::scalar("new"),
            at(1),
        );
        assert!(matches!(
            revert(&mut s, &change),
            Err(ReplayError::NotARecord { .. })
        ));

        let mut missing = Snapshot::new();
        assert!(revert(&mut missing, &change).is_err());
    }

    #[test]
    fn cell_change_carrying_record_is_rejected() {
        let mut s = snap(&[("a", Value::record([("f", "1")]))]);
        let change = Change::deletion(Keychain::cell("a", "f"), Value::record([("x", "y")]), at(1));
        assert!(matches!(
            revert(&mut s, &change),
            Err(ReplayError::NonScalarCell { .. })
        ));
    }

    #[test]
    fn rewind_stops_before_target() {
        let s0 = snap(&[("a", Value::record([("f", "1")]))]);
        let s1 = snap(&[("a", Value::record([("f", "2")]))]);
        let s2 = snap(&[("a", Value::record([("f", "2"), ("g", "x")])), ("b", Value::scalar("y"))]);

        let mut log = compare(&Snapshot::new(), &s0, at(10)).unwrap();
        log.extend(compare(&s0, &s1, at(20)).unwrap());
        log.extend(compare(&s1, &s2, at(30)).unwrap());
        // Storage hands the log back in arbitrary order.
        log.reverse();
        log.swap(0, 2);

        assert_eq!(rewind(s2.clone(), &log, at(31)).unwrap(), s2);
        assert_eq!(rewind(s2.clone(), &log, at(30)).unwrap(), s1);
        assert_eq!(rewind(s2.clone(), &log, at(25)).unwrap(), s1);
        assert_eq!(rewind(s2.clone(), &log, at(20)).unwrap(), s0);
        assert_eq!(rewind(s2.clone(), &log, at(11)).unwrap(), s0);
        assert_eq!(rewind(s2.clone(), &log, at(10)).unwrap(), Snapshot::new());
        assert_eq!(rewind(s2, &log, at(0)).unwrap(), Snapshot::new());
    }

    #[test]
    fn rewind_with_empty_log_is_identity() {
        let s = snap(&[("a", Value::scalar("1"))]);
        assert_eq!(rewind(s.clone(), &[], at(0)).unwrap(), s);
    }

    #[test]
    fn rewind_failure_returns_no_partial_state() {
        let live = snap(&[("a", Value::scalar("1"))]);
        let bad = Change::addition(Keychain::cell("a", "f"), Value::scalar("x"), at(5));
        assert!(rewind(live, &[bad], at(0)).is_err());
    }
}
