use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Event time of a change.
///
/// Rendered as fixed-precision RFC 3339 in UTC (`2024-05-01T12:00:00.000000000Z`),
/// so lexical order of the text form equals chronological order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Timestamp(DateTime<Utc>);

/// Error parsing a timestamp from text.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid timestamp {input:?}: {source}")]
pub struct ParseTimestampError {
    input: String,
    #[source]
    source: chrono::ParseError,
}

impl Timestamp {
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Nanoseconds since the Unix epoch.
    pub fn from_unix_nanos(nanos: i64) -> Self {
        let secs = nanos.div_euclid(NANOS_PER_SEC);
        let sub = nanos.rem_euclid(NANOS_PER_SEC) as u32;
        Self(DateTime::<Utc>::from_timestamp(secs, sub).unwrap_or_default())
    }

    pub fn unix_nanos(&self) -> i64 {
        self.0.timestamp_nanos_opt().unwrap_or(i64::MAX)
    }

    /// The smallest representable timestamp strictly after this one.
    pub fn next(self) -> Self {
        Self::from_unix_nanos(self.unix_nanos().saturating_add(1))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }
}

impl FromStr for Timestamp {
    type Err = ParseTimestampError;

    /// Accepts any RFC 3339 timestamp, in any offset.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|source| ParseTimestampError {
                input: s.to_string(),
                source,
            })
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.to_string()
    }
}

impl TryFrom<String> for Timestamp {
    type Error = ParseTimestampError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Source of timestamps for diff passes.
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    nanos: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            nanos: Arc::new(AtomicI64::new(start.unix_nanos())),
        }
    }

    pub fn set(&self, ts: Timestamp) {
        self.nanos.store(ts.unix_nanos(), Ordering::SeqCst);
    }

    /// Move the clock forward by `secs` seconds and return the new time.
    pub fn advance_secs(&self, secs: i64) -> Timestamp {
        let delta = secs.saturating_mul(NANOS_PER_SEC);
        let now = self
            .nanos
            .fetch_add(delta, Ordering::SeqCst)
            .saturating_add(delta);
        Timestamp::from_unix_nanos(now)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_nanos(self.nanos.load(Ordering::SeqCst))
    }
}
