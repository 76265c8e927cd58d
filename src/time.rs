use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};
use std::time::Duration;

pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// An instant on the wall clock, as signed nanoseconds since the POSIX epoch.
///
/// All internal time arithmetic happens on the raw nanosecond count; the
/// integer-seconds constructors cover the coarse timestamps used at the
/// query boundary.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TfTime(pub i64);

impl TfTime {
    pub const fn from_nanos(nanos: i64) -> Self {
        TfTime(nanos)
    }

    /// Integer POSIX seconds, the wire format of external callers.
    pub const fn from_secs(secs: i64) -> Self {
        TfTime(secs * NANOS_PER_SEC)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        TfTime((secs * NANOS_PER_SEC as f64).round() as i64)
    }

    pub fn from_datetime(instant: DateTime<Utc>) -> Self {
        // saturates past the year 2262 rather than wrapping
        TfTime(instant.timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.0)
    }

    pub fn as_nanos(self) -> i64 {
        let Self(nanos) = self;
        nanos
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    /// Absolute distance to `other` in nanoseconds.
    pub fn abs_diff(self, other: TfTime) -> i64 {
        (self.0 - other.0).abs()
    }
}

/// Offset by a signed nanosecond count.
impl Add<i64> for TfTime {
    type Output = TfTime;

    fn add(self, rhs: i64) -> TfTime {
        TfTime(self.0 + rhs)
    }
}

impl Sub<i64> for TfTime {
    type Output = TfTime;

    fn sub(self, rhs: i64) -> TfTime {
        TfTime(self.0 - rhs)
    }
}

/// Difference between two instants, in nanoseconds.
impl Sub for TfTime {
    type Output = i64;

    fn sub(self, rhs: TfTime) -> i64 {
        self.0 - rhs.0
    }
}

impl From<i64> for TfTime {
    fn from(nanos: i64) -> Self {
        TfTime(nanos)
    }
}

impl From<TfTime> for i64 {
    fn from(time: TfTime) -> i64 {
        time.0
    }
}

impl From<Duration> for TfTime {
    fn from(duration: Duration) -> Self {
        TfTime(duration.as_nanos() as i64)
    }
}

impl Display for TfTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.9}s", self.as_secs_f64())
    }
}
