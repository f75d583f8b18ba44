//! Capture time in nanoseconds
//!
//! [`Timestamp`] is an absolute capture instant, [`Interval`] a signed
//! distance between two of them. Flow timeouts are expressed as an
//! [`Interval`] and compared against `now - last_seen`.
//!
//! ```
//! use flow_strata::timestamp::{Interval, Timestamp};
//!
//! let start = Timestamp::from_secs(1_700_000_000);
//! let later = start + Interval::from_secs(180);
//! assert_eq!(later - start, Interval::from_secs(180));
//! assert_eq!(start - later, Interval::from_secs(-180));
//! ```

use std::{
    fmt,
    ops::{Add, Sub},
    time::Duration,
};

use chrono::DateTime;
use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub u64); // Nanoseconds since epoch

impl Timestamp {
    pub const ZERO: Self = Timestamp(0);

    #[inline]
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    #[inline]
    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(NANOS_PER_SEC))
    }

    /// Seconds and microseconds, as found in legacy pcap records.
    #[inline]
    pub fn from_micros_parts(secs: u32, usecs: u32) -> Self {
        Self(secs as u64 * NANOS_PER_SEC + usecs as u64 * 1000)
    }

    #[inline]
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }
}

impl fmt::Display for Timestamp {
    /// `{}` prints a UTC date, `{:#}` the raw `secs.nanos` value.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !f.alternate() {
            if let Some(date_time) = DateTime::from_timestamp(
                (self.0 / NANOS_PER_SEC) as i64,
                (self.0 % NANOS_PER_SEC) as u32,
            ) {
                return write!(f, "{}", date_time.format("%Y-%m-%d %H:%M:%S%.6f UTC"));
            }
        }

        write!(f, "{}.{:09}", self.0 / NANOS_PER_SEC, self.0 % NANOS_PER_SEC)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Interval(pub i64); // Signed nanoseconds

impl Interval {
    pub const ZERO: Self = Interval(0);

    #[inline]
    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    #[inline]
    pub fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(NANOS_PER_SEC as i64))
    }

    #[inline]
    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Whole seconds, truncated toward zero.
    #[inline]
    pub fn as_secs(&self) -> i64 {
        self.0 / NANOS_PER_SEC as i64
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.saturating_abs())
    }
}

impl From<Duration> for Interval {
    fn from(d: Duration) -> Self {
        Interval(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
    }
}

impl From<Interval> for Duration {
    /// Negative intervals clamp to zero.
    fn from(i: Interval) -> Self {
        Duration::from_nanos(i.0.max(0) as u64)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_nanos = self.0.unsigned_abs();
        let secs = total_nanos / NANOS_PER_SEC;
        let nanos = total_nanos % NANOS_PER_SEC;
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:09}", sign, secs, nanos)
    }
}

// --- Timestamp Operations ---

impl Add<Interval> for Timestamp {
    type Output = Timestamp;
    #[inline]
    fn add(self, rhs: Interval) -> Self::Output {
        Timestamp(self.0.saturating_add_signed(rhs.0))
    }
}

impl Sub<Interval> for Timestamp {
    type Output = Timestamp;
    #[inline]
    fn sub(self, rhs: Interval) -> Self::Output {
        Timestamp(self.0.saturating_sub_signed(rhs.0))
    }
}

impl Sub for Timestamp {
    type Output = Interval;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        if self.0 >= rhs.0 {
            Interval(i64::try_from(self.0 - rhs.0).unwrap_or(i64::MAX))
        } else {
            Interval(i64::try_from(rhs.0 - self.0).map_or(i64::MIN, |d| -d))
        }
    }
}

// --- Interval Operations ---

impl Add for Interval {
    type Output = Interval;
    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Interval(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Interval {
    type Output = Interval;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Interval(self.0.saturating_sub(rhs.0))
    }
}
