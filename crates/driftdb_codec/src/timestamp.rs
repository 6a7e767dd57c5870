//! Timestamps and geographic points.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds of 0001-01-01T00:00:00Z.
const MIN_SECONDS: i64 = -62_135_596_800;
/// Seconds of 9999-12-31T23:59:59Z.
const MAX_SECONDS: i64 = 253_402_300_799;
const NANOS_PER_SECOND: i32 = 1_000_000_000;

/// A point in time with nanosecond precision.
///
/// Ordered by `(seconds, nanos)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    seconds: i64,
    nanos: i32,
}

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Timestamp = Timestamp {
        seconds: 0,
        nanos: 0,
    };

    /// Creates a validated timestamp.
    pub fn new(seconds: i64, nanos: i32) -> CodecResult<Self> {
        if !(0..NANOS_PER_SECOND).contains(&nanos) || !(MIN_SECONDS..=MAX_SECONDS).contains(&seconds)
        {
            return Err(CodecError::InvalidTimestamp { seconds, nanos });
        }
        Ok(Self { seconds, nanos })
    }

    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        let seconds = millis.div_euclid(1000);
        let nanos = (millis.rem_euclid(1000) * 1_000_000) as i32;
        Self { seconds, nanos }
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: elapsed.as_secs() as i64,
            nanos: elapsed.subsec_nanos() as i32,
        }
    }

    /// Seconds since the epoch.
    #[must_use]
    pub const fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Nanosecond fraction in `[0, 1e9)`.
    #[must_use]
    pub const fn nanos(&self) -> i32 {
        self.nanos
    }

    /// Milliseconds since the epoch, truncated.
    #[must_use]
    pub fn to_millis(&self) -> i64 {
        self.seconds * 1000 + i64::from(self.nanos / 1_000_000)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

/// A latitude/longitude pair.
///
/// Ordered by latitude, then longitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, `[-90, 90]`.
    pub latitude: f64,
    /// Longitude in degrees, `[-180, 180]`.
    pub longitude: f64,
}

impl GeoPoint {
    /// Creates a geographic point.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Compares two points using the number ordering for each coordinate.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        crate::value::compare_doubles(self.latitude, other.latitude)
            .then_with(|| crate::value::compare_doubles(self.longitude, other.longitude))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_nanos() {
        assert!(Timestamp::new(0, -1).is_err());
        assert!(Timestamp::new(0, NANOS_PER_SECOND).is_err());
        assert!(Timestamp::new(0, NANOS_PER_SECOND - 1).is_ok());
    }

    #[test]
    fn rejects_out_of_range_seconds() {
        assert!(Timestamp::new(MIN_SECONDS - 1, 0).is_err());
        assert!(Timestamp::new(MAX_SECONDS + 1, 0).is_err());
    }

    #[test]
    fn millis_conversion_handles_negative_values() {
        let ts = Timestamp::from_millis(-1);
        assert_eq!(ts.seconds(), -1);
        assert_eq!(ts.nanos(), 999_000_000);
        assert_eq!(ts.to_millis(), -1);
    }

    #[test]
    fn ordering() {
        let a = Timestamp::new(1, 5).unwrap();
        let b = Timestamp::new(1, 6).unwrap();
        let c = Timestamp::new(2, 0).unwrap();
        assert!(a < b && b < c);
    }
}
