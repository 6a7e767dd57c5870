//! Core identifier and version types.

use driftdb_codec::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a mutation batch.
///
/// Batch ids increase strictly in enqueue order and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchId(pub i64);

impl BatchId {
    /// Marker for "no batch", smaller than every real id.
    pub const UNKNOWN: BatchId = BatchId(-1);

    /// Creates a batch id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns the following id.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch:{}", self.0)
    }
}

/// Identifier of a listen target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetId(pub i32);

impl TargetId {
    /// Creates a target id.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target:{}", self.0)
    }
}

/// Logical clock value used for LRU recency.
///
/// Every transaction receives the next number; it is unrelated to wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListenSequenceNumber(pub i64);

impl ListenSequenceNumber {
    /// Returned when no sequence number applies, e.g. collecting zero targets.
    pub const INVALID: ListenSequenceNumber = ListenSequenceNumber(-1);

    /// Creates a sequence number.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ListenSequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// A server snapshot version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotVersion(Timestamp);

impl SnapshotVersion {
    /// The version before any server snapshot.
    pub const MIN: SnapshotVersion = SnapshotVersion(Timestamp::EPOCH);

    /// Wraps a timestamp.
    #[must_use]
    pub const fn new(timestamp: Timestamp) -> Self {
        Self(timestamp)
    }

    /// Builds a version from microseconds, as used in tests and fixtures.
    #[must_use]
    pub fn from_micros(micros: i64) -> Self {
        let seconds = micros.div_euclid(1_000_000);
        let nanos = (micros.rem_euclid(1_000_000) * 1000) as i32;
        Self(Timestamp::new(seconds, nanos).unwrap_or(Timestamp::EPOCH))
    }

    /// Returns the wrapped timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> Timestamp {
        self.0
    }

    /// Microseconds since the epoch.
    #[must_use]
    pub fn to_micros(&self) -> i64 {
        self.0.seconds() * 1_000_000 + i64::from(self.0.nanos() / 1000)
    }
}

impl Default for SnapshotVersion {
    fn default() -> Self {
        Self::MIN
    }
}

impl fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
