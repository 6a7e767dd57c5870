//! Cached metadata about listened targets.

use super::query::Target;
use crate::types::{ListenSequenceNumber, SnapshotVersion, TargetId};
use driftdb_codec::ByteString;
use serde::{Deserialize, Serialize};

/// Why a target is being listened to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetPurpose {
    /// A user listen.
    Listen,
    /// Re-listen after the server reported an existence filter mismatch.
    ExistenceFilterMismatch,
    /// Resolving whether a limbo document still exists.
    LimboResolution,
}

/// Everything the cache knows about one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetData {
    /// The watched target.
    pub target: Target,
    /// Local id.
    pub target_id: TargetId,
    /// Purpose of the listen.
    pub purpose: TargetPurpose,
    /// Sequence number of the last use, for LRU ordering.
    pub sequence_number: ListenSequenceNumber,
    /// Version of the last snapshot the target was consistent at.
    pub snapshot_version: SnapshotVersion,
    /// Version at which the target last had no limbo documents.
    pub last_limbo_free_snapshot_version: SnapshotVersion,
    /// Opaque token to resume the listen from `snapshot_version`.
    pub resume_token: ByteString,
}

impl TargetData {
    /// Creates metadata for a freshly allocated target.
    #[must_use]
    pub fn new(
        target: Target,
        target_id: TargetId,
        purpose: TargetPurpose,
        sequence_number: ListenSequenceNumber,
    ) -> Self {
        Self {
            target,
            target_id,
            purpose,
            sequence_number,
            snapshot_version: SnapshotVersion::MIN,
            last_limbo_free_snapshot_version: SnapshotVersion::MIN,
            resume_token: ByteString::EMPTY,
        }
    }

    /// Returns a copy with a new sequence number.
    #[must_use]
    pub fn with_sequence_number(&self, sequence_number: ListenSequenceNumber) -> Self {
        Self {
            sequence_number,
            ..self.clone()
        }
    }

    /// Returns a copy with a new resume token and snapshot version.
    #[must_use]
    pub fn with_resume_token(&self, resume_token: ByteString, snapshot_version: SnapshotVersion) -> Self {
        Self {
            resume_token,
            snapshot_version,
            ..self.clone()
        }
    }

    /// Returns a copy with a new last limbo-free snapshot version.
    #[must_use]
    pub fn with_last_limbo_free_snapshot_version(&self, version: SnapshotVersion) -> Self {
        Self {
            last_limbo_free_snapshot_version: version,
            ..self.clone()
        }
    }
}
