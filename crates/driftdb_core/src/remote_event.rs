//! Events delivered by the watch stream.

use crate::model::{DocumentKey, MaybeDocument};
use crate::types::{SnapshotVersion, TargetId};
use driftdb_codec::ByteString;
use std::collections::{BTreeMap, BTreeSet};

/// Changes to one target's result set since the last event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetChange {
    /// Opaque token for resuming the target. Empty if unchanged.
    pub resume_token: ByteString,
    /// The target is in sync with the server.
    pub current: bool,
    /// Documents that entered the result set.
    pub added_documents: BTreeSet<DocumentKey>,
    /// Documents in the result set that changed.
    pub modified_documents: BTreeSet<DocumentKey>,
    /// Documents that left the result set.
    pub removed_documents: BTreeSet<DocumentKey>,
}

impl TargetChange {
    /// Creates an empty change carrying `resume_token`.
    #[must_use]
    pub fn new(resume_token: ByteString, current: bool) -> Self {
        Self {
            resume_token,
            current,
            ..Self::default()
        }
    }

    /// Adds documents to the result set.
    #[must_use]
    pub fn with_added(mut self, keys: impl IntoIterator<Item = DocumentKey>) -> Self {
        self.added_documents.extend(keys);
        self
    }

    /// Marks documents as modified.
    #[must_use]
    pub fn with_modified(mut self, keys: impl IntoIterator<Item = DocumentKey>) -> Self {
        self.modified_documents.extend(keys);
        self
    }

    /// Removes documents from the result set.
    #[must_use]
    pub fn with_removed(mut self, keys: impl IntoIterator<Item = DocumentKey>) -> Self {
        self.removed_documents.extend(keys);
        self
    }

    /// Number of documents touched by this change.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.added_documents.len() + self.modified_documents.len() + self.removed_documents.len()
    }
}

/// A consistent snapshot of watch changes at `snapshot_version`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteEvent {
    /// Version of the snapshot. [`SnapshotVersion::MIN`] for changes not
    /// tied to a global snapshot.
    pub snapshot_version: SnapshotVersion,
    /// Per-target changes.
    pub target_changes: BTreeMap<TargetId, TargetChange>,
    /// Targets whose existence filter did not match and must be reset.
    pub target_mismatches: BTreeSet<TargetId>,
    /// New document states.
    pub document_updates: BTreeMap<DocumentKey, MaybeDocument>,
    /// Limbo documents resolved by this event.
    pub resolved_limbo_documents: BTreeSet<DocumentKey>,
}

impl RemoteEvent {
    /// Creates an empty event at `snapshot_version`.
    #[must_use]
    pub fn new(snapshot_version: SnapshotVersion) -> Self {
        Self {
            snapshot_version,
            ..Self::default()
        }
    }

    /// Adds a target change.
    #[must_use]
    pub fn with_target_change(mut self, target_id: TargetId, change: TargetChange) -> Self {
        self.target_changes.insert(target_id, change);
        self
    }

    /// Marks a target as mismatched.
    #[must_use]
    pub fn with_target_mismatch(mut self, target_id: TargetId) -> Self {
        self.target_mismatches.insert(target_id);
        self
    }

    /// Adds a document update.
    #[must_use]
    pub fn with_document(mut self, document: MaybeDocument) -> Self {
        self.document_updates.insert(document.key().clone(), document);
        self
    }

    /// Marks a document as a resolved limbo document.
    #[must_use]
    pub fn with_resolved_limbo_document(mut self, key: DocumentKey) -> Self {
        self.resolved_limbo_documents.insert(key);
        self
    }
}
