//! Batches of mutations written together.

use super::document::MaybeDocument;
use super::document_key::DocumentKey;
use super::mutation::{Mutation, MutationResult};
use crate::error::{CoreError, CoreResult};
use crate::types::{BatchId, SnapshotVersion};
use driftdb_codec::{ByteString, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// An immutable group of mutations applied atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationBatch {
    /// Queue-assigned id.
    pub batch_id: BatchId,
    /// When the user issued the write.
    pub local_write_time: Timestamp,
    /// Patches that pin the pre-write values of non-idempotent transforms.
    /// Applied before `mutations` in the local view only.
    pub base_mutations: Vec<Mutation>,
    /// The user's writes.
    pub mutations: Vec<Mutation>,
}

impl MutationBatch {
    /// Creates a batch.
    #[must_use]
    pub fn new(
        batch_id: BatchId,
        local_write_time: Timestamp,
        base_mutations: Vec<Mutation>,
        mutations: Vec<Mutation>,
    ) -> Self {
        Self {
            batch_id,
            local_write_time,
            base_mutations,
            mutations,
        }
    }

    /// Keys written by the batch.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<DocumentKey> {
        self.mutations.iter().map(|m| m.key.clone()).collect()
    }

    /// Replays the acknowledged batch onto `doc` using the server's
    /// results.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if `result` belongs to another batch.
    pub fn apply_to_remote_document(
        &self,
        key: &DocumentKey,
        doc: Option<MaybeDocument>,
        result: &MutationBatchResult,
    ) -> CoreResult<Option<MaybeDocument>> {
        if result.batch.batch_id != self.batch_id {
            return Err(CoreError::contract_violation(format!(
                "result for {} applied to {}",
                result.batch.batch_id, self.batch_id
            )));
        }
        let mut doc = doc;
        for (mutation, mutation_result) in self.mutations.iter().zip(&result.mutation_results) {
            if &mutation.key == key {
                doc = mutation.apply_to_remote_document(doc.as_ref(), mutation_result);
            }
        }
        Ok(doc)
    }

    /// Layers the batch onto the local view of `doc`.
    #[must_use]
    pub fn apply_to_local_view(&self, key: &DocumentKey, doc: Option<MaybeDocument>) -> Option<MaybeDocument> {
        let mut doc = doc;
        for mutation in self.base_mutations.iter().chain(&self.mutations) {
            if &mutation.key == key {
                doc = mutation.apply_to_local_view(doc.as_ref(), self.local_write_time);
            }
        }
        doc
    }

    /// Applies the batch to every document in `docs` it touches.
    pub fn apply_to_local_document_set(&self, docs: &mut BTreeMap<DocumentKey, Option<MaybeDocument>>) {
        for key in self.keys() {
            let base = docs.get(&key).cloned().flatten();
            let applied = self.apply_to_local_view(&key, base);
            docs.insert(key, applied);
        }
    }
}

/// The server's acknowledgement of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationBatchResult {
    /// Acknowledged batch.
    pub batch: Arc<MutationBatch>,
    /// Commit version of the whole write.
    pub commit_version: SnapshotVersion,
    /// One result per mutation.
    pub mutation_results: Vec<MutationResult>,
    /// Write-stream token to persist with the acknowledgement.
    pub stream_token: ByteString,
    /// Committed version per written key.
    pub doc_versions: BTreeMap<DocumentKey, SnapshotVersion>,
}

impl MutationBatchResult {
    /// Builds a result and derives per-document versions.
    ///
    /// # Errors
    ///
    /// Returns a contract violation unless there is exactly one result per
    /// mutation.
    pub fn new(
        batch: Arc<MutationBatch>,
        commit_version: SnapshotVersion,
        mutation_results: Vec<MutationResult>,
        stream_token: ByteString,
    ) -> CoreResult<Self> {
        if batch.mutations.len() != mutation_results.len() {
            return Err(CoreError::contract_violation(format!(
                "{} has {} mutations but {} results",
                batch.batch_id,
                batch.mutations.len(),
                mutation_results.len()
            )));
        }
        let doc_versions = batch
            .mutations
            .iter()
            .zip(&mutation_results)
            .map(|(m, r)| (m.key.clone(), r.version))
            .collect();
        Ok(Self {
            batch,
            commit_version,
            mutation_results,
            stream_token,
            doc_versions,
        })
    }
}
