//! The queue of pending local writes.

use crate::error::{CoreError, CoreResult};
use crate::model::{DocumentKey, Mutation, MutationBatch, Query};
use crate::persistence::{LogRecord, PersistenceTransaction};
use crate::types::BatchId;
use driftdb_codec::{ByteString, Timestamp};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Lowest possible batch id, used to start range scans.
const SCAN_START: BatchId = BatchId(i64::MIN);

/// Pending mutation batches, ordered by [`BatchId`].
///
/// A reverse index from document key to batch id answers "which batches
/// touch this document" with a range scan.
#[derive(Debug)]
pub struct MutationQueue<'a> {
    txn: &'a mut PersistenceTransaction,
}

impl<'a> MutationQueue<'a> {
    pub(crate) fn new(txn: &'a mut PersistenceTransaction) -> Self {
        Self { txn }
    }

    /// True if no batches are pending.
    #[must_use]
    pub fn check_empty(&self) -> bool {
        self.txn.state.batches.is_empty()
    }

    /// Records the server acknowledgement of `batch`.
    ///
    /// # Errors
    ///
    /// Returns a contract violation unless `batch` is the oldest pending
    /// batch.
    pub fn acknowledge_batch(&mut self, batch: &MutationBatch, stream_token: ByteString) -> CoreResult<()> {
        let first = self.txn.state.batches.min_key().copied();
        if first != Some(batch.batch_id) {
            return Err(CoreError::contract_violation(format!(
                "acknowledged {} is not the first pending batch ({})",
                batch.batch_id,
                first.map_or_else(|| "none".to_string(), |id| id.to_string())
            )));
        }
        self.set_last_stream_token(stream_token)
    }

    /// The write-stream token stored with the last acknowledgement.
    #[must_use]
    pub fn get_last_stream_token(&self) -> ByteString {
        self.txn.state.last_stream_token.clone()
    }

    /// Stores the write-stream token.
    ///
    /// # Errors
    ///
    /// Fails in read-only transactions.
    pub fn set_last_stream_token(&mut self, token: ByteString) -> CoreResult<()> {
        self.txn.write(LogRecord::SetLastStreamToken(token))
    }

    /// Enqueues a batch under the next batch id.
    ///
    /// # Errors
    ///
    /// Returns a contract violation for an empty batch or in a read-only
    /// transaction.
    pub fn add_mutation_batch(
        &mut self,
        local_write_time: Timestamp,
        base_mutations: Vec<Mutation>,
        mutations: Vec<Mutation>,
    ) -> CoreResult<Arc<MutationBatch>> {
        if mutations.is_empty() {
            return Err(CoreError::contract_violation("mutation batch is empty"));
        }
        self.txn.ensure_writable()?;
        let batch_id = self.txn.state.next_batch_id;
        let batch = MutationBatch::new(batch_id, local_write_time, base_mutations, mutations);
        self.txn.write(LogRecord::PutMutationBatch(batch))?;
        self.lookup_mutation_batch(batch_id)
            .ok_or_else(|| CoreError::contract_violation(format!("{batch_id} vanished after insert")))
    }

    /// Looks up a pending batch.
    #[must_use]
    pub fn lookup_mutation_batch(&self, batch_id: BatchId) -> Option<Arc<MutationBatch>> {
        self.txn.state.batches.get(&batch_id).cloned()
    }

    /// The first pending batch with an id greater than `batch_id`.
    #[must_use]
    pub fn get_next_mutation_batch_after_batch_id(&self, batch_id: BatchId) -> Option<Arc<MutationBatch>> {
        self.txn
            .state
            .batches
            .iter_from(&batch_id.next())
            .next()
            .map(|(_, batch)| Arc::clone(batch))
    }

    /// Id of the newest pending batch, or [`BatchId::UNKNOWN`].
    #[must_use]
    pub fn get_highest_unacknowledged_batch_id(&self) -> BatchId {
        self.txn
            .state
            .batches
            .max_key()
            .copied()
            .unwrap_or(BatchId::UNKNOWN)
    }

    /// All pending batches in id order.
    #[must_use]
    pub fn get_all_mutation_batches(&self) -> Vec<Arc<MutationBatch>> {
        self.txn.state.batches.values().cloned().collect()
    }

    /// Pending batches writing `key`, in id order.
    #[must_use]
    pub fn get_all_mutation_batches_affecting_document_key(&self, key: &DocumentKey) -> Vec<Arc<MutationBatch>> {
        self.batches_for_ids(self.batch_ids_for_key(key))
    }

    /// Pending batches writing any of `keys`, in id order without
    /// duplicates.
    #[must_use]
    pub fn get_all_mutation_batches_affecting_document_keys<'k>(
        &self,
        keys: impl IntoIterator<Item = &'k DocumentKey>,
    ) -> Vec<Arc<MutationBatch>> {
        let ids = keys
            .into_iter()
            .flat_map(|key| self.batch_ids_for_key(key))
            .collect();
        self.batches_for_ids(ids)
    }

    /// Pending batches writing any document the query could match, in id
    /// order without duplicates.
    ///
    /// Collection queries scan the immediate children of the query path;
    /// collection group queries scan every key under it.
    #[must_use]
    pub fn get_all_mutation_batches_affecting_query(&self, query: &Query) -> Vec<Arc<MutationBatch>> {
        let prefix = query.path();
        let group = query.collection_group_id();
        let child_len = prefix.len() + 1;
        let start = (DocumentKey::seek(prefix), SCAN_START);

        let ids = self
            .txn
            .state
            .batches_by_document
            .iter_from(&start)
            .take_while(|(key, _)| prefix.is_prefix_of(key.path()))
            .filter(|(key, _)| match group {
                Some(group) => key.has_collection_id(group),
                None if query.is_document_query() => key.path() == prefix,
                None => key.path().len() == child_len,
            })
            .map(|(_, id)| *id)
            .collect();
        self.batches_for_ids(ids)
    }

    /// Removes a batch and its index entries.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if the batch is not pending.
    pub fn remove_mutation_batch(&mut self, batch: &MutationBatch) -> CoreResult<()> {
        if !self.txn.state.batches.contains_key(&batch.batch_id) {
            return Err(CoreError::contract_violation(format!(
                "cannot remove unknown {}",
                batch.batch_id
            )));
        }
        self.txn.write(LogRecord::RemoveMutationBatch(batch.batch_id))?;
        self.txn.touch_documents(batch.keys().into_iter().collect())
    }

    /// True if a pending batch writes `key`.
    #[must_use]
    pub fn contains_key(&self, key: &DocumentKey) -> bool {
        !self.batch_ids_for_key(key).is_empty()
    }

    fn batch_ids_for_key(&self, key: &DocumentKey) -> BTreeSet<BatchId> {
        self.txn
            .state
            .batches_by_document
            .iter_from(&(key.clone(), SCAN_START))
            .take_while(|(k, _)| k == key)
            .map(|(_, id)| *id)
            .collect()
    }

    fn batches_for_ids(&self, ids: BTreeSet<BatchId>) -> Vec<Arc<MutationBatch>> {
        ids.into_iter()
            .filter_map(|id| self.lookup_mutation_batch(id))
            .collect()
    }
}
