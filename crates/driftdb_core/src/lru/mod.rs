//! Least-recently-used garbage collection of cached targets and documents.
//!
//! Every target and every document that lost its last reference carries a
//! listen sequence number. A collection pass picks the sequence number
//! below which a given percentile of those entries falls, removes inactive
//! targets up to it, then deletes remote documents nothing pins.

mod scheduler;

pub use scheduler::{ActiveTargetsProvider, LruScheduler, INITIAL_GC_DELAY, REGULAR_GC_DELAY};

use crate::error::{CoreError, CoreResult};
use crate::model::DocumentKey;
use crate::persistence::{ListenSequence, LogRecord, Persistence, PersistenceTransaction, TransactionMode};
use crate::types::{ListenSequenceNumber, TargetId};
use std::collections::{BTreeSet, BinaryHeap};
use std::time::Instant;
use tracing::{debug, info};

/// Cache size meaning "never collect".
pub const CACHE_SIZE_UNLIMITED: i64 = -1;

const MINIMUM_CACHE_SIZE_BYTES: i64 = 1024 * 1024;
const DEFAULT_CACHE_SIZE_BYTES: i64 = 40 * 1024 * 1024;
const DEFAULT_COLLECTION_PERCENTILE: u32 = 10;
const DEFAULT_MAX_SEQUENCE_NUMBERS_TO_COLLECT: usize = 1000;

/// Garbage collection tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LruParams {
    /// Collect only once the cache is at least this large, in bytes.
    /// [`CACHE_SIZE_UNLIMITED`] disables collection.
    pub cache_size_collection_threshold: i64,
    /// Percentage of sequence numbers to collect per pass.
    pub percentile_to_collect: u32,
    /// Upper bound on sequence numbers collected per pass.
    pub maximum_sequence_numbers_to_collect: usize,
}

impl LruParams {
    /// 40 MiB threshold, 10th percentile, at most 1000 per pass.
    pub const DEFAULT: LruParams = LruParams::new(
        DEFAULT_CACHE_SIZE_BYTES,
        DEFAULT_COLLECTION_PERCENTILE,
        DEFAULT_MAX_SEQUENCE_NUMBERS_TO_COLLECT,
    );

    /// Never collects.
    pub const DISABLED: LruParams = LruParams::new(
        CACHE_SIZE_UNLIMITED,
        0,
        0,
    );

    /// Creates parameters without validation.
    #[must_use]
    pub const fn new(
        cache_size_collection_threshold: i64,
        percentile_to_collect: u32,
        maximum_sequence_numbers_to_collect: usize,
    ) -> Self {
        Self {
            cache_size_collection_threshold,
            percentile_to_collect,
            maximum_sequence_numbers_to_collect,
        }
    }

    /// Default parameters with a custom threshold.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for thresholds below 1 MiB
    /// other than [`CACHE_SIZE_UNLIMITED`].
    pub fn with_cache_size(cache_size: i64) -> CoreResult<Self> {
        if cache_size != CACHE_SIZE_UNLIMITED && cache_size < MINIMUM_CACHE_SIZE_BYTES {
            return Err(CoreError::invalid_argument(format!(
                "cache size must be at least {MINIMUM_CACHE_SIZE_BYTES} bytes, got {cache_size}"
            )));
        }
        Ok(Self {
            cache_size_collection_threshold: cache_size,
            ..Self::DEFAULT
        })
    }

    /// False when collection is disabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.cache_size_collection_threshold != CACHE_SIZE_UNLIMITED
    }
}

impl Default for LruParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Outcome of a collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LruResults {
    /// False if the pass was skipped.
    pub did_run: bool,
    /// Sequence numbers considered.
    pub sequence_numbers_collected: usize,
    /// Targets removed.
    pub targets_removed: usize,
    /// Documents removed.
    pub documents_removed: usize,
}

impl LruResults {
    /// A skipped pass.
    pub const DID_NOT_RUN: LruResults = LruResults {
        did_run: false,
        sequence_numbers_collected: 0,
        targets_removed: 0,
        documents_removed: 0,
    };
}

/// Removes the least recently used targets and unreferenced documents.
#[derive(Debug, Clone)]
pub struct LruGarbageCollector {
    params: LruParams,
}

impl LruGarbageCollector {
    /// Creates a collector.
    #[must_use]
    pub fn new(params: LruParams) -> Self {
        Self { params }
    }

    /// Returns the parameters.
    #[must_use]
    pub fn params(&self) -> &LruParams {
        &self.params
    }

    /// Number of sequence numbers to collect for `percentile`.
    #[must_use]
    pub fn calculate_target_count(&self, txn: &mut PersistenceTransaction, percentile: u32) -> usize {
        let count = self.get_sequence_number_count(txn);
        (u128::from(percentile) * count as u128 / 100) as usize
    }

    /// Targets plus orphaned documents.
    #[must_use]
    pub fn get_sequence_number_count(&self, txn: &mut PersistenceTransaction) -> usize {
        txn.target_cache().get_target_count() + orphaned_documents(txn).len()
    }

    /// The largest of the `n` smallest sequence numbers across targets and
    /// orphaned documents, or [`ListenSequence::INVALID`] for `n == 0`.
    #[must_use]
    pub fn nth_sequence_number(&self, txn: &mut PersistenceTransaction, n: usize) -> ListenSequenceNumber {
        if n == 0 {
            return ListenSequence::INVALID;
        }
        // Max-heap holding the n smallest values seen so far.
        let mut heap = BinaryHeap::with_capacity(n + 1);
        let mut offer = |seq: ListenSequenceNumber| {
            if heap.len() < n {
                heap.push(seq);
            } else if heap.peek().is_some_and(|top| seq < *top) {
                heap.pop();
                heap.push(seq);
            }
        };
        txn.target_cache().for_each_target(|data| offer(data.sequence_number));
        for (_, seq) in orphaned_documents(txn) {
            offer(seq);
        }
        heap.peek().copied().unwrap_or(ListenSequence::INVALID)
    }

    /// Removes inactive targets with sequence numbers up to `upper_bound`.
    ///
    /// # Errors
    ///
    /// Fails in read-only transactions.
    pub fn remove_targets(
        &self,
        txn: &mut PersistenceTransaction,
        upper_bound: ListenSequenceNumber,
        active_target_ids: &BTreeSet<TargetId>,
    ) -> CoreResult<usize> {
        txn.target_cache().remove_targets(upper_bound, active_target_ids)
    }

    /// Deletes cached documents that no target, pending mutation or local
    /// view pins and whose sequence number, if any, is at most
    /// `upper_bound`.
    ///
    /// # Errors
    ///
    /// Fails in read-only transactions.
    pub fn remove_orphaned_documents(
        &self,
        txn: &mut PersistenceTransaction,
        upper_bound: ListenSequenceNumber,
    ) -> CoreResult<usize> {
        let mut keys = Vec::new();
        txn.remote_document_cache()
            .for_each_document_key(|key| keys.push(key.clone()));

        let mut removed = 0;
        for key in keys {
            if is_pinned(txn, &key, upper_bound) {
                continue;
            }
            txn.remote_document_cache().remove_entry(&key)?;
            if txn.state.sequence_markers.contains_key(&key) {
                txn.write(LogRecord::RemoveSequenceMarker(key))?;
            }
            removed += 1;
        }
        Ok(removed)
    }

    /// Total size of the remote document cache.
    #[must_use]
    pub fn get_cache_size(&self, txn: &mut PersistenceTransaction) -> u64 {
        txn.remote_document_cache().get_size()
    }

    /// Runs a collection pass if the cache exceeds the threshold.
    ///
    /// `active_target_ids` are never removed. Below the threshold, or with
    /// collection disabled, nothing is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn collect(
        &self,
        persistence: &Persistence,
        active_target_ids: &BTreeSet<TargetId>,
    ) -> CoreResult<LruResults> {
        if !self.params.is_enabled() {
            debug!("garbage collection disabled");
            return Ok(LruResults::DID_NOT_RUN);
        }
        persistence
            .run_transaction("collect garbage", TransactionMode::ReadWritePrimary, |txn| {
                let cache_size = self.get_cache_size(txn);
                let threshold = u64::try_from(self.params.cache_size_collection_threshold).unwrap_or(0);
                if cache_size < threshold {
                    debug!(cache_size, threshold, "cache below collection threshold");
                    return Ok(LruResults::DID_NOT_RUN);
                }
                self.run_garbage_collection(txn, active_target_ids)
            })
            .await
    }

    fn run_garbage_collection(
        &self,
        txn: &mut PersistenceTransaction,
        active_target_ids: &BTreeSet<TargetId>,
    ) -> CoreResult<LruResults> {
        let started = Instant::now();
        let count = self
            .calculate_target_count(txn, self.params.percentile_to_collect)
            .min(self.params.maximum_sequence_numbers_to_collect);
        let upper_bound = self.nth_sequence_number(txn, count);
        let targets_removed = self.remove_targets(txn, upper_bound, active_target_ids)?;
        let documents_removed = self.remove_orphaned_documents(txn, upper_bound)?;

        info!(
            sequence_numbers = count,
            %upper_bound,
            targets_removed,
            documents_removed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "garbage collection pass finished"
        );
        Ok(LruResults {
            did_run: true,
            sequence_numbers_collected: count,
            targets_removed,
            documents_removed,
        })
    }
}

/// Documents with a sequence marker that nothing references.
fn orphaned_documents(txn: &mut PersistenceTransaction) -> Vec<(DocumentKey, ListenSequenceNumber)> {
    let markers: Vec<(DocumentKey, ListenSequenceNumber)> = txn
        .state
        .sequence_markers
        .iter()
        .map(|(key, seq)| (key.clone(), *seq))
        .collect();
    markers
        .into_iter()
        .filter(|(key, _)| !is_referenced(txn, key))
        .collect()
}

fn is_referenced(txn: &mut PersistenceTransaction, key: &DocumentKey) -> bool {
    txn.mutation_queue().contains_key(key)
        || txn.local_view_references().contains_key(key)
        || txn.target_cache().contains_key(key)
}

fn is_pinned(txn: &mut PersistenceTransaction, key: &DocumentKey, upper_bound: ListenSequenceNumber) -> bool {
    is_referenced(txn, key)
        || txn
            .state
            .sequence_markers
            .get(key)
            .is_some_and(|seq| *seq > upper_bound)
}
