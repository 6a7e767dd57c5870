//! The local store facade.

use crate::error::{CoreError, CoreResult};
use crate::local_documents_view::LocalDocumentsView;
use crate::lru::{ActiveTargetsProvider, LruGarbageCollector, LruResults, LruScheduler};
use crate::model::{
    Document, DocumentKey, MaybeDocument, Mutation, MutationBatch, MutationBatchResult, Precondition,
    Query, Target, TargetData, TargetPurpose,
};
use crate::persistence::{Persistence, PersistenceTransaction, TransactionMode};
use crate::query_engine::{IndexFreeQueryEngine, QueryEngine};
use crate::remote_document_cache::RemoteDocumentChangeBuffer;
use crate::remote_event::{RemoteEvent, TargetChange};
use crate::types::{BatchId, SnapshotVersion, TargetId};
use driftdb_codec::{ByteString, Timestamp};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Local view of documents affected by an operation. `None` means the
/// document is unknown locally.
pub type DocumentChanges = BTreeMap<DocumentKey, Option<MaybeDocument>>;

/// Result of [`LocalStore::write_locally`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalWriteResult {
    /// Id assigned to the new batch.
    pub batch_id: BatchId,
    /// Local view of every written document.
    pub changes: DocumentChanges,
}

/// Result of [`LocalStore::execute_query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    /// Matching documents in the local view.
    pub documents: BTreeMap<DocumentKey, Document>,
    /// Keys the server last reported for the query's target.
    pub remote_keys: BTreeSet<DocumentKey>,
}

/// Documents a live view started or stopped showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalViewChanges {
    /// Target backing the view.
    pub target_id: TargetId,
    /// The view snapshot came from cache.
    pub from_cache: bool,
    /// Keys added to the view.
    pub added_keys: BTreeSet<DocumentKey>,
    /// Keys removed from the view.
    pub removed_keys: BTreeSet<DocumentKey>,
}

impl LocalViewChanges {
    /// Creates a change set for `target_id`.
    #[must_use]
    pub fn new(
        target_id: TargetId,
        from_cache: bool,
        added_keys: BTreeSet<DocumentKey>,
        removed_keys: BTreeSet<DocumentKey>,
    ) -> Self {
        Self {
            target_id,
            from_cache,
            added_keys,
            removed_keys,
        }
    }
}

/// The local store.
///
/// `LocalStore` is the entry point the sync layer talks to. It:
/// - queues local writes and replays server acknowledgements
/// - applies watch snapshots to the document and target caches
/// - tracks active targets and pins documents shown in live views
/// - answers queries from the local view
///
/// Every operation runs as a single transaction on the shared
/// [`Persistence`], so a failed call leaves nothing behind.
///
/// # Example
///
/// ```rust,no_run
/// use driftdb_core::{DocumentKey, LocalStore, Mutation, ObjectValue, Persistence, StoreConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> driftdb_core::CoreResult<()> {
/// let persistence = Arc::new(Persistence::in_memory(StoreConfig::default()));
/// let store = LocalStore::new(persistence);
/// let key = DocumentKey::from_string("rooms/a")?;
/// let result = store.write_locally(vec![Mutation::set(key, ObjectValue::empty())]).await?;
/// println!("queued {}", result.batch_id);
/// # Ok(())
/// # }
/// ```
pub struct LocalStore {
    persistence: Arc<Persistence>,
    query_engine: Box<dyn QueryEngine>,
    /// Targets with active listeners.
    target_data_by_target: Mutex<BTreeMap<TargetId, TargetData>>,
}

impl LocalStore {
    /// Creates a store using the [`IndexFreeQueryEngine`].
    #[must_use]
    pub fn new(persistence: Arc<Persistence>) -> Self {
        Self::with_query_engine(persistence, Box::new(IndexFreeQueryEngine))
    }

    /// Creates a store with a custom query engine.
    #[must_use]
    pub fn with_query_engine(persistence: Arc<Persistence>, query_engine: Box<dyn QueryEngine>) -> Self {
        Self {
            persistence,
            query_engine,
            target_data_by_target: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the persistence handle.
    #[must_use]
    pub fn persistence(&self) -> &Arc<Persistence> {
        &self.persistence
    }

    /// Enqueues `mutations` as one batch and returns the resulting local
    /// view of the written documents.
    ///
    /// Transforms whose result depends on the current value (increments)
    /// get a base mutation that pins the value they were computed from.
    ///
    /// # Errors
    ///
    /// Fails for an empty batch or if the transaction fails.
    pub async fn write_locally(&self, mutations: Vec<Mutation>) -> CoreResult<LocalWriteResult> {
        let local_write_time = Timestamp::now();
        let keys: BTreeSet<DocumentKey> = mutations.iter().map(|m| m.key.clone()).collect();

        self.persistence
            .run_transaction("Locally write mutations", TransactionMode::ReadWrite, move |txn| {
                let mut existing = LocalDocumentsView::new(txn).get_documents(&keys);
                let base_mutations: Vec<Mutation> = mutations
                    .iter()
                    .filter_map(|mutation| {
                        let current = existing.get(&mutation.key).and_then(Option::as_ref);
                        let base = mutation.extract_transform_base_value(current)?;
                        let mask = base.field_mask();
                        Some(
                            Mutation::patch(mutation.key.clone(), base, mask)
                                .with_precondition(Precondition::Exists(true)),
                        )
                    })
                    .collect();

                let batch = txn
                    .mutation_queue()
                    .add_mutation_batch(local_write_time, base_mutations, mutations)?;
                batch.apply_to_local_document_set(&mut existing);
                debug!(batch_id = %batch.batch_id, documents = existing.len(), "wrote batch locally");
                Ok(LocalWriteResult {
                    batch_id: batch.batch_id,
                    changes: existing,
                })
            })
            .await
    }

    /// Applies an acknowledged batch to the remote document cache and
    /// removes it from the queue.
    ///
    /// # Errors
    ///
    /// Returns a contract violation unless the batch is the first pending
    /// one.
    pub async fn acknowledge_batch(&self, batch_result: MutationBatchResult) -> CoreResult<DocumentChanges> {
        let track_removals = self.persistence.config().track_removals;
        self.persistence
            .run_transaction("Acknowledge batch", TransactionMode::ReadWritePrimary, move |txn| {
                let batch = Arc::clone(&batch_result.batch);
                txn.mutation_queue()
                    .acknowledge_batch(&batch, batch_result.stream_token.clone())?;

                let mut buffer = RemoteDocumentChangeBuffer::new(track_removals);
                apply_write_to_remote_documents(txn, &batch_result, &mut buffer)?;
                buffer.apply(txn)?;

                Ok(LocalDocumentsView::new(txn).get_documents(&batch.keys()))
            })
            .await
    }

    /// Drops a batch the server rejected.
    ///
    /// # Errors
    ///
    /// Returns a contract violation for an unknown batch.
    pub async fn reject_batch(&self, batch_id: BatchId) -> CoreResult<DocumentChanges> {
        self.persistence
            .run_transaction("Reject batch", TransactionMode::ReadWritePrimary, move |txn| {
                let batch = txn
                    .mutation_queue()
                    .lookup_mutation_batch(batch_id)
                    .ok_or_else(|| CoreError::contract_violation(format!("cannot reject unknown {batch_id}")))?;
                txn.mutation_queue().remove_mutation_batch(&batch)?;
                Ok(LocalDocumentsView::new(txn).get_documents(&batch.keys()))
            })
            .await
    }

    /// The first pending batch after `after`, or the first one overall.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn next_mutation_batch(&self, after: Option<BatchId>) -> CoreResult<Option<Arc<MutationBatch>>> {
        let after = after.unwrap_or(BatchId::UNKNOWN);
        self.persistence
            .run_transaction("Get next mutation batch", TransactionMode::ReadOnly, move |txn| {
                Ok(txn.mutation_queue().get_next_mutation_batch_after_batch_id(after))
            })
            .await
    }

    /// Looks up a pending batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn lookup_mutation_batch(&self, batch_id: BatchId) -> CoreResult<Option<Arc<MutationBatch>>> {
        self.persistence
            .run_transaction("Lookup mutation batch", TransactionMode::ReadOnly, move |txn| {
                Ok(txn.mutation_queue().lookup_mutation_batch(batch_id))
            })
            .await
    }

    /// Highest pending batch id, or [`BatchId::UNKNOWN`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn get_highest_unacknowledged_batch_id(&self) -> CoreResult<BatchId> {
        self.persistence
            .run_transaction("Get highest unacknowledged batch id", TransactionMode::ReadOnly, |txn| {
                Ok(txn.mutation_queue().get_highest_unacknowledged_batch_id())
            })
            .await
    }

    /// Last write-stream token.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn get_last_stream_token(&self) -> CoreResult<ByteString> {
        self.persistence
            .run_transaction("Get last stream token", TransactionMode::ReadOnly, |txn| {
                Ok(txn.mutation_queue().get_last_stream_token())
            })
            .await
    }

    /// Stores the write-stream token.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn set_last_stream_token(&self, token: ByteString) -> CoreResult<()> {
        self.persistence
            .run_transaction("Set last stream token", TransactionMode::ReadWritePrimary, move |txn| {
                txn.mutation_queue().set_last_stream_token(token)
            })
            .await
    }

    /// Applies a watch snapshot.
    ///
    /// Target result sets and resume tokens are written in the same commit
    /// as the documents they describe. Document updates older than the
    /// cached version are ignored.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if the snapshot version is older than
    /// the last one applied.
    pub async fn apply_remote_event(&self, event: RemoteEvent) -> CoreResult<DocumentChanges> {
        let config = self.persistence.config();
        let track_removals = config.track_removals;
        let resume_token_max_age = config.resume_token_max_age;
        let active_targets = &self.target_data_by_target;

        let (changes, updated_targets) = self
            .persistence
            .run_transaction("Apply remote event", TransactionMode::ReadWritePrimary, move |txn| {
                let remote_version = event.snapshot_version;
                let sequence_number = txn.current_sequence_number();
                let active = active_targets.lock().clone();
                let mut updated: BTreeMap<TargetId, TargetData> = BTreeMap::new();

                for (target_id, change) in &event.target_changes {
                    let Some(old) = active.get(target_id) else {
                        continue;
                    };
                    let removed: Vec<DocumentKey> = change.removed_documents.iter().cloned().collect();
                    let added: Vec<DocumentKey> = change.added_documents.iter().cloned().collect();
                    txn.target_cache().remove_matching_keys(&removed, *target_id)?;
                    txn.target_cache().add_matching_keys(&added, *target_id)?;

                    if change.resume_token.is_empty() || remote_version < old.snapshot_version {
                        continue;
                    }
                    let new = old
                        .with_resume_token(change.resume_token.clone(), remote_version)
                        .with_sequence_number(sequence_number);
                    if should_persist_target_data(old, &new, change, resume_token_max_age) {
                        txn.target_cache().update_target_data(new.clone())?;
                    }
                    updated.insert(*target_id, new);
                }

                for target_id in &event.target_mismatches {
                    let Some(old) = updated.get(target_id).or_else(|| active.get(target_id)) else {
                        continue;
                    };
                    let reset = old
                        .with_resume_token(ByteString::EMPTY, SnapshotVersion::MIN)
                        .with_last_limbo_free_snapshot_version(SnapshotVersion::MIN)
                        .with_sequence_number(sequence_number);
                    txn.target_cache().update_target_data(reset.clone())?;
                    updated.insert(*target_id, reset);
                }

                let mut buffer = RemoteDocumentChangeBuffer::new(track_removals);
                let existing = buffer.get_entries(txn, event.document_updates.keys());
                let mut changed = DocumentChanges::new();
                for (key, doc) in event.document_updates {
                    let current = existing.get(&key).cloned().flatten();
                    if doc.is_no_document() && doc.version() == SnapshotVersion::MIN {
                        buffer.remove_entry(key.clone(), remote_version)?;
                        changed.insert(key, Some(doc));
                    } else if is_newer(&doc, current.as_ref()) {
                        buffer.add_entry(doc.clone(), remote_version)?;
                        changed.insert(key, Some(doc));
                    } else {
                        debug!(
                            %key,
                            cached = ?current.as_ref().map(MaybeDocument::version),
                            update = %doc.version(),
                            "ignoring outdated watch update"
                        );
                    }
                }

                if !event.resolved_limbo_documents.is_empty() {
                    txn.touch_documents(event.resolved_limbo_documents.into_iter().collect())?;
                }

                if remote_version != SnapshotVersion::MIN {
                    let last = txn.target_cache().get_last_remote_snapshot_version();
                    if remote_version < last {
                        return Err(CoreError::contract_violation(format!(
                            "watch stream reverted to snapshot {remote_version}, last applied {last}"
                        )));
                    }
                    let highest = txn.target_cache().get_highest_sequence_number();
                    txn.target_cache().set_targets_metadata(highest, remote_version)?;
                }

                buffer.apply(txn)?;
                let changes = LocalDocumentsView::new(txn).get_local_view_of_documents(changed);
                Ok((changes, updated))
            })
            .await?;

        merge_active_targets(&mut self.target_data_by_target.lock(), updated_targets);
        Ok(changes)
    }

    /// Pins documents shown in live views and unpins those removed.
    ///
    /// Views that are in sync with the server advance their target's last
    /// limbo-free snapshot version.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn notify_local_view_changes(&self, view_changes: Vec<LocalViewChanges>) -> CoreResult<()> {
        let pins = view_changes.clone();
        self.persistence
            .run_transaction("Notify local view changes", TransactionMode::ReadWrite, move |txn| {
                for change in &pins {
                    let references = txn.local_view_references_mut()?;
                    references.add_references(&change.added_keys, change.target_id);
                    references.remove_references(&change.removed_keys, change.target_id);
                    txn.touch_documents(change.removed_keys.iter().cloned().collect())?;
                }
                Ok(())
            })
            .await?;

        let mut targets = self.target_data_by_target.lock();
        for change in view_changes.iter().filter(|c| !c.from_cache) {
            if let Some(data) = targets.get_mut(&change.target_id) {
                *data = data.with_last_limbo_free_snapshot_version(data.snapshot_version);
            }
        }
        Ok(())
    }

    /// Returns the cached target data for `target`, creating it with a new
    /// id if needed, and marks the target active.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn allocate_target(&self, target: Target) -> CoreResult<TargetData> {
        let data = self
            .persistence
            .run_transaction("Allocate target", TransactionMode::ReadWrite, move |txn| {
                if let Some(cached) = txn.target_cache().get_target_data(&target) {
                    return Ok(cached);
                }
                let target_id = txn.target_cache().allocate_target_id()?;
                let data = TargetData::new(target, target_id, TargetPurpose::Listen, txn.current_sequence_number());
                txn.target_cache().add_target_data(data.clone())?;
                Ok(data)
            })
            .await?;

        self.target_data_by_target
            .lock()
            .entry(data.target_id)
            .or_insert_with(|| data.clone());
        Ok(data)
    }

    /// Looks up target data, preferring the active copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn get_target_data(&self, target: &Target) -> CoreResult<Option<TargetData>> {
        if let Some(active) = self.active_target_data(target) {
            return Ok(Some(active));
        }
        let target = target.clone();
        self.persistence
            .run_transaction("Get target data", TransactionMode::ReadOnly, move |txn| {
                Ok(txn.target_cache().get_target_data(&target))
            })
            .await
    }

    /// Stops listening to a target.
    ///
    /// The target stays cached for garbage collection with a fresh
    /// sequence number unless `keep_persisted_target_data` is set, in which
    /// case the persisted copy is left untouched.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if the target is not active.
    pub async fn release_target(&self, target_id: TargetId, keep_persisted_target_data: bool) -> CoreResult<()> {
        let data = self
            .target_data_by_target
            .lock()
            .get(&target_id)
            .cloned()
            .ok_or_else(|| CoreError::contract_violation(format!("cannot release inactive {target_id}")))?;
        let mode = if keep_persisted_target_data {
            TransactionMode::ReadWrite
        } else {
            TransactionMode::ReadWritePrimary
        };

        self.persistence
            .run_transaction("Release target", mode, move |txn| {
                let unpinned = txn.local_view_references_mut()?.remove_references_for_id(target_id);
                txn.touch_documents(unpinned)?;
                if !keep_persisted_target_data {
                    let bumped = data.with_sequence_number(txn.current_sequence_number());
                    txn.target_cache().update_target_data(bumped)?;
                }
                Ok(())
            })
            .await?;

        self.target_data_by_target.lock().remove(&target_id);
        debug!(%target_id, "released target");
        Ok(())
    }

    /// Keys the server reported for a target.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn get_remote_document_keys(&self, target_id: TargetId) -> CoreResult<BTreeSet<DocumentKey>> {
        self.persistence
            .run_transaction("Get remote document keys", TransactionMode::ReadOnly, move |txn| {
                Ok(txn.target_cache().get_matching_keys_for_target_id(target_id))
            })
            .await
    }

    /// Local view of one document.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn read_document(&self, key: &DocumentKey) -> CoreResult<Option<MaybeDocument>> {
        let key = key.clone();
        self.persistence
            .run_transaction("Read document", TransactionMode::ReadOnly, move |txn| {
                Ok(LocalDocumentsView::new(txn).get_document(&key))
            })
            .await
    }

    /// Runs `query` against the local view.
    ///
    /// With `use_previous_results`, the target's results at its last
    /// limbo-free snapshot seed the answer and only newer documents are
    /// scanned.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn execute_query(&self, query: &Query, use_previous_results: bool) -> CoreResult<QueryResult> {
        let target = query.to_target();
        let active = self.active_target_data(&target);
        let query = query.clone();
        let engine: &dyn QueryEngine = self.query_engine.as_ref();

        self.persistence
            .run_transaction("Execute query", TransactionMode::ReadOnly, move |txn| {
                let target_data = match active {
                    Some(data) => Some(data),
                    None => txn.target_cache().get_target_data(&target),
                };
                let (last_limbo_free, remote_keys) = match &target_data {
                    Some(data) => (
                        data.last_limbo_free_snapshot_version,
                        txn.target_cache().get_matching_keys_for_target_id(data.target_id),
                    ),
                    None => (SnapshotVersion::MIN, BTreeSet::new()),
                };
                let documents = if use_previous_results {
                    engine.get_documents_matching_query(txn, &query, last_limbo_free, &remote_keys)
                } else {
                    engine.get_documents_matching_query(txn, &query, SnapshotVersion::MIN, &BTreeSet::new())
                };
                Ok(QueryResult { documents, remote_keys })
            })
            .await
    }

    /// Current session token; empty if never set.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn get_session_token(&self) -> CoreResult<ByteString> {
        self.persistence
            .run_transaction("Get session token", TransactionMode::ReadOnly, |txn| {
                Ok(txn.globals_cache().get_session_token())
            })
            .await
    }

    /// Replaces the session token.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn set_session_token(&self, token: ByteString) -> CoreResult<()> {
        self.persistence
            .run_transaction("Set session token", TransactionMode::ReadWrite, move |txn| {
                txn.globals_cache().set_session_token(token)
            })
            .await
    }

    /// Version of the last applied global snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn get_last_remote_snapshot_version(&self) -> CoreResult<SnapshotVersion> {
        self.persistence
            .run_transaction("Get last remote snapshot version", TransactionMode::ReadOnly, |txn| {
                Ok(txn.target_cache().get_last_remote_snapshot_version())
            })
            .await
    }

    /// Runs one garbage collection pass, sparing active targets.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn collect_garbage(&self, gc: &LruGarbageCollector) -> CoreResult<LruResults> {
        let active = self.active_target_ids();
        let results = gc.collect(&self.persistence, &active).await?;
        if results.did_run {
            info!(
                targets_removed = results.targets_removed,
                documents_removed = results.documents_removed,
                "collected garbage"
            );
        }
        Ok(results)
    }

    /// Starts `scheduler` against this store.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if the scheduler is already running.
    pub fn start_lru_scheduler(self: &Arc<Self>, scheduler: &LruScheduler) -> CoreResult<()> {
        let provider: Arc<dyn ActiveTargetsProvider> = Arc::clone(self) as Arc<dyn ActiveTargetsProvider>;
        scheduler.start(Arc::clone(&self.persistence), provider)
    }

    /// Shuts down the underlying persistence.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails.
    pub async fn shutdown(&self) -> CoreResult<()> {
        self.persistence.shutdown().await
    }

    fn active_target_data(&self, target: &Target) -> Option<TargetData> {
        self.target_data_by_target
            .lock()
            .values()
            .find(|data| &data.target == target)
            .cloned()
    }
}

impl ActiveTargetsProvider for LocalStore {
    fn active_target_ids(&self) -> BTreeSet<TargetId> {
        self.target_data_by_target.lock().keys().copied().collect()
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("persistence", &self.persistence)
            .field("active_targets", &self.target_data_by_target.lock().len())
            .finish_non_exhaustive()
    }
}

fn apply_write_to_remote_documents(
    txn: &mut PersistenceTransaction,
    result: &MutationBatchResult,
    buffer: &mut RemoteDocumentChangeBuffer,
) -> CoreResult<()> {
    let batch = &result.batch;
    for key in batch.keys() {
        let remote = buffer.get_entry(txn, &key);
        let outdated = match (&remote, result.doc_versions.get(&key)) {
            (None, _) => true,
            (Some(doc), Some(ack_version)) => doc.version() < *ack_version,
            (Some(_), None) => false,
        };
        if !outdated {
            continue;
        }
        if let Some(doc) = batch.apply_to_remote_document(&key, remote, result)? {
            buffer.add_entry(doc, result.commit_version)?;
        }
    }
    txn.mutation_queue().remove_mutation_batch(batch)
}

/// Folds target updates from a committed transaction into the active
/// targets. Updates are stamped with their transaction's sequence number, so
/// one that lost the race to a later commit is dropped. Released targets
/// stay released.
fn merge_active_targets(targets: &mut BTreeMap<TargetId, TargetData>, updated: BTreeMap<TargetId, TargetData>) {
    for (target_id, data) in updated {
        match targets.get_mut(&target_id) {
            Some(slot) if slot.sequence_number <= data.sequence_number => *slot = data,
            Some(slot) => debug!(
                %target_id,
                active = %slot.sequence_number,
                update = %data.sequence_number,
                "dropping stale target update"
            ),
            None => {}
        }
    }
}

/// Watch updates replace the cached document when newer, or when equally
/// new and the cached copy still reflects a local write.
fn is_newer(update: &MaybeDocument, cached: Option<&MaybeDocument>) -> bool {
    match cached {
        None => true,
        Some(cached) => {
            update.version() > cached.version()
                || (update.version() == cached.version() && cached.has_pending_writes())
        }
    }
}

fn should_persist_target_data(old: &TargetData, new: &TargetData, change: &TargetChange, max_age: Duration) -> bool {
    if old.resume_token.is_empty() {
        return true;
    }
    let elapsed = new.snapshot_version.to_micros() - old.snapshot_version.to_micros();
    let max_age = i64::try_from(max_age.as_micros()).unwrap_or(i64::MAX);
    if elapsed >= max_age {
        return true;
    }
    change.document_count() > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::lru::LruParams;
    use crate::model::{FieldMask, FieldPath, FieldTransform, MutationResult, ObjectValue, TransformOperation};
    use driftdb_codec::{ResourcePath, Value};

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    fn data(n: i64) -> ObjectValue {
        ObjectValue::from_entries([("n", Value::Integer(n))])
    }

    fn remote_doc(path: &str, n: i64, version: i64) -> MaybeDocument {
        MaybeDocument::Document(Document::new(key(path), SnapshotVersion::from_micros(version), data(n)))
    }

    fn field_n(doc: &Option<MaybeDocument>) -> Option<Value> {
        doc.as_ref()
            .and_then(MaybeDocument::as_document)
            .and_then(|d| d.data.field(&FieldPath::from_dotted("n")).cloned())
    }

    fn token(bytes: &[u8]) -> ByteString {
        ByteString::copy_from_slice(bytes)
    }

    fn store() -> LocalStore {
        LocalStore::new(Arc::new(Persistence::in_memory(StoreConfig::default())))
    }

    fn rooms() -> Query {
        Query::at_path(ResourcePath::from_string("rooms"))
    }

    #[tokio::test]
    async fn write_then_acknowledge() {
        let store = store();
        let written = store
            .write_locally(vec![Mutation::set(key("rooms/a"), data(1))])
            .await
            .unwrap();
        assert_eq!(field_n(&written.changes[&key("rooms/a")]), Some(Value::Integer(1)));
        assert_eq!(store.get_highest_unacknowledged_batch_id().await.unwrap(), written.batch_id);

        let batch = store.lookup_mutation_batch(written.batch_id).await.unwrap().unwrap();
        let result = MutationBatchResult::new(
            batch,
            SnapshotVersion::from_micros(7),
            vec![MutationResult::new(SnapshotVersion::from_micros(7))],
            token(b"stream"),
        )
        .unwrap();
        let changes = store.acknowledge_batch(result).await.unwrap();
        let doc = changes[&key("rooms/a")].as_ref().unwrap();
        assert_eq!(doc.version(), SnapshotVersion::from_micros(7));
        assert!(doc.has_pending_writes());

        assert_eq!(store.get_last_stream_token().await.unwrap(), token(b"stream"));
        assert_eq!(store.get_highest_unacknowledged_batch_id().await.unwrap(), BatchId::UNKNOWN);
        assert!(store.next_mutation_batch(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acknowledging_out_of_order_fails() {
        let store = store();
        store.write_locally(vec![Mutation::set(key("rooms/a"), data(1))]).await.unwrap();
        let second = store.write_locally(vec![Mutation::set(key("rooms/b"), data(2))]).await.unwrap();
        let batch = store.lookup_mutation_batch(second.batch_id).await.unwrap().unwrap();
        let result = MutationBatchResult::new(
            batch,
            SnapshotVersion::from_micros(7),
            vec![MutationResult::new(SnapshotVersion::from_micros(7))],
            ByteString::EMPTY,
        )
        .unwrap();
        assert!(matches!(
            store.acknowledge_batch(result).await,
            Err(CoreError::ContractViolation { .. })
        ));
    }

    #[tokio::test]
    async fn reject_restores_remote_view() {
        let store = store();
        let target = store.allocate_target(rooms().to_target()).await.unwrap();
        store
            .apply_remote_event(
                RemoteEvent::new(SnapshotVersion::from_micros(5))
                    .with_target_change(
                        target.target_id,
                        TargetChange::new(token(b"t1"), true).with_added([key("rooms/a")]),
                    )
                    .with_document(remote_doc("rooms/a", 1, 5)),
            )
            .await
            .unwrap();

        let written = store.write_locally(vec![Mutation::delete(key("rooms/a"))]).await.unwrap();
        assert!(written.changes[&key("rooms/a")].as_ref().unwrap().is_no_document());

        let changes = store.reject_batch(written.batch_id).await.unwrap();
        assert_eq!(field_n(&changes[&key("rooms/a")]), Some(Value::Integer(1)));
        assert!(store.reject_batch(written.batch_id).await.is_err());
    }

    #[tokio::test]
    async fn increments_record_their_base_value() {
        let store = store();
        let target = store.allocate_target(rooms().to_target()).await.unwrap();
        store
            .apply_remote_event(
                RemoteEvent::new(SnapshotVersion::from_micros(5))
                    .with_target_change(target.target_id, TargetChange::new(token(b"t"), true))
                    .with_document(remote_doc("rooms/a", 10, 5)),
            )
            .await
            .unwrap();

        let increment = Mutation::patch(key("rooms/a"), ObjectValue::empty(), FieldMask::new([])).with_transforms(vec![
            FieldTransform::new(FieldPath::from_dotted("n"), TransformOperation::Increment(Value::Integer(1))),
        ]);
        let written = store.write_locally(vec![increment]).await.unwrap();
        assert_eq!(field_n(&written.changes[&key("rooms/a")]), Some(Value::Integer(11)));

        let batch = store.lookup_mutation_batch(written.batch_id).await.unwrap().unwrap();
        assert_eq!(batch.base_mutations.len(), 1);
        assert_eq!(batch.base_mutations[0].precondition, Precondition::Exists(true));
    }

    #[tokio::test]
    async fn remote_event_updates_targets_and_documents() {
        let store = store();
        let target = store.allocate_target(rooms().to_target()).await.unwrap();
        let id = target.target_id;

        store
            .apply_remote_event(
                RemoteEvent::new(SnapshotVersion::from_micros(10))
                    .with_target_change(
                        id,
                        TargetChange::new(token(b"resume"), true).with_added([key("rooms/a"), key("rooms/b")]),
                    )
                    .with_document(remote_doc("rooms/a", 1, 10))
                    .with_document(remote_doc("rooms/b", 2, 10)),
            )
            .await
            .unwrap();

        assert_eq!(
            store.get_remote_document_keys(id).await.unwrap(),
            BTreeSet::from([key("rooms/a"), key("rooms/b")])
        );
        assert_eq!(store.get_last_remote_snapshot_version().await.unwrap(), SnapshotVersion::from_micros(10));

        // The persisted copy carries the token written with the documents.
        let persisted = store
            .persistence()
            .run_transaction("read target", TransactionMode::ReadOnly, move |txn| {
                Ok(txn.target_cache().get_target_data_for_id(id))
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.resume_token, token(b"resume"));
        assert_eq!(persisted.snapshot_version, SnapshotVersion::from_micros(10));

        // An older update is ignored; a tombstone at MIN removes the entry.
        let changes = store
            .apply_remote_event(
                RemoteEvent::new(SnapshotVersion::from_micros(12))
                    .with_target_change(id, TargetChange::new(ByteString::EMPTY, true).with_removed([key("rooms/b")]))
                    .with_document(remote_doc("rooms/a", 99, 3))
                    .with_document(MaybeDocument::no_document(key("rooms/b"), SnapshotVersion::MIN)),
            )
            .await
            .unwrap();
        assert!(!changes.contains_key(&key("rooms/a")));
        assert_eq!(field_n(&store.read_document(&key("rooms/a")).await.unwrap()), Some(Value::Integer(1)));
        assert!(store
            .read_document(&key("rooms/b"))
            .await
            .unwrap()
            .map_or(true, |doc| !doc.is_document()));
    }

    #[tokio::test]
    async fn snapshot_version_never_moves_backward() {
        let store = store();
        store
            .apply_remote_event(RemoteEvent::new(SnapshotVersion::from_micros(10)))
            .await
            .unwrap();
        let err = store
            .apply_remote_event(RemoteEvent::new(SnapshotVersion::from_micros(9)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ContractViolation { .. }));
        assert_eq!(store.get_last_remote_snapshot_version().await.unwrap(), SnapshotVersion::from_micros(10));
    }

    #[tokio::test]
    async fn mismatch_resets_resume_token() {
        let store = store();
        let id = store.allocate_target(rooms().to_target()).await.unwrap().target_id;
        store
            .apply_remote_event(
                RemoteEvent::new(SnapshotVersion::from_micros(10))
                    .with_target_change(id, TargetChange::new(token(b"resume"), true)),
            )
            .await
            .unwrap();
        store
            .apply_remote_event(RemoteEvent::new(SnapshotVersion::from_micros(11)).with_target_mismatch(id))
            .await
            .unwrap();
        let data = store.get_target_data(&rooms().to_target()).await.unwrap().unwrap();
        assert!(data.resume_token.is_empty());
        assert_eq!(data.snapshot_version, SnapshotVersion::MIN);
    }

    #[tokio::test]
    async fn concurrent_remote_events_keep_the_newest_target_state() {
        let store = store();
        let id = store.allocate_target(rooms().to_target()).await.unwrap().target_id;

        let (newer, older) = tokio::join!(
            store.apply_remote_event(
                RemoteEvent::new(SnapshotVersion::from_micros(20))
                    .with_target_change(id, TargetChange::new(token(b"twenty"), true)),
            ),
            store.apply_remote_event(
                RemoteEvent::new(SnapshotVersion::from_micros(10))
                    .with_target_change(id, TargetChange::new(token(b"ten"), true)),
            ),
        );
        newer.unwrap();
        assert!(matches!(older, Err(CoreError::ContractViolation { .. })));

        let active = store.get_target_data(&rooms().to_target()).await.unwrap().unwrap();
        assert_eq!(active.resume_token, token(b"twenty"));
        assert_eq!(active.snapshot_version, SnapshotVersion::from_micros(20));

        let persisted = LocalStore::new(Arc::clone(store.persistence()))
            .get_target_data(&rooms().to_target())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.resume_token, active.resume_token);
        assert_eq!(persisted.snapshot_version, active.snapshot_version);
    }

    #[tokio::test]
    async fn interleaved_remote_events_apply_in_commit_order() {
        let store = store();
        let id = store.allocate_target(rooms().to_target()).await.unwrap().target_id;

        let (first, second) = tokio::join!(
            store.apply_remote_event(
                RemoteEvent::new(SnapshotVersion::from_micros(20))
                    .with_target_change(id, TargetChange::new(token(b"twenty"), true)),
            ),
            store.apply_remote_event(
                RemoteEvent::new(SnapshotVersion::from_micros(30))
                    .with_target_change(id, TargetChange::new(token(b"thirty"), true)),
            ),
        );
        first.unwrap();
        second.unwrap();

        let active = store.get_target_data(&rooms().to_target()).await.unwrap().unwrap();
        assert_eq!(active.resume_token, token(b"thirty"));
        assert_eq!(active.snapshot_version, SnapshotVersion::from_micros(30));
    }

    #[test]
    fn stale_target_updates_are_not_merged() {
        use crate::types::ListenSequenceNumber;

        let id = TargetId::new(2);
        let base = TargetData::new(rooms().to_target(), id, TargetPurpose::Listen, ListenSequenceNumber::new(1));
        let newest = base
            .with_resume_token(token(b"new"), SnapshotVersion::from_micros(20))
            .with_sequence_number(ListenSequenceNumber::new(5));
        let stale = base
            .with_resume_token(token(b"old"), SnapshotVersion::from_micros(10))
            .with_sequence_number(ListenSequenceNumber::new(4));

        let mut targets = BTreeMap::from([(id, newest.clone())]);
        merge_active_targets(&mut targets, BTreeMap::from([(id, stale)]));
        assert_eq!(targets[&id], newest);

        let reset = newest
            .with_resume_token(ByteString::EMPTY, SnapshotVersion::MIN)
            .with_sequence_number(ListenSequenceNumber::new(6));
        merge_active_targets(&mut targets, BTreeMap::from([(id, reset.clone())]));
        assert_eq!(targets[&id], reset);

        merge_active_targets(&mut targets, BTreeMap::from([(TargetId::new(4), base)]));
        assert!(!targets.contains_key(&TargetId::new(4)));
    }

    #[tokio::test]
    async fn allocate_is_idempotent_and_release_keeps_data() {
        let store = store();
        let first = store.allocate_target(rooms().to_target()).await.unwrap();
        let again = store.allocate_target(rooms().to_target()).await.unwrap();
        assert_eq!(first.target_id, again.target_id);
        assert_eq!(store.active_target_ids(), BTreeSet::from([first.target_id]));

        store.release_target(first.target_id, false).await.unwrap();
        assert!(store.active_target_ids().is_empty());
        let cached = store.get_target_data(&rooms().to_target()).await.unwrap().unwrap();
        assert!(cached.sequence_number > first.sequence_number);
        assert!(store.release_target(first.target_id, false).await.is_err());
    }

    #[tokio::test]
    async fn pinned_view_documents_survive_gc() {
        let store = store();
        let id = store.allocate_target(rooms().to_target()).await.unwrap().target_id;
        store
            .apply_remote_event(
                RemoteEvent::new(SnapshotVersion::from_micros(10))
                    .with_target_change(id, TargetChange::new(token(b"t"), true).with_added([key("rooms/a")]))
                    .with_document(remote_doc("rooms/a", 1, 10)),
            )
            .await
            .unwrap();
        store
            .notify_local_view_changes(vec![LocalViewChanges::new(
                id,
                false,
                BTreeSet::from([key("rooms/a")]),
                BTreeSet::new(),
            )])
            .await
            .unwrap();
        let limbo_free = store.get_target_data(&rooms().to_target()).await.unwrap().unwrap();
        assert_eq!(limbo_free.last_limbo_free_snapshot_version, SnapshotVersion::from_micros(10));

        // Stop listening but keep the view pin.
        store
            .persistence()
            .run_transaction("drop keys", TransactionMode::ReadWrite, move |txn| {
                txn.target_cache().remove_matching_keys(&[key("rooms/a")], id)
            })
            .await
            .unwrap();

        let gc = LruGarbageCollector::new(LruParams::new(0, 100, 1000));
        for _ in 0..2 {
            store.collect_garbage(&gc).await.unwrap();
        }
        assert!(store.read_document(&key("rooms/a")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn execute_query_uses_previous_results() {
        let store = store();
        let query = rooms();
        let id = store.allocate_target(query.to_target()).await.unwrap().target_id;
        store
            .apply_remote_event(
                RemoteEvent::new(SnapshotVersion::from_micros(10))
                    .with_target_change(id, TargetChange::new(token(b"t"), true).with_added([key("rooms/a")]))
                    .with_document(remote_doc("rooms/a", 1, 10)),
            )
            .await
            .unwrap();
        store
            .notify_local_view_changes(vec![LocalViewChanges::new(id, false, BTreeSet::new(), BTreeSet::new())])
            .await
            .unwrap();
        store.write_locally(vec![Mutation::set(key("rooms/b"), data(2))]).await.unwrap();

        let result = store.execute_query(&query, true).await.unwrap();
        assert_eq!(result.remote_keys, BTreeSet::from([key("rooms/a")]));
        assert_eq!(
            result.documents.keys().cloned().collect::<Vec<_>>(),
            vec![key("rooms/a"), key("rooms/b")]
        );
        let full = store.execute_query(&query, false).await.unwrap();
        assert_eq!(full.documents.len(), 2);
    }

    #[tokio::test]
    async fn session_token_round_trips() {
        let store = store();
        assert!(store.get_session_token().await.unwrap().is_empty());
        store.set_session_token(token(b"session")).await.unwrap();
        assert_eq!(store.get_session_token().await.unwrap(), token(b"session"));
    }

    #[test]
    fn persist_policy() {
        let target = rooms().to_target();
        let old = TargetData::new(target, TargetId::new(2), TargetPurpose::Listen, crate::types::ListenSequenceNumber::new(1));
        let fresh = old.with_resume_token(token(b"a"), SnapshotVersion::from_micros(1));
        let change = TargetChange::default();
        let max_age = Duration::from_secs(300);
        assert!(should_persist_target_data(&old, &fresh, &change, max_age));

        let later = fresh.with_resume_token(token(b"b"), SnapshotVersion::from_micros(2));
        assert!(!should_persist_target_data(&fresh, &later, &change, max_age));
        let much_later = fresh.with_resume_token(token(b"b"), SnapshotVersion::from_micros(301_000_001));
        assert!(should_persist_target_data(&fresh, &much_later, &change, max_age));
        let with_docs = TargetChange::default().with_added([key("rooms/a")]);
        assert!(should_persist_target_data(&fresh, &later, &with_docs, max_age));
    }
}
