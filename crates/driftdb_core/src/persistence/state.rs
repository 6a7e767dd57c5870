//! In-memory image of the store.

use super::log::LogRecord;
use crate::collections::{SortedMap, SortedSet};
use crate::model::{DocumentKey, MaybeDocument, MutationBatch, TargetData};
use crate::reference_set::ReferenceSet;
use crate::types::{BatchId, ListenSequenceNumber, SnapshotVersion, TargetId};
use driftdb_codec::ByteString;
use std::sync::Arc;

/// A cached remote document with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocumentEntry {
    /// Document state.
    pub document: MaybeDocument,
    /// When the state was read from the server.
    pub read_time: SnapshotVersion,
    /// Encoded size in bytes.
    pub size: u64,
}

/// Global target bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TargetsMetadata {
    pub(crate) highest_target_id: TargetId,
    pub(crate) highest_listen_sequence_number: ListenSequenceNumber,
    pub(crate) last_remote_snapshot_version: SnapshotVersion,
}

/// Everything the caches hold.
///
/// All collections are persistent, so cloning the state is O(1) and a
/// transaction can work on a private copy.
#[derive(Debug, Clone)]
pub(crate) struct StoreState {
    pub(crate) batches: SortedMap<BatchId, Arc<MutationBatch>>,
    pub(crate) batches_by_document: SortedSet<(DocumentKey, BatchId)>,
    pub(crate) next_batch_id: BatchId,
    pub(crate) last_stream_token: ByteString,

    pub(crate) remote_documents: SortedMap<DocumentKey, Arc<RemoteDocumentEntry>>,
    pub(crate) remote_documents_size: u64,

    pub(crate) targets: SortedMap<TargetId, Arc<TargetData>>,
    pub(crate) targets_by_canonical_id: SortedSet<(String, TargetId)>,
    pub(crate) target_documents: ReferenceSet,
    pub(crate) targets_metadata: TargetsMetadata,

    /// Sequence number at which each document last gained or lost a
    /// reference.
    pub(crate) sequence_markers: SortedMap<DocumentKey, ListenSequenceNumber>,

    pub(crate) session_token: ByteString,

    /// Documents pinned by live local views. Never logged.
    pub(crate) local_view_references: ReferenceSet,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            batches: SortedMap::new(),
            batches_by_document: SortedSet::new(),
            next_batch_id: BatchId::new(1),
            last_stream_token: ByteString::EMPTY,
            remote_documents: SortedMap::new(),
            remote_documents_size: 0,
            targets: SortedMap::new(),
            targets_by_canonical_id: SortedSet::new(),
            target_documents: ReferenceSet::new(),
            targets_metadata: TargetsMetadata {
                highest_target_id: TargetId::new(0),
                highest_listen_sequence_number: ListenSequenceNumber::new(0),
                last_remote_snapshot_version: SnapshotVersion::MIN,
            },
            sequence_markers: SortedMap::new(),
            session_token: ByteString::EMPTY,
            local_view_references: ReferenceSet::new(),
        }
    }
}

impl StoreState {
    /// Applies one record. Records are validated before they are written,
    /// so applying never fails.
    pub(crate) fn apply(&mut self, record: &LogRecord) {
        match record {
            LogRecord::PutMutationBatch(batch) => {
                for key in batch.keys() {
                    self.batches_by_document = self.batches_by_document.insert((key, batch.batch_id));
                }
                if batch.batch_id >= self.next_batch_id {
                    self.next_batch_id = batch.batch_id.next();
                }
                self.batches = self.batches.insert(batch.batch_id, Arc::new(batch.clone()));
            }
            LogRecord::RemoveMutationBatch(batch_id) => {
                if let Some(batch) = self.batches.get(batch_id).cloned() {
                    for key in batch.keys() {
                        self.batches_by_document = self.batches_by_document.remove(&(key, *batch_id));
                    }
                    self.batches = self.batches.remove(batch_id);
                }
            }
            LogRecord::SetNextBatchId(batch_id) => self.next_batch_id = *batch_id,
            LogRecord::SetLastStreamToken(token) => self.last_stream_token = token.clone(),
            LogRecord::PutRemoteDocument {
                document,
                read_time,
                size,
            } => {
                let key = document.key().clone();
                self.release_document_size(&key);
                self.remote_documents_size += size;
                let entry = RemoteDocumentEntry {
                    document: document.clone(),
                    read_time: *read_time,
                    size: *size,
                };
                self.remote_documents = self.remote_documents.insert(key, Arc::new(entry));
            }
            LogRecord::RemoveRemoteDocument(key) => {
                self.release_document_size(key);
                self.remote_documents = self.remote_documents.remove(key);
            }
            LogRecord::PutTarget(data) => {
                if let Some(old) = self.targets.get(&data.target_id).cloned() {
                    self.targets_by_canonical_id = self
                        .targets_by_canonical_id
                        .remove(&(old.target.canonical_id(), old.target_id));
                }
                self.targets_by_canonical_id = self
                    .targets_by_canonical_id
                    .insert((data.target.canonical_id(), data.target_id));
                let meta = &mut self.targets_metadata;
                meta.highest_target_id = meta.highest_target_id.max(data.target_id);
                meta.highest_listen_sequence_number =
                    meta.highest_listen_sequence_number.max(data.sequence_number);
                self.targets = self.targets.insert(data.target_id, Arc::new(data.clone()));
            }
            LogRecord::RemoveTarget(target_id) => {
                if let Some(old) = self.targets.get(target_id).cloned() {
                    self.targets_by_canonical_id = self
                        .targets_by_canonical_id
                        .remove(&(old.target.canonical_id(), *target_id));
                    self.targets = self.targets.remove(target_id);
                }
                self.target_documents.remove_references_for_id(*target_id);
            }
            LogRecord::AddMatchingKeys { target_id, keys } => {
                self.target_documents.add_references(keys, *target_id);
            }
            LogRecord::RemoveMatchingKeys { target_id, keys } => {
                self.target_documents.remove_references(keys, *target_id);
            }
            LogRecord::SetTargetsMetadata {
                highest_listen_sequence_number,
                last_remote_snapshot_version,
            } => {
                self.targets_metadata.highest_listen_sequence_number = *highest_listen_sequence_number;
                self.targets_metadata.last_remote_snapshot_version = *last_remote_snapshot_version;
            }
            LogRecord::SetHighestTargetId(target_id) => {
                self.targets_metadata.highest_target_id = *target_id;
            }
            LogRecord::TouchDocuments {
                keys,
                sequence_number,
            } => {
                for key in keys {
                    self.sequence_markers = self.sequence_markers.insert(key.clone(), *sequence_number);
                }
            }
            LogRecord::RemoveSequenceMarker(key) => {
                self.sequence_markers = self.sequence_markers.remove(key);
            }
            LogRecord::SetSessionToken(token) => self.session_token = token.clone(),
        }
    }

    fn release_document_size(&mut self, key: &DocumentKey) {
        if let Some(old) = self.remote_documents.get(key) {
            self.remote_documents_size = self.remote_documents_size.saturating_sub(old.size);
        }
    }

    /// Records that rebuild this state from scratch.
    pub(crate) fn to_records(&self) -> Vec<LogRecord> {
        let mut records = vec![
            LogRecord::SetSessionToken(self.session_token.clone()),
            LogRecord::SetLastStreamToken(self.last_stream_token.clone()),
        ];
        records.extend(
            self.batches
                .values()
                .map(|batch| LogRecord::PutMutationBatch(MutationBatch::clone(batch))),
        );
        records.push(LogRecord::SetNextBatchId(self.next_batch_id));
        records.extend(self.remote_documents.values().map(|entry| LogRecord::PutRemoteDocument {
            document: entry.document.clone(),
            read_time: entry.read_time,
            size: entry.size,
        }));
        for data in self.targets.values() {
            records.push(LogRecord::PutTarget(TargetData::clone(data)));
            let keys: Vec<DocumentKey> = self
                .target_documents
                .references_for_id(data.target_id)
                .into_iter()
                .collect();
            if !keys.is_empty() {
                records.push(LogRecord::AddMatchingKeys {
                    target_id: data.target_id,
                    keys,
                });
            }
        }
        records.push(LogRecord::SetHighestTargetId(self.targets_metadata.highest_target_id));
        records.push(LogRecord::SetTargetsMetadata {
            highest_listen_sequence_number: self.targets_metadata.highest_listen_sequence_number,
            last_remote_snapshot_version: self.targets_metadata.last_remote_snapshot_version,
        });
        for (key, sequence_number) in &self.sequence_markers {
            records.push(LogRecord::TouchDocuments {
                keys: vec![key.clone()],
                sequence_number: *sequence_number,
            });
        }
        records
    }
}
