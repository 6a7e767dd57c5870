//! Cache of documents as last seen from the server.

use crate::error::{CoreError, CoreResult};
use crate::model::{Document, DocumentKey, MaybeDocument, Query};
use crate::persistence::{LogRecord, PersistenceTransaction, RemoteDocumentEntry};
use crate::types::SnapshotVersion;
use driftdb_codec::encode_record;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Remote documents keyed by [`DocumentKey`].
///
/// Writes go through a [`RemoteDocumentChangeBuffer`].
#[derive(Debug)]
pub struct RemoteDocumentCache<'a> {
    txn: &'a mut PersistenceTransaction,
}

impl<'a> RemoteDocumentCache<'a> {
    pub(crate) fn new(txn: &'a mut PersistenceTransaction) -> Self {
        Self { txn }
    }

    /// Stores `document`, read from the server at `read_time`.
    ///
    /// Fails with a contract violation if the cached entry was read later
    /// than `read_time`.
    pub(crate) fn add_entry(&mut self, document: MaybeDocument, read_time: SnapshotVersion) -> CoreResult<()> {
        if let Some(cached) = self.txn.state.remote_documents.get(document.key()) {
            if read_time < cached.read_time {
                return Err(CoreError::contract_violation(format!(
                    "read time of {} moved back from {} to {read_time}",
                    document.key(),
                    cached.read_time
                )));
            }
        }
        let size = encode_record(&document)?.len() as u64;
        self.txn.write(LogRecord::PutRemoteDocument {
            document,
            read_time,
            size,
        })
    }

    /// Deletes the entry for `key`.
    pub(crate) fn remove_entry(&mut self, key: &DocumentKey) -> CoreResult<()> {
        self.txn.write(LogRecord::RemoveRemoteDocument(key.clone()))
    }

    /// Returns the cached state of `key`.
    #[must_use]
    pub fn get_entry(&self, key: &DocumentKey) -> Option<MaybeDocument> {
        self.get_entry_with_read_time(key).map(|entry| entry.document.clone())
    }

    /// Returns the cached entry for `key` including its read time and size.
    #[must_use]
    pub fn get_entry_with_read_time(&self, key: &DocumentKey) -> Option<Arc<RemoteDocumentEntry>> {
        self.txn.state.remote_documents.get(key).cloned()
    }

    /// Looks up several keys. Missing keys map to `None`.
    #[must_use]
    pub fn get_entries<'k>(
        &self,
        keys: impl IntoIterator<Item = &'k DocumentKey>,
    ) -> BTreeMap<DocumentKey, Option<MaybeDocument>> {
        keys.into_iter()
            .map(|key| (key.clone(), self.get_entry(key)))
            .collect()
    }

    /// Calls `f` for every cached key in order.
    pub fn for_each_document_key(&self, mut f: impl FnMut(&DocumentKey)) {
        for key in self.txn.state.remote_documents.keys() {
            f(key);
        }
    }

    /// Documents matching `query` whose read time is at or after
    /// `since_read_time`.
    ///
    /// Only existing documents are returned. Collection queries scan the
    /// collection's key range; collection group queries scan the whole
    /// range under the query path.
    #[must_use]
    pub fn get_documents_matching_query(
        &self,
        query: &Query,
        since_read_time: SnapshotVersion,
    ) -> BTreeMap<DocumentKey, Document> {
        let prefix = query.path();
        let start = DocumentKey::seek(prefix);
        self.txn
            .state
            .remote_documents
            .iter_from(&start)
            .take_while(|(key, _)| prefix.is_prefix_of(key.path()))
            .filter(|(_, entry)| entry.read_time >= since_read_time)
            .filter_map(|(key, entry)| match &entry.document {
                MaybeDocument::Document(doc) if query.matches(doc) => Some((key.clone(), doc.clone())),
                _ => None,
            })
            .collect()
    }

    /// Total encoded size of all entries.
    #[must_use]
    pub fn get_size(&self) -> u64 {
        self.txn.state.remote_documents_size
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.txn.state.remote_documents.len()
    }

    /// True if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.txn.state.remote_documents.is_empty()
    }
}

#[derive(Debug, Clone)]
struct StagedChange {
    document: Option<MaybeDocument>,
    read_time: SnapshotVersion,
}

/// Stages remote document changes and writes them in one go.
///
/// Reads through the buffer see staged changes first. A buffer can be
/// applied once.
#[derive(Debug)]
pub struct RemoteDocumentChangeBuffer {
    track_removals: bool,
    changes: BTreeMap<DocumentKey, StagedChange>,
    applied: bool,
}

impl RemoteDocumentChangeBuffer {
    /// Creates a buffer. With `track_removals`, removed documents are kept
    /// as tombstones at [`SnapshotVersion::MIN`].
    #[must_use]
    pub fn new(track_removals: bool) -> Self {
        Self {
            track_removals,
            changes: BTreeMap::new(),
            applied: false,
        }
    }

    /// Stages `document` read at `read_time`.
    ///
    /// # Errors
    ///
    /// Returns a contract violation after [`apply`](Self::apply), or if
    /// the key was already staged with a later read time.
    pub fn add_entry(&mut self, document: MaybeDocument, read_time: SnapshotVersion) -> CoreResult<()> {
        self.stage(document.key().clone(), Some(document), read_time)
    }

    /// Stages the removal of `key`.
    ///
    /// # Errors
    ///
    /// Returns a contract violation after [`apply`](Self::apply), or if
    /// the key was already staged with a later read time.
    pub fn remove_entry(&mut self, key: DocumentKey, read_time: SnapshotVersion) -> CoreResult<()> {
        self.stage(key, None, read_time)
    }

    fn stage(&mut self, key: DocumentKey, document: Option<MaybeDocument>, read_time: SnapshotVersion) -> CoreResult<()> {
        self.assert_not_applied()?;
        if let Some(prev) = self.changes.get(&key) {
            if read_time < prev.read_time {
                return Err(CoreError::contract_violation(format!(
                    "read time of {key} moved back from {} to {read_time}",
                    prev.read_time
                )));
            }
        }
        self.changes.insert(key, StagedChange { document, read_time });
        Ok(())
    }

    /// Returns the staged state of `key`, or the cached one.
    #[must_use]
    pub fn get_entry(&self, txn: &mut PersistenceTransaction, key: &DocumentKey) -> Option<MaybeDocument> {
        match self.changes.get(key) {
            Some(change) => change.document.clone(),
            None => txn.remote_document_cache().get_entry(key),
        }
    }

    /// Looks up several keys through the buffer.
    #[must_use]
    pub fn get_entries<'k>(
        &self,
        txn: &mut PersistenceTransaction,
        keys: impl IntoIterator<Item = &'k DocumentKey>,
    ) -> BTreeMap<DocumentKey, Option<MaybeDocument>> {
        keys.into_iter()
            .map(|key| (key.clone(), self.get_entry(txn, key)))
            .collect()
    }

    /// Number of staged changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// True if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Writes all staged changes to the cache.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if the buffer was already applied, or
    /// any write error.
    pub fn apply(&mut self, txn: &mut PersistenceTransaction) -> CoreResult<()> {
        self.assert_not_applied()?;
        self.applied = true;

        let mut cache = txn.remote_document_cache();
        for (key, change) in std::mem::take(&mut self.changes) {
            match change.document {
                Some(document) => cache.add_entry(document, change.read_time)?,
                None if self.track_removals => cache.add_entry(
                    MaybeDocument::no_document(key, SnapshotVersion::MIN),
                    change.read_time,
                )?,
                None => cache.remove_entry(&key)?,
            }
        }
        Ok(())
    }

    fn assert_not_applied(&self) -> CoreResult<()> {
        if self.applied {
            return Err(CoreError::contract_violation("change buffer already applied"));
        }
        Ok(())
    }
}
