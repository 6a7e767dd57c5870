//! The local view of documents: cached remote state with pending
//! mutations applied on top.

use crate::model::{Document, DocumentKey, MaybeDocument, MutationBatch, MutationKind, Query};
use crate::persistence::PersistenceTransaction;
use crate::types::SnapshotVersion;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reads documents as the user sees them, combining the remote document
/// cache with the mutation queue.
pub struct LocalDocumentsView<'a> {
    txn: &'a mut PersistenceTransaction,
}

impl<'a> LocalDocumentsView<'a> {
    /// Creates a view over `txn`.
    pub fn new(txn: &'a mut PersistenceTransaction) -> Self {
        Self { txn }
    }

    /// Local view of one document.
    #[must_use]
    pub fn get_document(&mut self, key: &DocumentKey) -> Option<MaybeDocument> {
        let batches = self
            .txn
            .mutation_queue()
            .get_all_mutation_batches_affecting_document_key(key);
        let remote = self.txn.remote_document_cache().get_entry(key);
        batches
            .iter()
            .fold(remote, |doc, batch| batch.apply_to_local_view(key, doc))
    }

    /// Local view of several documents. Missing documents map to `None`.
    #[must_use]
    pub fn get_documents<'k>(
        &mut self,
        keys: impl IntoIterator<Item = &'k DocumentKey>,
    ) -> BTreeMap<DocumentKey, Option<MaybeDocument>> {
        let base = self.txn.remote_document_cache().get_entries(keys);
        self.get_local_view_of_documents(base)
    }

    /// Applies pending batches to already loaded `base_docs`.
    #[must_use]
    pub fn get_local_view_of_documents(
        &mut self,
        mut base_docs: BTreeMap<DocumentKey, Option<MaybeDocument>>,
    ) -> BTreeMap<DocumentKey, Option<MaybeDocument>> {
        let batches = self
            .txn
            .mutation_queue()
            .get_all_mutation_batches_affecting_document_keys(base_docs.keys());
        for batch in &batches {
            for (key, doc) in base_docs.iter_mut() {
                *doc = batch.apply_to_local_view(key, doc.take());
            }
        }
        base_docs
    }

    /// Documents matching `query` in the local view.
    ///
    /// `since_read_time` limits the remote scan to entries read at or after
    /// it; pending mutations are always applied.
    #[must_use]
    pub fn get_documents_matching_query(
        &mut self,
        query: &Query,
        since_read_time: SnapshotVersion,
    ) -> BTreeMap<DocumentKey, Document> {
        if query.is_document_query() {
            return self.get_documents_matching_document_query(query);
        }

        let mut results: BTreeMap<DocumentKey, Option<MaybeDocument>> = self
            .txn
            .remote_document_cache()
            .get_documents_matching_query(query, since_read_time)
            .into_iter()
            .map(|(key, doc)| (key, Some(MaybeDocument::Document(doc))))
            .collect();

        let batches = self
            .txn
            .mutation_queue()
            .get_all_mutation_batches_affecting_query(query);
        self.add_missing_base_documents(&batches, &mut results);

        for batch in &batches {
            for mutation in &batch.mutations {
                let key = &mutation.key;
                if !query.is_collection_group_query() && !query.path().is_immediate_parent_of(key.path()) {
                    continue;
                }
                let base = results.remove(key).flatten();
                let applied = mutation.apply_to_local_view(base.as_ref(), batch.local_write_time);
                results.insert(key.clone(), applied);
            }
        }

        results
            .into_iter()
            .filter_map(|(key, doc)| match doc {
                Some(MaybeDocument::Document(doc)) if query.matches(&doc) => Some((key, doc)),
                _ => None,
            })
            .collect()
    }

    fn get_documents_matching_document_query(&mut self, query: &Query) -> BTreeMap<DocumentKey, Document> {
        let Ok(key) = DocumentKey::from_path(query.path().clone()) else {
            return BTreeMap::new();
        };
        match self.get_document(&key) {
            Some(MaybeDocument::Document(doc)) if query.matches(&doc) => BTreeMap::from([(key, doc)]),
            _ => BTreeMap::new(),
        }
    }

    /// A patch can make a cached document match a query it did not match
    /// before, so the scan may have skipped its base. Loads those bases.
    fn add_missing_base_documents(
        &mut self,
        batches: &[Arc<MutationBatch>],
        results: &mut BTreeMap<DocumentKey, Option<MaybeDocument>>,
    ) {
        let missing: Vec<DocumentKey> = batches
            .iter()
            .flat_map(|batch| batch.mutations.iter())
            .filter(|mutation| matches!(mutation.kind, MutationKind::Patch { .. }))
            .map(|mutation| mutation.key.clone())
            .filter(|key| !results.contains_key(key))
            .collect();
        if missing.is_empty() {
            return;
        }
        let cache = self.txn.remote_document_cache();
        for key in missing {
            if let Some(doc @ MaybeDocument::Document(_)) = cache.get_entry(&key) {
                results.insert(key, Some(doc));
            }
        }
    }
}
