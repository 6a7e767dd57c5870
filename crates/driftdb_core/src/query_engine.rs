//! Query execution over the local view.
//!
//! [`IndexFreeQueryEngine`] re-runs a query incrementally: it starts from
//! the documents the target matched at its last limbo-free snapshot and
//! only scans documents read since. [`FullScanQueryEngine`] always scans
//! the whole collection.

use crate::local_documents_view::LocalDocumentsView;
use crate::model::{Document, DocumentKey, LimitType, MaybeDocument, Query};
use crate::persistence::PersistenceTransaction;
use crate::types::SnapshotVersion;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Strategy for answering a query from local data.
pub trait QueryEngine: Send + Sync {
    /// Documents in the local view matching `query`.
    ///
    /// `remote_keys` are the keys the server reported for the query's
    /// target as of `last_limbo_free_snapshot_version`.
    ///
    /// Limits are not applied. A limit query can return more documents
    /// than `query.limit()`; the view sorts the result and trims it to the
    /// page.
    fn get_documents_matching_query(
        &self,
        txn: &mut PersistenceTransaction,
        query: &Query,
        last_limbo_free_snapshot_version: SnapshotVersion,
        remote_keys: &BTreeSet<DocumentKey>,
    ) -> BTreeMap<DocumentKey, Document>;
}

/// Scans every document under the query path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullScanQueryEngine;

impl QueryEngine for FullScanQueryEngine {
    fn get_documents_matching_query(
        &self,
        txn: &mut PersistenceTransaction,
        query: &Query,
        _last_limbo_free_snapshot_version: SnapshotVersion,
        _remote_keys: &BTreeSet<DocumentKey>,
    ) -> BTreeMap<DocumentKey, Document> {
        LocalDocumentsView::new(txn).get_documents_matching_query(query, SnapshotVersion::MIN)
    }
}

/// Reuses previous results when they are still trustworthy.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexFreeQueryEngine;

impl QueryEngine for IndexFreeQueryEngine {
    fn get_documents_matching_query(
        &self,
        txn: &mut PersistenceTransaction,
        query: &Query,
        last_limbo_free_snapshot_version: SnapshotVersion,
        remote_keys: &BTreeSet<DocumentKey>,
    ) -> BTreeMap<DocumentKey, Document> {
        if query.matches_all_documents() || last_limbo_free_snapshot_version == SnapshotVersion::MIN {
            return full_scan(txn, query);
        }

        let previous = LocalDocumentsView::new(txn).get_documents(remote_keys);
        let previous_results = apply_query(query, previous);

        if query.limit().is_some()
            && needs_refill(
                query.limit_type(),
                &previous_results,
                remote_keys,
                last_limbo_free_snapshot_version,
            )
        {
            return full_scan(txn, query);
        }

        debug!(
            %last_limbo_free_snapshot_version,
            previous = previous_results.len(),
            "re-using previous query results"
        );
        let mut updated =
            LocalDocumentsView::new(txn).get_documents_matching_query(query, last_limbo_free_snapshot_version);
        // Previous matches may have been read before the cutoff.
        for doc in previous_results {
            updated.insert(doc.key.clone(), doc);
        }
        updated
    }
}

fn full_scan(txn: &mut PersistenceTransaction, query: &Query) -> BTreeMap<DocumentKey, Document> {
    debug!("running full collection scan");
    LocalDocumentsView::new(txn).get_documents_matching_query(query, SnapshotVersion::MIN)
}

/// Matching documents sorted in query order.
fn apply_query(query: &Query, docs: BTreeMap<DocumentKey, Option<MaybeDocument>>) -> Vec<Document> {
    let mut matching: Vec<Document> = docs
        .into_values()
        .filter_map(|doc| doc.and_then(MaybeDocument::into_document))
        .filter(|doc| query.matches(doc))
        .collect();
    matching.sort_by(|a, b| query.compare(a, b));
    matching
}

/// True when a limit query's previous results cannot be trusted, e.g.
/// because a document left the result set or the document at the limit
/// edge changed since the snapshot.
fn needs_refill(
    limit_type: LimitType,
    sorted_previous: &[Document],
    remote_keys: &BTreeSet<DocumentKey>,
    limbo_free_snapshot_version: SnapshotVersion,
) -> bool {
    if sorted_previous.len() != remote_keys.len() {
        return true;
    }
    let edge = match limit_type {
        LimitType::First => sorted_previous.last(),
        LimitType::Last => sorted_previous.first(),
    };
    edge.is_some_and(|doc| doc.has_pending_writes() || doc.version > limbo_free_snapshot_version)
}
