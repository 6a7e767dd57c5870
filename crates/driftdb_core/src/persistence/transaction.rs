//! Transactions over the store.

use super::log::LogRecord;
use super::state::StoreState;
use crate::error::{CoreError, CoreResult};
use crate::globals_cache::GlobalsCache;
use crate::model::DocumentKey;
use crate::mutation_queue::MutationQueue;
use crate::reference_set::ReferenceSet;
use crate::remote_document_cache::RemoteDocumentCache;
use crate::target_cache::TargetCache;
use crate::types::ListenSequenceNumber;
use std::fmt;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    /// Reads only. Writes fail with a contract violation.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
    /// Reads and writes; requires the persistence to hold the primary lease.
    ReadWritePrimary,
}

impl TransactionMode {
    /// True for [`TransactionMode::ReadOnly`].
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnly)
    }
}

type CommittedListener = Box<dyn FnOnce() + Send>;

/// A unit of work against the store.
///
/// Works on a private copy of the store state. Writes are applied to the
/// copy immediately and recorded; on commit the records are appended to the
/// commit log and the copy becomes the visible state.
pub struct PersistenceTransaction {
    action: String,
    mode: TransactionMode,
    sequence_number: ListenSequenceNumber,
    pub(crate) state: StoreState,
    records: Vec<LogRecord>,
    listeners: Vec<CommittedListener>,
}

impl PersistenceTransaction {
    pub(crate) fn new(
        action: &str,
        mode: TransactionMode,
        sequence_number: ListenSequenceNumber,
        state: StoreState,
    ) -> Self {
        Self {
            action: action.to_string(),
            mode,
            sequence_number,
            state,
            records: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Name of the operation running the transaction.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Access mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Sequence number assigned to this transaction.
    #[must_use]
    pub fn current_sequence_number(&self) -> ListenSequenceNumber {
        self.sequence_number
    }

    /// Registers a callback to run after the transaction commits.
    ///
    /// Listeners run outside the store lock and are dropped if the
    /// transaction fails.
    pub fn add_on_committed_listener(&mut self, listener: impl FnOnce() + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// The mutation queue.
    pub fn mutation_queue(&mut self) -> MutationQueue<'_> {
        MutationQueue::new(self)
    }

    /// The remote document cache.
    pub fn remote_document_cache(&mut self) -> RemoteDocumentCache<'_> {
        RemoteDocumentCache::new(self)
    }

    /// The target cache.
    pub fn target_cache(&mut self) -> TargetCache<'_> {
        TargetCache::new(self)
    }

    /// The globals cache.
    pub fn globals_cache(&mut self) -> GlobalsCache<'_> {
        GlobalsCache::new(self)
    }

    /// Documents pinned by live local views.
    #[must_use]
    pub fn local_view_references(&self) -> &ReferenceSet {
        &self.state.local_view_references
    }

    /// Applies a record to the working copy and queues it for the log.
    pub(crate) fn write(&mut self, record: LogRecord) -> CoreResult<()> {
        self.ensure_writable()?;
        self.state.apply(&record);
        self.records.push(record);
        Ok(())
    }

    /// Stamps `keys` with the current sequence number for LRU bookkeeping.
    pub(crate) fn touch_documents(&mut self, keys: Vec<DocumentKey>) -> CoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let sequence_number = self.sequence_number;
        self.write(LogRecord::TouchDocuments {
            keys,
            sequence_number,
        })
    }

    /// Mutable access to the local-view pins. Not logged.
    pub(crate) fn local_view_references_mut(&mut self) -> CoreResult<&mut ReferenceSet> {
        self.ensure_writable()?;
        Ok(&mut self.state.local_view_references)
    }

    pub(crate) fn ensure_writable(&self) -> CoreResult<()> {
        if self.mode.is_read_only() {
            return Err(CoreError::contract_violation(format!(
                "write in read-only transaction '{}'",
                self.action
            )));
        }
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (StoreState, Vec<LogRecord>, Vec<CommittedListener>) {
        (self.state, self.records, self.listeners)
    }
}

impl fmt::Debug for PersistenceTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceTransaction")
            .field("action", &self.action)
            .field("mode", &self.mode)
            .field("sequence_number", &self.sequence_number)
            .field("records", &self.records.len())
            .finish_non_exhaustive()
    }
}
