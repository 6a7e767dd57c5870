//! Transactional persistence over a commit log.
//!
//! The whole store lives in memory as a set of persistent collections
//! ([`StoreState`]). Every committed transaction appends one framed record
//! list to a [`StorageBackend`]; opening a store replays the log.
//!
//! ```text
//! frame := "DLOG" | len (u32 LE) | CBOR(LogFrame) | crc32 (u32 LE)
//! ```
//!
//! Exactly one transaction runs at a time. `run_transaction` awaits a
//! `tokio::sync::Mutex`, hands the closure a private copy of the state, and
//! publishes the copy only after the log append (and sync) succeeded.

mod listen_sequence;
mod log;
mod state;
mod transaction;

pub use listen_sequence::ListenSequence;
pub use log::{compute_crc32, decode_frames, DecodedLog, LogFrame, LogRecord, LOG_MAGIC};
pub use state::RemoteDocumentEntry;
pub use transaction::{PersistenceTransaction, TransactionMode};

pub(crate) use state::StoreState;

use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use driftdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::cell::Cell;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

thread_local! {
    static IN_TRANSACTION: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running a transaction body.
struct TransactionScope;

impl TransactionScope {
    fn enter() -> Self {
        IN_TRANSACTION.with(|flag| flag.set(true));
        Self
    }

    fn is_active() -> bool {
        IN_TRANSACTION.with(Cell::get)
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        IN_TRANSACTION.with(|flag| flag.set(false));
    }
}

struct Inner {
    state: StoreState,
    backend: Box<dyn StorageBackend>,
    sequence: ListenSequence,
    shut_down: bool,
}

impl Inner {
    /// Appends a frame, rolling the log back to its old size on failure.
    fn append_frame(&mut self, bytes: &[u8], sync: bool) -> CoreResult<()> {
        let size = self.backend.size()?;
        let result = self
            .backend
            .append(bytes)
            .and_then(|_| if sync { self.backend.sync() } else { Ok(()) });
        if let Err(err) = result {
            if let Err(truncate_err) = self.backend.truncate(size) {
                warn!(error = %truncate_err, size, "failed to roll back commit log tail");
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn compact(&mut self) -> CoreResult<u64> {
        let frame = LogFrame::Snapshot {
            sequence_number: self.sequence.current(),
            records: self.state.to_records(),
        };
        let bytes = frame.encode()?;
        self.backend.replace(&bytes)?;
        Ok(bytes.len() as u64)
    }
}

/// The persistence layer: store state, commit log and transaction runner.
pub struct Persistence {
    inner: Mutex<Inner>,
    primary: AtomicBool,
    config: StoreConfig,
}

impl Persistence {
    /// Opens a store on `backend`, replaying its commit log.
    ///
    /// A torn trailing frame left by an interrupted append is truncated.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or a complete frame
    /// is corrupt.
    pub fn open(mut backend: Box<dyn StorageBackend>, config: StoreConfig) -> CoreResult<Self> {
        let data = backend.read_all()?;
        let log = decode_frames(&data)?;
        if log.torn_bytes > 0 {
            warn!(
                offset = log.valid_len,
                bytes = log.torn_bytes,
                "truncating torn commit log tail"
            );
            backend.truncate(log.valid_len)?;
        }

        let mut state = StoreState::default();
        let mut last_sequence = ListenSequence::INVALID;
        for (_, frame) in &log.frames {
            let records = match frame {
                LogFrame::Commit { records, .. } => records,
                LogFrame::Snapshot { records, .. } => {
                    state = StoreState::default();
                    records
                }
            };
            for record in records {
                state.apply(record);
            }
            last_sequence = last_sequence.max(frame.sequence_number());
        }
        last_sequence = last_sequence.max(state.targets_metadata.highest_listen_sequence_number);

        info!(
            frames = log.frames.len(),
            size = log.valid_len,
            sequence_number = %last_sequence,
            "commit log replayed"
        );

        Ok(Self::from_parts(state, backend, ListenSequence::new(last_sequence), config))
    }

    /// Creates an empty store backed by memory.
    #[must_use]
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::from_parts(
            StoreState::default(),
            Box::new(InMemoryBackend::new()),
            ListenSequence::new(ListenSequence::INVALID),
            config,
        )
    }

    /// Opens (or creates) a store in the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is locked by another process, cannot be
    /// read, or holds a corrupt log.
    pub fn open_path(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::open(Box::new(backend), config)
    }

    fn from_parts(
        state: StoreState,
        backend: Box<dyn StorageBackend>,
        sequence: ListenSequence,
        config: StoreConfig,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                backend,
                sequence,
                shut_down: false,
            }),
            primary: AtomicBool::new(true),
            config,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// True while this instance holds the primary lease.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.primary.load(Ordering::Acquire)
    }

    /// Grants or revokes the primary lease.
    pub fn set_primary(&self, primary: bool) {
        self.primary.store(primary, Ordering::Release);
    }

    /// Runs `f` in a transaction.
    ///
    /// `f` sees a private copy of the store. If it returns an error the copy
    /// is discarded and nothing is written. Otherwise its writes are
    /// appended to the commit log, synced if configured, and published;
    /// committed listeners run after the store lock is released.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ContractViolation`] when called from inside another
    ///   transaction body
    /// - [`CoreError::PrimaryLeaseLost`] for `ReadWritePrimary` on a
    ///   non-primary instance
    /// - [`CoreError::PersistenceClosed`] after [`Persistence::shutdown`]
    /// - [`CoreError::Storage`] if the commit cannot be written; the store
    ///   is left unchanged
    /// - any error returned by `f`
    pub async fn run_transaction<T, F>(&self, action: &str, mode: TransactionMode, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut PersistenceTransaction) -> CoreResult<T> + Send,
    {
        if TransactionScope::is_active() {
            return Err(CoreError::contract_violation(format!(
                "nested transaction '{action}'"
            )));
        }
        if mode == TransactionMode::ReadWritePrimary && !self.is_primary() {
            return Err(CoreError::PrimaryLeaseLost);
        }

        let mut inner = self.inner.lock().await;
        if inner.shut_down {
            return Err(CoreError::PersistenceClosed);
        }

        let sequence_number = inner.sequence.next();
        let mut txn = PersistenceTransaction::new(action, mode, sequence_number, inner.state.clone());
        let result = {
            let _scope = TransactionScope::enter();
            f(&mut txn)
        };
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                debug!(action, error = %err, "transaction rolled back");
                return Err(err);
            }
        };

        let (state, records, listeners) = txn.into_parts();
        if !records.is_empty() {
            let record_count = records.len();
            let frame = LogFrame::Commit {
                sequence_number,
                records,
            };
            inner.append_frame(&frame.encode()?, self.config.sync_on_commit)?;
            debug!(action, %sequence_number, records = record_count, "transaction committed");
        }
        inner.state = state;

        let max_log_size = self.config.max_log_size;
        if max_log_size > 0 && inner.backend.size().is_ok_and(|size| size > max_log_size) {
            match inner.compact() {
                Ok(size) => info!(size, "commit log compacted"),
                Err(err) => warn!(error = %err, "commit log compaction failed"),
            }
        }
        drop(inner);

        for listener in listeners {
            listener();
        }
        Ok(value)
    }

    /// Rewrites the commit log as a single snapshot frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written; the old log is
    /// then left in place.
    pub async fn compact(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.shut_down {
            return Err(CoreError::PersistenceClosed);
        }
        let size = inner.compact()?;
        info!(size, "commit log compacted");
        Ok(())
    }

    /// Current size of the commit log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub async fn log_size(&self) -> CoreResult<u64> {
        Ok(self.inner.lock().await.backend.size()?)
    }

    /// Syncs the log and rejects all later transactions.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails.
    pub async fn shutdown(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.shut_down {
            return Ok(());
        }
        inner.shut_down = true;
        inner.backend.sync()?;
        info!("persistence shut down");
        Ok(())
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("primary", &self.is_primary())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
