//! Test fixtures and store helpers.
//!
//! Provides stores backed by memory or a temporary file, plus short
//! builders for the keys, documents, mutations and queries most tests need.

use driftdb_codec::{ByteString, ResourcePath, Value};
use driftdb_core::{
    Document, DocumentKey, LocalStore, MaybeDocument, Mutation, MutationBatch, MutationBatchResult,
    MutationResult, ObjectValue, Persistence, Query, SnapshotVersion, StoreConfig,
};
use driftdb_core::model::FieldPath;
use driftdb_storage::InMemoryBackend;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const LOG_FILE: &str = "store.log";

/// A local store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<LocalStore>,
    config: StoreConfig,
    backend: Option<InMemoryBackend>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a store on a fresh in-memory log.
    pub fn memory() -> Self {
        Self::memory_with_config(StoreConfig::default())
    }

    /// Creates a store on a fresh in-memory log with `config`.
    pub fn memory_with_config(config: StoreConfig) -> Self {
        Self::on_backend(InMemoryBackend::new(), config)
    }

    /// Opens a store on an existing in-memory log.
    ///
    /// The backend shares its bytes with every clone, so a test can keep a
    /// handle for failure injection or for reopening.
    pub fn on_backend(backend: InMemoryBackend, config: StoreConfig) -> Self {
        let persistence = Persistence::open(Box::new(backend.clone()), config.clone())
            .expect("Failed to open in-memory store");
        Self {
            store: Arc::new(LocalStore::new(Arc::new(persistence))),
            config,
            backend: Some(backend),
            _temp_dir: None,
        }
    }

    /// Creates a store logging to a file in a temporary directory.
    pub fn file() -> Self {
        Self::file_with_config(StoreConfig::default())
    }

    /// Creates a file-backed store with `config`.
    pub fn file_with_config(config: StoreConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let persistence = Persistence::open_path(&temp_dir.path().join(LOG_FILE), config.clone())
            .expect("Failed to open file store");
        Self {
            store: Arc::new(LocalStore::new(Arc::new(persistence))),
            config,
            backend: None,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the in-memory backend, if any.
    pub fn backend(&self) -> Option<&InMemoryBackend> {
        self.backend.as_ref()
    }

    /// Returns the log file path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join(LOG_FILE))
    }

    /// Drops the store and opens a new one on the same log, as after a
    /// process restart.
    ///
    /// Panics if another handle to the store is still alive.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            config,
            backend,
            _temp_dir,
        } = self;
        assert_eq!(Arc::strong_count(&store), 1, "store is still shared");
        drop(store);

        let persistence = match (&backend, &_temp_dir) {
            (Some(backend), _) => Persistence::open(Box::new(backend.clone()), config.clone()),
            (None, Some(dir)) => Persistence::open_path(&dir.path().join(LOG_FILE), config.clone()),
            (None, None) => unreachable!("a test store always has a log"),
        }
        .expect("Failed to reopen store");

        Self {
            store: Arc::new(LocalStore::new(Arc::new(persistence))),
            config,
            backend,
            _temp_dir,
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = LocalStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Parses a document key such as `"rooms/a"`.
pub fn key(path: &str) -> DocumentKey {
    DocumentKey::from_string(path).expect("Invalid document key")
}

/// Builds a snapshot version from microseconds.
pub fn version(micros: i64) -> SnapshotVersion {
    SnapshotVersion::from_micros(micros)
}

/// Builds an object from top-level fields.
pub fn data<I, K, V>(fields: I) -> ObjectValue
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    ObjectValue::from_entries(fields.into_iter().map(|(k, v)| (k, v.into())))
}

/// Builds a server-confirmed document.
pub fn doc<I, K, V>(path: &str, micros: i64, fields: I) -> Document
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    Document::new(key(path), version(micros), data(fields))
}

/// Builds a server-confirmed document as a cache entry.
pub fn remote_doc<I, K, V>(path: &str, micros: i64, fields: I) -> MaybeDocument
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    MaybeDocument::Document(doc(path, micros, fields))
}

/// Builds a tombstone.
pub fn deleted_doc(path: &str, micros: i64) -> MaybeDocument {
    MaybeDocument::no_document(key(path), version(micros))
}

/// Builds a set mutation.
pub fn set<I, K, V>(path: &str, fields: I) -> Mutation
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    Mutation::set(key(path), data(fields))
}

/// Builds a patch of exactly the given fields.
pub fn patch<I, K, V>(path: &str, fields: I) -> Mutation
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    let value = data(fields);
    let mask = value.field_mask();
    Mutation::patch(key(path), value, mask)
}

/// Builds a delete mutation.
pub fn delete(path: &str) -> Mutation {
    Mutation::delete(key(path))
}

/// Builds a query over the collection at `path`.
pub fn query(path: &str) -> Query {
    Query::at_path(ResourcePath::from_string(path))
}

/// Builds a successful write acknowledgement for every mutation in
/// `batch`, committed at `micros`.
pub fn ack(batch: Arc<MutationBatch>, micros: i64) -> MutationBatchResult {
    let results = batch
        .mutations
        .iter()
        .map(|_| MutationResult::new(version(micros)))
        .collect();
    MutationBatchResult::new(batch, version(micros), results, ByteString::from("stream"))
        .expect("Failed to build batch result")
}

/// Reads a top-level field from a local view entry.
pub fn field(entry: &Option<MaybeDocument>, name: &str) -> Option<Value> {
    entry
        .as_ref()
        .and_then(MaybeDocument::as_document)
        .and_then(|d| d.data.field(&FieldPath::from_dotted(name)).cloned())
}
