//! # DriftDB Core
//!
//! Offline-first local persistence and synchronization engine for DriftDB.
//!
//! This crate provides:
//! - Persistent sorted collections with structural sharing
//! - The document model: keys, documents, mutations, queries and targets
//! - A transactional persistence layer backed by a checksummed commit log
//! - Caches for pending writes, remote documents, targets and globals
//! - LRU garbage collection of unreferenced targets and documents
//! - Composite index keys built on the order-preserving codec
//! - [`LocalStore`], the facade the sync layer talks to
//!
//! ## Usage
//!
//! ```rust,no_run
//! use driftdb_core::{DocumentKey, LocalStore, Mutation, Persistence, StoreConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> driftdb_core::CoreResult<()> {
//! let path = Path::new("data/store.log");
//! let persistence = Arc::new(Persistence::open_path(path, StoreConfig::default())?);
//! let store = LocalStore::new(persistence);
//! let key = DocumentKey::from_string("rooms/a")?;
//! let written = store.write_locally(vec![Mutation::delete(key)]).await?;
//! println!("queued {}", written.batch_id);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod collections;
mod config;
mod error;
mod globals_cache;
mod index;
mod local_documents_view;
mod local_store;
pub mod lru;
pub mod model;
mod mutation_queue;
pub mod persistence;
mod query_engine;
mod reference_set;
mod remote_document_cache;
mod remote_event;
mod target_cache;
mod types;

pub use config::StoreConfig;
pub use error::{CoreError, CoreResult};
pub use globals_cache::GlobalsCache;
pub use index::{encode_composite_key, FieldIndex, IndexSegment};
pub use local_documents_view::LocalDocumentsView;
pub use local_store::{DocumentChanges, LocalStore, LocalViewChanges, LocalWriteResult, QueryResult};
pub use lru::{ActiveTargetsProvider, LruGarbageCollector, LruParams, LruResults, LruScheduler};
pub use model::{
    Document, DocumentKey, FieldMask, FieldPath, MaybeDocument, Mutation, MutationBatch, MutationBatchResult,
    MutationResult, ObjectValue, Precondition, Query, Target, TargetData, TargetPurpose,
};
pub use mutation_queue::MutationQueue;
pub use persistence::{Persistence, PersistenceTransaction, TransactionMode};
pub use query_engine::{FullScanQueryEngine, IndexFreeQueryEngine, QueryEngine};
pub use reference_set::ReferenceSet;
pub use remote_document_cache::{RemoteDocumentCache, RemoteDocumentChangeBuffer};
pub use remote_event::{RemoteEvent, TargetChange};
pub use target_cache::{TargetCache, TargetIdGenerator};
pub use types::{BatchId, ListenSequenceNumber, SnapshotVersion, TargetId};
