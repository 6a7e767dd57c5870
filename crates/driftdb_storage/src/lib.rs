//! # DriftDB Storage
//!
//! Append-only byte stores backing the DriftDB commit log.
//!
//! Backends do not interpret what they store. Framing, checksums and
//! recovery belong to `driftdb_core`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - shared in-memory buffer with fault injection
//! - [`FileBackend`] - single locked file
//!
//! ## Example
//!
//! ```rust
//! use driftdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
