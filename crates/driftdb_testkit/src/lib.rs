//! # DriftDB Testkit
//!
//! Test utilities for DriftDB.
//!
//! This crate provides:
//! - Store fixtures backed by memory or a temporary file
//! - Builders for keys, documents, mutations and queries
//! - Property-based test generators using proptest
//! - Log output for tests, filtered by `RUST_LOG`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use driftdb_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn writes_show_up_locally() {
//!     let store = TestStore::memory();
//!     store.write_locally(vec![set("rooms/a", [("n", 1)])]).await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
