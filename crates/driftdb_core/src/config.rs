//! Store configuration.

use crate::lru::LruParams;
use std::time::Duration;

/// Configuration for opening a [`Persistence`](crate::Persistence).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Garbage collection tuning.
    pub lru_params: LruParams,

    /// Keep removed remote documents as tombstones so incremental query
    /// re-execution sees the removal.
    pub track_removals: bool,

    /// Whether to sync the commit log on every commit.
    pub sync_on_commit: bool,

    /// Persist a target with an otherwise unchanged resume token once its
    /// snapshot is this much newer than the persisted one.
    pub resume_token_max_age: Duration,

    /// Compact the commit log once it grows past this size (0 = never).
    pub max_log_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lru_params: LruParams::DEFAULT,
            track_removals: true,
            sync_on_commit: true,
            resume_token_max_age: Duration::from_secs(5 * 60),
            max_log_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the garbage collection parameters.
    #[must_use]
    pub const fn lru_params(mut self, params: LruParams) -> Self {
        self.lru_params = params;
        self
    }

    /// Sets whether removals are kept as tombstones.
    #[must_use]
    pub const fn track_removals(mut self, value: bool) -> Self {
        self.track_removals = value;
        self
    }

    /// Sets whether to sync the log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the resume token max age.
    #[must_use]
    pub const fn resume_token_max_age(mut self, age: Duration) -> Self {
        self.resume_token_max_age = age;
        self
    }

    /// Sets the auto-compaction threshold.
    #[must_use]
    pub const fn max_log_size(mut self, size: u64) -> Self {
        self.max_log_size = size;
        self
    }
}
