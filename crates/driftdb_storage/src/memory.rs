//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    data: Vec<u8>,
    fail_next_append: Option<usize>,
    fail_next_sync: bool,
    syncs: u64,
}

/// An in-memory storage backend.
///
/// Clones share the same buffer, so a test can keep a handle to inspect
/// the bytes or arm faults after the backend has been moved into a store.
///
/// # Example
///
/// ```rust
/// use driftdb_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let observer = backend.clone();
/// backend.append(b"frame").unwrap();
/// assert_eq!(observer.data(), b"frame");
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding pre-existing bytes.
    ///
    /// Useful for recovery tests.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data,
                ..Inner::default()
            })),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }

    /// Replaces the stored bytes, e.g. to simulate on-disk corruption.
    pub fn set_data(&self, data: Vec<u8>) {
        self.inner.lock().data = data;
    }

    /// Makes the next `append` fail after writing `written` bytes of its
    /// input, leaving a torn tail.
    pub fn fail_next_append(&self, written: usize) {
        self.inner.lock().fail_next_append = Some(written);
    }

    /// Makes the next `sync` fail.
    pub fn fail_next_sync(&self) {
        self.inner.lock().fail_next_sync = true;
    }

    /// Returns how many syncs have succeeded.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        self.inner.lock().syncs
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let inner = self.inner.lock();
        let size = inner.data.len() as u64;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(len);
        if start > inner.data.len() || end > inner.data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(inner.data[start..end].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut inner = self.inner.lock();
        let offset = inner.data.len() as u64;
        if let Some(written) = inner.fail_next_append.take() {
            let torn = &data[..written.min(data.len())];
            inner.data.extend_from_slice(torn);
            return Err(StorageError::InjectedFault {
                operation: "append",
            });
        }
        inner.data.extend_from_slice(data);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        if std::mem::take(&mut inner.fail_next_sync) {
            return Err(StorageError::InjectedFault { operation: "sync" });
        }
        inner.syncs += 1;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().data.len() as u64)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.inner.lock().data = data.to_vec();
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let size = inner.data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        inner.data.truncate(usize::try_from(new_size).unwrap_or(usize::MAX));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();
        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(backend.read_at(5, 0).unwrap().is_empty());
    }

    #[test]
    fn clones_share_state() {
        let mut backend = InMemoryBackend::new();
        let observer = backend.clone();
        backend.append(b"abc").unwrap();
        assert_eq!(observer.data(), b"abc");
        observer.set_data(b"xy".to_vec());
        assert_eq!(backend.size().unwrap(), 2);
    }

    #[test]
    fn injected_append_failure_leaves_torn_tail() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"ok").unwrap();
        backend.fail_next_append(3);
        assert!(matches!(
            backend.append(b"abcdef"),
            Err(StorageError::InjectedFault { operation: "append" })
        ));
        assert_eq!(backend.data(), b"okabc");

        // Faults fire once.
        backend.append(b"!").unwrap();
        assert_eq!(backend.data(), b"okabc!");
    }

    #[test]
    fn injected_sync_failure_fires_once() {
        let mut backend = InMemoryBackend::new();
        backend.fail_next_sync();
        assert!(backend.sync().is_err());
        backend.sync().unwrap();
        assert_eq!(backend.sync_count(), 1);
    }

    #[test]
    fn replace_swaps_contents() {
        let mut backend = InMemoryBackend::with_data(b"old frames".to_vec());
        backend.replace(b"snapshot").unwrap();
        assert_eq!(backend.data(), b"snapshot");
    }

    #[test]
    fn truncate_shrinks_only() {
        let mut backend = InMemoryBackend::with_data(b"hello world".to_vec());
        backend.truncate(5).unwrap();
        assert_eq!(backend.data(), b"hello");
        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::TruncateBeyondEnd { requested: 100, size: 5 })
        ));
    }
}
