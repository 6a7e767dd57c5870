//! Document keys.

use crate::error::{CoreError, CoreResult};
use driftdb_codec::ResourcePath;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Path of a document: `collection/doc[/collection/doc…]`.
///
/// Always has an even, non-zero number of segments. Keys order like their
/// paths, so all documents of a collection are contiguous in a sorted map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey(ResourcePath);

impl DocumentKey {
    /// Creates a key from a path.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] unless the path has an even,
    /// non-zero number of segments.
    pub fn from_path(path: ResourcePath) -> CoreResult<Self> {
        if !Self::is_document_key(&path) {
            return Err(CoreError::invalid_argument(format!(
                "invalid document key {path}: expected an even number of segments"
            )));
        }
        Ok(Self(path))
    }

    /// Parses a slash-separated path.
    ///
    /// # Errors
    ///
    /// See [`DocumentKey::from_path`].
    pub fn from_string(path: &str) -> CoreResult<Self> {
        Self::from_path(ResourcePath::from_string(path))
    }

    /// Returns true if `path` names a document.
    #[must_use]
    pub fn is_document_key(path: &ResourcePath) -> bool {
        !path.is_empty() && path.len() % 2 == 0
    }

    /// A key sorting before every document under `path`.
    ///
    /// Used only as a range-scan start; it is not a valid document key.
    pub(crate) fn seek(path: &ResourcePath) -> Self {
        Self(path.clone())
    }

    /// Returns the full path.
    #[must_use]
    pub fn path(&self) -> &ResourcePath {
        &self.0
    }

    /// Returns the path of the containing collection.
    #[must_use]
    pub fn collection_path(&self) -> ResourcePath {
        self.0.parent().unwrap_or_default()
    }

    /// Returns the id of the containing collection.
    #[must_use]
    pub fn collection_id(&self) -> &str {
        let segments = self.0.segments();
        segments
            .len()
            .checked_sub(2)
            .map_or("", |i| segments[i].as_str())
    }

    /// Returns true if the document lives directly in a collection named `id`.
    #[must_use]
    pub fn has_collection_id(&self, id: &str) -> bool {
        self.collection_id() == id
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_collection_paths() {
        assert!(DocumentKey::from_string("rooms").is_err());
        assert!(DocumentKey::from_string("").is_err());
        assert!(DocumentKey::from_string("rooms/eros/messages").is_err());
        assert!(DocumentKey::from_string("rooms/eros/messages/1").is_ok());
    }

    #[test]
    fn collection_accessors() {
        let key = DocumentKey::from_string("rooms/eros/messages/1").unwrap();
        assert_eq!(key.collection_id(), "messages");
        assert_eq!(key.collection_path().to_string(), "rooms/eros/messages");
        assert!(key.has_collection_id("messages"));
    }

    #[test]
    fn seek_key_sorts_before_collection_members() {
        let coll = ResourcePath::from_string("rooms");
        let seek = DocumentKey::seek(&coll);
        let first = DocumentKey::from_string("rooms/a").unwrap();
        let outside = DocumentKey::from_string("room/z").unwrap();
        assert!(seek < first);
        assert!(outside < seek);
    }
}
