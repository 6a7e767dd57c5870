//! Documents as known to the local cache.

use super::document_key::DocumentKey;
use super::field_path::FieldPath;
use super::object_value::ObjectValue;
use crate::types::SnapshotVersion;
use driftdb_codec::Value;
use serde::{Deserialize, Serialize};

/// A document that exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document key.
    pub key: DocumentKey,
    /// Version the data was read at, or [`SnapshotVersion::MIN`] for
    /// documents created locally.
    pub version: SnapshotVersion,
    /// Field data.
    pub data: ObjectValue,
    /// Pending local writes are reflected in `data`.
    pub has_local_mutations: bool,
    /// An acknowledged write is reflected but no snapshot has confirmed it.
    pub has_committed_mutations: bool,
}

impl Document {
    /// Creates a server-confirmed document.
    #[must_use]
    pub fn new(key: DocumentKey, version: SnapshotVersion, data: ObjectValue) -> Self {
        Self {
            key,
            version,
            data,
            has_local_mutations: false,
            has_committed_mutations: false,
        }
    }

    /// Returns the value at `path`. The key pseudo-field resolves to a
    /// reference to this document.
    #[must_use]
    pub fn field(&self, path: &FieldPath) -> Option<Value> {
        if path.is_key_field() {
            return Some(Value::Reference(self.key.path().clone()));
        }
        self.data.field(path).cloned()
    }

    /// True while some write is not yet confirmed by a snapshot.
    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        self.has_local_mutations || self.has_committed_mutations
    }
}

/// A document known not to exist at `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoDocument {
    /// Document key.
    pub key: DocumentKey,
    /// Version at which the absence was observed.
    pub version: SnapshotVersion,
    /// The deletion comes from an acknowledged local write.
    pub has_committed_mutations: bool,
}

/// A document whose state is unknown, e.g. after a patch whose precondition
/// failed on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownDocument {
    /// Document key.
    pub key: DocumentKey,
    /// Commit version of the write that produced this entry.
    pub version: SnapshotVersion,
}

/// Any cached document state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaybeDocument {
    /// The document exists.
    Document(Document),
    /// The document does not exist.
    NoDocument(NoDocument),
    /// The document's state is unknown.
    Unknown(UnknownDocument),
}

impl MaybeDocument {
    /// Creates a tombstone.
    #[must_use]
    pub fn no_document(key: DocumentKey, version: SnapshotVersion) -> Self {
        Self::NoDocument(NoDocument {
            key,
            version,
            has_committed_mutations: false,
        })
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> &DocumentKey {
        match self {
            Self::Document(d) => &d.key,
            Self::NoDocument(d) => &d.key,
            Self::Unknown(d) => &d.key,
        }
    }

    /// Returns the version.
    #[must_use]
    pub fn version(&self) -> SnapshotVersion {
        match self {
            Self::Document(d) => d.version,
            Self::NoDocument(d) => d.version,
            Self::Unknown(d) => d.version,
        }
    }

    /// True if a write not yet confirmed by a snapshot shaped this state.
    ///
    /// Unknown documents always report pending writes.
    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        match self {
            Self::Document(d) => d.has_pending_writes(),
            Self::NoDocument(d) => d.has_committed_mutations,
            Self::Unknown(_) => true,
        }
    }

    /// Returns the existing document, if any.
    #[must_use]
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Converts into the existing document, if any.
    #[must_use]
    pub fn into_document(self) -> Option<Document> {
        match self {
            Self::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Returns true if the document exists.
    #[must_use]
    pub fn is_document(&self) -> bool {
        matches!(self, Self::Document(_))
    }

    /// Returns true for a tombstone.
    #[must_use]
    pub fn is_no_document(&self) -> bool {
        matches!(self, Self::NoDocument(_))
    }
}

impl From<Document> for MaybeDocument {
    fn from(doc: Document) -> Self {
        Self::Document(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DocumentKey {
        DocumentKey::from_string("coll/doc").unwrap()
    }

    #[test]
    fn pending_writes() {
        let mut doc = Document::new(key(), SnapshotVersion::MIN, ObjectValue::empty());
        assert!(!doc.has_pending_writes());
        doc.has_committed_mutations = true;
        assert!(MaybeDocument::from(doc).has_pending_writes());
        let unknown = MaybeDocument::Unknown(UnknownDocument {
            key: key(),
            version: SnapshotVersion::from_micros(1),
        });
        assert!(unknown.has_pending_writes());
        assert!(!MaybeDocument::no_document(key(), SnapshotVersion::MIN).has_pending_writes());
    }

    #[test]
    fn key_field_resolves_to_reference() {
        let doc = Document::new(key(), SnapshotVersion::MIN, ObjectValue::empty());
        assert_eq!(
            doc.field(&FieldPath::key_path()),
            Some(Value::Reference(key().path().clone()))
        );
    }
}
