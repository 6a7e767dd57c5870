//! Mutations and their application to cached documents.

use super::document::{Document, MaybeDocument, NoDocument, UnknownDocument};
use super::document_key::DocumentKey;
use super::field_path::FieldMask;
use super::object_value::ObjectValue;
use super::transform::FieldTransform;
use crate::types::SnapshotVersion;
use driftdb_codec::{Timestamp, Value};
use serde::{Deserialize, Serialize};

/// Condition a document must satisfy for a mutation to apply.
///
/// A mismatch turns the mutation into a no-op; it is never an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precondition {
    /// Always applies.
    #[default]
    None,
    /// Applies only if the document exists (`true`) or not (`false`).
    Exists(bool),
    /// Applies only if the document exists at exactly this version.
    UpdateTime(SnapshotVersion),
}

impl Precondition {
    /// True for [`Precondition::None`].
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Checks the precondition against the current document state.
    #[must_use]
    pub fn is_valid_for(&self, doc: Option<&MaybeDocument>) -> bool {
        match self {
            Self::None => true,
            Self::Exists(true) => matches!(doc, Some(MaybeDocument::Document(_))),
            Self::Exists(false) => matches!(doc, None | Some(MaybeDocument::NoDocument(_))),
            Self::UpdateTime(version) => {
                matches!(doc, Some(MaybeDocument::Document(d)) if d.version == *version)
            }
        }
    }
}

/// What a mutation does to its document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    /// Replaces the whole document.
    Set {
        /// New contents.
        value: ObjectValue,
    },
    /// Updates the masked fields. Masked fields absent from `data` are
    /// deleted.
    Patch {
        /// Field values.
        data: ObjectValue,
        /// Fields touched by the patch.
        mask: FieldMask,
    },
    /// Deletes the document.
    Delete,
    /// Checks the precondition only.
    Verify,
}

/// A single write to one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Document written.
    pub key: DocumentKey,
    /// Condition for the write.
    pub precondition: Precondition,
    /// Kind of write.
    pub kind: MutationKind,
    /// Transforms applied after the write.
    pub field_transforms: Vec<FieldTransform>,
}

/// The server's answer for one mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResult {
    /// Commit version of the document.
    pub version: SnapshotVersion,
    /// One result per field transform, in order.
    pub transform_results: Vec<Value>,
}

impl MutationResult {
    /// Creates a result without transform results.
    #[must_use]
    pub fn new(version: SnapshotVersion) -> Self {
        Self {
            version,
            transform_results: Vec::new(),
        }
    }

    /// Attaches transform results.
    #[must_use]
    pub fn with_transform_results(mut self, results: Vec<Value>) -> Self {
        self.transform_results = results;
        self
    }
}

impl Mutation {
    fn with_kind(key: DocumentKey, kind: MutationKind) -> Self {
        Self {
            key,
            precondition: Precondition::None,
            kind,
            field_transforms: Vec::new(),
        }
    }

    /// A set of the whole document.
    #[must_use]
    pub fn set(key: DocumentKey, value: ObjectValue) -> Self {
        Self::with_kind(key, MutationKind::Set { value })
    }

    /// A patch of the masked fields.
    #[must_use]
    pub fn patch(key: DocumentKey, data: ObjectValue, mask: FieldMask) -> Self {
        Self::with_kind(key, MutationKind::Patch { data, mask })
    }

    /// A delete.
    #[must_use]
    pub fn delete(key: DocumentKey) -> Self {
        Self::with_kind(key, MutationKind::Delete)
    }

    /// A precondition check.
    #[must_use]
    pub fn verify(key: DocumentKey, precondition: Precondition) -> Self {
        Self::with_kind(key, MutationKind::Verify).with_precondition(precondition)
    }

    /// Replaces the precondition.
    #[must_use]
    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }

    /// Replaces the field transforms.
    #[must_use]
    pub fn with_transforms(mut self, transforms: Vec<FieldTransform>) -> Self {
        self.field_transforms = transforms;
        self
    }

    /// Applies the mutation to the local view of a document.
    ///
    /// Returns `doc` unchanged when the precondition fails.
    #[must_use]
    pub fn apply_to_local_view(
        &self,
        doc: Option<&MaybeDocument>,
        local_write_time: Timestamp,
    ) -> Option<MaybeDocument> {
        if !self.precondition.is_valid_for(doc) {
            return doc.cloned();
        }
        let version = post_mutation_version(doc);

        let data = match &self.kind {
            MutationKind::Verify => return doc.cloned(),
            MutationKind::Delete => {
                return Some(MaybeDocument::no_document(self.key.clone(), SnapshotVersion::MIN));
            }
            MutationKind::Set { value } => value.clone(),
            MutationKind::Patch { data, mask } => patch_object(existing_data(doc), data, mask),
        };
        let data = self.apply_transforms(data, doc, |transform, previous| {
            transform
                .operation
                .apply_to_local_view(previous, local_write_time)
        });

        Some(MaybeDocument::Document(Document {
            key: self.key.clone(),
            version,
            data,
            has_local_mutations: true,
            has_committed_mutations: false,
        }))
    }

    /// Applies the acknowledged mutation using the server's result.
    #[must_use]
    pub fn apply_to_remote_document(
        &self,
        doc: Option<&MaybeDocument>,
        result: &MutationResult,
    ) -> Option<MaybeDocument> {
        let data = match &self.kind {
            MutationKind::Verify => return doc.cloned(),
            MutationKind::Delete => {
                return Some(MaybeDocument::NoDocument(NoDocument {
                    key: self.key.clone(),
                    version: result.version,
                    has_committed_mutations: true,
                }));
            }
            MutationKind::Set { value } => value.clone(),
            MutationKind::Patch { data, mask } => {
                if !self.precondition.is_valid_for(doc) {
                    // The server accepted a write we cannot reconstruct.
                    return Some(MaybeDocument::Unknown(UnknownDocument {
                        key: self.key.clone(),
                        version: result.version,
                    }));
                }
                patch_object(existing_data(doc), data, mask)
            }
        };
        let mut results = result.transform_results.iter();
        let data = self.apply_transforms(data, doc, |transform, previous| {
            transform
                .operation
                .apply_to_remote_document(previous, results.next())
        });

        Some(MaybeDocument::Document(Document {
            key: self.key.clone(),
            version: result.version,
            data,
            has_local_mutations: false,
            has_committed_mutations: true,
        }))
    }

    /// Collects the pre-write values of non-idempotent transforms.
    ///
    /// Returns `None` when every transform is idempotent.
    #[must_use]
    pub fn extract_transform_base_value(&self, doc: Option<&MaybeDocument>) -> Option<ObjectValue> {
        let mut base = ObjectValue::empty();
        for transform in &self.field_transforms {
            let existing = doc
                .and_then(MaybeDocument::as_document)
                .and_then(|d| d.data.field(&transform.field));
            if let Some(value) = transform.operation.compute_base_value(existing) {
                base.set(&transform.field, value);
            }
        }
        (!base.is_empty()).then_some(base)
    }

    fn apply_transforms<F>(&self, mut data: ObjectValue, doc: Option<&MaybeDocument>, mut f: F) -> ObjectValue
    where
        F: FnMut(&FieldTransform, Option<&Value>) -> Value,
    {
        let base = doc.and_then(MaybeDocument::as_document);
        for transform in &self.field_transforms {
            let previous = base.and_then(|d| d.data.field(&transform.field));
            let value = f(transform, previous);
            data.set(&transform.field, value);
        }
        data
    }
}

fn post_mutation_version(doc: Option<&MaybeDocument>) -> SnapshotVersion {
    match doc {
        Some(MaybeDocument::Document(d)) => d.version,
        _ => SnapshotVersion::MIN,
    }
}

fn existing_data(doc: Option<&MaybeDocument>) -> ObjectValue {
    doc.and_then(MaybeDocument::as_document)
        .map(|d| d.data.clone())
        .unwrap_or_default()
}

fn patch_object(mut base: ObjectValue, data: &ObjectValue, mask: &FieldMask) -> ObjectValue {
    for path in mask.iter() {
        match data.field(path) {
            Some(value) => base.set(path, value.clone()),
            None => base.delete(path),
        }
    }
    base
}
