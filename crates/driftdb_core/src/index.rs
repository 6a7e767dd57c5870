//! Composite index keys.
//!
//! An index row is the concatenation of self-delimiting per-field
//! encodings:
//!
//! ```text
//! encode(collection) | encode(field1, dir1) | encode(field2, dir2) | ... | encode(key)
//! ```
//!
//! Because every segment is self-delimiting, byte order of rows matches the
//! tuple order of their values, so an index is a sorted byte map that can
//! be range-scanned with [`FieldIndex::lower_bound`] and
//! [`FieldIndex::upper_bound`].

use crate::model::{Document, FieldPath};
use driftdb_codec::{
    write_index_value, ByteString, DirectionalIndexByteEncoder, IndexByteEncoder, IndexKind, Value,
};
use serde::{Deserialize, Serialize};

/// One indexed field and its direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSegment {
    /// Indexed field.
    pub field: FieldPath,
    /// Sort direction.
    pub kind: IndexKind,
}

impl IndexSegment {
    /// Creates a segment.
    #[must_use]
    pub fn new(field: FieldPath, kind: IndexKind) -> Self {
        Self { field, kind }
    }
}

/// An index over documents of one collection group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIndex {
    collection_group: String,
    segments: Vec<IndexSegment>,
}

impl FieldIndex {
    /// Creates an index on `collection_group` over `segments`.
    #[must_use]
    pub fn new(collection_group: impl Into<String>, segments: Vec<IndexSegment>) -> Self {
        Self {
            collection_group: collection_group.into(),
            segments,
        }
    }

    /// Returns the collection group.
    #[must_use]
    pub fn collection_group(&self) -> &str {
        &self.collection_group
    }

    /// Returns the segments.
    #[must_use]
    pub fn segments(&self) -> &[IndexSegment] {
        &self.segments
    }

    /// Encodes the index row for `doc`.
    ///
    /// Returns `None` if the document belongs to another collection group
    /// or lacks one of the indexed fields.
    #[must_use]
    pub fn encode_entry(&self, doc: &Document) -> Option<ByteString> {
        if !doc.key.has_collection_id(&self.collection_group) {
            return None;
        }
        let values = self
            .segments
            .iter()
            .map(|segment| doc.field(&segment.field))
            .collect::<Option<Vec<Value>>>()?;

        let mut encoder = IndexByteEncoder::new();
        self.write_prefix(&mut encoder, &values);
        // Key breaks ties between documents with equal field values.
        encoder.write_value(&Value::Reference(doc.key.path().clone()), IndexKind::Ascending);
        Some(encoder.encoded_bytes())
    }

    /// Smallest row whose leading fields equal `values`.
    #[must_use]
    pub fn lower_bound(&self, values: &[Value]) -> ByteString {
        let mut encoder = IndexByteEncoder::new();
        self.write_prefix(&mut encoder, values);
        encoder.encoded_bytes()
    }

    /// Sorts after every row whose leading fields equal `values`.
    #[must_use]
    pub fn upper_bound(&self, values: &[Value]) -> ByteString {
        let mut encoder = IndexByteEncoder::new();
        self.write_prefix(&mut encoder, values);
        encoder.for_kind(IndexKind::Ascending).write_infinity();
        encoder.encoded_bytes()
    }

    fn write_prefix(&self, encoder: &mut IndexByteEncoder, values: &[Value]) {
        encoder
            .for_kind(IndexKind::Ascending)
            .write_string(&self.collection_group);
        for (segment, value) in self.segments.iter().zip(values) {
            encoder.write_value(value, segment.kind);
        }
    }
}

/// Encodes a composite key from a collection or path prefix followed by
/// directional field values.
#[must_use]
pub fn encode_composite_key(prefix: &str, fields: &[(Value, IndexKind)]) -> ByteString {
    let mut encoder = IndexByteEncoder::new();
    encoder.for_kind(IndexKind::Ascending).write_string(prefix);
    for (value, kind) in fields {
        write_index_value(value, &mut encoder.for_kind(*kind));
    }
    encoder.encoded_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentKey, ObjectValue};
    use crate::types::SnapshotVersion;

    fn doc(path: &str, a: i64, b: &str) -> Document {
        Document::new(
            DocumentKey::from_string(path).unwrap(),
            SnapshotVersion::MIN,
            ObjectValue::from_entries([("a", Value::Integer(a)), ("b", Value::from(b))]),
        )
    }

    fn index(b_kind: IndexKind) -> FieldIndex {
        FieldIndex::new(
            "c",
            vec![
                IndexSegment::new(FieldPath::from_dotted("a"), IndexKind::Ascending),
                IndexSegment::new(FieldPath::from_dotted("b"), b_kind),
            ],
        )
    }

    #[test]
    fn composite_keys_order_by_trailing_field() {
        let k1 = encode_composite_key(
            "c",
            &[(Value::Integer(5), IndexKind::Ascending), (Value::from("x"), IndexKind::Ascending)],
        );
        let k2 = encode_composite_key(
            "c",
            &[(Value::Integer(5), IndexKind::Ascending), (Value::from("y"), IndexKind::Ascending)],
        );
        assert!(k1 < k2);
    }

    #[test]
    fn leading_field_dominates() {
        let asc = |a: i64, b: &str| {
            encode_composite_key(
                "c",
                &[(Value::Integer(a), IndexKind::Ascending), (Value::from(b), IndexKind::Ascending)],
            )
        };
        assert!(asc(4, "z") < asc(5, "a"));
    }

    #[test]
    fn descending_segment_reverses_order() {
        let idx = index(IndexKind::Descending);
        let x = idx.encode_entry(&doc("c/1", 5, "x")).unwrap();
        let y = idx.encode_entry(&doc("c/2", 5, "y")).unwrap();
        assert!(x > y);
    }

    #[test]
    fn entries_fall_within_bounds() {
        let idx = index(IndexKind::Ascending);
        let entry = idx.encode_entry(&doc("c/1", 5, "x")).unwrap();
        let five = [Value::Integer(5)];
        assert!(idx.lower_bound(&five) <= entry);
        assert!(entry < idx.upper_bound(&five));
        assert!(entry < idx.lower_bound(&[Value::Integer(6)]));
    }

    #[test]
    fn missing_fields_and_other_groups_are_skipped() {
        let idx = index(IndexKind::Ascending);
        assert!(idx.encode_entry(&doc("other/1", 1, "x")).is_none());
        let partial = Document::new(
            DocumentKey::from_string("c/1").unwrap(),
            SnapshotVersion::MIN,
            ObjectValue::from_entries([("a", Value::Integer(1))]),
        );
        assert!(idx.encode_entry(&partial).is_none());
    }

    #[test]
    fn equal_values_tie_break_on_key() {
        let idx = index(IndexKind::Ascending);
        let first = idx.encode_entry(&doc("c/a", 1, "x")).unwrap();
        let second = idx.encode_entry(&doc("c/b", 1, "x")).unwrap();
        assert!(first < second);
    }
}
