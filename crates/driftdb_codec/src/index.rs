//! Index key encoding for typed values.
//!
//! [`IndexByteEncoder`] produces keys whose lexicographic byte order matches
//! the canonical [`Value`] order, in either direction. A composite key is the
//! concatenation of one encoding per field; [`IndexByteEncoder::seed`] lets a
//! caller start from a shared prefix and append the remaining fields.

use crate::byte_string::ByteString;
use crate::ordered::OrderedCodeWriter;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Sort direction of an index segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Smaller values produce smaller keys.
    Ascending,
    /// Smaller values produce larger keys.
    Descending,
}

/// Writes primitive fields in one direction.
pub trait DirectionalIndexByteEncoder {
    /// Writes opaque bytes.
    fn write_bytes(&mut self, value: &[u8]);

    /// Writes a UTF-8 string.
    fn write_string(&mut self, value: &str);

    /// Writes a double.
    fn write_number(&mut self, value: f64);

    /// Writes a bound that sorts after (ascending) or before (descending)
    /// every other field.
    fn write_infinity(&mut self);
}

/// A directional view over an [`IndexByteEncoder`].
#[derive(Debug)]
pub struct DirectionalEncoder<'a> {
    writer: &'a mut OrderedCodeWriter,
    kind: IndexKind,
}

impl DirectionalIndexByteEncoder for DirectionalEncoder<'_> {
    fn write_bytes(&mut self, value: &[u8]) {
        match self.kind {
            IndexKind::Ascending => self.writer.write_bytes_ascending(value),
            IndexKind::Descending => self.writer.write_bytes_descending(value),
        }
    }

    fn write_string(&mut self, value: &str) {
        match self.kind {
            IndexKind::Ascending => self.writer.write_utf8_ascending(value),
            IndexKind::Descending => self.writer.write_utf8_descending(value),
        }
    }

    fn write_number(&mut self, value: f64) {
        match self.kind {
            IndexKind::Ascending => self.writer.write_number_ascending(value),
            IndexKind::Descending => self.writer.write_number_descending(value),
        }
    }

    fn write_infinity(&mut self) {
        match self.kind {
            IndexKind::Ascending => self.writer.write_infinity_ascending(),
            IndexKind::Descending => self.writer.write_infinity_descending(),
        }
    }
}

/// Reusable encoder for index keys.
#[derive(Debug, Clone, Default)]
pub struct IndexByteEncoder {
    writer: OrderedCodeWriter,
}

impl IndexByteEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view that writes in the given direction.
    pub fn for_kind(&mut self, kind: IndexKind) -> DirectionalEncoder<'_> {
        DirectionalEncoder {
            writer: &mut self.writer,
            kind,
        }
    }

    /// Appends a typed value in the given direction.
    pub fn write_value(&mut self, value: &Value, kind: IndexKind) {
        write_index_value(value, &mut self.for_kind(kind));
    }

    /// Starts over from previously encoded bytes.
    pub fn seed(&mut self, encoded: &[u8]) {
        self.writer.seed(encoded);
    }

    /// Clears all written bytes.
    pub fn reset(&mut self) {
        self.writer.reset();
    }

    /// Returns a copy of the bytes written so far.
    #[must_use]
    pub fn encoded_bytes(&self) -> ByteString {
        ByteString::copy_from_slice(self.writer.encoded_bytes())
    }
}

/// Encodes a single value into a fresh key.
#[must_use]
pub fn encode_index_value(value: &Value, kind: IndexKind) -> ByteString {
    let mut encoder = IndexByteEncoder::new();
    encoder.write_value(value, kind);
    encoder.encoded_bytes()
}

// Type labels, written as numbers ahead of each payload. Their order is the
// canonical type order; TERMINATOR ends arrays, maps and references and must
// stay below every other label.
const TERMINATOR: f64 = 2.0;
const NULL: f64 = 5.0;
const BOOLEAN: f64 = 10.0;
const NUMBER: f64 = 15.0;
const TIMESTAMP: f64 = 20.0;
const STRING: f64 = 25.0;
const BYTES: f64 = 30.0;
const REFERENCE: f64 = 37.0;
const GEOPOINT: f64 = 45.0;
const ARRAY: f64 = 50.0;
const MAP: f64 = 55.0;
const REFERENCE_SEGMENT: f64 = 60.0;

/// Writes a typed value with its type label.
///
/// Never fails: every value, including NaN and signed zero, has an encoding.
pub fn write_index_value<E: DirectionalIndexByteEncoder + ?Sized>(value: &Value, encoder: &mut E) {
    match value {
        Value::Null => encoder.write_number(NULL),
        Value::Boolean(b) => {
            encoder.write_number(BOOLEAN);
            encoder.write_number(if *b { 1.0 } else { 0.0 });
        }
        Value::Integer(i) => {
            encoder.write_number(NUMBER);
            let nearest = *i as f64;
            // Exact remainder keeps integers above 2^53 strictly ordered.
            let residual = i128::from(*i) - nearest as i128;
            encoder.write_number(nearest);
            encoder.write_number(residual as f64);
        }
        Value::Double(d) => {
            encoder.write_number(NUMBER);
            if d.is_nan() {
                encoder.write_infinity();
            } else {
                write_double(*d, encoder);
                encoder.write_number(0.0);
            }
        }
        Value::Timestamp(ts) => {
            encoder.write_number(TIMESTAMP);
            encoder.write_number(ts.seconds() as f64);
            encoder.write_number(f64::from(ts.nanos()));
        }
        Value::String(s) => {
            encoder.write_number(STRING);
            encoder.write_string(s);
        }
        Value::Bytes(b) => {
            encoder.write_number(BYTES);
            encoder.write_bytes(b.as_slice());
        }
        Value::Reference(path) => {
            encoder.write_number(REFERENCE);
            for segment in path.segments() {
                encoder.write_number(REFERENCE_SEGMENT);
                encoder.write_string(segment);
            }
            encoder.write_number(TERMINATOR);
        }
        Value::GeoPoint(point) => {
            encoder.write_number(GEOPOINT);
            write_double(point.latitude, encoder);
            write_double(point.longitude, encoder);
        }
        Value::Array(values) => {
            encoder.write_number(ARRAY);
            for element in values {
                write_index_value(element, encoder);
            }
            encoder.write_number(TERMINATOR);
        }
        Value::Map(entries) => {
            encoder.write_number(MAP);
            for (key, element) in entries {
                encoder.write_number(STRING);
                encoder.write_string(key);
                write_index_value(element, encoder);
            }
            encoder.write_number(TERMINATOR);
        }
    }
}

fn write_double<E: DirectionalIndexByteEncoder + ?Sized>(value: f64, encoder: &mut E) {
    if value.is_nan() {
        encoder.write_infinity();
    } else if value == 0.0 {
        // Folds -0.0 into 0.0.
        encoder.write_number(0.0);
    } else {
        encoder.write_number(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ResourcePath;
    use crate::timestamp::{GeoPoint, Timestamp};

    fn asc(value: Value) -> ByteString {
        encode_index_value(&value, IndexKind::Ascending)
    }

    fn desc(value: Value) -> ByteString {
        encode_index_value(&value, IndexKind::Descending)
    }

    fn assert_strictly_ordered(values: Vec<Value>) {
        for pair in values.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(
                encode_index_value(a, IndexKind::Ascending)
                    < encode_index_value(b, IndexKind::Ascending),
                "ascending {a:?} < {b:?}"
            );
            assert!(
                encode_index_value(a, IndexKind::Descending)
                    > encode_index_value(b, IndexKind::Descending),
                "descending {a:?} > {b:?}"
            );
        }
    }

    #[test]
    fn numbers_around_zero() {
        assert!(asc(Value::Integer(-1)) < asc(Value::Integer(0)));
        assert!(asc(Value::Integer(0)) < asc(Value::Integer(1)));
        assert!(desc(Value::Integer(-1)) > desc(Value::Integer(0)));
    }

    #[test]
    fn strings_with_embedded_nul() {
        assert!(asc(Value::from("")) < asc(Value::from("\u{0}")));
        assert!(asc(Value::from("\u{0}")) < asc(Value::from("abc")));
    }

    #[test]
    fn signed_zero_and_nan() {
        assert_eq!(asc(Value::Double(-0.0)), asc(Value::Double(0.0)));
        assert_eq!(asc(Value::Double(0.0)), asc(Value::Integer(0)));
        assert!(asc(Value::Double(f64::INFINITY)) < asc(Value::Double(f64::NAN)));
        assert!(desc(Value::Double(f64::INFINITY)) > desc(Value::Double(f64::NAN)));
        assert!(asc(Value::Double(f64::NAN)) < asc(Value::Timestamp(Timestamp::EPOCH)));
    }

    #[test]
    fn integers_beyond_double_precision() {
        let big = 1i64 << 53;
        assert_strictly_ordered(vec![
            Value::Integer(big - 1),
            Value::Integer(big),
            Value::Integer(big + 1),
            Value::Integer(big + 2),
            Value::Integer(i64::MAX - 1),
            Value::Integer(i64::MAX),
            Value::Double(f64::INFINITY),
        ]);
    }

    #[test]
    fn canonical_type_order() {
        assert_strictly_ordered(vec![
            Value::Null,
            Value::Boolean(false),
            Value::Boolean(true),
            Value::Double(f64::NEG_INFINITY),
            Value::Integer(i64::MIN),
            Value::Double(-1.5),
            Value::Integer(0),
            Value::Double(0.5),
            Value::Double(f64::NAN),
            Value::Timestamp(Timestamp::new(-1, 0).unwrap()),
            Value::Timestamp(Timestamp::new(10, 5).unwrap()),
            Value::from(""),
            Value::from("a"),
            Value::Bytes(ByteString::EMPTY),
            Value::Bytes(ByteString::from(vec![0xff])),
            Value::Reference(ResourcePath::from_string("a/b")),
            Value::Reference(ResourcePath::from_string("a/b/c/d")),
            Value::Reference(ResourcePath::from_string("b")),
            Value::GeoPoint(GeoPoint::new(-10.0, 5.0)),
            Value::GeoPoint(GeoPoint::new(-10.0, 6.0)),
            Value::Array(vec![]),
            Value::Array(vec![Value::Null]),
            Value::Array(vec![Value::Null, Value::Null]),
            Value::Array(vec![Value::Boolean(false)]),
            Value::map::<_, String>([]),
            Value::map([("a", Value::Null)]),
            Value::map([("a", Value::Null), ("b", Value::Null)]),
            Value::map([("b", Value::Null)]),
        ]);
    }

    #[test]
    fn nested_reference_inside_array_is_delimited() {
        let shorter = Value::Array(vec![
            Value::Reference(ResourcePath::from_string("a")),
            Value::from("z"),
        ]);
        let longer = Value::Array(vec![Value::Reference(ResourcePath::from_string("a/b"))]);
        assert!(shorter < longer);
        assert!(asc(shorter) < asc(longer));
    }

    #[test]
    fn composite_keys_preserve_tuple_order() {
        let mut encoder = IndexByteEncoder::new();
        encoder.write_value(&Value::from("c"), IndexKind::Ascending);
        let prefix = encoder.encoded_bytes();

        encoder.write_value(&Value::Integer(5), IndexKind::Ascending);
        encoder.write_value(&Value::from("x"), IndexKind::Ascending);
        let key1 = encoder.encoded_bytes();

        encoder.seed(prefix.as_slice());
        encoder.write_value(&Value::Integer(5), IndexKind::Ascending);
        encoder.write_value(&Value::from("y"), IndexKind::Ascending);
        let key2 = encoder.encoded_bytes();

        assert!(key1 < key2);
    }

    #[test]
    fn infinity_bounds_a_field_range() {
        let mut encoder = IndexByteEncoder::new();
        encoder.write_value(&Value::from("c"), IndexKind::Ascending);
        encoder.for_kind(IndexKind::Ascending).write_infinity();
        let upper = encoder.encoded_bytes();

        encoder.reset();
        encoder.write_value(&Value::from("c"), IndexKind::Ascending);
        encoder.write_value(&Value::map([("z", Value::Null)]), IndexKind::Ascending);
        assert!(encoder.encoded_bytes() < upper);
    }
}
