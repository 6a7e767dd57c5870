//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use driftdb_codec::{ByteString, ResourcePath, Timestamp, Value};
use driftdb_core::{DocumentKey, Mutation, ObjectValue};
use proptest::prelude::*;

/// Strategy for generating path segments.
pub fn segment_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-d]{1,3}").expect("Invalid regex")
}

/// Strategy for generating collection paths (odd segment count).
pub fn collection_path_strategy() -> impl Strategy<Value = ResourcePath> {
    prop::collection::vec(segment_strategy(), 0..2).prop_flat_map(|pairs| {
        segment_strategy().prop_map(move |last| {
            let mut segments = Vec::with_capacity(pairs.len() * 2 + 1);
            for pair in &pairs {
                segments.push(pair.clone());
                segments.push(pair.clone());
            }
            segments.push(last);
            ResourcePath::new(segments)
        })
    })
}

/// Strategy for generating document keys.
pub fn document_key_strategy() -> impl Strategy<Value = DocumentKey> {
    (collection_path_strategy(), segment_strategy()).prop_map(|(collection, id)| {
        DocumentKey::from_path(collection.child(id)).expect("Even-length path")
    })
}

/// Strategy for generating scalar field values.
///
/// Integers stay within `i32` range and doubles are finite or NaN, so
/// every generated pair has an exact order.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Boolean),
        any::<i32>().prop_map(|i| Value::Integer(i64::from(i))),
        (-1.0e9..1.0e9f64).prop_map(Value::Double),
        Just(Value::Double(f64::NAN)),
        Just(Value::Double(-0.0)),
        (-1_000_000i64..1_000_000, 0..1_000_000_000i32)
            .prop_map(|(s, n)| Value::Timestamp(Timestamp::new(s, n).expect("Valid timestamp"))),
        prop::string::string_regex("[a-c\\x00\\x{e9}]{0,4}")
            .expect("Invalid regex")
            .prop_map(Value::String),
        prop::collection::vec(any::<u8>(), 0..4).prop_map(|b| Value::Bytes(ByteString::from(b))),
        prop::collection::vec(segment_strategy(), 1..4)
            .prop_map(|segments| Value::Reference(ResourcePath::new(segments))),
    ]
}

/// Strategy for generating field values, including nested arrays and maps.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_value_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(segment_strategy(), inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Strategy for generating small documents' data.
pub fn object_value_strategy() -> impl Strategy<Value = ObjectValue> {
    prop::collection::btree_map(segment_strategy(), scalar_value_strategy(), 0..4)
        .prop_map(ObjectValue::from_entries)
}

/// Strategy for generating set or delete mutations.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        (document_key_strategy(), object_value_strategy()).prop_map(|(k, v)| Mutation::set(k, v)),
        document_key_strategy().prop_map(Mutation::delete),
    ]
}
