//! Field transforms applied alongside a write.

use super::field_path::FieldPath;
use driftdb_codec::{Timestamp, Value};
use serde::{Deserialize, Serialize};

/// A server-evaluated operation on one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformOperation {
    /// Sets the field to the commit time.
    ServerTimestamp,
    /// Appends elements not already present.
    ArrayUnion(Vec<Value>),
    /// Removes every occurrence of the elements.
    ArrayRemove(Vec<Value>),
    /// Adds a number to the field.
    Increment(Value),
}

impl TransformOperation {
    /// Computes the local estimate of the transformed value.
    ///
    /// Server timestamps are estimated by the batch's local write time.
    #[must_use]
    pub fn apply_to_local_view(&self, previous: Option<&Value>, local_write_time: Timestamp) -> Value {
        match self {
            Self::ServerTimestamp => Value::Timestamp(local_write_time),
            Self::ArrayUnion(elements) => {
                let mut result = coerced_array(previous);
                for element in elements {
                    if !result.contains(element) {
                        result.push(element.clone());
                    }
                }
                Value::Array(result)
            }
            Self::ArrayRemove(elements) => {
                let mut result = coerced_array(previous);
                result.retain(|v| !elements.contains(v));
                Value::Array(result)
            }
            Self::Increment(operand) => {
                let base = self
                    .compute_base_value(previous)
                    .unwrap_or(Value::Integer(0));
                add_numbers(&base, operand)
            }
        }
    }

    /// Computes the committed value from the server's transform result.
    ///
    /// The server reports no result for array transforms, so those are
    /// recomputed exactly like the local view.
    #[must_use]
    pub fn apply_to_remote_document(
        &self,
        previous: Option<&Value>,
        transform_result: Option<&Value>,
    ) -> Value {
        match (self, transform_result) {
            (Self::ArrayUnion(_) | Self::ArrayRemove(_), _) => {
                self.apply_to_local_view(previous, Timestamp::EPOCH)
            }
            (_, Some(result)) => result.clone(),
            (_, None) => Value::Null,
        }
    }

    /// Returns the value this transform needs preserved in a base mutation,
    /// or `None` if the transform is idempotent.
    ///
    /// Increments are not idempotent: replaying one on top of a newer server
    /// value would double count, so the pre-write value is captured.
    #[must_use]
    pub fn compute_base_value(&self, previous: Option<&Value>) -> Option<Value> {
        match self {
            Self::Increment(_) => Some(match previous {
                Some(v) if v.is_number() => v.clone(),
                _ => Value::Integer(0),
            }),
            _ => None,
        }
    }
}

fn coerced_array(previous: Option<&Value>) -> Vec<Value> {
    previous
        .and_then(Value::as_array)
        .map(<[Value]>::to_vec)
        .unwrap_or_default()
}

fn as_double(value: &Value) -> f64 {
    match value {
        Value::Integer(n) => *n as f64,
        Value::Double(d) => *d,
        _ => 0.0,
    }
}

fn add_numbers(base: &Value, operand: &Value) -> Value {
    match (base, operand) {
        (Value::Integer(a), Value::Integer(b)) => Value::Integer(a.saturating_add(*b)),
        _ => Value::Double(as_double(base) + as_double(operand)),
    }
}

/// A transform bound to a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTransform {
    /// Target field.
    pub field: FieldPath,
    /// Operation to apply.
    pub operation: TransformOperation,
}

impl FieldTransform {
    /// Creates a field transform.
    #[must_use]
    pub fn new(field: FieldPath, operation: TransformOperation) -> Self {
        Self { field, operation }
    }
}
