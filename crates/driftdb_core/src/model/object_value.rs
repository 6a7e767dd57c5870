//! Document field data.

use super::field_path::{FieldMask, FieldPath};
use driftdb_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The top-level map of a document's fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectValue(BTreeMap<String, Value>);

impl ObjectValue {
    /// An object with no fields.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds an object from top-level `(name, value)` pairs.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Returns the top-level fields.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    /// Returns true if the object has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the value at `path`.
    #[must_use]
    pub fn field(&self, path: &FieldPath) -> Option<&Value> {
        let (last, parents) = path.segments().split_last()?;
        let mut current = &self.0;
        for segment in parents {
            current = current.get(segment)?.as_map()?;
        }
        current.get(last)
    }

    /// Sets the value at `path`, creating intermediate maps and replacing
    /// non-map values on the way.
    pub fn set(&mut self, path: &FieldPath, value: Value) {
        let Some((last, parents)) = path.segments().split_last() else {
            return;
        };
        let mut current = &mut self.0;
        for segment in parents {
            let entry = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Map(BTreeMap::new()));
            if !matches!(entry, Value::Map(_)) {
                *entry = Value::Map(BTreeMap::new());
            }
            let Value::Map(next) = entry else {
                return;
            };
            current = next;
        }
        current.insert(last.clone(), value);
    }

    /// Removes the value at `path`, if present.
    pub fn delete(&mut self, path: &FieldPath) {
        let Some((last, parents)) = path.segments().split_last() else {
            return;
        };
        let mut current = &mut self.0;
        for segment in parents {
            match current.get_mut(segment) {
                Some(Value::Map(next)) => current = next,
                _ => return,
            }
        }
        current.remove(last);
    }

    /// Returns the paths of every leaf field. Empty nested maps count as
    /// leaves.
    #[must_use]
    pub fn field_mask(&self) -> FieldMask {
        fn collect(map: &BTreeMap<String, Value>, prefix: &FieldPath, out: &mut Vec<FieldPath>) {
            for (name, value) in map {
                let path = prefix.child(name.clone());
                match value {
                    Value::Map(nested) if !nested.is_empty() => collect(nested, &path, out),
                    _ => out.push(path),
                }
            }
        }
        let mut out = Vec::new();
        collect(&self.0, &FieldPath::new(Vec::<String>::new()), &mut out);
        FieldMask::new(out)
    }

    /// Converts into a map value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Map(self.0)
    }
}

impl From<BTreeMap<String, Value>> for ObjectValue {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> FieldPath {
        FieldPath::from_dotted(p)
    }

    #[test]
    fn nested_get_set_delete() {
        let mut obj = ObjectValue::from_entries([("a", Value::Integer(1))]);
        obj.set(&path("b.c"), Value::from("x"));
        assert_eq!(obj.field(&path("b.c")), Some(&Value::from("x")));

        // Setting through a scalar replaces it with a map.
        obj.set(&path("a.d"), Value::Boolean(true));
        assert_eq!(obj.field(&path("a.d")), Some(&Value::Boolean(true)));

        obj.delete(&path("b.c"));
        assert_eq!(obj.field(&path("b.c")), None);
        assert_eq!(obj.field(&path("b")), Some(&Value::Map(BTreeMap::new())));
        obj.delete(&path("missing.field"));
    }

    #[test]
    fn field_mask_lists_leaves() {
        let mut obj = ObjectValue::empty();
        obj.set(&path("a.b"), Value::Integer(1));
        obj.set(&path("c"), Value::Null);
        obj.set(&path("e"), Value::Map(BTreeMap::new()));
        let mask: Vec<_> = obj.field_mask().iter().map(ToString::to_string).collect();
        assert_eq!(mask, vec!["a.b", "c", "e"]);
    }
}
