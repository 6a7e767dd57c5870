//! Field paths and field masks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

const KEY_FIELD_NAME: &str = "__name__";

/// Dotted path to a (possibly nested) document field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Creates a path from segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parses `a.b.c`.
    #[must_use]
    pub fn from_dotted(path: &str) -> Self {
        Self::new(path.split('.').filter(|s| !s.is_empty()))
    }

    /// The pseudo-field holding the document key.
    #[must_use]
    pub fn key_path() -> Self {
        Self::new([KEY_FIELD_NAME])
    }

    /// Returns true for the document key pseudo-field.
    #[must_use]
    pub fn is_key_field(&self) -> bool {
        self.0.len() == 1 && self.0[0] == KEY_FIELD_NAME
    }

    /// Returns the segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns true for the empty path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `self` is a prefix of (or equal to) `other`.
    #[must_use]
    pub fn is_prefix_of(&self, other: &FieldPath) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a == b)
    }

    /// Returns a path with `segment` appended.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// The set of fields a patch writes.
///
/// Fields covered by the mask but missing from the patch data are deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMask(BTreeSet<FieldPath>);

impl FieldMask {
    /// Creates a mask from paths.
    pub fn new(fields: impl IntoIterator<Item = FieldPath>) -> Self {
        Self(fields.into_iter().collect())
    }

    /// Iterates the masked paths.
    pub fn iter(&self) -> impl Iterator<Item = &FieldPath> {
        self.0.iter()
    }

    /// Returns true if some masked path is a prefix of `path`.
    #[must_use]
    pub fn covers(&self, path: &FieldPath) -> bool {
        self.0.iter().any(|f| f.is_prefix_of(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_parsing() {
        let path = FieldPath::from_dotted("a.b.c");
        assert_eq!(path.segments().len(), 3);
        assert_eq!(path.to_string(), "a.b.c");
        assert!(FieldPath::key_path().is_key_field());
    }

    #[test]
    fn mask_covers_nested_fields() {
        let mask = FieldMask::new([FieldPath::from_dotted("a.b")]);
        assert!(mask.covers(&FieldPath::from_dotted("a.b")));
        assert!(mask.covers(&FieldPath::from_dotted("a.b.c")));
        assert!(!mask.covers(&FieldPath::from_dotted("a")));
    }
}
