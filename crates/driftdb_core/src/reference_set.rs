//! Document ↔ target associations.

use crate::collections::SortedSet;
use crate::model::DocumentKey;
use crate::types::TargetId;
use driftdb_codec::ResourcePath;
use std::collections::BTreeSet;

/// A two-way index of `(document, id)` references.
///
/// Used for target matching keys in the cache and for the documents pinned
/// by live local views. Both indexes are persistent sets, so cloning is
/// cheap.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    by_key: SortedSet<(DocumentKey, TargetId)>,
    by_id: SortedSet<(TargetId, DocumentKey)>,
}

impl ReferenceSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no references are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Number of references.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Adds a reference from `id` to `key`.
    pub fn add_reference(&mut self, key: DocumentKey, id: TargetId) {
        self.by_key = self.by_key.insert((key.clone(), id));
        self.by_id = self.by_id.insert((id, key));
    }

    /// Adds references from `id` to every key.
    pub fn add_references<'a>(&mut self, keys: impl IntoIterator<Item = &'a DocumentKey>, id: TargetId) {
        for key in keys {
            self.add_reference(key.clone(), id);
        }
    }

    /// Removes a reference.
    pub fn remove_reference(&mut self, key: &DocumentKey, id: TargetId) {
        self.by_key = self.by_key.remove(&(key.clone(), id));
        self.by_id = self.by_id.remove(&(id, key.clone()));
    }

    /// Removes references from `id` to every key.
    pub fn remove_references<'a>(&mut self, keys: impl IntoIterator<Item = &'a DocumentKey>, id: TargetId) {
        for key in keys {
            self.remove_reference(key, id);
        }
    }

    /// Removes every reference held by `id` and returns the released keys.
    pub fn remove_references_for_id(&mut self, id: TargetId) -> Vec<DocumentKey> {
        let keys: Vec<DocumentKey> = self.references_for_id(id).into_iter().collect();
        self.remove_references(&keys, id);
        keys
    }

    /// Clears the set and returns every previously referenced key.
    pub fn remove_all_references(&mut self) -> Vec<DocumentKey> {
        let keys: BTreeSet<DocumentKey> = self.by_key.iter().map(|(k, _)| k.clone()).collect();
        *self = Self::default();
        keys.into_iter().collect()
    }

    /// Keys referenced by `id`.
    #[must_use]
    pub fn references_for_id(&self, id: TargetId) -> BTreeSet<DocumentKey> {
        let start = (id, DocumentKey::seek(&ResourcePath::empty()));
        self.by_id
            .iter_from(&start)
            .take_while(|(ref_id, _)| *ref_id == id)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// True if `id` references `key`.
    #[must_use]
    pub fn contains(&self, key: &DocumentKey, id: TargetId) -> bool {
        self.by_key.contains(&(key.clone(), id))
    }

    /// True if any id references `key`.
    #[must_use]
    pub fn contains_key(&self, key: &DocumentKey) -> bool {
        let start = (key.clone(), TargetId::new(i32::MIN));
        self.by_key
            .iter_from(&start)
            .next()
            .is_some_and(|(k, _)| k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    #[test]
    fn add_and_remove() {
        let mut refs = ReferenceSet::new();
        let a = key("c/a");
        let b = key("c/b");
        refs.add_references([&a, &b], TargetId::new(1));
        refs.add_reference(a.clone(), TargetId::new(2));
        assert_eq!(refs.len(), 3);
        assert!(refs.contains_key(&a));

        refs.remove_reference(&a, TargetId::new(1));
        assert!(refs.contains_key(&a));
        assert!(!refs.contains(&a, TargetId::new(1)));

        refs.remove_reference(&a, TargetId::new(2));
        assert!(!refs.contains_key(&a));
        assert!(refs.contains_key(&b));
    }

    #[test]
    fn references_for_id_is_scoped() {
        let mut refs = ReferenceSet::new();
        refs.add_reference(key("c/a"), TargetId::new(1));
        refs.add_reference(key("c/b"), TargetId::new(2));
        refs.add_reference(key("c/c"), TargetId::new(2));
        refs.add_reference(key("c/d"), TargetId::new(3));

        let released = refs.remove_references_for_id(TargetId::new(2));
        assert_eq!(released, vec![key("c/b"), key("c/c")]);
        assert!(refs.references_for_id(TargetId::new(2)).is_empty());
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn key_prefix_does_not_count_as_reference() {
        let mut refs = ReferenceSet::new();
        refs.add_reference(key("c/a/sub/x"), TargetId::new(1));
        assert!(!refs.contains_key(&key("c/a")));
    }

    #[test]
    fn remove_all() {
        let mut refs = ReferenceSet::new();
        refs.add_reference(key("c/a"), TargetId::new(1));
        refs.add_reference(key("c/a"), TargetId::new(2));
        assert_eq!(refs.remove_all_references(), vec![key("c/a")]);
        assert!(refs.is_empty());
    }
}
