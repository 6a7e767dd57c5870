//! Persistent sorted set.

use super::sorted_map::{Comparator, Iter, NaturalOrder, SortedMap};
use std::fmt;

/// An immutable sorted set sharing structure between versions.
pub struct SortedSet<K, C = NaturalOrder> {
    map: SortedMap<K, (), C>,
}

impl<K, C: Clone> Clone for SortedSet<K, C> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
        }
    }
}

impl<K, C: Default> Default for SortedSet<K, C> {
    fn default() -> Self {
        Self {
            map: SortedMap::default(),
        }
    }
}

impl<K: Ord + Clone> SortedSet<K, NaturalOrder> {
    /// Creates an empty set ordered by `K: Ord`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K: Clone, C: Comparator<K>> SortedSet<K, C> {
    /// Creates an empty set ordered by `comparator`.
    #[must_use]
    pub fn with_comparator(comparator: C) -> Self {
        Self {
            map: SortedMap::with_comparator(comparator),
        }
    }

    /// Returns a set that also contains `key`.
    #[must_use]
    pub fn insert(&self, key: K) -> Self {
        Self {
            map: self.map.insert(key, ()),
        }
    }

    /// Returns a set without `key`.
    #[must_use]
    pub fn remove(&self, key: &K) -> Self {
        Self {
            map: self.map.remove(key),
        }
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the smallest element.
    pub fn first(&self) -> Option<&K> {
        self.map.min_key()
    }

    /// Returns the largest element.
    pub fn last(&self) -> Option<&K> {
        self.map.max_key()
    }

    /// Returns the rank of `key`.
    pub fn index_of(&self, key: &K) -> Option<usize> {
        self.map.index_of(key)
    }

    /// Iterates elements in ascending order.
    pub fn iter(&self) -> Keys<'_, K> {
        Keys(self.map.iter())
    }

    /// Iterates elements at or after `start`, ascending.
    pub fn iter_from<'a>(&'a self, start: &K) -> Keys<'a, K> {
        Keys(self.map.iter_from(start))
    }

    /// Iterates elements in descending order.
    pub fn reverse_iter(&self) -> Keys<'_, K> {
        Keys(self.map.reverse_iter())
    }

    /// Iterates elements at or before `start`, descending.
    pub fn reverse_iter_from<'a>(&'a self, start: &K) -> Keys<'a, K> {
        Keys(self.map.reverse_iter_from(start))
    }

    /// Returns the union of both sets, inserting the smaller into the larger.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let (mut result, smaller) = if self.len() >= other.len() {
            (self.clone(), other)
        } else {
            (other.clone(), self)
        };
        for key in smaller.iter() {
            result = result.insert(key.clone());
        }
        result
    }

    /// Verifies the underlying tree invariants.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn check_invariants(&self) -> Result<usize, String> {
        self.map.check_invariants()
    }
}

impl<K: Clone, C: Comparator<K> + Default> FromIterator<K> for SortedSet<K, C> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), |set, k| set.insert(k))
    }
}

impl<'a, K: Clone, C: Comparator<K>> IntoIterator for &'a SortedSet<K, C> {
    type Item = &'a K;
    type IntoIter = Keys<'a, K>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: fmt::Debug + Clone, C: Comparator<K>> fmt::Debug for SortedSet<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<K: PartialEq + Clone, C: Comparator<K>> PartialEq for SortedSet<K, C> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

/// Iterator over the elements of a [`SortedSet`].
pub struct Keys<'a, K>(Iter<'a, K, ()>);

impl<'a, K> Iterator for Keys<'a, K> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(k, _)| k)
    }
}
