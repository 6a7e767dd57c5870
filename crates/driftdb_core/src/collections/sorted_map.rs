//! Persistent sorted map backed by a left-leaning red-black tree.
//!
//! Every update copies the nodes on the path from the root to the change
//! and shares the rest, so a map handed to a reader stays valid and
//! unchanged while newer versions are built from it.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Total order over keys, injected into a [`SortedMap`].
pub trait Comparator<K>: Clone {
    /// Compares two keys.
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Orders keys by their [`Ord`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrder;

impl<K: Ord> Comparator<K> for NaturalOrder {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

impl<K, F> Comparator<K> for F
where
    F: Fn(&K, &K) -> Ordering + Clone,
{
    fn compare(&self, a: &K, b: &K) -> Ordering {
        self(a, b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

impl Color {
    fn flip(self) -> Self {
        match self {
            Color::Red => Color::Black,
            Color::Black => Color::Red,
        }
    }
}

type Link<K, V> = Option<Arc<Node<K, V>>>;

#[derive(Debug, Clone)]
struct Node<K, V> {
    key: K,
    value: V,
    color: Color,
    left: Link<K, V>,
    right: Link<K, V>,
    size: usize,
}

fn size<K, V>(link: &Link<K, V>) -> usize {
    link.as_ref().map_or(0, |n| n.size)
}

fn is_red<K, V>(link: &Link<K, V>) -> bool {
    link.as_ref().is_some_and(|n| n.color == Color::Red)
}

fn is_left_red<K, V>(link: &Link<K, V>) -> bool {
    link.as_ref().is_some_and(|n| is_red(&n.left))
}

impl<K: Clone, V: Clone> Node<K, V> {
    fn new(key: K, value: V, color: Color, left: Link<K, V>, right: Link<K, V>) -> Self {
        let size = size(&left) + size(&right) + 1;
        Self {
            key,
            value,
            color,
            left,
            right,
            size,
        }
    }

    fn with_left(self, left: Link<K, V>) -> Self {
        Self::new(self.key, self.value, self.color, left, self.right)
    }

    fn with_right(self, right: Link<K, V>) -> Self {
        Self::new(self.key, self.value, self.color, self.left, right)
    }

    fn with_color(self, color: Color) -> Self {
        Self { color, ..self }
    }

    fn min(&self) -> &Self {
        let mut node = self;
        while let Some(left) = &node.left {
            node = left;
        }
        node
    }
}

fn rotate_left<K: Clone, V: Clone>(n: Node<K, V>) -> Node<K, V> {
    let Some(right) = n.right.clone() else {
        return n;
    };
    let color = n.color;
    let lowered = Node::new(n.key, n.value, Color::Red, n.left, right.left.clone());
    Node::new(
        right.key.clone(),
        right.value.clone(),
        color,
        Some(Arc::new(lowered)),
        right.right.clone(),
    )
}

fn rotate_right<K: Clone, V: Clone>(n: Node<K, V>) -> Node<K, V> {
    let Some(left) = n.left.clone() else {
        return n;
    };
    let color = n.color;
    let lowered = Node::new(n.key, n.value, Color::Red, left.right.clone(), n.right);
    Node::new(
        left.key.clone(),
        left.value.clone(),
        color,
        left.left.clone(),
        Some(Arc::new(lowered)),
    )
}

fn flip_link<K: Clone, V: Clone>(link: &Link<K, V>) -> Link<K, V> {
    link.as_ref().map(|n| {
        let color = n.color.flip();
        Arc::new(Node::clone(n).with_color(color))
    })
}

fn color_flip<K: Clone, V: Clone>(n: Node<K, V>) -> Node<K, V> {
    let left = flip_link(&n.left);
    let right = flip_link(&n.right);
    let color = n.color.flip();
    Node::new(n.key, n.value, color, left, right)
}

fn fix_up<K: Clone, V: Clone>(mut n: Node<K, V>) -> Node<K, V> {
    if is_red(&n.right) && !is_red(&n.left) {
        n = rotate_left(n);
    }
    if is_red(&n.left) && is_left_red(&n.left) {
        n = rotate_right(n);
    }
    if is_red(&n.left) && is_red(&n.right) {
        n = color_flip(n);
    }
    n
}

fn move_red_left<K: Clone, V: Clone>(n: Node<K, V>) -> Node<K, V> {
    let mut n = color_flip(n);
    if is_left_red(&n.right) {
        if let Some(right) = n.right.clone() {
            let rotated = rotate_right(Node::clone(&right));
            n = n.with_right(Some(Arc::new(rotated)));
            n = rotate_left(n);
            n = color_flip(n);
        }
    }
    n
}

fn move_red_right<K: Clone, V: Clone>(n: Node<K, V>) -> Node<K, V> {
    let mut n = color_flip(n);
    if is_left_red(&n.left) {
        n = rotate_right(n);
        n = color_flip(n);
    }
    n
}

fn insert<K: Clone, V: Clone, C: Comparator<K>>(
    link: &Link<K, V>,
    key: K,
    value: V,
    cmp: &C,
) -> Node<K, V> {
    let Some(n) = link else {
        return Node::new(key, value, Color::Red, None, None);
    };
    let n = match cmp.compare(&key, &n.key) {
        Ordering::Less => {
            let left = insert(&n.left, key, value, cmp);
            Node::clone(n).with_left(Some(Arc::new(left)))
        }
        Ordering::Equal => Node::new(key, value, n.color, n.left.clone(), n.right.clone()),
        Ordering::Greater => {
            let right = insert(&n.right, key, value, cmp);
            Node::clone(n).with_right(Some(Arc::new(right)))
        }
    };
    fix_up(n)
}

fn remove_min<K: Clone, V: Clone>(n: Node<K, V>) -> Link<K, V> {
    if n.left.is_none() {
        return None;
    }
    let mut n = n;
    if !is_red(&n.left) && !is_left_red(&n.left) {
        n = move_red_left(n);
    }
    let left = n.left.as_deref().and_then(|l| remove_min(l.clone()));
    Some(Arc::new(fix_up(n.with_left(left))))
}

/// Removes `key`, which must be present in the subtree rooted at `n`.
fn remove<K: Clone, V: Clone, C: Comparator<K>>(n: Node<K, V>, key: &K, cmp: &C) -> Link<K, V> {
    let mut n = n;
    if cmp.compare(key, &n.key) == Ordering::Less {
        if !is_red(&n.left) && !is_left_red(&n.left) {
            n = move_red_left(n);
        }
        let left = n.left.as_deref().and_then(|l| remove(l.clone(), key, cmp));
        n = n.with_left(left);
    } else {
        if is_red(&n.left) {
            n = rotate_right(n);
        }
        if cmp.compare(key, &n.key) == Ordering::Equal && n.right.is_none() {
            return None;
        }
        if !is_red(&n.right) && !is_left_red(&n.right) {
            n = move_red_right(n);
        }
        if cmp.compare(key, &n.key) == Ordering::Equal {
            let Some(right) = n.right.clone() else {
                return None;
            };
            let successor = right.min();
            let (succ_key, succ_value) = (successor.key.clone(), successor.value.clone());
            let right = remove_min(Node::clone(&right));
            n = Node::new(succ_key, succ_value, n.color, n.left, right);
        } else {
            let right = n.right.as_deref().and_then(|r| remove(r.clone(), key, cmp));
            n = n.with_right(right);
        }
    }
    Some(Arc::new(fix_up(n)))
}

/// An immutable sorted map with structural sharing.
///
/// `insert` and `remove` return a new map in O(log n); the receiver is left
/// untouched. Cloning a map is O(1).
///
/// # Example
///
/// ```
/// use driftdb_core::collections::SortedMap;
///
/// let m1: SortedMap<i32, &str> = SortedMap::new().insert(1, "a");
/// let m2 = m1.insert(1, "b");
/// assert_eq!(m1.get(&1), Some(&"a"));
/// assert_eq!(m2.get(&1), Some(&"b"));
/// ```
pub struct SortedMap<K, V, C = NaturalOrder> {
    root: Link<K, V>,
    comparator: C,
}

impl<K, V, C: Clone> Clone for SortedMap<K, V, C> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            comparator: self.comparator.clone(),
        }
    }
}

impl<K, V, C: Default> Default for SortedMap<K, V, C> {
    fn default() -> Self {
        Self {
            root: None,
            comparator: C::default(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> SortedMap<K, V, NaturalOrder> {
    /// Creates an empty map ordered by `K: Ord`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K: Clone, V: Clone, C: Comparator<K>> SortedMap<K, V, C> {
    /// Creates an empty map ordered by `comparator`.
    #[must_use]
    pub fn with_comparator(comparator: C) -> Self {
        Self {
            root: None,
            comparator,
        }
    }

    /// Returns the comparator.
    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    /// Returns a map with `key` bound to `value`, replacing any prior value.
    #[must_use]
    pub fn insert(&self, key: K, value: V) -> Self {
        let root = insert(&self.root, key, value, &self.comparator).with_color(Color::Black);
        Self {
            root: Some(Arc::new(root)),
            comparator: self.comparator.clone(),
        }
    }

    /// Returns a map without `key`. Removing a missing key returns a clone.
    #[must_use]
    pub fn remove(&self, key: &K) -> Self {
        let Some(root) = self.root.as_deref() else {
            return self.clone();
        };
        if !self.contains_key(key) {
            return self.clone();
        }

        let mut root = root.clone();
        if !is_red(&root.left) && !is_red(&root.right) {
            root = root.with_color(Color::Red);
        }
        let root = remove(root, key, &self.comparator)
            .map(|n| Arc::new(Node::clone(&n).with_color(Color::Black)));
        Self {
            root,
            comparator: self.comparator.clone(),
        }
    }

    /// Returns the value bound to `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        let mut node = self.root.as_deref();
        while let Some(n) = node {
            match self.comparator.compare(key, &n.key) {
                Ordering::Less => node = n.left.as_deref(),
                Ordering::Equal => return Some(&n.value),
                Ordering::Greater => node = n.right.as_deref(),
            }
        }
        None
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        size(&self.root)
    }

    /// Returns true if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Returns the rank of `key`, i.e. how many keys sort before it.
    pub fn index_of(&self, key: &K) -> Option<usize> {
        let mut pruned = 0;
        let mut node = self.root.as_deref();
        while let Some(n) = node {
            match self.comparator.compare(key, &n.key) {
                Ordering::Equal => return Some(pruned + size(&n.left)),
                Ordering::Less => node = n.left.as_deref(),
                Ordering::Greater => {
                    pruned += size(&n.left) + 1;
                    node = n.right.as_deref();
                }
            }
        }
        None
    }

    /// Returns the smallest entry.
    pub fn first(&self) -> Option<(&K, &V)> {
        self.root.as_deref().map(|n| {
            let min = n.min();
            (&min.key, &min.value)
        })
    }

    /// Returns the largest entry.
    pub fn last(&self) -> Option<(&K, &V)> {
        let mut node = self.root.as_deref()?;
        while let Some(right) = node.right.as_deref() {
            node = right;
        }
        Some((&node.key, &node.value))
    }

    /// Returns the smallest key.
    pub fn min_key(&self) -> Option<&K> {
        self.first().map(|(k, _)| k)
    }

    /// Returns the largest key.
    pub fn max_key(&self) -> Option<&K> {
        self.last().map(|(k, _)| k)
    }

    /// Returns the largest key strictly smaller than `key`.
    pub fn predecessor_key(&self, key: &K) -> Option<&K> {
        self.reverse_iter_from(key)
            .map(|(k, _)| k)
            .find(|k| self.comparator.compare(k, key) == Ordering::Less)
    }

    /// Iterates all entries in ascending key order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(self.root.as_deref(), false, |_| Ordering::Greater)
    }

    /// Iterates entries with keys at or after `start`, ascending.
    pub fn iter_from<'a>(&'a self, start: &K) -> Iter<'a, K, V> {
        Iter::new(self.root.as_deref(), false, |k| {
            self.comparator.compare(k, start)
        })
    }

    /// Iterates all entries in descending key order.
    pub fn reverse_iter(&self) -> Iter<'_, K, V> {
        Iter::new(self.root.as_deref(), true, |_| Ordering::Less)
    }

    /// Iterates entries with keys at or before `start`, descending.
    pub fn reverse_iter_from<'a>(&'a self, start: &K) -> Iter<'a, K, V> {
        Iter::new(self.root.as_deref(), true, |k| {
            self.comparator.compare(k, start)
        })
    }

    /// Iterates keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    /// Iterates values in ascending key order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    /// Verifies the red-black invariants and returns the black height.
    ///
    /// Checks key order, cached subtree sizes, a black root, no red right
    /// links, no two consecutive red links and equal black height on every
    /// root-to-leaf path.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn check_invariants(&self) -> Result<usize, String> {
        if is_red(&self.root) {
            return Err("root is red".to_string());
        }
        self.check_node(self.root.as_deref(), None, None)
    }

    fn check_node(
        &self,
        node: Option<&Node<K, V>>,
        lower: Option<&K>,
        upper: Option<&K>,
    ) -> Result<usize, String> {
        let Some(n) = node else {
            return Ok(1);
        };
        if lower.is_some_and(|l| self.comparator.compare(&n.key, l) != Ordering::Greater)
            || upper.is_some_and(|u| self.comparator.compare(&n.key, u) != Ordering::Less)
        {
            return Err("keys out of order".to_string());
        }
        if is_red(&n.right) {
            return Err("right-leaning red link".to_string());
        }
        if n.color == Color::Red && is_red(&n.left) {
            return Err("two consecutive red links".to_string());
        }
        if n.size != size(&n.left) + size(&n.right) + 1 {
            return Err("stale subtree size".to_string());
        }
        let left = self.check_node(n.left.as_deref(), lower, Some(&n.key))?;
        let right = self.check_node(n.right.as_deref(), Some(&n.key), upper)?;
        if left != right {
            return Err(format!("unequal black height: {left} vs {right}"));
        }
        Ok(left + usize::from(n.color == Color::Black))
    }
}

impl<K: Clone, V: Clone, C: Comparator<K> + Default> FromIterator<(K, V)> for SortedMap<K, V, C> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::default(), |map, (k, v)| map.insert(k, v))
    }
}

impl<'a, K: Clone, V: Clone, C: Comparator<K>> IntoIterator for &'a SortedMap<K, V, C> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: fmt::Debug + Clone, V: fmt::Debug + Clone, C: Comparator<K>> fmt::Debug
    for SortedMap<K, V, C>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Lazy in-order iterator over a [`SortedMap`].
///
/// Holds at most one root-to-leaf path of node references.
pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
    reverse: bool,
}

impl<'a, K, V> Iter<'a, K, V> {
    /// `position(key)` tells where `key` lies relative to the start bound:
    /// `Less` skips it, `Equal` starts at it, `Greater` keeps it.
    fn new(root: Option<&'a Node<K, V>>, reverse: bool, position: impl Fn(&K) -> Ordering) -> Self {
        let mut stack = Vec::new();
        let mut node = root;
        while let Some(n) = node {
            let mut cmp = position(&n.key);
            if reverse {
                cmp = cmp.reverse();
            }
            match cmp {
                Ordering::Less => {
                    node = if reverse {
                        n.left.as_deref()
                    } else {
                        n.right.as_deref()
                    };
                }
                Ordering::Equal => {
                    stack.push(n);
                    break;
                }
                Ordering::Greater => {
                    stack.push(n);
                    node = if reverse {
                        n.right.as_deref()
                    } else {
                        n.left.as_deref()
                    };
                }
            }
        }
        Self { stack, reverse }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.stack.pop()?;
        let mut node = if self.reverse {
            n.left.as_deref()
        } else {
            n.right.as_deref()
        };
        while let Some(child) = node {
            self.stack.push(child);
            node = if self.reverse {
                child.right.as_deref()
            } else {
                child.left.as_deref()
            };
        }
        Some((&n.key, &n.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn map_of(keys: &[i32]) -> SortedMap<i32, i32> {
        keys.iter().map(|&k| (k, k * 10)).collect()
    }

    #[test]
    fn insert_get_and_replace() {
        let map = map_of(&[5, 1, 9, 3]);
        assert_eq!(map.len(), 4);
        assert_eq!(map.get(&3), Some(&30));
        assert_eq!(map.get(&4), None);

        let replaced = map.insert(3, -1);
        assert_eq!(replaced.len(), 4);
        assert_eq!(replaced.get(&3), Some(&-1));
        replaced.check_invariants().unwrap();
    }

    #[test]
    fn old_versions_are_unaffected() {
        let m1 = map_of(&[1, 2, 3]);
        let m2 = m1.insert(2, 99).insert(4, 40).remove(&1);

        assert_eq!(m1.get(&2), Some(&20));
        assert_eq!(m1.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(m2.keys().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn remove_missing_key_is_noop() {
        let map = map_of(&[1, 2]);
        let same = map.remove(&7);
        assert_eq!(same.len(), 2);
        assert!(SortedMap::<i32, i32>::new().remove(&1).is_empty());
    }

    #[test]
    fn index_of_is_rank() {
        let map = map_of(&[10, 20, 30, 40]);
        assert_eq!(map.index_of(&10), Some(0));
        assert_eq!(map.index_of(&30), Some(2));
        assert_eq!(map.index_of(&35), None);
    }

    #[test]
    fn iteration_from_arbitrary_keys() {
        let map = map_of(&[1, 3, 5, 7]);
        let from = |k| map.iter_from(&k).map(|(k, _)| *k).collect::<Vec<_>>();
        let rev = |k| map.reverse_iter_from(&k).map(|(k, _)| *k).collect::<Vec<_>>();

        assert_eq!(from(3), vec![3, 5, 7]);
        assert_eq!(from(4), vec![5, 7]);
        assert_eq!(from(8), Vec::<i32>::new());
        assert_eq!(rev(5), vec![5, 3, 1]);
        assert_eq!(rev(4), vec![3, 1]);
        assert_eq!(rev(0), Vec::<i32>::new());
        assert_eq!(
            map.reverse_iter().map(|(k, _)| *k).collect::<Vec<_>>(),
            vec![7, 5, 3, 1]
        );
    }

    #[test]
    fn min_max_and_predecessor() {
        let map = map_of(&[4, 2, 8]);
        assert_eq!(map.min_key(), Some(&2));
        assert_eq!(map.max_key(), Some(&8));
        assert_eq!(map.predecessor_key(&8), Some(&4));
        assert_eq!(map.predecessor_key(&5), Some(&4));
        assert_eq!(map.predecessor_key(&2), None);
    }

    #[test]
    fn custom_comparator_reverses_order() {
        let map = SortedMap::with_comparator(|a: &i32, b: &i32| b.cmp(a))
            .insert(1, ())
            .insert(3, ())
            .insert(2, ());
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![3, 2, 1]);
        map.check_invariants().unwrap();
    }

    #[test]
    fn sequential_inserts_and_removes_stay_balanced() {
        let mut map = SortedMap::new();
        for i in 0..512 {
            map = map.insert(i, i);
            map.check_invariants().unwrap();
        }
        let height = map.check_invariants().unwrap();
        assert!(height <= 10, "black height {height}");
        for i in (0..512).step_by(2) {
            map = map.remove(&i);
            map.check_invariants().unwrap();
        }
        assert_eq!(map.len(), 256);
        assert_eq!(map.first(), Some((&1, &1)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u8, u16),
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<u8>(), any::<u16>()).prop_map(|(k, v)| Op::Insert(k, v)),
            any::<u8>().prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn matches_btree_model(ops in proptest::collection::vec(op(), 0..200)) {
            let mut map = SortedMap::new();
            let mut model = BTreeMap::new();
            for op in ops {
                match op {
                    Op::Insert(k, v) => {
                        map = map.insert(k, v);
                        model.insert(k, v);
                    }
                    Op::Remove(k) => {
                        map = map.remove(&k);
                        model.remove(&k);
                    }
                }
                prop_assert!(map.check_invariants().is_ok(), "{:?}", map.check_invariants());
            }
            let entries: Vec<_> = map.iter().map(|(k, v)| (*k, *v)).collect();
            let expected: Vec<_> = model.iter().map(|(k, v)| (*k, *v)).collect();
            prop_assert_eq!(entries, expected);
            for (rank, key) in model.keys().enumerate() {
                prop_assert_eq!(map.index_of(key), Some(rank));
            }
        }
    }
}
