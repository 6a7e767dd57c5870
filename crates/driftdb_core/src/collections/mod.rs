//! Persistent ordered collections.
//!
//! Both collections are immutable: updates return a new version that shares
//! unchanged subtrees with the old one. The persistence layer relies on this
//! to hand a transaction a private working copy of the whole store in O(1).

mod sorted_map;
mod sorted_set;

pub use sorted_map::{Comparator, Iter, NaturalOrder, SortedMap};
pub use sorted_set::{Keys, SortedSet};
