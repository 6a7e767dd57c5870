//! Persistence of sorted map snapshots under random edits.

use driftdb_core::collections::{SortedMap, SortedSet};
use driftdb_core::DocumentKey;
use driftdb_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeSet;

proptest! {
    #[test]
    fn snapshots_never_change(
        keys in prop::collection::vec(document_key_strategy(), 1..40),
        removals in prop::collection::vec(any::<prop::sample::Index>(), 0..20),
    ) {
        let mut snapshots: Vec<(SortedMap<DocumentKey, usize>, Vec<DocumentKey>)> = Vec::new();
        let mut map = SortedMap::new();
        for (i, key) in keys.iter().enumerate() {
            map = map.insert(key.clone(), i);
            snapshots.push((map.clone(), map.keys().cloned().collect()));
        }
        for index in &removals {
            map = map.remove(index.get(&keys));
            snapshots.push((map.clone(), map.keys().cloned().collect()));
        }

        for (snapshot, listed) in &snapshots {
            prop_assert!(snapshot.check_invariants().is_ok());
            let now: Vec<DocumentKey> = snapshot.keys().cloned().collect();
            prop_assert_eq!(&now, listed);
            prop_assert!(now.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn set_union_matches_model(
        a in prop::collection::btree_set(document_key_strategy(), 0..30),
        b in prop::collection::btree_set(document_key_strategy(), 0..30),
    ) {
        let left: SortedSet<DocumentKey> = a.iter().fold(SortedSet::new(), |s, k| s.insert(k.clone()));
        let right: SortedSet<DocumentKey> = b.iter().fold(SortedSet::new(), |s, k| s.insert(k.clone()));
        let union = left.union(&right);

        let expected: BTreeSet<DocumentKey> = a.union(&b).cloned().collect();
        prop_assert_eq!(union.iter().cloned().collect::<BTreeSet<_>>(), expected);
        prop_assert!(union.check_invariants().is_ok());
        prop_assert_eq!(left.len(), a.len());
    }
}
