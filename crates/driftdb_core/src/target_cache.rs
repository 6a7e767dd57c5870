//! Cache of listened targets and their matching documents.

use crate::error::{CoreError, CoreResult};
use crate::model::{DocumentKey, Target, TargetData};
use crate::persistence::{LogRecord, PersistenceTransaction};
use crate::types::{ListenSequenceNumber, SnapshotVersion, TargetId};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Hands out even target ids greater than a starting point.
///
/// Odd ids are left to the sync layer for limbo resolution listens, so
/// the two id spaces never collide.
#[derive(Debug, Clone)]
pub struct TargetIdGenerator {
    previous: i32,
}

impl TargetIdGenerator {
    /// Creates a generator whose first id is the smallest even id above
    /// `after`.
    #[must_use]
    pub fn for_target_cache(after: TargetId) -> Self {
        let after = after.as_i32().max(0);
        Self {
            previous: after - after.rem_euclid(2),
        }
    }

    /// Returns the next id.
    pub fn next_id(&mut self) -> TargetId {
        self.previous += 2;
        TargetId::new(self.previous)
    }
}

/// Targets keyed by id (and by canonical id), plus the document keys each
/// target currently matches.
#[derive(Debug)]
pub struct TargetCache<'a> {
    txn: &'a mut PersistenceTransaction,
}

impl<'a> TargetCache<'a> {
    pub(crate) fn new(txn: &'a mut PersistenceTransaction) -> Self {
        Self { txn }
    }

    /// Allocates a fresh target id, strictly greater than every id handed
    /// out before.
    ///
    /// # Errors
    ///
    /// Fails in read-only transactions.
    pub fn allocate_target_id(&mut self) -> CoreResult<TargetId> {
        let highest = self.txn.state.targets_metadata.highest_target_id;
        let target_id = TargetIdGenerator::for_target_cache(highest).next_id();
        self.txn.write(LogRecord::SetHighestTargetId(target_id))?;
        Ok(target_id)
    }

    /// Highest sequence number used by any target.
    #[must_use]
    pub fn get_highest_sequence_number(&self) -> ListenSequenceNumber {
        self.txn.state.targets_metadata.highest_listen_sequence_number
    }

    /// Version of the last consistent remote snapshot.
    #[must_use]
    pub fn get_last_remote_snapshot_version(&self) -> SnapshotVersion {
        self.txn.state.targets_metadata.last_remote_snapshot_version
    }

    /// Updates the global target metadata.
    ///
    /// # Errors
    ///
    /// Fails in read-only transactions.
    pub fn set_targets_metadata(
        &mut self,
        highest_listen_sequence_number: ListenSequenceNumber,
        last_remote_snapshot_version: SnapshotVersion,
    ) -> CoreResult<()> {
        self.txn.write(LogRecord::SetTargetsMetadata {
            highest_listen_sequence_number,
            last_remote_snapshot_version,
        })
    }

    /// Adds a new target.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if the id is already cached.
    pub fn add_target_data(&mut self, data: TargetData) -> CoreResult<()> {
        if self.txn.state.targets.contains_key(&data.target_id) {
            return Err(CoreError::contract_violation(format!(
                "{} is already cached",
                data.target_id
            )));
        }
        self.txn.write(LogRecord::PutTarget(data))
    }

    /// Replaces an existing target.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if the id is not cached.
    pub fn update_target_data(&mut self, data: TargetData) -> CoreResult<()> {
        if !self.txn.state.targets.contains_key(&data.target_id) {
            return Err(CoreError::contract_violation(format!(
                "cannot update unknown {}",
                data.target_id
            )));
        }
        self.txn.write(LogRecord::PutTarget(data))
    }

    /// Removes a target and its matching keys.
    ///
    /// # Errors
    ///
    /// Fails in read-only transactions.
    pub fn remove_target_data(&mut self, data: &TargetData) -> CoreResult<()> {
        let keys = self.get_matching_keys_for_target_id(data.target_id);
        self.txn.write(LogRecord::RemoveTarget(data.target_id))?;
        self.txn.touch_documents(keys.into_iter().collect())
    }

    /// Looks up a target by value.
    #[must_use]
    pub fn get_target_data(&self, target: &Target) -> Option<TargetData> {
        let canonical_id = target.canonical_id();
        self.txn
            .state
            .targets_by_canonical_id
            .iter_from(&(canonical_id.clone(), TargetId::new(i32::MIN)))
            .take_while(|(id, _)| *id == canonical_id)
            .filter_map(|(_, target_id)| self.txn.state.targets.get(target_id))
            .find(|data| &data.target == target)
            .map(|data| TargetData::clone(data))
    }

    /// Looks up a target by id.
    #[must_use]
    pub fn get_target_data_for_id(&self, target_id: TargetId) -> Option<TargetData> {
        self.txn
            .state
            .targets
            .get(&target_id)
            .map(|data| TargetData::clone(data))
    }

    /// Adds documents to a target's result set.
    ///
    /// # Errors
    ///
    /// Fails in read-only transactions.
    pub fn add_matching_keys(&mut self, keys: &[DocumentKey], target_id: TargetId) -> CoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.txn.write(LogRecord::AddMatchingKeys {
            target_id,
            keys: keys.to_vec(),
        })?;
        self.txn.touch_documents(keys.to_vec())
    }

    /// Removes documents from a target's result set.
    ///
    /// # Errors
    ///
    /// Fails in read-only transactions.
    pub fn remove_matching_keys(&mut self, keys: &[DocumentKey], target_id: TargetId) -> CoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.txn.write(LogRecord::RemoveMatchingKeys {
            target_id,
            keys: keys.to_vec(),
        })?;
        self.txn.touch_documents(keys.to_vec())
    }

    /// Clears a target's result set.
    ///
    /// # Errors
    ///
    /// Fails in read-only transactions.
    pub fn remove_matching_keys_for_target_id(&mut self, target_id: TargetId) -> CoreResult<()> {
        let keys: Vec<DocumentKey> = self
            .get_matching_keys_for_target_id(target_id)
            .into_iter()
            .collect();
        self.remove_matching_keys(&keys, target_id)
    }

    /// Documents in a target's result set.
    #[must_use]
    pub fn get_matching_keys_for_target_id(&self, target_id: TargetId) -> BTreeSet<DocumentKey> {
        self.txn.state.target_documents.references_for_id(target_id)
    }

    /// True if any target matches `key`.
    #[must_use]
    pub fn contains_key(&self, key: &DocumentKey) -> bool {
        self.txn.state.target_documents.contains_key(key)
    }

    /// Number of cached targets.
    #[must_use]
    pub fn get_target_count(&self) -> usize {
        self.txn.state.targets.len()
    }

    /// Calls `f` for every target in id order.
    pub fn for_each_target(&self, mut f: impl FnMut(&TargetData)) {
        for data in self.txn.state.targets.values() {
            f(data);
        }
    }

    /// Removes every inactive target whose sequence number is at most
    /// `upper_bound`. Their matching documents become orphan candidates.
    ///
    /// Returns the number of targets removed.
    ///
    /// # Errors
    ///
    /// Fails in read-only transactions.
    pub fn remove_targets(
        &mut self,
        upper_bound: ListenSequenceNumber,
        active_target_ids: &BTreeSet<TargetId>,
    ) -> CoreResult<usize> {
        let doomed: Vec<Arc<TargetData>> = self
            .txn
            .state
            .targets
            .values()
            .filter(|data| data.sequence_number <= upper_bound)
            .filter(|data| !active_target_ids.contains(&data.target_id))
            .cloned()
            .collect();
        for data in &doomed {
            self.remove_target_data(data)?;
        }
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::model::{Query, TargetPurpose};
    use crate::persistence::{Persistence, TransactionMode};
    use driftdb_codec::{ByteString, ResourcePath};

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    fn target(path: &str) -> Target {
        Query::at_path(ResourcePath::from_string(path)).to_target()
    }

    fn data(path: &str, id: i32, seq: i64) -> TargetData {
        TargetData::new(
            target(path),
            TargetId::new(id),
            TargetPurpose::Listen,
            ListenSequenceNumber::new(seq),
        )
    }

    #[test]
    fn generator_yields_even_ids_above_start() {
        let mut gen = TargetIdGenerator::for_target_cache(TargetId::new(0));
        assert_eq!(gen.next_id(), TargetId::new(2));
        assert_eq!(gen.next_id(), TargetId::new(4));
        let mut gen = TargetIdGenerator::for_target_cache(TargetId::new(7));
        assert_eq!(gen.next_id(), TargetId::new(8));
    }

    #[tokio::test]
    async fn allocated_ids_strictly_increase() {
        let persistence = Persistence::in_memory(StoreConfig::default());
        let mut last = TargetId::new(0);
        for _ in 0..3 {
            let id = persistence
                .run_transaction("allocate", TransactionMode::ReadWrite, |txn| {
                    txn.target_cache().allocate_target_id()
                })
                .await
                .unwrap();
            assert!(id > last);
            assert_eq!(id.as_i32() % 2, 0);
            last = id;
        }
    }

    #[tokio::test]
    async fn add_get_update_remove() {
        let persistence = Persistence::in_memory(StoreConfig::default());
        persistence
            .run_transaction("targets", TransactionMode::ReadWrite, |txn| {
                let mut cache = txn.target_cache();
                cache.add_target_data(data("rooms", 2, 10))?;
                assert!(matches!(
                    cache.add_target_data(data("rooms", 2, 11)),
                    Err(CoreError::ContractViolation { .. })
                ));
                assert_eq!(cache.get_target_data(&target("rooms")).map(|d| d.target_id), Some(TargetId::new(2)));
                assert_eq!(cache.get_target_data(&target("users")), None);
                assert_eq!(cache.get_highest_sequence_number(), ListenSequenceNumber::new(10));

                let updated = data("rooms", 2, 12)
                    .with_resume_token(ByteString::from("r"), SnapshotVersion::from_micros(3));
                cache.update_target_data(updated.clone())?;
                assert_eq!(cache.get_target_data_for_id(TargetId::new(2)), Some(updated.clone()));
                assert!(cache.update_target_data(data("users", 4, 1)).is_err());

                cache.add_matching_keys(&[key("rooms/a"), key("rooms/b")], TargetId::new(2))?;
                assert!(cache.contains_key(&key("rooms/a")));

                cache.remove_target_data(&updated)?;
                assert_eq!(cache.get_target_count(), 0);
                assert!(!cache.contains_key(&key("rooms/a")));
                assert_eq!(cache.get_target_data(&target("rooms")), None);
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn matching_keys() {
        let persistence = Persistence::in_memory(StoreConfig::default());
        persistence
            .run_transaction("keys", TransactionMode::ReadWrite, |txn| {
                let mut cache = txn.target_cache();
                let id = TargetId::new(2);
                cache.add_matching_keys(&[key("c/a"), key("c/b")], id)?;
                cache.add_matching_keys(&[key("c/a")], TargetId::new(4))?;
                cache.remove_matching_keys(&[key("c/a")], id)?;
                assert_eq!(cache.get_matching_keys_for_target_id(id), BTreeSet::from([key("c/b")]));
                assert!(cache.contains_key(&key("c/a")));

                cache.remove_matching_keys_for_target_id(TargetId::new(4))?;
                assert!(!cache.contains_key(&key("c/a")));
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn remove_targets_skips_active_and_recent() {
        let persistence = Persistence::in_memory(StoreConfig::default());
        let removed = persistence
            .run_transaction("gc", TransactionMode::ReadWrite, |txn| {
                let mut cache = txn.target_cache();
                cache.add_target_data(data("a", 2, 1))?;
                cache.add_target_data(data("b", 4, 2))?;
                cache.add_target_data(data("c", 6, 3))?;
                let removed = cache.remove_targets(ListenSequenceNumber::new(2), &BTreeSet::from([TargetId::new(4)]))?;
                let mut remaining = Vec::new();
                cache.for_each_target(|d| remaining.push(d.target_id));
                assert_eq!(remaining, vec![TargetId::new(4), TargetId::new(6)]);
                Ok(removed)
            })
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn metadata_round_trips() {
        let persistence = Persistence::in_memory(StoreConfig::default());
        let version = SnapshotVersion::from_micros(42);
        persistence
            .run_transaction("meta", TransactionMode::ReadWrite, |txn| {
                txn.target_cache()
                    .set_targets_metadata(ListenSequenceNumber::new(7), version)
            })
            .await
            .unwrap();
        let read = persistence
            .run_transaction("meta", TransactionMode::ReadOnly, |txn| {
                let cache = txn.target_cache();
                Ok((cache.get_highest_sequence_number(), cache.get_last_remote_snapshot_version()))
            })
            .await
            .unwrap();
        assert_eq!(read, (ListenSequenceNumber::new(7), version));
    }
}
