//! Mutation queue properties driven through the local store.

use driftdb_codec::Timestamp;
use driftdb_core::{BatchId, DocumentKey, Mutation, MutationBatch, Persistence, TransactionMode};
use driftdb_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

async fn listing(store: &TestStore) -> Vec<BatchId> {
    let mut ids = Vec::new();
    let mut after = None;
    while let Some(batch) = store.next_mutation_batch(after).await.unwrap() {
        ids.push(batch.batch_id);
        after = Some(batch.batch_id);
    }
    ids
}

#[derive(Debug, Clone)]
enum QueueOp {
    Add(Vec<Mutation>),
    Remove(prop::sample::Index),
}

fn queue_op_strategy() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        prop::collection::vec(mutation_strategy(), 1..4).prop_map(QueueOp::Add),
        any::<prop::sample::Index>().prop_map(QueueOp::Remove),
    ]
}

/// Everything the queue exposes about its pending batches.
#[derive(Debug, PartialEq, Eq)]
struct QueueView {
    batches: Vec<BatchId>,
    highest: BatchId,
    by_key: BTreeMap<DocumentKey, Vec<BatchId>>,
    pinned: BTreeSet<DocumentKey>,
    empty: bool,
}

fn ids(batches: &[Arc<MutationBatch>]) -> Vec<BatchId> {
    batches.iter().map(|b| b.batch_id).collect()
}

async fn observe(persistence: &Persistence, keys: &BTreeSet<DocumentKey>) -> QueueView {
    persistence
        .run_transaction("observe queue", TransactionMode::ReadOnly, |txn| {
            let queue = txn.mutation_queue();
            let by_key = keys
                .iter()
                .map(|key| (key.clone(), ids(&queue.get_all_mutation_batches_affecting_document_key(key))))
                .collect();
            Ok(QueueView {
                batches: ids(&queue.get_all_mutation_batches()),
                highest: queue.get_highest_unacknowledged_batch_id(),
                by_key,
                pinned: keys.iter().filter(|key| queue.contains_key(key)).cloned().collect(),
                empty: queue.check_empty(),
            })
        })
        .await
        .unwrap()
}

fn expected(model: &BTreeMap<BatchId, Arc<MutationBatch>>, keys: &BTreeSet<DocumentKey>) -> QueueView {
    let by_key: BTreeMap<DocumentKey, Vec<BatchId>> = keys
        .iter()
        .map(|key| {
            let writers = model
                .values()
                .filter(|batch| batch.keys().contains(key))
                .map(|batch| batch.batch_id)
                .collect();
            (key.clone(), writers)
        })
        .collect();
    QueueView {
        batches: model.keys().copied().collect(),
        highest: model.keys().next_back().copied().unwrap_or(BatchId::UNKNOWN),
        pinned: by_key
            .iter()
            .filter(|(_, writers)| !writers.is_empty())
            .map(|(key, _)| key.clone())
            .collect(),
        by_key,
        empty: model.is_empty(),
    }
}

async fn add(persistence: &Persistence, mutations: Vec<Mutation>) -> Arc<MutationBatch> {
    persistence
        .run_transaction("add batch", TransactionMode::ReadWrite, move |txn| {
            txn.mutation_queue()
                .add_mutation_batch(Timestamp::EPOCH, Vec::new(), mutations)
        })
        .await
        .unwrap()
}

async fn remove(persistence: &Persistence, batch: &MutationBatch) {
    persistence
        .run_transaction("remove batch", TransactionMode::ReadWrite, |txn| {
            txn.mutation_queue().remove_mutation_batch(batch)
        })
        .await
        .unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn rejecting_the_newest_batch_restores_the_queue(
        batches in prop::collection::vec(prop::collection::vec(mutation_strategy(), 1..4), 1..6),
        extra in prop::collection::vec(mutation_strategy(), 1..4),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = TestStore::memory();
            for mutations in batches {
                store.write_locally(mutations).await.unwrap();
            }
            let before = listing(&store).await;
            let keys: Vec<_> = extra.iter().map(|m: &Mutation| m.key.clone()).collect();
            let mut views = Vec::new();
            for key in &keys {
                views.push(store.read_document(key).await.unwrap());
            }

            let written = store.write_locally(extra).await.unwrap();
            prop_assert!(before.iter().all(|id| *id < written.batch_id));
            store.reject_batch(written.batch_id).await.unwrap();

            prop_assert_eq!(listing(&store).await, before);
            for (key, view) in keys.iter().zip(&views) {
                prop_assert_eq!(&store.read_document(key).await.unwrap(), view);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn queue_matches_a_model_under_adds_and_removes(
        ops in prop::collection::vec(queue_op_strategy(), 1..12),
        extra in prop::collection::vec(mutation_strategy(), 1..4),
    ) {
        let keys: BTreeSet<DocumentKey> = ops
            .iter()
            .filter_map(|op| match op {
                QueueOp::Add(mutations) => Some(mutations),
                QueueOp::Remove(_) => None,
            })
            .chain(std::iter::once(&extra))
            .flatten()
            .map(|m| m.key.clone())
            .collect();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = TestStore::memory();
            let persistence = Arc::clone(store.persistence());
            let mut model: BTreeMap<BatchId, Arc<MutationBatch>> = BTreeMap::new();
            let mut last_id = BatchId::UNKNOWN;

            for op in ops {
                match op {
                    QueueOp::Add(mutations) => {
                        let batch = add(&persistence, mutations).await;
                        prop_assert!(batch.batch_id > last_id);
                        last_id = batch.batch_id;
                        model.insert(batch.batch_id, batch);
                    }
                    QueueOp::Remove(index) => {
                        if model.is_empty() {
                            continue;
                        }
                        let id = *model.keys().nth(index.index(model.len())).unwrap();
                        if let Some(batch) = model.remove(&id) {
                            remove(&persistence, &batch).await;
                        }
                    }
                }
                prop_assert_eq!(observe(&persistence, &keys).await, expected(&model, &keys));
            }

            // Adding a batch and removing it again leaves no trace.
            let before = observe(&persistence, &keys).await;
            let batch = add(&persistence, extra).await;
            prop_assert!(batch.batch_id > last_id);
            prop_assert_eq!(observe(&persistence, &keys).await.highest, batch.batch_id);
            remove(&persistence, &batch).await;
            prop_assert_eq!(observe(&persistence, &keys).await, before);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
