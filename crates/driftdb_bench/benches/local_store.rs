//! Local store operation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use driftdb_bench::{random_keys, set_mutations};
use driftdb_codec::ResourcePath;
use driftdb_core::{LocalStore, Persistence, Query, StoreConfig};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn store() -> LocalStore {
    let config = StoreConfig::default().sync_on_commit(false);
    LocalStore::new(Arc::new(Persistence::in_memory(config)))
}

/// Benchmark local writes of growing batch size.
fn bench_write_locally(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("write_locally");

    for batch_size in [1, 10, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), batch_size, |b, &batch_size| {
            let store = store();
            let mutations = set_mutations(&random_keys("bench", batch_size), 4);
            b.iter(|| {
                runtime
                    .block_on(store.write_locally(black_box(mutations.clone())))
                    .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark a collection query over pending writes.
fn bench_execute_query(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("execute_query");

    for count in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let store = store();
            runtime
                .block_on(store.write_locally(set_mutations(&random_keys("bench", count), 4)))
                .unwrap();
            let query = Query::at_path(ResourcePath::from_string("bench"));
            b.iter(|| {
                let result = runtime.block_on(store.execute_query(&query, false)).unwrap();
                black_box(result);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_write_locally, bench_execute_query);
criterion_main!(benches);
