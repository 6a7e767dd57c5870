//! Sorted map benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use driftdb_bench::random_keys;
use driftdb_core::collections::SortedMap;
use std::collections::BTreeMap;

/// Benchmark building a map by repeated insertion.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorted_map_insert");

    for count in [100, 1000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        let keys = random_keys("bench", *count);

        group.bench_with_input(BenchmarkId::new("llrb", count), &keys, |b, keys| {
            b.iter(|| {
                let mut map = SortedMap::new();
                for (i, key) in keys.iter().enumerate() {
                    map = map.insert(key.clone(), i);
                }
                black_box(map);
            });
        });

        // Mutable baseline
        group.bench_with_input(BenchmarkId::new("btree", count), &keys, |b, keys| {
            b.iter(|| {
                let mut map = BTreeMap::new();
                for (i, key) in keys.iter().enumerate() {
                    map.insert(key.clone(), i);
                }
                black_box(map);
            });
        });
    }
    group.finish();
}

/// Benchmark lookups and in-order scans.
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorted_map_read");
    let keys = random_keys("bench", 10_000);
    let map: SortedMap<_, _> = keys.iter().cloned().enumerate().map(|(i, k)| (k, i)).collect();

    group.bench_function("get", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % keys.len();
            black_box(map.get(&keys[i]));
        });
    });

    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("iterate", |b| {
        b.iter(|| black_box(map.iter().count()));
    });

    group.bench_function("snapshot_and_remove", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % keys.len();
            black_box(map.remove(&keys[i]));
        });
    });
    group.finish();
}

criterion_group!(benches, bench_insert, bench_read);
criterion_main!(benches);
