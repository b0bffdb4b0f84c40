use std::hint::black_box;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use livestore::{Document, Patch, Store, StoreConfig};

const SEED_SIZE: i64 = 10_000;

fn seeded_store() -> Store<Document> {
    let store = Store::new(StoreConfig::new("id").with_index("age")).unwrap();
    // 10k entities spread over 100 age buckets.
    store
        .add_many((0..SEED_SIZE).map(|id| Document::new().with("id", id).with("age", id % 100)))
        .unwrap();
    store
}

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_add");
    group.throughput(Throughput::Elements(1));

    group.bench_function("add_indexed", |b| {
        b.iter_custom(|iters| {
            // Fresh store per sample so the key space does not run out.
            let store = seeded_store();
            let start = Instant::now();
            for i in 0..iters {
                let id = SEED_SIZE + i64::try_from(i).unwrap();
                store
                    .add(Document::new().with("id", id).with("age", id % 100))
                    .unwrap();
            }
            start.elapsed()
        });
    });
    group.finish();
}

fn bench_lookups(c: &mut Criterion) {
    let store = seeded_store();

    c.bench_function("store/get_by_id", |b| {
        b.iter(|| black_box(store.get_by_id(black_box(4_242))));
    });

    c.bench_function("store/get_by_index", |b| {
        b.iter(|| black_box(store.get_by_index("age", black_box(42)).unwrap().len()));
    });
}

fn bench_update_with_views(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_fanout");
    group.throughput(Throughput::Elements(1));

    group.bench_function("update_with_8_views", |b| {
        b.iter_custom(|iters| {
            let store = seeded_store();
            let _views: Vec<_> = (0..8).map(|age| store.where_eq("age", age).unwrap()).collect();

            let start = Instant::now();
            for i in 0..iters {
                let id = i64::try_from(i).unwrap() % SEED_SIZE;
                let age = i64::try_from(i % 8).unwrap();
                store.update(id, &Patch::new().set("age", age)).unwrap();
            }
            start.elapsed()
        });
    });
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch");
    group.throughput(Throughput::Elements(100));

    group.bench_function("batch_100_updates", |b| {
        b.iter_custom(|iters| {
            let store = seeded_store();
            let _view = store.where_eq("age", 7).unwrap();

            let start = Instant::now();
            for round in 0..iters {
                store.batch(|| {
                    for id in 0..100 {
                        let age = (id + i64::try_from(round % 50).unwrap()) % 100;
                        store.update(id, &Patch::new().set("age", age)).unwrap();
                    }
                });
            }
            start.elapsed()
        });
    });
    group.finish();
}

criterion_group!(
    store_ops,
    bench_add,
    bench_lookups,
    bench_update_with_views,
    bench_batch
);
criterion_main!(store_ops);
