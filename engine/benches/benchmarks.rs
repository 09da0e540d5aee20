//! Performance benchmarks for tandem-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tandem_engine::{Doc, DocSnapshot, Store, Value};

fn populated(size: usize) -> Store {
    let store = Store::new(Doc::with_client(1));
    let state = store.map("states-bench").unwrap();
    for i in 0..size {
        state.set(
            &format!("layer_{i}"),
            Value::object([
                ("name", Value::from(format!("Layer {i}"))),
                ("opacity", Value::from(0.5)),
            ]),
        );
    }
    store
}

fn bench_proxy_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("proxy_operations");

    group.bench_function("map_set_scalar", |b| {
        let store = Store::new(Doc::with_client(1));
        let state = store.map("states-bench").unwrap();
        let mut i = 0i32;
        b.iter(|| {
            i += 1;
            state.set(black_box("count"), black_box(i))
        })
    });

    group.bench_function("map_set_nested", |b| {
        let store = Store::new(Doc::with_client(1));
        let state = store.map("states-bench").unwrap();
        b.iter(|| {
            state.set(
                black_box("layer"),
                Value::object([("name", Value::from("bg")), ("visible", Value::from(true))]),
            )
        })
    });

    group.bench_function("map_get", |b| {
        let store = populated(1000);
        let state = store.map("states-bench").unwrap();
        b.iter(|| state.get(black_box("layer_500")))
    });

    group.bench_function("array_push", |b| {
        let store = Store::new(Doc::with_client(1));
        let list = store.array("refs-bench").unwrap();
        b.iter(|| list.push(black_box(1)))
    });

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for size in [10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("apply_remote", size), size, |b, &size| {
            let source = populated(size);
            let ops = source.doc().ops();
            b.iter(|| {
                let replica = Doc::with_client(2);
                replica.apply_update(black_box(ops.clone()))
            })
        });

        group.bench_with_input(
            BenchmarkId::new("apply_reversed", size),
            size,
            |b, &size| {
                let source = populated(size);
                let mut ops = source.doc().ops();
                ops.reverse();
                b.iter(|| {
                    let replica = Doc::with_client(2);
                    replica.apply_update(black_box(ops.clone()))
                })
            },
        );
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100, 500, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("capture", size), size, |b, &size| {
            let store = populated(size);
            b.iter(|| DocSnapshot::capture(store.doc()).to_json())
        });

        group.bench_with_input(BenchmarkId::new("load", size), size, |b, &size| {
            let store = populated(size);
            let json = DocSnapshot::capture(store.doc()).to_json().unwrap();
            b.iter(|| {
                let doc = Doc::with_client(2);
                DocSnapshot::from_json(black_box(&json))
                    .map(|snapshot| snapshot.load_into(&doc))
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_proxy_operations,
    bench_merge,
    bench_snapshot
);
criterion_main!(benches);
