//! Reconciliation benchmarks
//!
//! Mounting and reordering large keyed lists against the in-memory host.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};

use limbo_core::prelude::*;

fn keyed_list(keys: &[usize]) -> Element {
    h("ul").children(
        keys.iter()
            .map(|key| h("li").key(key.to_string()).prop("index", *key as i64).child(text(key))),
    )
}

fn runtime() -> (Runtime<MemoryHost>, HostNode) {
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let runtime = Runtime::with_scheduler(host, LocalScheduler::new(YieldPolicy::Never), RuntimeConfig::default());
    (runtime, container)
}

fn bench_mount(c: &mut Criterion) {
    let mut group = c.benchmark_group("mount");

    for size in [100, 1_000, 5_000] {
        let keys: Vec<usize> = (0..size).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &keys, |b, keys| {
            b.iter_batched(
                runtime,
                |(mut rt, container)| {
                    rt.render(keyed_list(keys), container, None);
                    black_box(rt.run_until_idle())
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_reorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("reorder");

    for size in [100, 1_000, 5_000] {
        let keys: Vec<usize> = (0..size).collect();
        let mut reversed = keys.clone();
        reversed.reverse();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("reverse", size), &size, |b, _| {
            b.iter_batched(
                || {
                    let (mut rt, container) = runtime();
                    rt.render(keyed_list(&keys), container, None);
                    rt.run_until_idle();
                    (rt, container)
                },
                |(mut rt, container)| {
                    rt.render(keyed_list(&reversed), container, None);
                    black_box(rt.run_until_idle())
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_sliced(c: &mut Criterion) {
    let keys: Vec<usize> = (0..1_000).collect();

    c.bench_function("mount_sliced_16_units", |b| {
        b.iter_batched(
            || {
                let mut host = MemoryHost::new();
                let container = host.create_container();
                let rt = Runtime::with_scheduler(
                    host,
                    LocalScheduler::new(YieldPolicy::AfterUnits(16)),
                    RuntimeConfig::default(),
                );
                (rt, container)
            },
            |(mut rt, container)| {
                rt.render(keyed_list(&keys), container, None);
                black_box(rt.run_until_idle())
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_mount, bench_reorder, bench_sliced);
criterion_main!(benches);
