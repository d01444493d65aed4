//! Benchmarks for synchronous propagation through containers.
//!
//! Run with: cargo bench -p ripple --bench propagation_bench

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ripple::{Container, combine, constant};
use std::hint::black_box;

// =============================================================================
// Fan-out: one container, many subscribers
// =============================================================================

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("container/fan_out");

    for subscribers in [1usize, 16, 256] {
        let root = constant(0u64);
        let _subs: Vec<_> = (0..subscribers)
            .map(|_| {
                root.observe(|v| {
                    black_box(*v);
                })
            })
            .collect();
        let mut next = 0u64;
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    next += 1;
                    root.set(black_box(next));
                })
            },
        );
    }

    group.finish();
}

// =============================================================================
// Depth: a chain of derived containers
// =============================================================================

fn bench_map_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("container/map_depth");

    for depth in [1usize, 8, 64] {
        let root = constant(0u64);
        let mut leaf: Container<u64> = root.clone();
        for _ in 0..depth {
            leaf = leaf.map(|v| v.wrapping_add(1));
        }
        let _sub = leaf.observe(|v| {
            black_box(*v);
        });
        let mut next = 0u64;
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                next += 1;
                root.set(black_box(next));
            })
        });
    }

    group.finish();
}

// =============================================================================
// Combine: update one input of a wide zip
// =============================================================================

fn bench_combine_width(c: &mut Criterion) {
    let mut group = c.benchmark_group("combine/update_one");

    for width in [2usize, 8, 32] {
        let inputs: Vec<Container<u64>> = (0..width as u64).map(constant).collect();
        let zipped = combine(&inputs).expect("width within capacity");
        let _sub = zipped.observe(|v| {
            black_box(v.len());
        });
        let mut next = 0u64;
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                next += 1;
                inputs[0].set(black_box(next));
            })
        });
    }

    group.finish();
}

// =============================================================================
// Lifecycle: subscribe + teardown of an idle container
// =============================================================================

fn bench_activation_cycle(c: &mut Criterion) {
    let root = constant(1u64);
    let derived = root.map(|v| v * 2);
    c.bench_function("container/activation_cycle", |b| {
        b.iter(|| {
            let sub = derived.observe(|v| {
                black_box(*v);
            });
            drop(sub);
        })
    });
    c.bench_function("container/get_resolve", |b| {
        b.iter(|| black_box(derived.get()))
    });
}

criterion_group!(
    benches,
    bench_fan_out,
    bench_map_depth,
    bench_combine_width,
    bench_activation_cycle
);
criterion_main!(benches);
