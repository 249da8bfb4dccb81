//! Benchmarks for reactive store writes.
//!
//! Performance budgets:
//! - No-op scalar write: < 200ns
//! - Changed write at depth 8 with one subscriber per level: < 5µs
//!
//! Run with: cargo bench -p ftui-store --bench store_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ftui_store::{Mapping, ReactiveNode, Subscription, Value};
use std::hint::black_box;

/// Chain of `depth` nested mappings under key `n`, returning the root and
/// the deepest node.
fn chain(depth: usize) -> (ReactiveNode, ReactiveNode) {
    let mut mapping = Mapping::from([("v", 0)]);
    for _ in 0..depth {
        mapping = Mapping::from([("n", Value::from(mapping)), ("v", Value::from(0))]);
    }
    let root = ReactiveNode::new(mapping).unwrap();
    let mut leaf = root.clone();
    while let Some(next) = leaf.child("n") {
        leaf = next;
    }
    (root, leaf)
}

fn subscribe_all(root: &ReactiveNode) -> Vec<Subscription> {
    let mut subs = Vec::new();
    let mut node = Some(root.clone());
    while let Some(current) = node {
        subs.push(current.subscribe(|| {}).unwrap());
        node = current.child("n");
    }
    subs
}

// =============================================================================
// Scalar writes
// =============================================================================

fn bench_scalar_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/scalar");

    let root = ReactiveNode::new(Mapping::from([("x", 0)])).unwrap();
    let _sub = root.subscribe(|| {}).unwrap();

    group.bench_function("no_op", |b| {
        b.iter(|| black_box(root.set("x", black_box(0)).unwrap()))
    });

    let mut i = 0i64;
    group.bench_function("changed", |b| {
        b.iter(|| {
            i += 1;
            black_box(root.set("x", i).unwrap())
        })
    });

    group.finish();
}

// =============================================================================
// Bubbling at depth
// =============================================================================

fn bench_bubble_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/bubble");

    for depth in [1usize, 4, 8, 16] {
        let (root, leaf) = chain(depth);
        let _subs = subscribe_all(&root);
        group.throughput(Throughput::Elements(depth as u64 + 1));

        let mut i = 0i64;
        group.bench_with_input(BenchmarkId::new("leaf_write", depth), &leaf, |b, leaf| {
            b.iter(|| {
                i += 1;
                black_box(leaf.set("v", i).unwrap())
            })
        });
    }

    group.finish();
}

// =============================================================================
// Subtree replacement
// =============================================================================

fn bench_replace_subtree(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/replace");

    for width in [4usize, 32, 256] {
        let root = ReactiveNode::new(Mapping::new()).unwrap();
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::new("mapping", width), &width, |b, &width| {
            b.iter(|| {
                let fresh: Mapping = (0..width)
                    .map(|k| (format!("k{k}"), Mapping::from([("v", k as i64)])))
                    .collect();
                black_box(root.set("sub", fresh).unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_scalar_write,
    bench_bubble_depth,
    bench_replace_subtree
);
criterion_main!(benches);
