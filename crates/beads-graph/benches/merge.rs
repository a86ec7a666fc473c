//! Merge throughput
//!
//! Run with: cargo bench --package beads-graph

use beads_graph::{
    GraphMerger, GraphMirror, LinkKind, MergeConfig, Snapshot, SnapshotEdge, SnapshotNode, Status,
    Vec3,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn snapshot(n: usize, closed_every: usize) -> Snapshot {
    Snapshot::default()
        .with_nodes((0..n).map(|i| {
            let node = SnapshotNode::new(format!("bd-{i}"), format!("issue {i}"));
            if i % closed_every == 0 {
                node.with_status(Status::Closed)
            } else {
                node
            }
        }))
        .with_edges((1..n).map(|i| {
            SnapshotEdge::new(format!("bd-{}", i / 2), format!("bd-{i}"), LinkKind::Blocks)
        }))
}

fn positioned_mirror(n: usize) -> (GraphMirror, GraphMerger) {
    let mut mirror = GraphMirror::new();
    let mut merger = GraphMerger::with_seed(MergeConfig::default(), 42);
    merger.merge(&mut mirror, snapshot(n, 7));
    for i in 0..n {
        mirror.set_position(&format!("bd-{i}"), Vec3::new(i as f64, 0.0, 0.0));
    }
    (mirror, merger)
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    for n in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("unchanged", n), &n, |b, &n| {
            let (mut mirror, mut merger) = positioned_mirror(n);
            let snap = snapshot(n, 7);
            b.iter(|| black_box(merger.merge(&mut mirror, snap.clone())));
        });

        group.bench_with_input(BenchmarkId::new("attributes_changed", n), &n, |b, &n| {
            let (mut mirror, mut merger) = positioned_mirror(n);
            let even = snapshot(n, 7);
            let odd = snapshot(n, 5);
            let mut flip = false;
            b.iter(|| {
                flip = !flip;
                let snap = if flip { odd.clone() } else { even.clone() };
                black_box(merger.merge(&mut mirror, snap))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_merge);
criterion_main!(benches);
