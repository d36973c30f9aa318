//! Criterion benchmarks for the belt network.
//!
//! Three benchmark groups:
//! - `parallel_lines`: 100 producer-to-consumer lines of 50 belts -- steady-state tick cost
//! - `crossing_grid`: a lattice of intersections fed from two sides -- conflict-heavy ticks
//! - `editing`: drag-placing and cutting a long run -- path settle cost

use beltgraph_core::grid::Direction;
use beltgraph_core::network::{Network, NodeSpec};
use beltgraph_core::node::NodeKind;
use beltgraph_core::test_utils::*;
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

// ===========================================================================
// Network builders
// ===========================================================================

/// `lines` rows, each: producer, `length` belts, consumer.
fn build_parallel_lines(lines: i32, length: usize) -> Network {
    let mut specs = Vec::new();
    for row in 0..lines {
        let y = row * 2;
        specs.push(NodeSpec::new(producer(iron(), 1), pos(0, y), Direction::East));
        specs.extend(belt_run(pos(1, y), Direction::East, length));
        specs.push(NodeSpec::new(
            NodeKind::Consumer,
            pos(length as i32 + 1, y),
            Direction::East,
        ));
    }
    let mut network = Network::builder().headless().nodes(specs).build().unwrap();

    // Warm up until every line is saturated.
    run_ticks(&mut network, 2 * length as u64);
    network
}

/// A `size` x `size` block of intersections with producers on the west and
/// north edges and consumers on the east and south edges.
fn build_crossing_grid(size: i32) -> Network {
    let mut specs = Vec::new();
    for i in 1..=size {
        specs.push(NodeSpec::new(producer(iron(), 1), pos(0, i), Direction::East));
        specs.push(NodeSpec::new(producer(copper(), 1), pos(i, 0), Direction::South));
        specs.push(NodeSpec::new(NodeKind::Consumer, pos(size + 1, i), Direction::East));
        specs.push(NodeSpec::new(NodeKind::Consumer, pos(i, size + 1), Direction::South));
        for j in 1..=size {
            specs.push(NodeSpec::new(NodeKind::Intersection, pos(i, j), Direction::North));
        }
    }
    let mut network = Network::builder().headless().nodes(specs).build().unwrap();
    run_ticks(&mut network, 20);
    network
}

// ===========================================================================
// Benchmarks
// ===========================================================================

fn bench_parallel_lines(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_lines");
    group.sample_size(30);

    let mut network = build_parallel_lines(100, 50);

    group.bench_function("100_lines_50_belts", |b| {
        b.iter(|| {
            network.step();
        });
    });

    group.finish();
}

fn bench_crossing_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("crossing_grid");
    group.sample_size(30);

    let mut network = build_crossing_grid(30);

    group.bench_function("30x30_intersections", |b| {
        b.iter(|| {
            network.step();
        });
    });

    group.finish();
}

fn bench_editing(c: &mut Criterion) {
    let mut group = c.benchmark_group("editing");
    group.sample_size(20);

    let run = belt_run(pos(0, 0), Direction::East, 1000);

    group.bench_function("place_group_1000_and_settle", |b| {
        b.iter_batched(
            headless_network,
            |mut network| {
                network.place_group(&run, None).unwrap();
                network.settle_pending();
                network
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("cut_1000_run_in_half", |b| {
        b.iter_batched(
            || {
                let mut network = headless_network();
                let ids = network.place_group(&run, None).unwrap();
                network.settle_pending();
                (network, ids[500])
            },
            |(mut network, middle)| {
                network.remove_node(middle).unwrap();
                network
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_parallel_lines,
    bench_crossing_grid,
    bench_editing
);
criterion_main!(benches);
