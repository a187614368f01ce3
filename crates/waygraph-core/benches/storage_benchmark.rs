//! Storage hot path benchmarks
//!
//! Measures segmented store access for every in-memory backend, adjacency
//! iteration over a grid graph and compaction after node removal.

use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use waygraph_core::BaseGraph;
use waygraph_core::encoding::FieldLayout;
use waygraph_core::storage::{DaType, Directory};

/// Grid of `side * side` nodes with edges to the right and down neighbours
fn create_grid(side: u32) -> BaseGraph {
    let dir = Directory::in_memory();
    let mut builder = FieldLayout::builder();
    builder.add_bool("car_access", true).unwrap();
    let mut graph = BaseGraph::new(&dir, &builder.build(), false, false).unwrap();
    graph.create(1 << 16).unwrap();
    graph.create_nodes(side * side).unwrap();
    for row in 0..side {
        for col in 0..side {
            let node = row * side + col;
            if col + 1 < side {
                graph.create_edge(node, node + 1).unwrap().set_distance(1.0).unwrap();
            }
            if row + 1 < side {
                graph.create_edge(node, node + side).unwrap().set_distance(2.0).unwrap();
            }
        }
    }
    graph
}

fn benchmark_segment_access(c: &mut Criterion) {
    let dir = Directory::in_memory().with_segment_size(1 << 12).unwrap();
    let mut group = c.benchmark_group("segment_access");

    for da_type in [DaType::Ram, DaType::OffHeap] {
        let mut da = dir.create_with(da_type.as_str(), da_type, 1 << 12).unwrap();
        da.create(1 << 20).unwrap();
        for i in 0..(1 << 18) {
            da.set_u32(i * 4, i as u32).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("read_u32", da_type), &da, |b, da| {
            b.iter(|| {
                let mut sum = 0u64;
                for i in 0..(1 << 18) {
                    sum += da.get_u32(black_box(i * 4)).unwrap() as u64;
                }
                black_box(sum)
            });
        });
        group.bench_function(BenchmarkId::new("write_u32", da_type), |b| {
            b.iter(|| {
                for i in 0..(1 << 18) {
                    da.set_u32(black_box(i * 4), i as u32).unwrap();
                }
            });
        });
    }
    group.finish();
}

fn benchmark_edge_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("edge_iteration");
    group.sample_size(20);

    for side in [50, 200] {
        let graph = create_grid(side);
        group.bench_with_input(BenchmarkId::new("adjacency", side), &graph, |b, graph| {
            b.iter(|| {
                let mut total = 0.0;
                for node in 0..graph.node_count() {
                    for state in graph.edges(node).unwrap() {
                        total += state.unwrap().distance();
                    }
                }
                black_box(total)
            });
        });
        group.bench_with_input(BenchmarkId::new("all_edges", side), &graph, |b, graph| {
            b.iter(|| black_box(graph.all_edges().count()));
        });
    }
    group.finish();
}

fn benchmark_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("compaction");
    group.sample_size(10);

    for side in [50, 150] {
        group.bench_function(BenchmarkId::from_parameter(format!("{side}x{side}")), |b| {
            b.iter_batched(
                || {
                    let mut graph = create_grid(side);
                    for node in (0..side * side).step_by(7) {
                        graph.mark_node_removed(node).unwrap();
                    }
                    graph
                },
                |mut graph| black_box(graph.optimize().unwrap()),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_segment_access,
    benchmark_edge_iteration,
    benchmark_compaction
);
criterion_main!(benches);
