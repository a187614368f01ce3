//! Compaction of a large memory-mapped grid
//!
//! Run with `cargo test --features slow-tests`; set `RUST_LOG=debug` to see
//! the store logs.

use approx::assert_relative_eq;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;
use waygraph_core::BaseGraph;
use waygraph_core::encoding::FieldLayout;
use waygraph_core::storage::{DaType, Directory};

const SIDE: u32 = 300;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn node_id(row: u32, col: u32) -> u32 {
    row * SIDE + col
}

#[test]
#[cfg_attr(not(feature = "slow-tests"), ignore = "slow test, enable with --features slow-tests")]
fn test_grid_compaction_keeps_geometry_consistent() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let dir = Directory::new(tmp.path(), DaType::Mmap).unwrap();
    let mut builder = FieldLayout::builder();
    let access = builder.add_bool("car_access", true).unwrap();
    let mut graph = BaseGraph::new(&dir, &builder.build(), false, false).unwrap();
    graph.create(1 << 16).unwrap();

    for row in 0..SIDE {
        for col in 0..SIDE {
            let lat = 40.0 + row as f64 * 0.001;
            let lon = 8.0 + col as f64 * 0.001;
            graph.set_node(node_id(row, col), lat, lon, None).unwrap();
        }
    }
    for row in 0..SIDE {
        for col in 0..SIDE {
            if col + 1 < SIDE {
                graph
                    .create_edge(node_id(row, col), node_id(row, col + 1))
                    .unwrap()
                    .set_distance(1.0)
                    .unwrap()
                    .set(&access, true)
                    .unwrap();
            }
            if row + 1 < SIDE {
                graph
                    .create_edge(node_id(row, col), node_id(row + 1, col))
                    .unwrap()
                    .set_distance(2.0)
                    .unwrap();
            }
        }
    }

    let mut removed = 0;
    for row in 0..SIDE {
        for col in 0..SIDE {
            if (row + col) % 7 == 0 {
                graph.mark_node_removed(node_id(row, col)).unwrap();
                removed += 1;
            }
        }
    }
    let before = graph.edge_count();
    let stats = graph.optimize().unwrap();
    assert_eq!(stats.removed_nodes, removed);
    assert_eq!(graph.node_count(), SIDE * SIDE - removed);
    assert_eq!(graph.edge_count(), before - stats.removed_edges);

    // horizontal edges are accessible and 1 m, vertical ones are 2 m
    let mut degree_sum = 0;
    for state in graph.all_edges() {
        let state = state.unwrap();
        let a = graph.node(state.base_node()).unwrap();
        let b = graph.node(state.adj_node()).unwrap();
        if (a.lat - b.lat).abs() < 1e-6 {
            assert_relative_eq!((a.lon - b.lon).abs(), 0.001, epsilon = 1e-6);
            assert_relative_eq!(state.distance(), 1.0);
            assert!(state.get(&access));
        } else {
            assert_relative_eq!((a.lat - b.lat).abs(), 0.001, epsilon = 1e-6);
            assert_relative_eq!(state.distance(), 2.0);
            assert!(!state.get(&access));
        }
    }
    for node in 0..graph.node_count() {
        degree_sum += graph.degree(node).unwrap();
    }
    assert_eq!(degree_sum, 2 * graph.edge_count() as usize);

    graph.freeze().unwrap();
    graph.flush().unwrap();
}
