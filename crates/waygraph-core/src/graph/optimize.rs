//! Compaction of removed nodes
//!
//! Nodes marked removed are squeezed out by shifting the survivors down in
//! id order; edges touching a removed node are dropped and the remaining
//! edges shift down the same way. Both shifts are order preserving, so every
//! record can be moved in place while walking ids upwards.

use super::{BaseGraph, EdgeId, NO_EDGE, NodeId};
use crate::{Error, Result};

/// Summary of one [`BaseGraph::optimize`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    /// Nodes removed from the table
    pub removed_nodes: u32,
    /// Edges dropped because they touched a removed node
    pub removed_edges: u32,
    /// Turn cost records dropped with their edges
    pub removed_turn_costs: usize,
}

impl BaseGraph {
    /// Remove all nodes marked via [`BaseGraph::mark_node_removed`]
    ///
    /// Surviving nodes and edges keep their relative order, coordinates,
    /// distances, flags and geometry; only ids change. Adjacency lists keep
    /// their order and disconnected entries stay disconnected. Running it with
    /// nothing marked is a no-op.
    pub fn optimize(&mut self) -> Result<OptimizeStats> {
        if self.store.frozen {
            return Err(Error::frozen("cannot optimize a frozen graph"));
        }
        if self.removed.is_empty() {
            return Ok(OptimizeStats::default());
        }

        let old_nodes = self.store.node_count();
        let old_edges = self.store.edge_count();

        let mut node_map = vec![NO_EDGE; old_nodes as usize];
        let mut new_nodes: NodeId = 0;
        for node in 0..old_nodes {
            if !self.removed.contains(node) {
                node_map[node as usize] = new_nodes;
                new_nodes += 1;
            }
        }

        let mut edge_map = vec![NO_EDGE; old_edges as usize];
        let mut new_edges: EdgeId = 0;
        for edge in 0..old_edges {
            let node_a = self.store.node_a(edge)?;
            let node_b = self.store.node_b(edge)?;
            if !self.removed.contains(node_a) && !self.removed.contains(node_b) {
                edge_map[edge as usize] = new_edges;
                new_edges += 1;
            }
        }

        // rebuild the lists of surviving nodes through the maps
        let mut heads = vec![NO_EDGE; new_nodes as usize];
        let mut links = vec![[NO_EDGE; 2]; new_edges as usize];
        for node in 0..old_nodes {
            let new_node = node_map[node as usize];
            if new_node == NO_EDGE {
                continue;
            }
            let mut tail: Option<(EdgeId, usize)> = None;
            let mut current = self.store.edge_ref(node)?;
            while current != NO_EDGE {
                let side = if self.store.node_a(current)? == node { 0 } else { 1 };
                let next = self.store.link_for(current, node)?;
                let mapped = edge_map[current as usize];
                if mapped != NO_EDGE {
                    match tail {
                        None => heads[new_node as usize] = mapped,
                        Some((prev, prev_side)) => links[prev as usize][prev_side] = mapped,
                    }
                    tail = Some((mapped, side));
                }
                current = next;
            }
        }

        for edge in 0..old_edges {
            let new_edge = edge_map[edge as usize];
            if new_edge == NO_EDGE {
                continue;
            }
            let node_a = node_map[self.store.node_a(edge)? as usize];
            let node_b = node_map[self.store.node_b(edge)? as usize];
            self.store.copy_edge_record(edge, new_edge)?;
            self.store.set_nodes(new_edge, node_a, node_b)?;
            let [link_a, link_b] = links[new_edge as usize];
            self.store.set_link_a(new_edge, link_a)?;
            self.store.set_link_b(new_edge, link_b)?;
        }

        for node in 0..old_nodes {
            let new_node = node_map[node as usize];
            if new_node == NO_EDGE {
                continue;
            }
            self.store.copy_node_record(node, new_node)?;
            self.store.set_edge_ref(new_node, heads[new_node as usize])?;
        }

        self.store.set_edge_count(new_edges)?;
        self.store.set_node_count(new_nodes)?;

        let removed_turn_costs = match &mut self.turn_costs {
            Some(tc) => tc.remap(&mut self.store, &edge_map)?,
            None => 0,
        };

        self.removed.clear();
        let stats = OptimizeStats {
            removed_nodes: old_nodes - new_nodes,
            removed_edges: old_edges - new_edges,
            removed_turn_costs,
        };
        tracing::info!(
            "Optimized graph: removed {} nodes, {} edges and {} turn costs ({} nodes, {} edges left)",
            stats.removed_nodes,
            stats.removed_edges,
            stats.removed_turn_costs,
            new_nodes,
            new_edges
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::FieldLayout;
    use crate::graph::{FetchMode, GeoPoint};
    use crate::storage::Directory;
    use crate::turn_cost::TurnCostMode;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn create_test_graph(turn_costs: bool) -> BaseGraph {
        let mut builder = FieldLayout::builder();
        builder.add_int("class", 8, false, false).unwrap();
        let layout = builder.build();
        let dir = Directory::in_memory().with_segment_size(256).unwrap();
        let mut graph = BaseGraph::new(&dir, &layout, false, turn_costs).unwrap();
        graph.create(100).unwrap();
        graph
    }

    fn neighbours(graph: &BaseGraph, node: NodeId) -> Vec<(NodeId, f64)> {
        graph
            .edges(node)
            .unwrap()
            .map(|s| {
                let s = s.unwrap();
                (s.adj_node(), s.distance())
            })
            .collect()
    }

    #[test]
    fn test_nothing_removed_is_noop() {
        let mut graph = create_test_graph(false);
        graph.create_edge(0, 1).unwrap();
        assert_eq!(graph.optimize().unwrap(), OptimizeStats::default());
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_remove_middle_node() {
        let mut graph = create_test_graph(false);
        for node in 0..4 {
            graph.set_node(node, node as f64, 0.5, None).unwrap();
        }
        graph.create_edge(0, 1).unwrap().set_distance(1.0).unwrap();
        graph.create_edge(1, 2).unwrap().set_distance(2.0).unwrap();
        graph
            .create_edge(3, 2)
            .unwrap()
            .set_distance(3.0)
            .unwrap()
            .set_way_geometry(&[GeoPoint::new(2.5, 0.75)])
            .unwrap();
        graph.mark_node_removed(1).unwrap();
        assert!(graph.is_node_removed(1));

        let stats = graph.optimize().unwrap();
        assert_eq!(stats.removed_nodes, 1);
        assert_eq!(stats.removed_edges, 2);
        assert!(!graph.is_node_removed(1));
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 1);

        // old 2 -> 1, old 3 -> 2
        assert_relative_eq!(graph.lat(1).unwrap(), 2.0);
        assert_relative_eq!(graph.lat(2).unwrap(), 3.0);
        assert!(neighbours(&graph, 0).is_empty());
        let state = graph.edge_state(0, 1).unwrap();
        assert_eq!(state.base_node(), 2);
        assert!(!state.is_reversed());
        assert_relative_eq!(state.distance(), 3.0);
        assert_eq!(
            graph.fetch_way_geometry(&state, FetchMode::ALL).unwrap(),
            vec![
                GeoPoint::new(3.0, 0.5),
                GeoPoint::new(2.5, 0.75),
                GeoPoint::new(2.0, 0.5)
            ]
        );
    }

    #[test]
    fn test_disconnected_entries_stay_disconnected() {
        let mut graph = create_test_graph(false);
        graph.create_edge(1, 2).unwrap();
        graph.create_edge(1, 3).unwrap();
        graph.create_edge(0, 3).unwrap();
        graph.disconnect_edge(1, 1).unwrap();
        graph.mark_node_removed(0).unwrap();
        graph.optimize().unwrap();

        // old 1 -> 0 keeps only the edge to old 2
        let adj: Vec<NodeId> = neighbours(&graph, 0).into_iter().map(|(n, _)| n).collect();
        assert_eq!(adj, vec![1]);
        // old 3 -> 2 still sees the disconnected edge
        let adj: Vec<NodeId> = neighbours(&graph, 2).into_iter().map(|(n, _)| n).collect();
        assert_eq!(adj, vec![0]);
    }

    #[test]
    fn test_turn_costs_follow_edges() {
        let mut graph = create_test_graph(true);
        graph.create_edge(0, 1).unwrap();
        graph.create_edge(1, 2).unwrap();
        graph.create_edge(2, 3).unwrap();
        graph.create_edge(3, 4).unwrap();
        graph.set_turn_cost_flags(0, 1, 1, 5, TurnCostMode::Merge).unwrap();
        graph.set_turn_cost_flags(2, 3, 3, 9, TurnCostMode::Merge).unwrap();
        graph.mark_node_removed(0).unwrap();

        let stats = graph.optimize().unwrap();
        assert_eq!(stats.removed_turn_costs, 1);
        // old edge 2 -> 1, old edge 3 -> 2, old node 3 -> 2
        assert_eq!(graph.turn_cost_flags(1, 2, 2).unwrap(), 9);
        assert_eq!(graph.turn_cost_count(0).unwrap(), 0);
        assert_eq!(graph.turn_cost_len().unwrap(), 1);
    }

    #[test]
    fn test_removing_everything() {
        let mut graph = create_test_graph(false);
        graph.create_edge(0, 1).unwrap();
        graph.mark_node_removed(0).unwrap();
        graph.mark_node_removed(1).unwrap();
        graph.optimize().unwrap();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.all_edges().count(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_optimize_keeps_surviving_edges(
            edges in proptest::collection::vec((0u32..20, 0u32..20, 1u32..1000), 1..60),
            rounds in proptest::collection::vec(proptest::collection::btree_set(0u32..20, 0..5), 1..4),
        ) {
            let mut graph = create_test_graph(false);
            graph.create_nodes(20).unwrap();
            for (a, b, dist) in &edges {
                graph.create_edge(*a, *b).unwrap().set_distance(*dist as f64).unwrap();
            }
            let mut survivors: Vec<(u32, u32, u32)> =
                edges.iter().map(|(a, b, d)| (*a, *b, d * 1000)).collect();

            // ids picked in each round refer to the graph compacted by the previous one
            for picked in &rounds {
                let count = graph.node_count();
                let removed: Vec<u32> = picked.iter().copied().filter(|n| *n < count).collect();
                for node in &removed {
                    graph.mark_node_removed(*node).unwrap();
                }
                let shift = |n: u32| n - removed.iter().filter(|r| **r < n).count() as u32;
                survivors = survivors
                    .into_iter()
                    .filter(|(a, b, _)| !removed.contains(a) && !removed.contains(b))
                    .map(|(a, b, d)| (shift(a), shift(b), d))
                    .collect();

                let stats = graph.optimize().unwrap();
                prop_assert_eq!(stats.removed_nodes as usize, removed.len());
                prop_assert_eq!(graph.node_count(), count - removed.len() as u32);
                prop_assert_eq!(graph.edge_count() as usize, survivors.len());

                let stored: Vec<(u32, u32, u32)> = graph
                    .all_edges()
                    .map(|s| {
                        let s = s.unwrap();
                        (s.base_node(), s.adj_node(), s.distance_mm())
                    })
                    .collect();
                prop_assert_eq!(&stored, &survivors);

                // every edge is listed at both endpoints (once for loops)
                let mut listed = 0usize;
                for node in 0..graph.node_count() {
                    listed += graph.degree(node).unwrap();
                }
                let loops = survivors.iter().filter(|(a, b, _)| a == b).count();
                prop_assert_eq!(listed, survivors.len() * 2 - loops);
            }

            // a second run is a no-op
            prop_assert_eq!(graph.optimize().unwrap(), OptimizeStats::default());
        }
    }
}
