//! Expansion of shortcuts into the original edges they replace
//!
//! Unpacking walks an explicit work stack instead of recursing, so long
//! shortcut chains cannot exhaust the call stack. Every skipped edge must be
//! strictly older than the shortcut referencing it, which bounds the walk.

use super::{ChEdgeState, ChStore};
use crate::graph::{BaseGraph, EdgeId, EdgeState, NO_EDGE, NodeId};
use crate::{Error, Result};

/// One CH edge still to expand, walked from `from` to `to`
///
/// `prev` is the original edge walked right before this sub-path.
#[derive(Debug, Clone, Copy)]
struct Task {
    edge: EdgeId,
    from: NodeId,
    to: NodeId,
    prev: EdgeId,
}

/// Expands CH edges of one profile into base graph edges
pub struct ShortcutUnpacker<'a> {
    graph: &'a BaseGraph,
    ch: &'a ChStore,
}

impl<'a> ShortcutUnpacker<'a> {
    /// Unpacker over `ch`, which must have been built for `graph`
    pub fn new(graph: &'a BaseGraph, ch: &'a ChStore) -> Result<Self> {
        if ch.base_edge_count() != graph.edge_count() {
            return Err(Error::illegal_state(format!(
                "CH profile '{}' covers {} edges, graph has {}",
                ch.name(),
                ch.base_edge_count(),
                graph.edge_count()
            )));
        }
        Ok(Self { graph, ch })
    }

    /// Call `visitor` for every original edge behind `ch_edge`
    ///
    /// The CH edge is walked towards `adj_node`. Each visited edge is oriented
    /// along that walk; `reverse` only flips the order of the visits. The
    /// second visitor argument is the edge preceding the visited one along the
    /// walk, whatever the visiting order (`NO_EDGE` for the edge leaving the
    /// start node).
    pub fn visit_original_edges<F>(
        &self,
        ch_edge: EdgeId,
        adj_node: NodeId,
        reverse: bool,
        mut visitor: F,
    ) -> Result<()>
    where
        F: FnMut(&EdgeState, EdgeId),
    {
        let from = self
            .other_end(ch_edge, adj_node)?
            .ok_or(Error::NoSuchEdgeOrientation {
                edge: ch_edge,
                node: adj_node,
            })?;
        let mut stack = vec![Task {
            edge: ch_edge,
            from,
            to: adj_node,
            prev: NO_EDGE,
        }];

        while let Some(task) = stack.pop() {
            let original = if task.edge < self.ch.base_edge_count() {
                Some(task.edge)
            } else {
                let state = self.ch.shortcut_state(task.edge, task.to)?;
                if state.is_shortcut() {
                    let (first, second, mid) = self.split(&state, task.from, task.to)?;
                    let head = Task {
                        edge: first,
                        from: task.from,
                        to: mid,
                        prev: task.prev,
                    };
                    let tail = Task {
                        edge: second,
                        from: mid,
                        to: task.to,
                        prev: self.last_original(first, task.from, mid)?,
                    };
                    if reverse {
                        stack.push(head);
                        stack.push(tail);
                    } else {
                        stack.push(tail);
                        stack.push(head);
                    }
                    None
                } else {
                    Some(state.orig_edge().ok_or_else(|| {
                        Error::storage(format!("CH edge {} has no skipped or original edge", task.edge))
                    })?)
                }
            };

            if let Some(edge) = original {
                let state = self.graph.edge_state(edge, task.to)?;
                if state.base_node() != task.from {
                    return Err(Error::storage(format!(
                        "original edge {edge} does not connect {} and {}",
                        task.from, task.to
                    )));
                }
                visitor(&state, task.prev);
            }
        }
        Ok(())
    }

    /// Order the skipped edges of `state` as (from -> mid, mid -> to)
    fn split(&self, state: &ChEdgeState, from: NodeId, to: NodeId) -> Result<(EdgeId, EdgeId, NodeId)> {
        let (skip1, skip2) = state.skipped_edges();
        for skip in [skip1, skip2] {
            if skip >= state.edge() {
                return Err(Error::invalid_argument(format!(
                    "skipped edge {skip} is not older than shortcut {}",
                    state.edge()
                )));
            }
        }
        for (first, second) in [(skip1, skip2), (skip2, skip1)] {
            let Some(mid) = self.other_end(second, to)? else {
                continue;
            };
            if self.other_end(first, mid)? != Some(from) {
                continue;
            }
            if self.ch.is_edge_based()
                && (self.first_key(first, mid)? != state.orig_key_first()
                    || self.last_key(second, to)? != state.orig_key_last())
            {
                continue;
            }
            return Ok((first, second, mid));
        }
        Err(Error::storage(format!(
            "shortcut {} does not chain its skipped edges {skip1} and {skip2}",
            state.edge()
        )))
    }

    /// Last original edge when walking `edge` from `from` to `to`
    fn last_original(&self, mut edge: EdgeId, mut from: NodeId, to: NodeId) -> Result<EdgeId> {
        if self.ch.is_edge_based() {
            return Ok(self.last_key(edge, to)? >> 1);
        }
        loop {
            if edge < self.ch.base_edge_count() {
                return Ok(edge);
            }
            let state = self.ch.shortcut_state(edge, to)?;
            if !state.is_shortcut() {
                return state.orig_edge().ok_or_else(|| {
                    Error::storage(format!("CH edge {edge} has no skipped or original edge"))
                });
            }
            let (_, second, mid) = self.split(&state, from, to)?;
            edge = second;
            from = mid;
        }
    }

    fn endpoints(&self, edge: EdgeId) -> Result<(NodeId, NodeId)> {
        if edge < self.ch.base_edge_count() {
            self.graph.store.check_edge(edge)?;
            Ok((self.graph.store.node_a(edge)?, self.graph.store.node_b(edge)?))
        } else {
            self.ch.endpoints(edge)
        }
    }

    /// Endpoint of `edge` opposite to `node`, `None` if `node` is not on it
    fn other_end(&self, edge: EdgeId, node: NodeId) -> Result<Option<NodeId>> {
        let (a, b) = self.endpoints(edge)?;
        Ok(if a == node {
            Some(b)
        } else if b == node {
            Some(a)
        } else {
            None
        })
    }

    /// Key of the first original edge when walking `edge` towards `to`
    fn first_key(&self, edge: EdgeId, to: NodeId) -> Result<u32> {
        if edge < self.ch.base_edge_count() {
            Ok(self.graph.edge_state(edge, to)?.edge_key())
        } else {
            Ok(self.ch.shortcut_state(edge, to)?.orig_key_first())
        }
    }

    /// Key of the last original edge when walking `edge` towards `to`
    fn last_key(&self, edge: EdgeId, to: NodeId) -> Result<u32> {
        if edge < self.ch.base_edge_count() {
            Ok(self.graph.edge_state(edge, to)?.edge_key())
        } else {
            Ok(self.ch.shortcut_state(edge, to)?.orig_key_last())
        }
    }
}
