//! Oriented edge views
//!
//! An [`EdgeState`] is a read snapshot of one edge record seen from a base
//! node. Field values are stored relative to the direction the edge was
//! created in, so every state carries `reversed` (handle direction XOR stored
//! reverse bit) and reads the matching slot. Snapshots are independent copies;
//! writes go through [`EdgeMut`], which commits to the backing record at once.

use super::geometry::{FetchMode, GeoPoint};
use super::key_values::NAME_KEY;
use super::{BaseGraph, EdgeId, NO_EDGE, NodeId};
use crate::encoding::{EncodedField, bits};
use crate::{Error, Result};
use std::ops::Deref;

/// Read snapshot of an edge as seen from `base_node`
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeState {
    pub(crate) edge: EdgeId,
    pub(crate) base: NodeId,
    pub(crate) adj: NodeId,
    pub(crate) reversed: bool,
    pub(crate) dist_mm: u32,
    pub(crate) geo_ref: u32,
    pub(crate) kv_ref: u32,
    pub(crate) flags: Vec<u32>,
}

impl EdgeState {
    /// Edge id
    pub fn edge(&self) -> EdgeId {
        self.edge
    }

    /// Node the traversal starts at
    pub fn base_node(&self) -> NodeId {
        self.base
    }

    /// Node the traversal ends at
    pub fn adj_node(&self) -> NodeId {
        self.adj
    }

    /// Whether this view runs against the creation direction
    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// Direction-aware handle: `edge * 2 + reversed`
    pub fn edge_key(&self) -> u32 {
        self.edge * 2 + self.reversed as u32
    }

    /// Distance in metres
    pub fn distance(&self) -> f64 {
        self.dist_mm as f64 / 1000.0
    }

    /// Distance in stored millimetres
    pub fn distance_mm(&self) -> u32 {
        self.dist_mm
    }

    /// Raw flag block, in creation orientation
    pub fn flags(&self) -> &[u32] {
        &self.flags
    }

    /// Whether the edge has pillar geometry
    pub fn has_geometry(&self) -> bool {
        self.geo_ref != 0
    }

    /// Field value in the direction of this view
    pub fn get<F: EncodedField>(&self, field: &F) -> F::Value {
        field.read(&self.flags, self.reversed)
    }

    /// Field value against the direction of this view
    pub fn get_reverse<F: EncodedField>(&self, field: &F) -> F::Value {
        field.read(&self.flags, !self.reversed)
    }

    /// Independent copy, optionally flipped to the opposite direction
    pub fn detach(&self, reverse: bool) -> EdgeState {
        let mut state = self.clone();
        if reverse {
            std::mem::swap(&mut state.base, &mut state.adj);
            state.reversed = !state.reversed;
        }
        state
    }
}

/// Mutable handle on one edge
///
/// Reads come from the snapshot it derefs to; every setter writes through to
/// the graph before returning.
pub struct EdgeMut<'g> {
    pub(crate) graph: &'g mut BaseGraph,
    pub(crate) state: EdgeState,
}

impl Deref for EdgeMut<'_> {
    type Target = EdgeState;

    fn deref(&self) -> &EdgeState {
        &self.state
    }
}

impl EdgeMut<'_> {
    /// Set the distance in metres
    ///
    /// Values above [`MAX_DIST_MM`](super::MAX_DIST_MM) millimetres fail with
    /// `Error::ValueTooLarge`; NaN and negative values with
    /// `Error::InvalidArgument`.
    pub fn set_distance(&mut self, meters: f64) -> Result<&mut Self> {
        let mm = super::store::distance_to_mm(meters)?;
        self.graph.store.set_dist_mm(self.state.edge, mm)?;
        self.state.dist_mm = mm;
        Ok(self)
    }

    fn commit_flags(&mut self) -> Result<()> {
        self.graph.store.write_flags(self.state.edge, &self.state.flags)
    }

    /// Set a field in the direction of this handle
    pub fn set<F: EncodedField>(&mut self, field: &F, value: F::Value) -> Result<&mut Self> {
        field.write(&mut self.state.flags, self.state.reversed, value)?;
        self.commit_flags()?;
        Ok(self)
    }

    /// Set a field against the direction of this handle
    pub fn set_reverse<F: EncodedField>(&mut self, field: &F, value: F::Value) -> Result<&mut Self> {
        field.write(&mut self.state.flags, !self.state.reversed, value)?;
        self.commit_flags()?;
        Ok(self)
    }

    /// Replace the raw flag block (creation orientation)
    ///
    /// The stored reverse bit is preserved.
    pub fn set_flags(&mut self, words: &[u32]) -> Result<&mut Self> {
        if words.len() != self.state.flags.len() {
            return Err(Error::invalid_argument(format!(
                "flag block has {} words, layout needs {}",
                words.len(),
                self.state.flags.len()
            )));
        }
        let stored = bits::reverse_bit(&self.state.flags);
        let mut flags = words.to_vec();
        bits::set_reverse_bit(&mut flags, stored);
        self.state.flags = flags;
        self.commit_flags()?;
        Ok(self)
    }

    /// Set pillar points, given in the direction of this handle
    pub fn set_way_geometry(&mut self, pillars: &[GeoPoint]) -> Result<&mut Self> {
        let mut points = pillars.to_vec();
        if self.state.reversed {
            points.reverse();
        }
        let reference = self.graph.geometry.write(self.state.geo_ref, &points)?;
        self.graph.store.set_geo_ref(self.state.edge, reference)?;
        self.state.geo_ref = reference;
        Ok(self)
    }

    /// Replace the key/value pairs of the edge
    pub fn set_key_values(&mut self, pairs: &[(String, String)]) -> Result<&mut Self> {
        let reference = self.graph.key_values.add(pairs)?;
        self.graph.store.set_kv_ref(self.state.edge, reference)?;
        self.state.kv_ref = reference;
        Ok(self)
    }

    /// Replace the key/value pairs with a single name
    pub fn set_name(&mut self, name: &str) -> Result<&mut Self> {
        self.set_key_values(&[(NAME_KEY.to_string(), name.to_string())])
    }

    /// Geometry of this edge, see [`BaseGraph::fetch_way_geometry`]
    pub fn fetch_way_geometry(&self, mode: FetchMode) -> Result<Vec<GeoPoint>> {
        self.graph.fetch_way_geometry(&self.state, mode)
    }

    /// Key/value pairs of this edge
    pub fn key_values(&self) -> Result<Vec<(String, String)>> {
        self.graph.key_values(&self.state)
    }

    /// Name of this edge
    pub fn name(&self) -> Result<Option<String>> {
        self.graph.name(&self.state)
    }
}

/// Lazy, single-pass iterator over the adjacency list of one node
///
/// Created by [`BaseGraph::edges`] or an [`EdgeExplorer`]. Iterators carry
/// their own cursor and must not be shared between threads; create one per
/// thread instead.
pub struct EdgeIter<'g, F> {
    graph: &'g BaseGraph,
    base: NodeId,
    next: EdgeId,
    filter: F,
}

impl<'g, F: Fn(&EdgeState) -> bool> EdgeIter<'g, F> {
    pub(crate) fn new(graph: &'g BaseGraph, base: NodeId, filter: F) -> Result<Self> {
        graph.store.check_node(base)?;
        Ok(Self {
            graph,
            base,
            next: graph.store.edge_ref(base)?,
            filter,
        })
    }

    /// Node whose list is walked
    pub fn base_node(&self) -> NodeId {
        self.base
    }

    fn advance(&mut self) -> Result<Option<EdgeState>> {
        while self.next != NO_EDGE {
            let edge = self.next;
            self.next = self.graph.store.link_for(edge, self.base)?;
            let state = self.graph.read_state(edge, self.base)?;
            if (self.filter)(&state) {
                return Ok(Some(state));
            }
        }
        Ok(None)
    }
}

impl<F: Fn(&EdgeState) -> bool> Iterator for EdgeIter<'_, F> {
    type Item = Result<EdgeState>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(state) => state.map(Ok),
            Err(e) => {
                self.next = NO_EDGE;
                Some(Err(e))
            }
        }
    }
}

/// Reusable source of filtered adjacency iterators
pub struct EdgeExplorer<'g, F> {
    graph: &'g BaseGraph,
    filter: F,
}

impl<'g, F: Fn(&EdgeState) -> bool> EdgeExplorer<'g, F> {
    pub(crate) fn new(graph: &'g BaseGraph, filter: F) -> Self {
        Self { graph, filter }
    }

    /// Iterate the accepted edges of `node`
    pub fn set_base_node(&self, node: NodeId) -> Result<EdgeIter<'g, &F>> {
        EdgeIter::new(self.graph, node, &self.filter)
    }
}

/// Iterator over every edge record in id order, in creation orientation
///
/// Includes edges touching nodes that are marked removed but not yet
/// compacted.
pub struct AllEdges<'g> {
    graph: &'g BaseGraph,
    next: EdgeId,
}

impl<'g> AllEdges<'g> {
    pub(crate) fn new(graph: &'g BaseGraph) -> Self {
        Self { graph, next: 0 }
    }

    /// Number of edges the iterator covers in total
    pub fn len(&self) -> u32 {
        self.graph.edge_count()
    }

    /// Whether the graph has no edges
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Iterator for AllEdges<'_> {
    type Item = Result<EdgeState>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.graph.edge_count() {
            return None;
        }
        let edge = self.next;
        self.next += 1;
        let state = self.graph.edge_state_stored(edge);
        if state.is_err() {
            self.next = self.graph.edge_count();
        }
        Some(state)
    }
}
