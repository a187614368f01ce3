//! Base graph - nodes, edges, geometry and names over segmented stores
//!
//! Adjacency is kept as intrusive singly linked lists inside the edge table:
//! every node record points at the first edge of its list and every edge
//! record carries one "next" pointer per endpoint.
//!
//! ```text
//!   nodes                         edges
//!   ┌──────────┬─────────┐        ┌────────┬────────┬────────┬────────┬─────┐
//!   │ EDGE_REF │ LAT LON │──┐     │ NODE_A │ NODE_B │ LINK_A │ LINK_B │ ... │
//!   └──────────┴─────────┘  └────►└────────┴────────┴───┬────┴───┬────┴─────┘
//!                                                       │        │
//!                                   next edge of NODE_A ◄┘        └► next edge of NODE_B
//! ```
//!
//! New edges are prepended to both lists in O(1). Geometry and key/value
//! pairs live in their own stores and are referenced from the edge record.

mod bbox;
pub(crate) mod edge;
pub(crate) mod geometry;
pub(crate) mod key_values;
mod optimize;
pub(crate) mod store;

pub use bbox::BBox;
pub use edge::{AllEdges, EdgeExplorer, EdgeIter, EdgeMut, EdgeState};
pub use geometry::{FetchMode, GEOMETRY_VERSION, GeoPoint};
pub use key_values::{KEY_VALUE_VERSION, NAME_KEY};
pub use optimize::OptimizeStats;
pub use store::{EDGES_VERSION, MAX_DIST_MM, NODES_VERSION};

use crate::encoding::{EncodedField, FieldLayout, bits};
use crate::storage::Directory;
use crate::turn_cost::{TurnCostIter, TurnCostMode, TurnCostStore};
use crate::{Error, Result};
use geometry::GeometryStore;
use key_values::KeyValueStore;
use roaring::RoaringBitmap;
use store::{NodesAndEdges, degree_to_int, ele_to_int, int_to_degree, int_to_ele};

/// Dense node id
pub type NodeId = u32;
/// Dense edge id
pub type EdgeId = u32;

/// Sentinel for "no edge" in adjacency lists and references
pub const NO_EDGE: u32 = u32::MAX;

/// Store names used by the base graph
pub const NODES_STORE: &str = "nodes";
/// Edge table store name
pub const EDGES_STORE: &str = "edges";
/// Geometry store name
pub const GEOMETRY_STORE: &str = "geometry";
/// Key/value store name
pub const KEY_VALUES_STORE: &str = "key_values";
/// Turn cost store name
pub const TURN_COSTS_STORE: &str = "turn_costs";

fn accept_all(_: &EdgeState) -> bool {
    true
}

/// Routing graph with bit-packed edge attributes
pub struct BaseGraph {
    pub(crate) store: NodesAndEdges,
    pub(crate) geometry: GeometryStore,
    pub(crate) key_values: KeyValueStore,
    pub(crate) turn_costs: Option<TurnCostStore>,
    removed: RoaringBitmap,
    layout: FieldLayout,
}

impl BaseGraph {
    /// Wire a graph onto stores of `dir`
    ///
    /// Call [`BaseGraph::create`] or [`BaseGraph::load_existing`] before use.
    pub fn new(dir: &Directory, layout: &FieldLayout, elevation: bool, turn_costs: bool) -> Result<Self> {
        if !layout.has_reverse_bit() {
            return Err(Error::invalid_config(
                "edge flag layout must reserve the reverse bit",
            ));
        }
        let store = NodesAndEdges::new(
            dir.create(NODES_STORE)?,
            dir.create(EDGES_STORE)?,
            elevation,
            turn_costs,
            layout.words(),
        );
        let turn_costs = if turn_costs {
            Some(TurnCostStore::new(dir.create(TURN_COSTS_STORE)?))
        } else {
            None
        };
        Ok(Self {
            store,
            geometry: GeometryStore::new(dir.create(GEOMETRY_STORE)?, elevation),
            key_values: KeyValueStore::new(dir.create(KEY_VALUES_STORE)?),
            turn_costs,
            removed: RoaringBitmap::new(),
            layout: layout.clone(),
        })
    }

    /// Allocate empty stores
    pub fn create(&mut self, bytes: u64) -> Result<()> {
        self.store.create(bytes)?;
        self.geometry.create(bytes)?;
        self.key_values.create(bytes)?;
        if let Some(tc) = &mut self.turn_costs {
            tc.create(bytes)?;
        }
        tracing::debug!(
            "Created base graph (elevation: {}, turn costs: {}, flag words: {})",
            self.has_elevation(),
            self.has_turn_costs(),
            self.layout.words()
        );
        Ok(())
    }

    /// Attach to persisted stores
    ///
    /// Returns `Ok(false)` when nothing was persisted yet; layout, dimension
    /// and version mismatches are errors.
    pub fn load_existing(&mut self) -> Result<bool> {
        if !self.store.load_existing()? {
            return Ok(false);
        }
        if !self.geometry.load_existing()? {
            return Err(Error::storage("graph exists but geometry store is missing"));
        }
        if !self.key_values.load_existing()? {
            return Err(Error::storage("graph exists but key/value store is missing"));
        }
        if let Some(tc) = &mut self.turn_costs {
            if !tc.load_existing()? {
                return Err(Error::storage("graph exists but turn cost store is missing"));
            }
        }
        self.removed.clear();
        tracing::debug!(
            "Loaded base graph with {} nodes and {} edges",
            self.node_count(),
            self.edge_count()
        );
        Ok(true)
    }

    /// Write headers and persist all stores
    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()?;
        self.geometry.flush()?;
        self.key_values.flush()?;
        if let Some(tc) = &mut self.turn_costs {
            tc.flush()?;
        }
        tracing::debug!("Flushed base graph");
        Ok(())
    }

    /// Release all stores; any later access fails with `Error::Closed`
    pub fn close(&mut self) {
        self.store.close();
        self.geometry.close();
        self.key_values.close();
        if let Some(tc) = &mut self.turn_costs {
            tc.close();
        }
    }

    /// Whether the graph was closed
    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }

    /// Copy every store into `other`, which must be created with the same
    /// layout, dimension and turn-cost setting
    pub fn copy_to(&mut self, other: &mut BaseGraph) -> Result<()> {
        if self.layout != other.layout
            || self.has_elevation() != other.has_elevation()
            || self.has_turn_costs() != other.has_turn_costs()
        {
            return Err(Error::invalid_config(
                "copy target has a different layout, dimension or turn-cost setting",
            ));
        }
        self.store.write_headers()?;
        self.geometry.write_headers()?;
        self.key_values.write_headers()?;
        self.store.nodes.copy_to(other.store.nodes.as_mut())?;
        self.store.edges.copy_to(other.store.edges.as_mut())?;
        self.geometry.data_access().copy_to(other.geometry.data_access_mut())?;
        self.key_values.data_access().copy_to(other.key_values.data_access_mut())?;
        other.store.read_headers()?;
        other.geometry.read_headers()?;
        other.key_values.read_headers()?;
        if let (Some(from), Some(to)) = (&mut self.turn_costs, &mut other.turn_costs) {
            from.write_headers()?;
            from.data_access().copy_to(to.data_access_mut())?;
            to.read_headers()?;
        }
        other.removed = self.removed.clone();
        Ok(())
    }

    /// Flag layout of the edge table
    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    /// Number of nodes
    pub fn node_count(&self) -> u32 {
        self.store.node_count()
    }

    /// Number of edges
    pub fn edge_count(&self) -> u32 {
        self.store.edge_count()
    }

    /// Whether nodes carry an elevation
    pub fn has_elevation(&self) -> bool {
        self.store.has_elevation()
    }

    /// Whether a turn cost store is attached
    pub fn has_turn_costs(&self) -> bool {
        self.store.has_turn_costs()
    }

    /// Bounds of all node coordinates written so far
    pub fn bounds(&self) -> BBox {
        self.store.bounds
    }

    /// Bytes used by pillar geometry
    pub fn geometry_bytes(&self) -> u64 {
        self.geometry.bytes_used()
    }

    /// Stop accepting new nodes and edges
    ///
    /// Nodes marked removed must be compacted first.
    pub fn freeze(&mut self) -> Result<()> {
        if self.store.frozen {
            return Ok(());
        }
        if !self.removed.is_empty() {
            return Err(Error::illegal_state(format!(
                "{} removed nodes must be compacted with optimize() before freeze",
                self.removed.len()
            )));
        }
        self.store.frozen = true;
        tracing::info!(
            "Froze base graph with {} nodes and {} edges",
            self.node_count(),
            self.edge_count()
        );
        Ok(())
    }

    /// Whether the graph was frozen
    pub fn is_frozen(&self) -> bool {
        self.store.frozen
    }

    fn check_not_frozen(&self, what: &str) -> Result<()> {
        if self.store.frozen {
            return Err(Error::frozen(format!("cannot {what} after freeze")));
        }
        Ok(())
    }

    // ---- nodes ----------------------------------------------------------

    /// Grow the node table to hold at least `count` nodes
    pub fn create_nodes(&mut self, count: u32) -> Result<()> {
        if count > self.node_count() {
            self.check_not_frozen("create nodes")?;
        }
        self.store.ensure_node_count(count)
    }

    /// Write the coordinates of `node`, growing the table when needed
    ///
    /// `ele` is required to be `None` on 2D graphs; on 3D graphs `None`
    /// stores 0 m.
    pub fn set_node(&mut self, node: NodeId, lat: f64, lon: f64, ele: Option<f64>) -> Result<()> {
        let lat = degree_to_int(lat, 90.0, "latitude")?;
        let lon = degree_to_int(lon, 180.0, "longitude")?;
        let ele = match (self.has_elevation(), ele) {
            (true, ele) => Some(ele_to_int(ele.unwrap_or(0.0))?),
            (false, None) => None,
            (false, Some(_)) => {
                return Err(Error::invalid_argument("elevation given for a 2D graph"));
            }
        };
        if node >= self.node_count() {
            self.check_not_frozen("create nodes")?;
            let count = node
                .checked_add(1)
                .ok_or_else(|| Error::value_too_large(format!("node id {node}")))?;
            self.store.ensure_node_count(count)?;
        }
        self.store.set_coordinates(node, lat, lon, ele)?;
        self.store
            .bounds
            .extend(int_to_degree(lat), int_to_degree(lon), ele.map(int_to_ele));
        Ok(())
    }

    /// Coordinates of `node`
    pub fn node(&self, node: NodeId) -> Result<GeoPoint> {
        self.store.check_node(node)?;
        self.node_point(node)
    }

    /// Latitude of `node` in degrees
    pub fn lat(&self, node: NodeId) -> Result<f64> {
        self.store.check_node(node)?;
        Ok(int_to_degree(self.store.lat_int(node)?))
    }

    /// Longitude of `node` in degrees
    pub fn lon(&self, node: NodeId) -> Result<f64> {
        self.store.check_node(node)?;
        Ok(int_to_degree(self.store.lon_int(node)?))
    }

    /// Elevation of `node` in metres (`None` on 2D graphs)
    pub fn ele(&self, node: NodeId) -> Result<Option<f64>> {
        self.store.check_node(node)?;
        Ok(self.store.ele_int(node)?.map(int_to_ele))
    }

    fn node_point(&self, node: NodeId) -> Result<GeoPoint> {
        Ok(GeoPoint {
            lat: int_to_degree(self.store.lat_int(node)?),
            lon: int_to_degree(self.store.lon_int(node)?),
            ele: self.store.ele_int(node)?.map(int_to_ele),
        })
    }

    /// Mark `node` for removal by the next [`BaseGraph::optimize`]
    pub fn mark_node_removed(&mut self, node: NodeId) -> Result<()> {
        self.check_not_frozen("remove nodes")?;
        self.store.check_node(node)?;
        self.removed.insert(node);
        Ok(())
    }

    /// Whether `node` is marked removed and not yet compacted
    pub fn is_node_removed(&self, node: NodeId) -> bool {
        self.removed.contains(node)
    }

    /// Number of nodes marked removed
    pub fn removed_count(&self) -> u64 {
        self.removed.len()
    }

    // ---- edges ----------------------------------------------------------

    /// Create an edge from `a` to `b` and return a handle oriented a → b
    ///
    /// Missing nodes are created. The record is prepended to the lists of
    /// both endpoints (once for a self-loop).
    pub fn create_edge(&mut self, a: NodeId, b: NodeId) -> Result<EdgeMut<'_>> {
        self.check_not_frozen("create edges")?;
        let count = a
            .max(b)
            .checked_add(1)
            .ok_or_else(|| Error::value_too_large(format!("node id {}", a.max(b))))?;
        self.store.ensure_node_count(count)?;

        let (lo, hi) = (a.min(b), a.max(b));
        let edge = self.store.push_edge(lo, hi)?;
        let mut flags = vec![0u32; self.layout.words()];
        bits::set_reverse_bit(&mut flags, a > b);
        self.store.write_flags(edge, &flags)?;

        let head = self.store.edge_ref(lo)?;
        self.store.set_link_a(edge, head)?;
        self.store.set_edge_ref(lo, edge)?;
        if lo != hi {
            let head = self.store.edge_ref(hi)?;
            self.store.set_link_b(edge, head)?;
            self.store.set_edge_ref(hi, edge)?;
        }

        let state = self.read_state(edge, a)?;
        Ok(EdgeMut { graph: self, state })
    }

    /// Snapshot of `edge` traversed from `base`; `base` must be an endpoint
    pub(crate) fn read_state(&self, edge: EdgeId, base: NodeId) -> Result<EdgeState> {
        let node_a = self.store.node_a(edge)?;
        let node_b = self.store.node_b(edge)?;
        let flags = self.store.read_flags(edge)?;
        let from_b = base == node_b && node_a != node_b;
        Ok(EdgeState {
            edge,
            base,
            adj: if from_b { node_a } else { node_b },
            reversed: bits::effective_reverse(from_b, bits::reverse_bit(&flags)),
            dist_mm: self.store.dist_mm(edge)?,
            geo_ref: self.store.geo_ref(edge)?,
            kv_ref: self.store.kv_ref(edge)?,
            flags,
        })
    }

    /// Snapshot of `edge` ending at `adj`
    ///
    /// Fails with `Error::EdgeOutOfRange` for unknown ids and with
    /// `Error::NoSuchEdgeOrientation` when `adj` is not an endpoint.
    pub fn edge_state(&self, edge: EdgeId, adj: NodeId) -> Result<EdgeState> {
        self.store.check_edge(edge)?;
        let node_a = self.store.node_a(edge)?;
        let node_b = self.store.node_b(edge)?;
        if adj == node_b {
            self.read_state(edge, node_a)
        } else if adj == node_a {
            self.read_state(edge, node_b)
        } else {
            Err(Error::NoSuchEdgeOrientation { edge, node: adj })
        }
    }

    /// Snapshot of `edge` in the direction it was created in
    pub fn edge_state_stored(&self, edge: EdgeId) -> Result<EdgeState> {
        self.store.check_edge(edge)?;
        let flags = self.store.read_flags(edge)?;
        let base = if bits::reverse_bit(&flags) {
            self.store.node_b(edge)?
        } else {
            self.store.node_a(edge)?
        };
        self.read_state(edge, base)
    }

    /// Snapshot for an edge key (`edge * 2 + reversed`)
    pub fn edge_state_for_key(&self, key: u32) -> Result<EdgeState> {
        let state = self.edge_state_stored(key / 2)?;
        Ok(if key & 1 == 1 { state.detach(true) } else { state })
    }

    /// Mutable handle on `edge` ending at `adj`
    pub fn edge_mut(&mut self, edge: EdgeId, adj: NodeId) -> Result<EdgeMut<'_>> {
        let state = self.edge_state(edge, adj)?;
        Ok(EdgeMut { graph: self, state })
    }

    /// Mutable handle with the orientation of an existing snapshot
    pub fn edge_mut_from(&mut self, state: &EdgeState) -> Result<EdgeMut<'_>> {
        if !self.is_adjacent_to_node(state.edge, state.base)? {
            return Err(Error::NoSuchEdgeOrientation {
                edge: state.edge,
                node: state.base,
            });
        }
        let mut fresh = self.read_state(state.edge, state.base)?;
        fresh.adj = state.adj;
        fresh.reversed = state.reversed;
        Ok(EdgeMut {
            graph: self,
            state: fresh,
        })
    }

    /// All edges of `node`
    pub fn edges(&self, node: NodeId) -> Result<EdgeIter<'_, fn(&EdgeState) -> bool>> {
        EdgeIter::new(self, node, accept_all as fn(&EdgeState) -> bool)
    }

    /// Edges of `node` accepted by `filter`
    pub fn edges_filtered<F: Fn(&EdgeState) -> bool>(&self, node: NodeId, filter: F) -> Result<EdgeIter<'_, F>> {
        EdgeIter::new(self, node, filter)
    }

    /// Reusable explorer applying `filter` to every list it walks
    pub fn explorer<F: Fn(&EdgeState) -> bool>(&self, filter: F) -> EdgeExplorer<'_, F> {
        EdgeExplorer::new(self, filter)
    }

    /// Every edge record in id order
    pub fn all_edges(&self) -> AllEdges<'_> {
        AllEdges::new(self)
    }

    /// Number of list entries of `node` (a self-loop counts once)
    pub fn degree(&self, node: NodeId) -> Result<usize> {
        let mut degree = 0;
        for state in self.edges(node)? {
            state?;
            degree += 1;
        }
        Ok(degree)
    }

    /// The endpoint of `edge` that is not `node`
    pub fn other_node(&self, edge: EdgeId, node: NodeId) -> Result<NodeId> {
        self.store.check_edge(edge)?;
        let node_a = self.store.node_a(edge)?;
        let node_b = self.store.node_b(edge)?;
        if node == node_a {
            Ok(node_b)
        } else if node == node_b {
            Ok(node_a)
        } else {
            Err(Error::NoSuchEdgeOrientation { edge, node })
        }
    }

    /// Whether `node` is an endpoint of `edge`
    pub fn is_adjacent_to_node(&self, edge: EdgeId, node: NodeId) -> Result<bool> {
        self.store.check_edge(edge)?;
        Ok(self.store.node_a(edge)? == node || self.store.node_b(edge)? == node)
    }

    /// Unlink `edge` from the list of `node`
    ///
    /// The record itself stays; the edge is still reachable from its other
    /// endpoint. Unlinking an edge that is no longer in the list is a no-op.
    pub fn disconnect_edge(&mut self, edge: EdgeId, node: NodeId) -> Result<()> {
        self.check_not_frozen("disconnect edges")?;
        if !self.is_adjacent_to_node(edge, node)? {
            return Err(Error::NoSuchEdgeOrientation { edge, node });
        }
        let mut prev = NO_EDGE;
        let mut current = self.store.edge_ref(node)?;
        while current != NO_EDGE {
            let next = self.store.link_for(current, node)?;
            if current == edge {
                if prev == NO_EDGE {
                    self.store.set_edge_ref(node, next)?;
                } else {
                    self.store.set_link_for(prev, node, next)?;
                }
                return Ok(());
            }
            prev = current;
            current = next;
        }
        Ok(())
    }

    /// Points of the way described by `state`, in its direction
    pub fn fetch_way_geometry(&self, state: &EdgeState, mode: FetchMode) -> Result<Vec<GeoPoint>> {
        let mut points = Vec::new();
        if mode.base {
            points.push(self.node_point(state.base)?);
        }
        if mode.pillars {
            let mut pillars = self.geometry.read(state.geo_ref)?;
            if state.reversed {
                pillars.reverse();
            }
            points.extend(pillars);
        }
        if mode.adj {
            points.push(self.node_point(state.adj)?);
        }
        Ok(points)
    }

    /// Key/value pairs of an edge
    pub fn key_values(&self, state: &EdgeState) -> Result<Vec<(String, String)>> {
        self.key_values.get(state.kv_ref)
    }

    /// Name of an edge, if any
    pub fn name(&self, state: &EdgeState) -> Result<Option<String>> {
        Ok(self
            .key_values(state)?
            .into_iter()
            .find(|(k, _)| k == NAME_KEY)
            .map(|(_, v)| v))
    }

    // ---- turn costs -----------------------------------------------------

    fn turn_cost_store(&self) -> Result<&TurnCostStore> {
        self.turn_costs
            .as_ref()
            .ok_or_else(|| Error::illegal_state("turn costs are not enabled"))
    }

    fn check_turn_edges(&self, from: EdgeId, to: EdgeId) -> Result<()> {
        if from != NO_EDGE {
            self.store.check_edge(from)?;
        }
        if to != NO_EDGE {
            self.store.check_edge(to)?;
        }
        Ok(())
    }

    /// Set one turn cost field for the turn `from` → `via` → `to`
    pub fn set_turn_cost<F: EncodedField>(
        &mut self,
        field: &F,
        from: EdgeId,
        via: NodeId,
        to: EdgeId,
        value: F::Value,
        mode: TurnCostMode,
    ) -> Result<()> {
        self.turn_cost_store()?;
        self.check_turn_edges(from, to)?;
        let tc = self
            .turn_costs
            .as_mut()
            .ok_or_else(|| Error::illegal_state("turn costs are not enabled"))?;
        tc.set(&mut self.store, field, from, via, to, value, mode)
    }

    /// Turn cost field value; the field default when nothing was stored
    pub fn turn_cost<F: EncodedField>(&self, field: &F, from: EdgeId, via: NodeId, to: EdgeId) -> Result<F::Value> {
        let tc = self.turn_cost_store()?;
        self.check_turn_edges(from, to)?;
        tc.get(&self.store, field, from, via, to)
    }

    /// Set the whole turn cost word
    pub fn set_turn_cost_flags(
        &mut self,
        from: EdgeId,
        via: NodeId,
        to: EdgeId,
        flags: u32,
        mode: TurnCostMode,
    ) -> Result<()> {
        self.turn_cost_store()?;
        self.check_turn_edges(from, to)?;
        let tc = self
            .turn_costs
            .as_mut()
            .ok_or_else(|| Error::illegal_state("turn costs are not enabled"))?;
        tc.set_flags(&mut self.store, from, via, to, flags, mode)
    }

    /// Whole turn cost word, 0 when nothing was stored
    pub fn turn_cost_flags(&self, from: EdgeId, via: NodeId, to: EdgeId) -> Result<u32> {
        let tc = self.turn_cost_store()?;
        self.check_turn_edges(from, to)?;
        tc.flags(&self.store, from, via, to)
    }

    /// Number of turn cost records at `via`
    pub fn turn_cost_count(&self, via: NodeId) -> Result<usize> {
        self.turn_cost_store()?.count(&self.store, via)
    }

    /// Total number of turn cost records
    pub fn turn_cost_len(&self) -> Result<u32> {
        Ok(self.turn_cost_store()?.len())
    }

    /// Every turn cost record, grouped by via node
    pub fn turn_cost_entries(&self) -> Result<TurnCostIter<'_>> {
        Ok(self.turn_cost_store()?.iter(&self.store))
    }
}

impl std::fmt::Debug for BaseGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseGraph")
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .field("elevation", &self.has_elevation())
            .field("turn_costs", &self.has_turn_costs())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}
