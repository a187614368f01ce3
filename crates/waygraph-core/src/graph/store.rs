//! Node and edge record tables
//!
//! # Record Layout
//!
//! Node (12 to 20 bytes):
//! ```text
//! EDGE_REF(4) | LAT(4) | LON(4) | [ELE(4)] | [TC_REF(4)]
//! ```
//! Edge (28 bytes + 4 per flag word):
//! ```text
//! NODE_A(4) | NODE_B(4) | LINK_A(4) | LINK_B(4) | DIST_MM(4) | GEO_REF(4) | KV_REF(4) | FLAGS(4*n)
//! ```
//! `NODE_A <= NODE_B` always holds; `LINK_A` chains the edge into the list of
//! `NODE_A`, `LINK_B` into the list of `NODE_B`. Self-loops only use `LINK_A`.

use super::{BBox, EdgeId, NO_EDGE, NodeId};
use crate::storage::DataAccess;
use crate::{Error, Result};

/// Version stamp of the node table
pub const NODES_VERSION: i32 = 3;
/// Version stamp of the edge table
pub const EDGES_VERSION: i32 = 3;

/// Fixed-point scale of coordinates (1e-7 degrees)
pub(crate) const COORD_FACTOR: f64 = 1e7;
/// Fixed-point scale of elevations (millimetres)
pub(crate) const ELE_FACTOR: f64 = 1000.0;
/// Largest storable edge distance in millimetres
pub const MAX_DIST_MM: u32 = i32::MAX as u32;

const N_EDGE_REF: u64 = 0;
const N_LAT: u64 = 4;
const N_LON: u64 = 8;

const E_NODEA: u64 = 0;
const E_NODEB: u64 = 4;
const E_LINKA: u64 = 8;
const E_LINKB: u64 = 12;
const E_DIST: u64 = 16;
const E_GEO: u64 = 20;
const E_KV: u64 = 24;
const E_FLAGS: u64 = 28;

// header slots of the node table
const H_VERSION: usize = 0;
const H_ENTRY_BYTES: usize = 1;
const H_COUNT: usize = 2;
const H_MIN_LON: usize = 3;
const H_MAX_LON: usize = 4;
const H_MIN_LAT: usize = 5;
const H_MAX_LAT: usize = 6;
const H_ELEVATION: usize = 7;
const H_MIN_ELE: usize = 8;
const H_MAX_ELE: usize = 9;
const H_FROZEN: usize = 10;
const H_TURN_COSTS: usize = 11;
// header slots of the edge table
const H_FLAG_WORDS: usize = 3;

/// Convert degrees to fixed point
pub(crate) fn degree_to_int(deg: f64, limit: f64, what: &str) -> Result<i32> {
    if !deg.is_finite() || deg.abs() > limit {
        return Err(Error::invalid_argument(format!(
            "{what} {deg} outside [-{limit}, {limit}]"
        )));
    }
    Ok((deg * COORD_FACTOR).round() as i32)
}

pub(crate) fn int_to_degree(value: i32) -> f64 {
    value as f64 / COORD_FACTOR
}

pub(crate) fn ele_to_int(ele: f64) -> Result<i32> {
    if !ele.is_finite() {
        return Err(Error::invalid_argument(format!("elevation {ele} is not finite")));
    }
    let mm = (ele * ELE_FACTOR).round();
    if mm > i32::MAX as f64 || mm < i32::MIN as f64 {
        return Err(Error::value_too_large(format!("elevation {ele} m")));
    }
    Ok(mm as i32)
}

pub(crate) fn int_to_ele(value: i32) -> f64 {
    value as f64 / ELE_FACTOR
}

/// Convert metres to stored millimetres
pub(crate) fn distance_to_mm(meters: f64) -> Result<u32> {
    if meters.is_nan() || meters < 0.0 {
        return Err(Error::invalid_argument(format!(
            "distance {meters} must be a non-negative number"
        )));
    }
    let mm = (meters * 1000.0).round();
    if mm > MAX_DIST_MM as f64 {
        return Err(Error::value_too_large(format!(
            "distance {meters} m exceeds maximum {} m",
            MAX_DIST_MM as f64 / 1000.0
        )));
    }
    Ok(mm as u32)
}

/// Raw access to the node and edge tables
pub(crate) struct NodesAndEdges {
    pub(crate) nodes: Box<dyn DataAccess>,
    pub(crate) edges: Box<dyn DataAccess>,
    node_entry_bytes: u32,
    edge_entry_bytes: u32,
    n_ele: Option<u64>,
    n_tc: Option<u64>,
    flag_words: usize,
    node_count: u32,
    edge_count: u32,
    pub(crate) bounds: BBox,
    pub(crate) frozen: bool,
}

impl NodesAndEdges {
    pub(crate) fn new(
        nodes: Box<dyn DataAccess>,
        edges: Box<dyn DataAccess>,
        elevation: bool,
        turn_costs: bool,
        flag_words: usize,
    ) -> Self {
        let mut next = N_LON + 4;
        let n_ele = elevation.then(|| {
            let at = next;
            next += 4;
            at
        });
        let n_tc = turn_costs.then(|| {
            let at = next;
            next += 4;
            at
        });
        Self {
            nodes,
            edges,
            node_entry_bytes: next as u32,
            edge_entry_bytes: (E_FLAGS as usize + 4 * flag_words) as u32,
            n_ele,
            n_tc,
            flag_words,
            node_count: 0,
            edge_count: 0,
            bounds: BBox::empty(elevation),
            frozen: false,
        }
    }

    pub(crate) fn create(&mut self, bytes: u64) -> Result<()> {
        self.nodes.create(bytes)?;
        self.edges.create(bytes)
    }

    pub(crate) fn load_existing(&mut self) -> Result<bool> {
        if !self.nodes.load_existing()? {
            return Ok(false);
        }
        if !self.edges.load_existing()? {
            return Err(Error::storage("node table exists but edge table is missing"));
        }
        self.read_headers()?;
        Ok(true)
    }

    pub(crate) fn read_headers(&mut self) -> Result<()> {
        let version = self.nodes.get_header(H_VERSION)?;
        if version != NODES_VERSION {
            return Err(Error::version_mismatch(
                self.nodes.name(),
                NODES_VERSION as i64,
                version as i64,
            ));
        }
        let version = self.edges.get_header(H_VERSION)?;
        if version != EDGES_VERSION {
            return Err(Error::version_mismatch(
                self.edges.name(),
                EDGES_VERSION as i64,
                version as i64,
            ));
        }
        let elevation = self.nodes.get_header(H_ELEVATION)? == 1;
        if elevation != self.n_ele.is_some() {
            return Err(Error::invalid_config(format!(
                "graph was stored {} elevation",
                if elevation { "with" } else { "without" }
            )));
        }
        let turn_costs = self.nodes.get_header(H_TURN_COSTS)? == 1;
        if turn_costs != self.n_tc.is_some() {
            return Err(Error::invalid_config(format!(
                "graph was stored {} turn costs",
                if turn_costs { "with" } else { "without" }
            )));
        }
        let flag_words = self.edges.get_header(H_FLAG_WORDS)? as usize;
        if flag_words != self.flag_words {
            return Err(Error::invalid_config(format!(
                "graph was stored with {} flag words, layout needs {}",
                flag_words, self.flag_words
            )));
        }
        if self.nodes.get_header(H_ENTRY_BYTES)? as u32 != self.node_entry_bytes
            || self.edges.get_header(H_ENTRY_BYTES)? as u32 != self.edge_entry_bytes
        {
            return Err(Error::storage("stored record widths do not match"));
        }
        self.node_count = self.nodes.get_header(H_COUNT)? as u32;
        self.edge_count = self.edges.get_header(H_COUNT)? as u32;
        self.bounds = BBox {
            min_lon: int_to_degree(self.nodes.get_header(H_MIN_LON)?),
            max_lon: int_to_degree(self.nodes.get_header(H_MAX_LON)?),
            min_lat: int_to_degree(self.nodes.get_header(H_MIN_LAT)?),
            max_lat: int_to_degree(self.nodes.get_header(H_MAX_LAT)?),
            min_ele: int_to_ele(self.nodes.get_header(H_MIN_ELE)?),
            max_ele: int_to_ele(self.nodes.get_header(H_MAX_ELE)?),
            elevation,
        };
        self.frozen = self.nodes.get_header(H_FROZEN)? == 1;
        Ok(())
    }

    pub(crate) fn write_headers(&mut self) -> Result<()> {
        self.nodes.set_header(H_VERSION, NODES_VERSION)?;
        self.nodes.set_header(H_ENTRY_BYTES, self.node_entry_bytes as i32)?;
        self.nodes.set_header(H_COUNT, self.node_count as i32)?;
        // an empty box stores min > max and reads back empty
        let clamp = |v: f64, limit: f64| v.clamp(-limit, limit);
        self.nodes.set_header(H_MIN_LON, (clamp(self.bounds.min_lon, 180.0) * COORD_FACTOR).round() as i32)?;
        self.nodes.set_header(H_MAX_LON, (clamp(self.bounds.max_lon, 180.0) * COORD_FACTOR).round() as i32)?;
        self.nodes.set_header(H_MIN_LAT, (clamp(self.bounds.min_lat, 90.0) * COORD_FACTOR).round() as i32)?;
        self.nodes.set_header(H_MAX_LAT, (clamp(self.bounds.max_lat, 90.0) * COORD_FACTOR).round() as i32)?;
        let ele_limit = i32::MAX as f64 / ELE_FACTOR;
        self.nodes.set_header(H_MIN_ELE, (clamp(self.bounds.min_ele, ele_limit) * ELE_FACTOR).round() as i32)?;
        self.nodes.set_header(H_MAX_ELE, (clamp(self.bounds.max_ele, ele_limit) * ELE_FACTOR).round() as i32)?;
        self.nodes.set_header(H_ELEVATION, self.n_ele.is_some() as i32)?;
        self.nodes.set_header(H_FROZEN, self.frozen as i32)?;
        self.nodes.set_header(H_TURN_COSTS, self.n_tc.is_some() as i32)?;

        self.edges.set_header(H_VERSION, EDGES_VERSION)?;
        self.edges.set_header(H_ENTRY_BYTES, self.edge_entry_bytes as i32)?;
        self.edges.set_header(H_COUNT, self.edge_count as i32)?;
        self.edges.set_header(H_FLAG_WORDS, self.flag_words as i32)?;
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.write_headers()?;
        self.nodes.flush()?;
        self.edges.flush()
    }

    pub(crate) fn close(&mut self) {
        self.nodes.close();
        self.edges.close();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.nodes.is_closed() || self.edges.is_closed()
    }

    pub(crate) fn node_count(&self) -> u32 {
        self.node_count
    }

    pub(crate) fn edge_count(&self) -> u32 {
        self.edge_count
    }

    pub(crate) fn flag_words(&self) -> usize {
        self.flag_words
    }

    pub(crate) fn has_elevation(&self) -> bool {
        self.n_ele.is_some()
    }

    pub(crate) fn has_turn_costs(&self) -> bool {
        self.n_tc.is_some()
    }

    pub(crate) fn node_entry_bytes(&self) -> u32 {
        self.node_entry_bytes
    }

    pub(crate) fn edge_entry_bytes(&self) -> u32 {
        self.edge_entry_bytes
    }

    fn node_ptr(&self, node: NodeId) -> u64 {
        node as u64 * self.node_entry_bytes as u64
    }

    fn edge_ptr(&self, edge: EdgeId) -> u64 {
        edge as u64 * self.edge_entry_bytes as u64
    }

    pub(crate) fn check_node(&self, node: NodeId) -> Result<()> {
        if node >= self.node_count {
            return Err(Error::NodeOutOfRange {
                node,
                count: self.node_count,
            });
        }
        Ok(())
    }

    pub(crate) fn check_edge(&self, edge: EdgeId) -> Result<()> {
        if edge >= self.edge_count {
            return Err(Error::EdgeOutOfRange {
                edge,
                count: self.edge_count,
            });
        }
        Ok(())
    }

    /// Grow the node table to `count` nodes with empty adjacency lists
    pub(crate) fn ensure_node_count(&mut self, count: u32) -> Result<()> {
        if count <= self.node_count {
            return Ok(());
        }
        if count > i32::MAX as u32 {
            return Err(Error::value_too_large(format!("node count {count}")));
        }
        self.nodes
            .ensure_capacity(count as u64 * self.node_entry_bytes as u64)?;
        // trimmed tables may leave stale bytes in the last segment
        let zeros = vec![0u8; self.node_entry_bytes as usize];
        for node in self.node_count..count {
            let ptr = self.node_ptr(node);
            self.nodes.set_bytes(ptr, &zeros)?;
            self.nodes.set_u32(ptr + N_EDGE_REF, NO_EDGE)?;
            if let Some(tc) = self.n_tc {
                self.nodes.set_u32(ptr + tc, NO_EDGE)?;
            }
        }
        self.node_count = count;
        Ok(())
    }

    /// Truncate the table after compaction
    pub(crate) fn set_node_count(&mut self, count: u32) -> Result<()> {
        self.node_count = count;
        self.nodes
            .trim_to(count as u64 * self.node_entry_bytes as u64)
    }

    pub(crate) fn set_edge_count(&mut self, count: u32) -> Result<()> {
        self.edge_count = count;
        self.edges
            .trim_to(count as u64 * self.edge_entry_bytes as u64)
    }

    pub(crate) fn edge_ref(&self, node: NodeId) -> Result<EdgeId> {
        self.nodes.get_u32(self.node_ptr(node) + N_EDGE_REF)
    }

    pub(crate) fn set_edge_ref(&mut self, node: NodeId, edge: EdgeId) -> Result<()> {
        self.nodes.set_u32(self.node_ptr(node) + N_EDGE_REF, edge)
    }

    pub(crate) fn lat_int(&self, node: NodeId) -> Result<i32> {
        self.nodes.get_int(self.node_ptr(node) + N_LAT)
    }

    pub(crate) fn lon_int(&self, node: NodeId) -> Result<i32> {
        self.nodes.get_int(self.node_ptr(node) + N_LON)
    }

    pub(crate) fn ele_int(&self, node: NodeId) -> Result<Option<i32>> {
        match self.n_ele {
            Some(offset) => Ok(Some(self.nodes.get_int(self.node_ptr(node) + offset)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn set_coordinates(
        &mut self,
        node: NodeId,
        lat: i32,
        lon: i32,
        ele: Option<i32>,
    ) -> Result<()> {
        let ptr = self.node_ptr(node);
        self.nodes.set_int(ptr + N_LAT, lat)?;
        self.nodes.set_int(ptr + N_LON, lon)?;
        if let (Some(offset), Some(ele)) = (self.n_ele, ele) {
            self.nodes.set_int(ptr + offset, ele)?;
        }
        Ok(())
    }

    pub(crate) fn turn_cost_ref(&self, node: NodeId) -> Result<u32> {
        match self.n_tc {
            Some(offset) => self.nodes.get_u32(self.node_ptr(node) + offset),
            None => Err(Error::illegal_state("turn costs are not enabled")),
        }
    }

    pub(crate) fn set_turn_cost_ref(&mut self, node: NodeId, entry: u32) -> Result<()> {
        match self.n_tc {
            Some(offset) => self.nodes.set_u32(self.node_ptr(node) + offset, entry),
            None => Err(Error::illegal_state("turn costs are not enabled")),
        }
    }

    /// Append a zeroed edge record and return its id
    pub(crate) fn push_edge(&mut self, node_a: NodeId, node_b: NodeId) -> Result<EdgeId> {
        if self.edge_count >= i32::MAX as u32 {
            return Err(Error::value_too_large("edge count exceeds i32::MAX"));
        }
        let edge = self.edge_count;
        let ptr = self.edge_ptr(edge);
        self.edges
            .ensure_capacity(ptr + self.edge_entry_bytes as u64)?;
        self.edge_count += 1;
        let zeros = vec![0u8; self.edge_entry_bytes as usize];
        self.edges.set_bytes(ptr, &zeros)?;
        self.edges.set_u32(ptr + E_NODEA, node_a)?;
        self.edges.set_u32(ptr + E_NODEB, node_b)?;
        self.edges.set_u32(ptr + E_LINKA, NO_EDGE)?;
        self.edges.set_u32(ptr + E_LINKB, NO_EDGE)?;
        Ok(edge)
    }

    pub(crate) fn node_a(&self, edge: EdgeId) -> Result<NodeId> {
        self.edges.get_u32(self.edge_ptr(edge) + E_NODEA)
    }

    pub(crate) fn node_b(&self, edge: EdgeId) -> Result<NodeId> {
        self.edges.get_u32(self.edge_ptr(edge) + E_NODEB)
    }

    pub(crate) fn set_nodes(&mut self, edge: EdgeId, node_a: NodeId, node_b: NodeId) -> Result<()> {
        let ptr = self.edge_ptr(edge);
        self.edges.set_u32(ptr + E_NODEA, node_a)?;
        self.edges.set_u32(ptr + E_NODEB, node_b)
    }

    pub(crate) fn link_a(&self, edge: EdgeId) -> Result<EdgeId> {
        self.edges.get_u32(self.edge_ptr(edge) + E_LINKA)
    }

    pub(crate) fn link_b(&self, edge: EdgeId) -> Result<EdgeId> {
        self.edges.get_u32(self.edge_ptr(edge) + E_LINKB)
    }

    pub(crate) fn set_link_a(&mut self, edge: EdgeId, next: EdgeId) -> Result<()> {
        self.edges.set_u32(self.edge_ptr(edge) + E_LINKA, next)
    }

    pub(crate) fn set_link_b(&mut self, edge: EdgeId, next: EdgeId) -> Result<()> {
        self.edges.set_u32(self.edge_ptr(edge) + E_LINKB, next)
    }

    /// Next edge in the list of `node`, which must be an endpoint of `edge`
    pub(crate) fn link_for(&self, edge: EdgeId, node: NodeId) -> Result<EdgeId> {
        if self.node_a(edge)? == node {
            self.link_a(edge)
        } else {
            self.link_b(edge)
        }
    }

    pub(crate) fn set_link_for(&mut self, edge: EdgeId, node: NodeId, next: EdgeId) -> Result<()> {
        if self.node_a(edge)? == node {
            self.set_link_a(edge, next)
        } else {
            self.set_link_b(edge, next)
        }
    }

    pub(crate) fn dist_mm(&self, edge: EdgeId) -> Result<u32> {
        self.edges.get_u32(self.edge_ptr(edge) + E_DIST)
    }

    pub(crate) fn set_dist_mm(&mut self, edge: EdgeId, mm: u32) -> Result<()> {
        self.edges.set_u32(self.edge_ptr(edge) + E_DIST, mm)
    }

    pub(crate) fn geo_ref(&self, edge: EdgeId) -> Result<u32> {
        self.edges.get_u32(self.edge_ptr(edge) + E_GEO)
    }

    pub(crate) fn set_geo_ref(&mut self, edge: EdgeId, geo: u32) -> Result<()> {
        self.edges.set_u32(self.edge_ptr(edge) + E_GEO, geo)
    }

    pub(crate) fn kv_ref(&self, edge: EdgeId) -> Result<u32> {
        self.edges.get_u32(self.edge_ptr(edge) + E_KV)
    }

    pub(crate) fn set_kv_ref(&mut self, edge: EdgeId, kv: u32) -> Result<()> {
        self.edges.set_u32(self.edge_ptr(edge) + E_KV, kv)
    }

    pub(crate) fn read_flags(&self, edge: EdgeId) -> Result<Vec<u32>> {
        let ptr = self.edge_ptr(edge) + E_FLAGS;
        (0..self.flag_words)
            .map(|i| self.edges.get_u32(ptr + 4 * i as u64))
            .collect()
    }

    pub(crate) fn write_flags(&mut self, edge: EdgeId, words: &[u32]) -> Result<()> {
        if words.len() != self.flag_words {
            return Err(Error::invalid_argument(format!(
                "flag block has {} words, layout needs {}",
                words.len(),
                self.flag_words
            )));
        }
        let ptr = self.edge_ptr(edge) + E_FLAGS;
        for (i, word) in words.iter().enumerate() {
            self.edges.set_u32(ptr + 4 * i as u64, *word)?;
        }
        Ok(())
    }

    /// Copy the record of `from` over `to`
    pub(crate) fn copy_edge_record(&mut self, from: EdgeId, to: EdgeId) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let mut buf = vec![0u8; self.edge_entry_bytes as usize];
        self.edges.get_bytes(self.edge_ptr(from), &mut buf)?;
        self.edges.set_bytes(self.edge_ptr(to), &buf)
    }

    pub(crate) fn copy_node_record(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let mut buf = vec![0u8; self.node_entry_bytes as usize];
        self.nodes.get_bytes(self.node_ptr(from), &mut buf)?;
        self.nodes.set_bytes(self.node_ptr(to), &buf)
    }
}
