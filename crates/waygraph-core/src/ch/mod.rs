//! Contraction hierarchy overlay - one store pair per routing profile
//!
//! A CH store adds a level per node and a table of shortcuts on top of a
//! frozen [`BaseGraph`]. CH edge ids share one space with the base graph:
//! original edges keep their ids `[0, base_edges)`, shortcut `i` gets id
//! `base_edges + i`.
//!
//! # Record Layout
//!
//! Node (8 bytes, store `nodes_ch_<profile>`):
//! ```text
//! LEVEL(4) | CH_REF(4)
//! ```
//! Shortcut (40 bytes node-based, 44 bytes edge-based, store `shortcuts_<profile>`):
//! ```text
//! NODE_A(4) | NODE_B(4) | WEIGHT<<2|DIR(4) | DIST(4) | TIME(4) | SKIP1(4) | SKIP2(4)
//!           | LINK_A(4) | LINK_B(4) | ORIG(4)                      node-based
//!           | LINK_A(4) | LINK_B(4) | ORIG_FIRST(4) | ORIG_LAST(4) edge-based
//! ```
//! `CH_REF` heads the shortcut list of a node, chained through `LINK_A` /
//! `LINK_B` exactly like the base edge table. Entries with both skips set to
//! `NO_EDGE` are original edges promoted into the table (node-based only);
//! their edge id sits in `ORIG`.
//!
//! # Fixed Point
//!
//! Weight and distance are stored as thousandths, time as milliseconds.
//! Each field saturates at its own all-ones sentinel, which decodes as
//! infinity. The weight field is narrower than the distance field, so it
//! saturates first.

mod unpacker;

pub use unpacker::ShortcutUnpacker;

use crate::graph::{BaseGraph, EdgeId, NO_EDGE, NodeId};
use crate::storage::{DataAccess, Directory};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Version stamp of the CH node table
pub const NODES_CH_VERSION: i32 = 1;
/// Version stamp of the shortcut table
pub const SHORTCUTS_VERSION: i32 = 1;

/// Shortcut usable from `NODE_A` to `NODE_B`
pub const SC_FWD: u32 = 1;
/// Shortcut usable from `NODE_B` to `NODE_A`
pub const SC_BWD: u32 = 2;
/// Shortcut usable in both directions
pub const SC_BOTH: u32 = SC_FWD | SC_BWD;

/// Scale of stored weights and distances
pub const WEIGHT_FACTOR: f64 = 1000.0;
/// Smallest storable weight; smaller weights are raised to it
pub const MIN_WEIGHT: f64 = 1.0 / WEIGHT_FACTOR;

/// Widest weight field (two bits of the word hold the direction mask)
pub const MAX_WEIGHT_BITS: u32 = 30;
/// Widest distance field
pub const MAX_DISTANCE_BITS: u32 = 32;

/// Shortcut table capacity hint relative to the base edge count
const SHORTCUT_HINT_FACTOR: f64 = 0.3;

const N_LEVEL: u64 = 0;
const N_CH_REF: u64 = 4;
const NODE_ENTRY_BYTES: u32 = 8;

const S_NODEA: u64 = 0;
const S_NODEB: u64 = 4;
const S_WEIGHT: u64 = 8;
const S_DIST: u64 = 12;
const S_TIME: u64 = 16;
const S_SKIP1: u64 = 20;
const S_SKIP2: u64 = 24;
const S_LINKA: u64 = 28;
const S_LINKB: u64 = 32;
const S_ORIG_FIRST: u64 = 36;
const S_ORIG_LAST: u64 = 40;

// header slots of the node table
const H_VERSION: usize = 0;
const H_ENTRY_BYTES: usize = 1;
const H_COUNT: usize = 2;
const H_BASE_EDGES: usize = 3;
// header slots of the shortcut table
const H_UNDER_MIN: usize = 3;
const H_OVER_MAX: usize = 4;
const H_EDGE_BASED: usize = 5;
const H_WEIGHT_BITS: usize = 6;
const H_DISTANCE_BITS: usize = 7;

fn default_weight_bits() -> u32 {
    MAX_WEIGHT_BITS
}

fn default_distance_bits() -> u32 {
    MAX_DISTANCE_BITS
}

/// Per-profile CH configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChConfig {
    /// Profile name, part of the store names
    pub name: String,
    /// Whether shortcuts track their first and last original edge
    #[serde(default)]
    pub edge_based: bool,
    /// Width of the fixed-point weight field
    #[serde(default = "default_weight_bits")]
    pub weight_bits: u32,
    /// Width of the fixed-point distance field
    #[serde(default = "default_distance_bits")]
    pub distance_bits: u32,
}

impl ChConfig {
    /// Node-based profile with default field widths
    pub fn node_based(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            edge_based: false,
            weight_bits: MAX_WEIGHT_BITS,
            distance_bits: MAX_DISTANCE_BITS,
        }
    }

    /// Edge-based profile with default field widths
    pub fn edge_based(name: impl Into<String>) -> Self {
        Self {
            edge_based: true,
            ..Self::node_based(name)
        }
    }

    /// Check name and field widths
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(Error::invalid_config(format!(
                "CH profile name '{}' must be non-empty [a-z0-9_]",
                self.name
            )));
        }
        if self.weight_bits == 0 || self.weight_bits > MAX_WEIGHT_BITS {
            return Err(Error::invalid_config(format!(
                "weight_bits must be in 1..={MAX_WEIGHT_BITS}, got {}",
                self.weight_bits
            )));
        }
        if self.distance_bits == 0 || self.distance_bits > MAX_DISTANCE_BITS {
            return Err(Error::invalid_config(format!(
                "distance_bits must be in 1..={MAX_DISTANCE_BITS}, got {}",
                self.distance_bits
            )));
        }
        Ok(())
    }

    /// Name of the CH node table store
    pub fn nodes_store(&self) -> String {
        format!("nodes_ch_{}", self.name)
    }

    /// Name of the shortcut table store
    pub fn shortcuts_store(&self) -> String {
        format!("shortcuts_{}", self.name)
    }

    /// Largest weight that is stored as a finite value
    pub fn max_weight(&self) -> f64 {
        (sentinel(self.weight_bits) - 1) as f64 / WEIGHT_FACTOR
    }

    /// Largest distance that is stored as a finite value
    pub fn max_distance(&self) -> f64 {
        (sentinel(self.distance_bits) - 1) as f64 / WEIGHT_FACTOR
    }
}

/// All-ones value of a `bits` wide field
fn sentinel(bits: u32) -> u32 {
    ((1u64 << bits) - 1) as u32
}

/// How an encoded weight was adjusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Clamp {
    None,
    RaisedToMin,
    Infinite,
}

/// Encode a weight into `bits` bits of thousandths
pub(crate) fn weight_to_int(weight: f64, bits: u32) -> Result<(u32, Clamp)> {
    if weight.is_nan() || weight < 0.0 {
        return Err(Error::invalid_argument(format!("invalid shortcut weight {weight}")));
    }
    let max = sentinel(bits);
    if weight < MIN_WEIGHT {
        return Ok(((MIN_WEIGHT * WEIGHT_FACTOR).round() as u32, Clamp::RaisedToMin));
    }
    let scaled = (weight * WEIGHT_FACTOR).round();
    if scaled >= max as f64 {
        return Ok((max, Clamp::Infinite));
    }
    Ok((scaled as u32, Clamp::None))
}

/// Encode a non-negative value with `factor`, saturating at the sentinel
pub(crate) fn fixed_to_int(value: f64, factor: f64, bits: u32, what: &str) -> Result<u32> {
    if value.is_nan() || value < 0.0 {
        return Err(Error::invalid_argument(format!("invalid shortcut {what} {value}")));
    }
    let max = sentinel(bits);
    let scaled = (value * factor).round();
    if scaled >= max as f64 {
        return Ok(max);
    }
    Ok(scaled as u32)
}

pub(crate) fn int_to_fixed(raw: u32, factor: f64, bits: u32) -> f64 {
    if raw == sentinel(bits) {
        f64::INFINITY
    } else {
        raw as f64 / factor
    }
}

/// Snapshot of a shortcut table entry seen from `base_node`
#[derive(Debug, Clone, PartialEq)]
pub struct ChEdgeState {
    pub(crate) edge: EdgeId,
    pub(crate) base: NodeId,
    pub(crate) adj: NodeId,
    pub(crate) fwd: bool,
    pub(crate) bwd: bool,
    pub(crate) weight: f64,
    pub(crate) distance: f64,
    pub(crate) time_ms: f64,
    pub(crate) skip1: EdgeId,
    pub(crate) skip2: EdgeId,
    pub(crate) orig_first: u32,
    pub(crate) orig_last: u32,
    pub(crate) edge_based: bool,
}

impl ChEdgeState {
    /// CH edge id
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

    /// Usable from base to adj
    pub fn is_fwd(&self) -> bool {
        self.fwd
    }

    /// Usable from adj to base
    pub fn is_bwd(&self) -> bool {
        self.bwd
    }

    /// Weight, `f64::INFINITY` when saturated
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Distance in metres, `f64::INFINITY` when saturated
    pub fn distance(&self) -> f64 {
        self.distance
    }

    /// Travel time in milliseconds, `f64::INFINITY` when saturated
    pub fn time_ms(&self) -> f64 {
        self.time_ms
    }

    /// The two CH edges this shortcut replaces (`NO_EDGE` for promoted edges)
    pub fn skipped_edges(&self) -> (EdgeId, EdgeId) {
        (self.skip1, self.skip2)
    }

    /// Whether the entry replaces other edges
    pub fn is_shortcut(&self) -> bool {
        self.skip1 != NO_EDGE
    }

    /// Original edge of a promoted entry
    pub fn orig_edge(&self) -> Option<EdgeId> {
        (!self.is_shortcut() && !self.edge_based).then_some(self.orig_first)
    }

    /// Key of the first original edge when walking base to adj (edge-based)
    pub fn orig_key_first(&self) -> u32 {
        if self.edge_based { self.orig_first } else { NO_EDGE }
    }

    /// Key of the last original edge when walking base to adj (edge-based)
    pub fn orig_key_last(&self) -> u32 {
        if self.edge_based { self.orig_last } else { NO_EDGE }
    }
}

/// Levels and shortcuts of one CH profile
pub struct ChStore {
    config: ChConfig,
    nodes: Box<dyn DataAccess>,
    shortcuts: Box<dyn DataAccess>,
    shortcut_entry_bytes: u32,
    node_count: u32,
    base_edges: u32,
    shortcut_count: u32,
    under_min: u32,
    over_max: u32,
    initialized: bool,
}

impl ChStore {
    /// Wire a CH store onto `dir`
    ///
    /// Call [`ChStore::create`] and [`ChStore::init`], or
    /// [`ChStore::load_existing`], before use.
    pub fn new(dir: &Directory, config: ChConfig) -> Result<Self> {
        config.validate()?;
        let nodes = dir.create(&config.nodes_store())?;
        let shortcuts = dir.create(&config.shortcuts_store())?;
        let shortcut_entry_bytes = if config.edge_based {
            S_ORIG_LAST + 4
        } else {
            S_ORIG_FIRST + 4
        } as u32;
        Ok(Self {
            config,
            nodes,
            shortcuts,
            shortcut_entry_bytes,
            node_count: 0,
            base_edges: 0,
            shortcut_count: 0,
            under_min: 0,
            over_max: 0,
            initialized: false,
        })
    }

    /// Create and initialise a store for a frozen graph
    pub fn from_graph(graph: &BaseGraph, dir: &Directory, config: ChConfig) -> Result<Self> {
        let mut ch = Self::new(dir, config)?;
        ch.create_for(graph)?;
        Ok(ch)
    }

    /// Create and initialise the tables of a wired store for a frozen graph
    pub fn create_for(&mut self, graph: &BaseGraph) -> Result<()> {
        if !graph.is_frozen() {
            return Err(Error::illegal_state(format!(
                "graph must be frozen before creating CH profile '{}'",
                self.config.name
            )));
        }
        let expected = (graph.edge_count() as f64 * SHORTCUT_HINT_FACTOR) as u32;
        self.create(expected)?;
        self.init(graph.node_count(), graph.edge_count())
    }

    /// Allocate empty tables sized for `expected_shortcuts`
    ///
    /// The hint only sizes the first allocation; the table grows on demand.
    pub fn create(&mut self, expected_shortcuts: u32) -> Result<()> {
        self.nodes.create(0)?;
        self.shortcuts
            .create(expected_shortcuts as u64 * self.shortcut_entry_bytes as u64)
    }

    /// Set up the node table for `node_count` nodes over `base_edges` edges
    pub fn init(&mut self, node_count: u32, base_edges: u32) -> Result<()> {
        if self.initialized {
            return Err(Error::illegal_state(format!(
                "CH profile '{}' is already initialised",
                self.config.name
            )));
        }
        if node_count > i32::MAX as u32 || base_edges > i32::MAX as u32 {
            return Err(Error::value_too_large(format!(
                "{node_count} nodes / {base_edges} edges exceed the CH id space"
            )));
        }
        self.nodes
            .ensure_capacity(node_count as u64 * NODE_ENTRY_BYTES as u64)?;
        for node in 0..node_count {
            let ptr = node as u64 * NODE_ENTRY_BYTES as u64;
            self.nodes.set_u32(ptr + N_LEVEL, 0)?;
            self.nodes.set_u32(ptr + N_CH_REF, NO_EDGE)?;
        }
        self.node_count = node_count;
        self.base_edges = base_edges;
        self.initialized = true;
        tracing::debug!(
            "Initialised CH profile '{}' ({} nodes, {} base edges, edge based: {})",
            self.config.name,
            node_count,
            base_edges,
            self.config.edge_based
        );
        Ok(())
    }

    /// Attach to persisted tables
    ///
    /// Returns `Ok(false)` when nothing was persisted yet. A stored profile
    /// that disagrees with the configuration fails with `Error::InvalidConfig`.
    pub fn load_existing(&mut self) -> Result<bool> {
        if !self.nodes.load_existing()? {
            return Ok(false);
        }
        if !self.shortcuts.load_existing()? {
            return Err(Error::storage(format!(
                "CH profile '{}' has levels but no shortcut table",
                self.config.name
            )));
        }
        self.read_headers()?;
        self.initialized = true;
        tracing::debug!(
            "Loaded CH profile '{}' with {} shortcuts",
            self.config.name,
            self.shortcut_count
        );
        Ok(true)
    }

    fn read_headers(&mut self) -> Result<()> {
        let version = self.nodes.get_header(H_VERSION)?;
        if version != NODES_CH_VERSION {
            return Err(Error::version_mismatch(
                self.nodes.name(),
                NODES_CH_VERSION as i64,
                version as i64,
            ));
        }
        let version = self.shortcuts.get_header(H_VERSION)?;
        if version != SHORTCUTS_VERSION {
            return Err(Error::version_mismatch(
                self.shortcuts.name(),
                SHORTCUTS_VERSION as i64,
                version as i64,
            ));
        }
        let edge_based = self.shortcuts.get_header(H_EDGE_BASED)? != 0;
        let weight_bits = self.shortcuts.get_header(H_WEIGHT_BITS)? as u32;
        let distance_bits = self.shortcuts.get_header(H_DISTANCE_BITS)? as u32;
        if edge_based != self.config.edge_based
            || weight_bits != self.config.weight_bits
            || distance_bits != self.config.distance_bits
        {
            return Err(Error::invalid_config(format!(
                "CH profile '{}' was stored with edge_based={edge_based}, \
                 weight_bits={weight_bits}, distance_bits={distance_bits}",
                self.config.name
            )));
        }
        if self.shortcuts.get_header(H_ENTRY_BYTES)? as u32 != self.shortcut_entry_bytes
            || self.nodes.get_header(H_ENTRY_BYTES)? as u32 != NODE_ENTRY_BYTES
        {
            return Err(Error::storage(format!(
                "CH profile '{}' has an unexpected record size",
                self.config.name
            )));
        }
        self.node_count = self.nodes.get_header(H_COUNT)? as u32;
        self.base_edges = self.nodes.get_header(H_BASE_EDGES)? as u32;
        self.shortcut_count = self.shortcuts.get_header(H_COUNT)? as u32;
        self.under_min = self.shortcuts.get_header(H_UNDER_MIN)? as u32;
        self.over_max = self.shortcuts.get_header(H_OVER_MAX)? as u32;
        Ok(())
    }

    fn write_headers(&mut self) -> Result<()> {
        self.nodes.set_header(H_VERSION, NODES_CH_VERSION)?;
        self.nodes.set_header(H_ENTRY_BYTES, NODE_ENTRY_BYTES as i32)?;
        self.nodes.set_header(H_COUNT, self.node_count as i32)?;
        self.nodes.set_header(H_BASE_EDGES, self.base_edges as i32)?;

        self.shortcuts.set_header(H_VERSION, SHORTCUTS_VERSION)?;
        self.shortcuts
            .set_header(H_ENTRY_BYTES, self.shortcut_entry_bytes as i32)?;
        self.shortcuts.set_header(H_COUNT, self.shortcut_count as i32)?;
        self.shortcuts.set_header(H_UNDER_MIN, self.under_min as i32)?;
        self.shortcuts.set_header(H_OVER_MAX, self.over_max as i32)?;
        self.shortcuts
            .set_header(H_EDGE_BASED, self.config.edge_based as i32)?;
        self.shortcuts
            .set_header(H_WEIGHT_BITS, self.config.weight_bits as i32)?;
        self.shortcuts
            .set_header(H_DISTANCE_BITS, self.config.distance_bits as i32)
    }

    /// Write headers and persist both tables
    pub fn flush(&mut self) -> Result<()> {
        self.write_headers()?;
        self.nodes.flush()?;
        self.shortcuts.flush()?;
        tracing::debug!(
            "Flushed CH profile '{}' ({} shortcuts, {} weights raised to minimum, {} saturated)",
            self.config.name,
            self.shortcut_count,
            self.under_min,
            self.over_max
        );
        Ok(())
    }

    /// Release both tables
    pub fn close(&mut self) {
        self.nodes.close();
        self.shortcuts.close();
    }

    /// Whether the store was closed
    pub fn is_closed(&self) -> bool {
        self.nodes.is_closed()
    }

    /// Whether levels and shortcuts can be used
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Profile configuration
    pub fn config(&self) -> &ChConfig {
        &self.config
    }

    /// Profile name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Whether shortcuts carry original edge keys
    pub fn is_edge_based(&self) -> bool {
        self.config.edge_based
    }

    /// Number of nodes covered
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Number of edges of the base graph snapshot
    pub fn base_edge_count(&self) -> u32 {
        self.base_edges
    }

    /// Number of entries in the shortcut table
    pub fn shortcut_count(&self) -> u32 {
        self.shortcut_count
    }

    /// Number of weights raised to [`MIN_WEIGHT`]
    pub fn under_min_weight_count(&self) -> u32 {
        self.under_min
    }

    /// Number of weights stored as infinity
    pub fn over_max_weight_count(&self) -> u32 {
        self.over_max
    }

    fn check_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(Error::illegal_state(format!(
                "CH profile '{}' is not initialised",
                self.config.name
            )));
        }
        Ok(())
    }

    fn check_node(&self, node: NodeId) -> Result<()> {
        if node >= self.node_count {
            return Err(Error::NodeOutOfRange {
                node,
                count: self.node_count,
            });
        }
        Ok(())
    }

    fn node_ptr(&self, node: NodeId) -> u64 {
        node as u64 * NODE_ENTRY_BYTES as u64
    }

    fn shortcut_ptr(&self, index: u32) -> u64 {
        index as u64 * self.shortcut_entry_bytes as u64
    }

    /// Index into the shortcut table for a CH edge id
    fn shortcut_index(&self, ch_edge: EdgeId) -> Result<u32> {
        let total = self.base_edges + self.shortcut_count;
        if ch_edge < self.base_edges || ch_edge >= total {
            return Err(Error::EdgeOutOfRange {
                edge: ch_edge,
                count: total,
            });
        }
        Ok(ch_edge - self.base_edges)
    }

    // ---- levels ---------------------------------------------------------

    /// Set the contraction rank of `node`
    pub fn set_level(&mut self, node: NodeId, level: u32) -> Result<()> {
        self.check_initialized()?;
        self.check_node(node)?;
        let ptr = self.node_ptr(node) + N_LEVEL;
        self.nodes.set_u32(ptr, level)
    }

    /// Contraction rank of `node` (0 until set)
    pub fn level(&self, node: NodeId) -> Result<u32> {
        self.check_node(node)?;
        self.nodes.get_u32(self.node_ptr(node) + N_LEVEL)
    }

    // ---- shortcuts ------------------------------------------------------

    fn check_direction(dir: u32) -> Result<()> {
        if dir == 0 || dir & !SC_BOTH != 0 {
            return Err(Error::invalid_argument(format!("invalid direction mask {dir:#b}")));
        }
        Ok(())
    }

    fn check_skips(&self, id: EdgeId, skip1: EdgeId, skip2: EdgeId) -> Result<()> {
        if skip1 == NO_EDGE || skip2 == NO_EDGE {
            return Err(Error::invalid_argument(format!(
                "shortcut {id} needs two skipped edges, got {skip1} and {skip2}"
            )));
        }
        for skip in [skip1, skip2] {
            if skip >= id {
                return Err(Error::invalid_argument(format!(
                    "skipped edge {skip} is not older than shortcut {id}"
                )));
            }
        }
        Ok(())
    }

    fn check_orig_key(&self, key: u32) -> Result<()> {
        if key as u64 >= self.base_edges as u64 * 2 {
            return Err(Error::invalid_argument(format!(
                "original edge key {key} outside [0, {})",
                self.base_edges as u64 * 2
            )));
        }
        Ok(())
    }

    /// Count and log a weight adjustment once the entry has been written
    fn record_clamp(&mut self, weight: f64, clamp: Clamp) {
        match clamp {
            Clamp::None => {}
            Clamp::RaisedToMin => {
                if self.under_min == 0 {
                    tracing::warn!(
                        "CH profile '{}': weight {} below minimum, storing {}",
                        self.config.name,
                        weight,
                        MIN_WEIGHT
                    );
                }
                self.under_min += 1;
            }
            Clamp::Infinite => {
                if self.over_max == 0 && weight.is_finite() {
                    tracing::warn!(
                        "CH profile '{}': weight {} exceeds maximum {}, storing infinity",
                        self.config.name,
                        weight,
                        self.config.max_weight()
                    );
                }
                self.over_max += 1;
            }
        }
    }

    /// Append one shortcut table entry and prepend it to both node lists
    fn push(
        &mut self,
        node_a: NodeId,
        node_b: NodeId,
        dir: u32,
        weight: f64,
        distance: f64,
        time_ms: f64,
        skips: (EdgeId, EdgeId),
        orig: (u32, u32),
    ) -> Result<EdgeId> {
        let (raw_weight, clamp) = weight_to_int(weight, self.config.weight_bits)?;
        let distance = fixed_to_int(distance, WEIGHT_FACTOR, self.config.distance_bits, "distance")?;
        let time = fixed_to_int(time_ms, 1.0, 32, "time")?;

        let index = self.shortcut_count;
        let ptr = self.shortcut_ptr(index);
        self.shortcuts
            .ensure_capacity(ptr + self.shortcut_entry_bytes as u64)?;
        self.shortcuts.set_u32(ptr + S_NODEA, node_a)?;
        self.shortcuts.set_u32(ptr + S_NODEB, node_b)?;
        self.shortcuts.set_u32(ptr + S_WEIGHT, raw_weight << 2 | dir)?;
        self.shortcuts.set_u32(ptr + S_DIST, distance)?;
        self.shortcuts.set_u32(ptr + S_TIME, time)?;
        self.shortcuts.set_u32(ptr + S_SKIP1, skips.0)?;
        self.shortcuts.set_u32(ptr + S_SKIP2, skips.1)?;
        self.shortcuts.set_u32(ptr + S_ORIG_FIRST, orig.0)?;
        if self.config.edge_based {
            self.shortcuts.set_u32(ptr + S_ORIG_LAST, orig.1)?;
        }

        let head_a = self.nodes.get_u32(self.node_ptr(node_a) + N_CH_REF)?;
        self.shortcuts.set_u32(ptr + S_LINKA, head_a)?;
        self.nodes.set_u32(self.node_ptr(node_a) + N_CH_REF, index)?;
        if node_a != node_b {
            let head_b = self.nodes.get_u32(self.node_ptr(node_b) + N_CH_REF)?;
            self.shortcuts.set_u32(ptr + S_LINKB, head_b)?;
            self.nodes.set_u32(self.node_ptr(node_b) + N_CH_REF, index)?;
        } else {
            self.shortcuts.set_u32(ptr + S_LINKB, NO_EDGE)?;
        }
        self.shortcut_count += 1;
        self.record_clamp(weight, clamp);
        Ok(self.base_edges + index)
    }

    fn prepare(&self, node_a: NodeId, node_b: NodeId, dir: u32) -> Result<EdgeId> {
        self.check_initialized()?;
        self.check_node(node_a)?;
        self.check_node(node_b)?;
        Self::check_direction(dir)?;
        let id = self.base_edges as u64 + self.shortcut_count as u64;
        if id >= i32::MAX as u64 {
            return Err(Error::value_too_large(format!(
                "CH profile '{}' exceeds the edge id space",
                self.config.name
            )));
        }
        Ok(id as EdgeId)
    }

    fn require_edge_based(&self, edge_based: bool) -> Result<()> {
        if self.config.edge_based != edge_based {
            return Err(Error::illegal_state(format!(
                "CH profile '{}' is {}",
                self.config.name,
                if self.config.edge_based { "edge based" } else { "node based" }
            )));
        }
        Ok(())
    }

    /// Add a node-based shortcut replacing `skip1` and `skip2`
    ///
    /// Both skipped edges must be older CH edges. Returns the CH edge id.
    pub fn shortcut_node_based(
        &mut self,
        node_a: NodeId,
        node_b: NodeId,
        dir: u32,
        weight: f64,
        distance: f64,
        time_ms: f64,
        skip1: EdgeId,
        skip2: EdgeId,
    ) -> Result<EdgeId> {
        self.require_edge_based(false)?;
        let id = self.prepare(node_a, node_b, dir)?;
        self.check_skips(id, skip1, skip2)?;
        self.push(node_a, node_b, dir, weight, distance, time_ms, (skip1, skip2), (NO_EDGE, NO_EDGE))
    }

    /// Add an edge-based shortcut
    ///
    /// `orig_key_first` / `orig_key_last` are the keys of the first and last
    /// original edge when walking from `node_a` to `node_b`.
    pub fn shortcut_edge_based(
        &mut self,
        node_a: NodeId,
        node_b: NodeId,
        dir: u32,
        weight: f64,
        distance: f64,
        time_ms: f64,
        skip1: EdgeId,
        skip2: EdgeId,
        orig_key_first: u32,
        orig_key_last: u32,
    ) -> Result<EdgeId> {
        self.require_edge_based(true)?;
        let id = self.prepare(node_a, node_b, dir)?;
        self.check_skips(id, skip1, skip2)?;
        self.check_orig_key(orig_key_first)?;
        self.check_orig_key(orig_key_last)?;
        self.push(
            node_a,
            node_b,
            dir,
            weight,
            distance,
            time_ms,
            (skip1, skip2),
            (orig_key_first, orig_key_last),
        )
    }

    /// Copy an original edge into the table with its own weight (node-based only)
    pub fn promote_edge(
        &mut self,
        node_a: NodeId,
        node_b: NodeId,
        dir: u32,
        weight: f64,
        distance: f64,
        time_ms: f64,
        orig_edge: EdgeId,
    ) -> Result<EdgeId> {
        self.require_edge_based(false)?;
        self.prepare(node_a, node_b, dir)?;
        if orig_edge >= self.base_edges {
            return Err(Error::EdgeOutOfRange {
                edge: orig_edge,
                count: self.base_edges,
            });
        }
        self.push(
            node_a,
            node_b,
            dir,
            weight,
            distance,
            time_ms,
            (NO_EDGE, NO_EDGE),
            (orig_edge, NO_EDGE),
        )
    }

    /// Replace the weight of a table entry, keeping its direction mask
    pub fn set_weight(&mut self, ch_edge: EdgeId, weight: f64) -> Result<()> {
        let index = self.shortcut_index(ch_edge)?;
        let (raw, clamp) = weight_to_int(weight, self.config.weight_bits)?;
        let ptr = self.shortcut_ptr(index) + S_WEIGHT;
        let dir = self.shortcuts.get_u32(ptr)? & SC_BOTH;
        self.shortcuts.set_u32(ptr, raw << 2 | dir)?;
        self.record_clamp(weight, clamp);
        Ok(())
    }

    /// Weight of a table entry, `f64::INFINITY` when saturated
    pub fn weight(&self, ch_edge: EdgeId) -> Result<f64> {
        let index = self.shortcut_index(ch_edge)?;
        let raw = self.shortcuts.get_u32(self.shortcut_ptr(index) + S_WEIGHT)? >> 2;
        Ok(int_to_fixed(raw, WEIGHT_FACTOR, self.config.weight_bits))
    }

    /// Whether `ch_edge` is a shortcut (original ids and promoted edges are not)
    pub fn is_shortcut(&self, ch_edge: EdgeId) -> Result<bool> {
        if ch_edge < self.base_edges {
            return Ok(false);
        }
        let index = self.shortcut_index(ch_edge)?;
        Ok(self.shortcuts.get_u32(self.shortcut_ptr(index) + S_SKIP1)? != NO_EDGE)
    }

    /// Stored endpoints `(NODE_A, NODE_B)` of a table entry
    pub(crate) fn endpoints(&self, ch_edge: EdgeId) -> Result<(NodeId, NodeId)> {
        let ptr = self.shortcut_ptr(self.shortcut_index(ch_edge)?);
        Ok((
            self.shortcuts.get_u32(ptr + S_NODEA)?,
            self.shortcuts.get_u32(ptr + S_NODEB)?,
        ))
    }

    fn read_state(&self, index: u32, base: NodeId) -> Result<ChEdgeState> {
        let ptr = self.shortcut_ptr(index);
        let node_a = self.shortcuts.get_u32(ptr + S_NODEA)?;
        let node_b = self.shortcuts.get_u32(ptr + S_NODEB)?;
        let word = self.shortcuts.get_u32(ptr + S_WEIGHT)?;
        let mut orig_first = self.shortcuts.get_u32(ptr + S_ORIG_FIRST)?;
        let mut orig_last = if self.config.edge_based {
            self.shortcuts.get_u32(ptr + S_ORIG_LAST)?
        } else {
            orig_first
        };
        let from_b = base == node_b && node_a != node_b;
        let (mut fwd, mut bwd) = (word & SC_FWD != 0, word & SC_BWD != 0);
        if from_b {
            std::mem::swap(&mut fwd, &mut bwd);
            if self.config.edge_based {
                // walking backwards visits the original edges in reverse order and direction
                (orig_first, orig_last) = (orig_last ^ 1, orig_first ^ 1);
            }
        }
        Ok(ChEdgeState {
            edge: self.base_edges + index,
            base,
            adj: if from_b { node_a } else { node_b },
            fwd,
            bwd,
            weight: int_to_fixed(word >> 2, WEIGHT_FACTOR, self.config.weight_bits),
            distance: int_to_fixed(
                self.shortcuts.get_u32(ptr + S_DIST)?,
                WEIGHT_FACTOR,
                self.config.distance_bits,
            ),
            time_ms: int_to_fixed(self.shortcuts.get_u32(ptr + S_TIME)?, 1.0, 32),
            skip1: self.shortcuts.get_u32(ptr + S_SKIP1)?,
            skip2: self.shortcuts.get_u32(ptr + S_SKIP2)?,
            orig_first,
            orig_last,
            edge_based: self.config.edge_based,
        })
    }

    /// Table entry in stored orientation (from `NODE_A`)
    pub fn shortcut(&self, ch_edge: EdgeId) -> Result<ChEdgeState> {
        let index = self.shortcut_index(ch_edge)?;
        let node_a = self.shortcuts.get_u32(self.shortcut_ptr(index) + S_NODEA)?;
        self.read_state(index, node_a)
    }

    /// Table entry ending at `adj`
    pub fn shortcut_state(&self, ch_edge: EdgeId, adj: NodeId) -> Result<ChEdgeState> {
        let index = self.shortcut_index(ch_edge)?;
        let (node_a, node_b) = self.endpoints(ch_edge)?;
        if adj == node_b {
            self.read_state(index, node_a)
        } else if adj == node_a {
            self.read_state(index, node_b)
        } else {
            Err(Error::NoSuchEdgeOrientation { edge: ch_edge, node: adj })
        }
    }

    /// Iterate the shortcut table entries at `node`, newest first
    pub fn edges(&self, node: NodeId) -> Result<ChEdgeIter<'_>> {
        self.check_initialized()?;
        self.check_node(node)?;
        Ok(ChEdgeIter {
            ch: self,
            base: node,
            next: self.nodes.get_u32(self.node_ptr(node) + N_CH_REF)?,
        })
    }

    fn link_for(&self, index: u32, node: NodeId) -> Result<u32> {
        let ptr = self.shortcut_ptr(index);
        if self.shortcuts.get_u32(ptr + S_NODEA)? == node {
            self.shortcuts.get_u32(ptr + S_LINKA)
        } else {
            self.shortcuts.get_u32(ptr + S_LINKB)
        }
    }
}

impl std::fmt::Debug for ChStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChStore")
            .field("config", &self.config)
            .field("node_count", &self.node_count)
            .field("base_edges", &self.base_edges)
            .field("shortcut_count", &self.shortcut_count)
            .finish()
    }
}

/// Lazy iterator over the shortcut list of one node
///
/// Carries its own cursor; create one per thread.
pub struct ChEdgeIter<'a> {
    ch: &'a ChStore,
    base: NodeId,
    next: u32,
}

impl ChEdgeIter<'_> {
    fn advance(&mut self) -> Result<Option<ChEdgeState>> {
        if self.next == NO_EDGE {
            return Ok(None);
        }
        let index = self.next;
        self.next = self.ch.link_for(index, self.base)?;
        self.ch.read_state(index, self.base).map(Some)
    }
}

impl Iterator for ChEdgeIter<'_> {
    type Item = Result<ChEdgeState>;

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
