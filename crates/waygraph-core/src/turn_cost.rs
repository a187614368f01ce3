//! Turn cost records keyed by (from edge, via node, to edge)
//!
//! Each via node heads a singly linked list of entries, mirroring the edge
//! adjacency lists of the base graph:
//!
//! ```text
//! node.TC_REF ──► FROM(4) | TO(4) | FLAGS(4) | NEXT(4) ──► ... ──► NO_EDGE
//! ```
//!
//! `FLAGS` is a single word described by a turn-cost [`FieldLayout`]
//! (see [`FieldLayout::turn_cost_builder`]).
//!
//! [`FieldLayout`]: crate::encoding::FieldLayout
//! [`FieldLayout::turn_cost_builder`]: crate::encoding::FieldLayout::turn_cost_builder

use crate::encoding::EncodedField;
use crate::graph::store::NodesAndEdges;
use crate::graph::{EdgeId, NO_EDGE, NodeId};
use crate::storage::DataAccess;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Version stamp of the turn cost store
pub const TURN_COSTS_VERSION: i32 = 2;

const TC_FROM: u64 = 0;
const TC_TO: u64 = 4;
const TC_FLAGS: u64 = 8;
const TC_NEXT: u64 = 12;
const ENTRY_BYTES: u64 = 16;

const H_VERSION: usize = 0;
const H_ENTRY_BYTES: usize = 1;
const H_COUNT: usize = 2;

/// Lists longer than this are treated as corrupt
const MAX_LIST_ENTRIES: usize = 1000;

/// How a new value combines with an existing record for the same key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnCostMode {
    /// OR the new bits into the existing record
    Merge,
    /// Replace the existing bits
    Overwrite,
}

/// One stored turn cost record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnCostEntry {
    /// Edge the turn starts on
    pub from_edge: EdgeId,
    /// Node the turn happens at
    pub via_node: NodeId,
    /// Edge the turn ends on
    pub to_edge: EdgeId,
    /// Packed turn cost word
    pub flags: u32,
}

pub(crate) struct TurnCostStore {
    da: Box<dyn DataAccess>,
    count: u32,
}

impl TurnCostStore {
    pub(crate) fn new(da: Box<dyn DataAccess>) -> Self {
        Self { da, count: 0 }
    }

    pub(crate) fn create(&mut self, bytes: u64) -> Result<()> {
        self.da.create(bytes)
    }

    pub(crate) fn load_existing(&mut self) -> Result<bool> {
        if !self.da.load_existing()? {
            return Ok(false);
        }
        self.read_headers()?;
        Ok(true)
    }

    pub(crate) fn read_headers(&mut self) -> Result<()> {
        let version = self.da.get_header(H_VERSION)?;
        if version != TURN_COSTS_VERSION {
            return Err(Error::version_mismatch(
                self.da.name(),
                TURN_COSTS_VERSION as i64,
                version as i64,
            ));
        }
        let entry_bytes = self.da.get_header(H_ENTRY_BYTES)?;
        if entry_bytes as u64 != ENTRY_BYTES {
            return Err(Error::storage(format!(
                "unexpected turn cost entry width {entry_bytes}"
            )));
        }
        self.count = self.da.get_header(H_COUNT)? as u32;
        Ok(())
    }

    pub(crate) fn write_headers(&mut self) -> Result<()> {
        self.da.set_header(H_VERSION, TURN_COSTS_VERSION)?;
        self.da.set_header(H_ENTRY_BYTES, ENTRY_BYTES as i32)?;
        self.da.set_header(H_COUNT, self.count as i32)
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.write_headers()?;
        self.da.flush()
    }

    pub(crate) fn close(&mut self) {
        self.da.close();
    }

    pub(crate) fn data_access(&self) -> &dyn DataAccess {
        self.da.as_ref()
    }

    pub(crate) fn data_access_mut(&mut self) -> &mut dyn DataAccess {
        self.da.as_mut()
    }

    /// Number of stored records
    pub(crate) fn len(&self) -> u32 {
        self.count
    }

    fn ptr(index: u32) -> u64 {
        index as u64 * ENTRY_BYTES
    }

    fn check_key(nodes: &NodesAndEdges, from: EdgeId, via: NodeId, to: EdgeId) -> Result<()> {
        if from == NO_EDGE || to == NO_EDGE {
            return Err(Error::invalid_argument(
                "from and to edge of a turn cost cannot be NO_EDGE",
            ));
        }
        nodes.check_node(via)
    }

    fn find(&self, nodes: &NodesAndEdges, from: EdgeId, via: NodeId, to: EdgeId) -> Result<Option<u32>> {
        Self::check_key(nodes, from, via, to)?;
        let mut index = nodes.turn_cost_ref(via)?;
        for _ in 0..MAX_LIST_ENTRIES {
            if index == NO_EDGE {
                return Ok(None);
            }
            let ptr = Self::ptr(index);
            if self.da.get_u32(ptr + TC_FROM)? == from && self.da.get_u32(ptr + TC_TO)? == to {
                return Ok(Some(index));
            }
            index = self.da.get_u32(ptr + TC_NEXT)?;
        }
        Err(Error::illegal_state(format!(
            "turn cost list of node {via} exceeds {MAX_LIST_ENTRIES} entries"
        )))
    }

    fn append(&mut self, from: EdgeId, to: EdgeId, flags: u32, next: u32) -> Result<u32> {
        let index = self.count;
        let ptr = Self::ptr(index);
        self.da.ensure_capacity(ptr + ENTRY_BYTES)?;
        self.da.set_u32(ptr + TC_FROM, from)?;
        self.da.set_u32(ptr + TC_TO, to)?;
        self.da.set_u32(ptr + TC_FLAGS, flags)?;
        self.da.set_u32(ptr + TC_NEXT, next)?;
        self.count += 1;
        Ok(index)
    }

    /// Combine `compute(existing)` into the record, creating it if missing
    fn upsert(
        &mut self,
        nodes: &mut NodesAndEdges,
        from: EdgeId,
        via: NodeId,
        to: EdgeId,
        compute: impl FnOnce(u32) -> Result<u32>,
    ) -> Result<()> {
        if nodes.frozen {
            return Err(Error::frozen("turn costs cannot change after freeze"));
        }
        match self.find(nodes, from, via, to)? {
            Some(index) => {
                let ptr = Self::ptr(index) + TC_FLAGS;
                let flags = compute(self.da.get_u32(ptr)?)?;
                self.da.set_u32(ptr, flags)
            }
            None => {
                let flags = compute(0)?;
                let head = nodes.turn_cost_ref(via)?;
                let index = self.append(from, to, flags, head)?;
                nodes.set_turn_cost_ref(via, index)
            }
        }
    }

    /// Set a whole flag word
    pub(crate) fn set_flags(
        &mut self,
        nodes: &mut NodesAndEdges,
        from: EdgeId,
        via: NodeId,
        to: EdgeId,
        flags: u32,
        mode: TurnCostMode,
    ) -> Result<()> {
        self.upsert(nodes, from, via, to, |existing| {
            Ok(match mode {
                TurnCostMode::Merge => existing | flags,
                TurnCostMode::Overwrite => flags,
            })
        })
    }

    /// Set a single field; overwrite only touches the field's bits
    pub(crate) fn set<F: EncodedField>(
        &mut self,
        nodes: &mut NodesAndEdges,
        field: &F,
        from: EdgeId,
        via: NodeId,
        to: EdgeId,
        value: F::Value,
        mode: TurnCostMode,
    ) -> Result<()> {
        self.upsert(nodes, from, via, to, |existing| match mode {
            TurnCostMode::Merge => {
                let mut word = [0u32];
                field.write(&mut word, false, value)?;
                Ok(existing | word[0])
            }
            TurnCostMode::Overwrite => {
                let mut word = [existing];
                field.write(&mut word, false, value)?;
                Ok(word[0])
            }
        })
    }

    /// Flag word of a turn, 0 when no record exists
    pub(crate) fn flags(&self, nodes: &NodesAndEdges, from: EdgeId, via: NodeId, to: EdgeId) -> Result<u32> {
        match self.find(nodes, from, via, to)? {
            Some(index) => self.da.get_u32(Self::ptr(index) + TC_FLAGS),
            None => Ok(0),
        }
    }

    /// Field value of a turn, the field default when no record exists
    pub(crate) fn get<F: EncodedField>(
        &self,
        nodes: &NodesAndEdges,
        field: &F,
        from: EdgeId,
        via: NodeId,
        to: EdgeId,
    ) -> Result<F::Value> {
        let flags = self.flags(nodes, from, via, to)?;
        Ok(field.read(&[flags], false))
    }

    /// Records in the list of `via`
    pub(crate) fn count(&self, nodes: &NodesAndEdges, via: NodeId) -> Result<usize> {
        nodes.check_node(via)?;
        let mut index = nodes.turn_cost_ref(via)?;
        let mut count = 0;
        while index != NO_EDGE {
            count += 1;
            if count > MAX_LIST_ENTRIES {
                return Err(Error::illegal_state(format!(
                    "turn cost list of node {via} exceeds {MAX_LIST_ENTRIES} entries"
                )));
            }
            index = self.da.get_u32(Self::ptr(index) + TC_NEXT)?;
        }
        Ok(count)
    }

    fn read_entry(&self, index: u32, via: NodeId) -> Result<(TurnCostEntry, u32)> {
        let ptr = Self::ptr(index);
        Ok((
            TurnCostEntry {
                from_edge: self.da.get_u32(ptr + TC_FROM)?,
                via_node: via,
                to_edge: self.da.get_u32(ptr + TC_TO)?,
                flags: self.da.get_u32(ptr + TC_FLAGS)?,
            },
            self.da.get_u32(ptr + TC_NEXT)?,
        ))
    }

    /// All records, grouped by via node in node order
    pub(crate) fn iter<'a>(&'a self, nodes: &'a NodesAndEdges) -> TurnCostIter<'a> {
        TurnCostIter {
            store: self,
            nodes,
            node: 0,
            next: NO_EDGE,
            done: false,
        }
    }

    /// Rewrite the table after node and edge compaction
    ///
    /// `nodes` already carries the compacted node table (turn cost heads moved
    /// with their nodes); `edge_map[old]` is the new edge id or `NO_EDGE` for a
    /// dropped edge. Records naming a dropped edge are removed, the rest are
    /// renumbered and packed in node order. Returns the number of records
    /// dropped.
    pub(crate) fn remap(&mut self, nodes: &mut NodesAndEdges, edge_map: &[EdgeId]) -> Result<usize> {
        let map = |edge: EdgeId| edge_map.get(edge as usize).copied().unwrap_or(NO_EDGE);
        let mut kept: Vec<Vec<TurnCostEntry>> = Vec::with_capacity(nodes.node_count() as usize);
        let before = self.count;
        {
            let mut lists: Vec<Vec<TurnCostEntry>> = vec![Vec::new(); nodes.node_count() as usize];
            for entry in self.iter(nodes) {
                let entry = entry?;
                lists[entry.via_node as usize].push(entry);
            }
            for list in lists {
                let mut survivors = Vec::with_capacity(list.len());
                for mut entry in list {
                    let (from, to) = (map(entry.from_edge), map(entry.to_edge));
                    if from == NO_EDGE || to == NO_EDGE {
                        continue;
                    }
                    entry.from_edge = from;
                    entry.to_edge = to;
                    survivors.push(entry);
                }
                kept.push(survivors);
            }
        }

        self.count = 0;
        for (via, list) in kept.into_iter().enumerate() {
            let via = via as NodeId;
            // rebuild back to front so the list keeps its order
            let mut head = NO_EDGE;
            for entry in list.iter().rev() {
                head = self.append(entry.from_edge, entry.to_edge, entry.flags, head)?;
            }
            nodes.set_turn_cost_ref(via, head)?;
        }
        self.da.trim_to(Self::ptr(self.count))?;
        // records of removed via nodes were never visited and vanish too
        Ok((before - self.count) as usize)
    }
}

/// Iterator over all turn cost records
pub struct TurnCostIter<'a> {
    store: &'a TurnCostStore,
    nodes: &'a NodesAndEdges,
    node: NodeId,
    next: u32,
    done: bool,
}

impl Iterator for TurnCostIter<'_> {
    type Item = Result<TurnCostEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while self.next == NO_EDGE {
            if self.node >= self.nodes.node_count() {
                self.done = true;
                return None;
            }
            match self.nodes.turn_cost_ref(self.node) {
                Ok(head) => self.next = head,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
            if self.next == NO_EDGE {
                self.node += 1;
            }
        }
        match self.store.read_entry(self.next, self.node) {
            Ok((entry, next)) => {
                self.next = next;
                if next == NO_EDGE {
                    self.node += 1;
                }
                Some(Ok(entry))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{DecimalField, FieldLayout};
    use crate::storage::RamDataAccess;
    use approx::assert_relative_eq;

    fn create_test_store(node_count: u32) -> (TurnCostStore, NodesAndEdges) {
        let mut nodes = NodesAndEdges::new(
            Box::new(RamDataAccess::new("nodes", 128).unwrap()),
            Box::new(RamDataAccess::new("edges", 128).unwrap()),
            false,
            true,
            1,
        );
        nodes.create(100).unwrap();
        nodes.ensure_node_count(node_count).unwrap();
        let mut store = TurnCostStore::new(Box::new(RamDataAccess::new("turn_costs", 64).unwrap()));
        store.create(64).unwrap();
        (store, nodes)
    }

    fn cost_field() -> DecimalField {
        let mut builder = FieldLayout::turn_cost_builder();
        builder.add_decimal("turn_cost", 5, 1.0, true, false).unwrap()
    }

    #[test]
    fn test_missing_record_returns_default() {
        let (store, nodes) = create_test_store(3);
        let cost = cost_field();
        assert_relative_eq!(store.get(&nodes, &cost, 0, 1, 2).unwrap(), 0.0);
        assert_eq!(store.flags(&nodes, 0, 1, 2).unwrap(), 0);
    }

    #[test]
    fn test_set_get() {
        let (mut store, mut nodes) = create_test_store(3);
        let cost = cost_field();
        store
            .set(&mut nodes, &cost, 0, 1, 2, 12.0, TurnCostMode::Overwrite)
            .unwrap();
        store
            .set(&mut nodes, &cost, 2, 1, 0, f64::INFINITY, TurnCostMode::Overwrite)
            .unwrap();
        assert_relative_eq!(store.get(&nodes, &cost, 0, 1, 2).unwrap(), 12.0);
        assert!(store.get(&nodes, &cost, 2, 1, 0).unwrap().is_infinite());
        assert_eq!(store.count(&nodes, 1).unwrap(), 2);
        assert_eq!(store.count(&nodes, 0).unwrap(), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_merge_ors_and_overwrite_replaces() {
        let (mut store, mut nodes) = create_test_store(2);
        store
            .set_flags(&mut nodes, 4, 1, 5, 0b0101, TurnCostMode::Merge)
            .unwrap();
        store
            .set_flags(&mut nodes, 4, 1, 5, 0b0010, TurnCostMode::Merge)
            .unwrap();
        assert_eq!(store.flags(&nodes, 4, 1, 5).unwrap(), 0b0111);

        store
            .set_flags(&mut nodes, 4, 1, 5, 0b1000, TurnCostMode::Overwrite)
            .unwrap();
        assert_eq!(store.flags(&nodes, 4, 1, 5).unwrap(), 0b1000);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_field_overwrite_keeps_other_fields() {
        let (mut store, mut nodes) = create_test_store(2);
        let mut builder = FieldLayout::turn_cost_builder();
        let restricted = builder.add_bool("restricted", false).unwrap();
        let cost = builder.add_decimal("cost", 6, 1.0, false, false).unwrap();

        store
            .set(&mut nodes, &restricted, 0, 1, 1, true, TurnCostMode::Overwrite)
            .unwrap();
        store
            .set(&mut nodes, &cost, 0, 1, 1, 20.0, TurnCostMode::Overwrite)
            .unwrap();
        store
            .set(&mut nodes, &cost, 0, 1, 1, 3.0, TurnCostMode::Overwrite)
            .unwrap();
        assert!(store.get(&nodes, &restricted, 0, 1, 1).unwrap());
        assert_relative_eq!(store.get(&nodes, &cost, 0, 1, 1).unwrap(), 3.0);
    }

    #[test]
    fn test_zero_record_reads_default() {
        let (mut store, mut nodes) = create_test_store(2);
        store
            .set_flags(&mut nodes, 0, 0, 1, 7, TurnCostMode::Overwrite)
            .unwrap();
        store
            .set_flags(&mut nodes, 0, 0, 1, 0, TurnCostMode::Overwrite)
            .unwrap();
        assert_eq!(store.flags(&nodes, 0, 0, 1).unwrap(), 0);
        assert_eq!(store.count(&nodes, 0).unwrap(), 1);
    }

    #[test]
    fn test_invalid_keys() {
        let (mut store, mut nodes) = create_test_store(2);
        assert!(matches!(
            store.set_flags(&mut nodes, NO_EDGE, 0, 1, 1, TurnCostMode::Merge),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            store.flags(&nodes, 0, 9, 1),
            Err(Error::NodeOutOfRange { .. })
        ));
    }

    #[test]
    fn test_rejected_after_freeze() {
        let (mut store, mut nodes) = create_test_store(2);
        nodes.frozen = true;
        assert!(matches!(
            store.set_flags(&mut nodes, 0, 0, 1, 1, TurnCostMode::Merge),
            Err(Error::Frozen(_))
        ));
    }

    #[test]
    fn test_iter_visits_all_nodes() {
        let (mut store, mut nodes) = create_test_store(4);
        store.set_flags(&mut nodes, 0, 0, 1, 1, TurnCostMode::Merge).unwrap();
        store.set_flags(&mut nodes, 1, 2, 2, 2, TurnCostMode::Merge).unwrap();
        store.set_flags(&mut nodes, 2, 2, 3, 3, TurnCostMode::Merge).unwrap();
        let entries: Vec<TurnCostEntry> = store.iter(&nodes).map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].via_node, 0);
        // lists are prepended, so the last insert comes first
        assert_eq!((entries[1].via_node, entries[1].from_edge), (2, 2));
        assert_eq!((entries[2].via_node, entries[2].from_edge), (2, 1));
    }

    #[test]
    fn test_remap_drops_and_renumbers() {
        let (mut store, mut nodes) = create_test_store(2);
        store.set_flags(&mut nodes, 0, 1, 2, 10, TurnCostMode::Merge).unwrap();
        store.set_flags(&mut nodes, 1, 1, 2, 20, TurnCostMode::Merge).unwrap();
        store.set_flags(&mut nodes, 2, 0, 0, 30, TurnCostMode::Merge).unwrap();

        // edge 1 dropped, edge 2 becomes 1
        let dropped = store.remap(&mut nodes, &[0, NO_EDGE, 1]).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.flags(&nodes, 0, 1, 1).unwrap(), 10);
        assert_eq!(store.flags(&nodes, 1, 0, 0).unwrap(), 30);
        assert_eq!(store.count(&nodes, 1).unwrap(), 1);
    }
}
