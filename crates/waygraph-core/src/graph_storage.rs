//! One graph storage unit: base graph, turn costs and CH profiles in a directory
//!
//! ```text
//!   GraphStorage
//!   ├── Directory ─── manifest.json, graph.lock
//!   ├── Properties    versions, dimension, flag layout, profile names
//!   ├── BaseGraph     nodes, edges, geometry, key_values, [turn_costs]
//!   └── ChStore*      nodes_ch_<profile>, shortcuts_<profile>
//! ```
//!
//! Lifecycle: `create` or `load_existing`, build the graph, `freeze` (which
//! creates the CH tables), write shortcuts, `flush`, `close`. Everything is
//! flushed and reloaded as a unit; properties written at flush time are
//! checked against the configuration on load.

use crate::ch::{ChStore, NODES_CH_VERSION, SHORTCUTS_VERSION, ShortcutUnpacker};
use crate::config::GraphConfig;
use crate::encoding::FieldLayout;
use crate::graph::{
    BaseGraph, EDGES_STORE, EDGES_VERSION, GEOMETRY_STORE, GEOMETRY_VERSION, KEY_VALUE_VERSION,
    KEY_VALUES_STORE, NODES_STORE, NODES_VERSION, TURN_COSTS_STORE,
};
use crate::storage::{Directory, LockFactory, Properties, StorageLock};
use crate::turn_cost::TURN_COSTS_VERSION;
use crate::{Error, Result};

/// Logical name of the properties store
pub const PROPERTIES_STORE: &str = "properties";

const LOCK_NAME: &str = "graph";

const P_ELEVATION: &str = "graph.elevation";
const P_TURN_COSTS: &str = "graph.turn_costs";
const P_FLAG_LAYOUT: &str = "graph.flag_layout";
const P_CH_PROFILES: &str = "graph.ch_profiles";

/// Base graph plus CH profiles, persisted together
pub struct GraphStorage {
    config: GraphConfig,
    dir: Directory,
    properties: Properties,
    base: BaseGraph,
    ch: Vec<ChStore>,
    lock: Option<StorageLock>,
}

impl GraphStorage {
    /// Wire all stores described by `config`
    ///
    /// Call [`GraphStorage::create`] or [`GraphStorage::load_existing`] next.
    pub fn new(config: GraphConfig, layout: &FieldLayout) -> Result<Self> {
        let dir = config.directory()?;
        let properties = Properties::new(dir.create(PROPERTIES_STORE)?);
        let base = BaseGraph::new(&dir, layout, config.elevation, config.turn_costs)?;
        let ch = config
            .ch_profiles
            .iter()
            .map(|profile| ChStore::new(&dir, profile.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config,
            dir,
            properties,
            base,
            ch,
            lock: None,
        })
    }

    fn acquire_lock(&mut self) -> Result<()> {
        if self.lock.is_some() {
            return Ok(());
        }
        if let Some(location) = self.dir.location() {
            self.lock = Some(LockFactory::new(location).lock_exclusive(LOCK_NAME)?);
        }
        Ok(())
    }

    /// Allocate empty stores
    pub fn create(&mut self) -> Result<()> {
        self.acquire_lock()?;
        let bytes = self.config.initial_bytes;
        self.properties.create(bytes)?;
        self.base.create(bytes)?;
        self.put_properties();
        tracing::info!(
            "Created graph storage at {:?} ({} CH profiles)",
            self.dir.location(),
            self.ch.len()
        );
        Ok(())
    }

    fn profile_names(&self) -> String {
        self.ch
            .iter()
            .map(|ch| ch.name())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Format versions of every component this unit writes
    fn current_versions(&self) -> Vec<(&'static str, i32)> {
        let mut versions = vec![
            (NODES_STORE, NODES_VERSION),
            (EDGES_STORE, EDGES_VERSION),
            (GEOMETRY_STORE, GEOMETRY_VERSION),
            (KEY_VALUES_STORE, KEY_VALUE_VERSION),
            ("nodes_ch", NODES_CH_VERSION),
            ("shortcuts", SHORTCUTS_VERSION),
        ];
        if self.config.turn_costs {
            versions.push((TURN_COSTS_STORE, TURN_COSTS_VERSION));
        }
        versions
    }

    fn put_properties(&mut self) {
        let versions = self.current_versions();
        self.properties.put_current_versions(&versions);
        self.properties.put(P_ELEVATION, self.config.elevation);
        self.properties.put(P_TURN_COSTS, self.config.turn_costs);
        self.properties.put(P_FLAG_LAYOUT, self.base.layout().describe());
        let names = self.profile_names();
        self.properties.put(P_CH_PROFILES, names);
    }

    fn check_property(&self, key: &str, expected: &str) -> Result<()> {
        match self.properties.get(key) {
            Some(found) if found == expected => Ok(()),
            found => Err(Error::invalid_config(format!(
                "stored {key} is {found:?}, configured '{expected}'"
            ))),
        }
    }

    fn check_properties(&self) -> Result<()> {
        self.properties.check_versions(&self.current_versions())?;
        self.check_property(P_ELEVATION, &self.config.elevation.to_string())?;
        self.check_property(P_TURN_COSTS, &self.config.turn_costs.to_string())?;
        self.check_property(P_FLAG_LAYOUT, self.base.layout().describe())?;
        self.check_property(P_CH_PROFILES, &self.profile_names())
    }

    /// Attach to persisted stores
    ///
    /// Returns `Ok(false)` when nothing was persisted. Versions, dimension,
    /// turn-cost support, flag layout and CH profile names must match the
    /// configuration; CH profiles are loaded when the graph was frozen.
    pub fn load_existing(&mut self) -> Result<bool> {
        self.acquire_lock()?;
        if !self.properties.load_existing()? {
            return Ok(false);
        }
        self.check_properties()?;
        if !self.base.load_existing()? {
            return Err(Error::storage("properties exist but the base graph is missing"));
        }
        if self.base.is_frozen() {
            for ch in &mut self.ch {
                if !ch.load_existing()? {
                    return Err(Error::storage(format!(
                        "graph is frozen but CH profile '{}' is missing",
                        ch.name()
                    )));
                }
                if ch.base_edge_count() != self.base.edge_count() {
                    return Err(Error::storage(format!(
                        "CH profile '{}' covers {} edges, graph has {}",
                        ch.name(),
                        ch.base_edge_count(),
                        self.base.edge_count()
                    )));
                }
            }
        }
        tracing::info!(
            "Loaded graph storage at {:?}: {} nodes, {} edges, frozen: {}",
            self.dir.location(),
            self.base.node_count(),
            self.base.edge_count(),
            self.base.is_frozen()
        );
        Ok(true)
    }

    /// Freeze the base graph and create the tables of every CH profile
    pub fn freeze(&mut self) -> Result<()> {
        self.base.freeze()?;
        for ch in &mut self.ch {
            if !ch.is_initialized() {
                ch.create_for(&self.base)?;
            }
        }
        Ok(())
    }

    /// Whether the base graph is frozen
    pub fn is_frozen(&self) -> bool {
        self.base.is_frozen()
    }

    /// Persist every store, the properties and the manifest
    pub fn flush(&mut self) -> Result<()> {
        self.base.flush()?;
        for ch in &mut self.ch {
            if ch.is_initialized() {
                ch.flush()?;
            }
        }
        self.put_properties();
        self.properties.flush()?;
        self.dir.flush_manifest()?;
        tracing::debug!("Flushed graph storage at {:?}", self.dir.location());
        Ok(())
    }

    /// Release every store and the directory lock
    pub fn close(&mut self) -> Result<()> {
        self.base.close();
        for ch in &mut self.ch {
            ch.close();
        }
        self.properties.close();
        if let Some(lock) = self.lock.take() {
            lock.release()?;
        }
        Ok(())
    }

    /// Whether the storage was closed
    pub fn is_closed(&self) -> bool {
        self.base.is_closed()
    }

    /// Configuration this storage was built from
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Store directory
    pub fn directory(&self) -> &Directory {
        &self.dir
    }

    /// Graph-wide properties
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// The base graph
    pub fn base(&self) -> &BaseGraph {
        &self.base
    }

    /// The base graph, for import and compaction
    pub fn base_mut(&mut self) -> &mut BaseGraph {
        &mut self.base
    }

    fn ch_index(&self, name: &str) -> Result<usize> {
        let index = self
            .ch
            .iter()
            .position(|ch| ch.name() == name)
            .ok_or_else(|| Error::invalid_argument(format!("unknown CH profile '{name}'")))?;
        if !self.ch[index].is_initialized() {
            return Err(Error::illegal_state(format!(
                "CH profile '{name}' is not available before freeze"
            )));
        }
        Ok(index)
    }

    /// CH store of profile `name`
    pub fn ch(&self, name: &str) -> Result<&ChStore> {
        let index = self.ch_index(name)?;
        Ok(&self.ch[index])
    }

    /// Mutable CH store of profile `name`, for writing shortcuts
    pub fn ch_mut(&mut self, name: &str) -> Result<&mut ChStore> {
        let index = self.ch_index(name)?;
        Ok(&mut self.ch[index])
    }

    /// Names of all configured CH profiles
    pub fn ch_names(&self) -> Vec<&str> {
        self.ch.iter().map(|ch| ch.name()).collect()
    }

    /// Unpacker for shortcuts of profile `name`
    pub fn unpacker(&self, name: &str) -> Result<ShortcutUnpacker<'_>> {
        ShortcutUnpacker::new(&self.base, self.ch(name)?)
    }
}

impl std::fmt::Debug for GraphStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStorage")
            .field("location", &self.dir.location())
            .field("base", &self.base)
            .field("ch", &self.ch)
            .finish()
    }
}
