//! Waygraph Core - Routing Graph Storage Engine
//!
//! This crate stores road networks as flat, fixed-layout records inside
//! growable segmented byte stores:
//! - Segmented stores over heap, memory-mapped file or anonymous native memory
//! - A directory that picks backends per store name and records a manifest
//! - A base graph of nodes, edges, geometry and names with bit-packed edge flags
//! - Node compaction that renumbers ids while keeping adjacency and geometry
//! - Turn costs per (from edge, via node, to edge)
//! - Contraction hierarchy shortcuts per profile, and their unpacking
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               GraphStorage                  │
//! │   (config, properties, lock, lifecycle)     │
//! └──────┬──────────────────────────┬───────────┘
//!        │                          │
//! ┌──────┴──────────────┐   ┌───────┴───────────┐
//! │     BaseGraph       │◄──│  ChStore (per     │
//! │ nodes, edges, geo,  │   │  profile) +       │
//! │ names, turn costs   │   │  ShortcutUnpacker │
//! └──────┬──────────────┘   └───────┬───────────┘
//!        │                          │
//! ┌──────┴──────────────────────────┴───────────┐
//! │        Directory + DataAccess               │
//! │   (RAM, RAM_STORE, MMAP, OFF_HEAP, ...)     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use waygraph_core::ch::{ChConfig, SC_BOTH};
//! use waygraph_core::config::GraphConfig;
//! use waygraph_core::encoding::FieldLayout;
//! use waygraph_core::graph_storage::GraphStorage;
//! use waygraph_core::storage::DaType;
//!
//! # fn main() -> waygraph_core::Result<()> {
//! let mut builder = FieldLayout::builder();
//! let access = builder.add_bool("car_access", true)?;
//! let config = GraphConfig::at("/tmp/graph", DaType::Mmap)
//!     .with_ch_profile(ChConfig::node_based("car"));
//!
//! let mut storage = GraphStorage::new(config, &builder.build())?;
//! storage.create()?;
//! storage.base_mut().create_edge(0, 1)?.set_distance(120.0)?.set(&access, true)?;
//! storage.base_mut().create_edge(1, 2)?.set_distance(80.0)?.set(&access, true)?;
//! storage.freeze()?;
//! storage
//!     .ch_mut("car")?
//!     .shortcut_node_based(0, 2, SC_BOTH, 200.0, 200.0, 14_400.0, 0, 1)?;
//! storage.flush()?;
//! storage.close()?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod ch;
pub mod config;
pub mod encoding;
pub mod error;
pub mod graph;
pub mod graph_storage;
pub mod storage;
pub mod turn_cost;

pub use error::{Error, Result};
pub use graph::{BaseGraph, EdgeId, NO_EDGE, NodeId};
pub use graph_storage::GraphStorage;
