//! Graph storage configuration
//!
//! Loaded from JSON and validated eagerly, so misconfiguration surfaces at
//! load time rather than on first store access:
//!
//! ```json
//! {
//!   "location": "/var/lib/waygraph/europe",
//!   "default_type": "RAM_STORE",
//!   "store_policies": [{ "pattern": "nodes_ch*", "da_type": "MMAP" }],
//!   "turn_costs": true,
//!   "ch_profiles": [{ "name": "car", "edge_based": true }]
//! }
//! ```

use crate::ch::ChConfig;
use crate::storage::{DEFAULT_SEGMENT_SIZE, DaType, Directory, Segmentation};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Bytes allocated per store on `create` unless configured otherwise
pub const DEFAULT_INITIAL_BYTES: u64 = 100;

/// Backend override for store names matching a glob pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePolicy {
    /// Glob over logical store names, e.g. `nodes_ch*`
    pub pattern: String,
    /// Backend for matching stores
    pub da_type: DaType,
    /// Segment size for matching stores (directory default if unset)
    #[serde(default)]
    pub segment_size: Option<u32>,
}

/// Configuration of one graph storage unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Directory of persisted stores; required for storing backends
    pub location: Option<PathBuf>,
    /// Backend for stores no policy matches
    pub default_type: DaType,
    /// Default segment size in bytes
    pub segment_size: u32,
    /// Ordered policies, first match wins
    pub store_policies: Vec<StorePolicy>,
    /// Store an elevation per node
    pub elevation: bool,
    /// Attach a turn cost store
    pub turn_costs: bool,
    /// Initial allocation per store
    pub initial_bytes: u64,
    /// CH profiles, one store pair each
    pub ch_profiles: Vec<ChConfig>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            location: None,
            default_type: DaType::Ram,
            segment_size: DEFAULT_SEGMENT_SIZE,
            store_policies: Vec::new(),
            elevation: false,
            turn_costs: false,
            initial_bytes: DEFAULT_INITIAL_BYTES,
            ch_profiles: Vec::new(),
        }
    }
}

impl GraphConfig {
    /// Heap-only configuration
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Configuration persisting to `location` with `default_type`
    pub fn at<P: AsRef<Path>>(location: P, default_type: DaType) -> Self {
        Self {
            location: Some(location.as_ref().to_path_buf()),
            default_type,
            ..Self::default()
        }
    }

    /// Enable or disable elevation
    pub fn with_elevation(mut self, elevation: bool) -> Self {
        self.elevation = elevation;
        self
    }

    /// Enable or disable the turn cost store
    pub fn with_turn_costs(mut self, turn_costs: bool) -> Self {
        self.turn_costs = turn_costs;
        self
    }

    /// Set the default segment size
    pub fn with_segment_size(mut self, segment_size: u32) -> Self {
        self.segment_size = segment_size;
        self
    }

    /// Append a store policy
    pub fn with_policy(mut self, pattern: &str, da_type: DaType, segment_size: Option<u32>) -> Self {
        self.store_policies.push(StorePolicy {
            pattern: pattern.to_string(),
            da_type,
            segment_size,
        });
        self
    }

    /// Add a CH profile
    pub fn with_ch_profile(mut self, profile: ChConfig) -> Self {
        self.ch_profiles.push(profile);
        self
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!("Loading graph configuration from {:?}", path.as_ref());
        Self::from_json_str(&json)
    }

    /// Check every setting
    pub fn validate(&self) -> Result<()> {
        Segmentation::new(self.segment_size)?;
        let storing = self.default_type.is_storing()
            || self.store_policies.iter().any(|p| p.da_type.is_storing());
        if storing && self.location.is_none() {
            return Err(Error::invalid_config(
                "storing store types need a location",
            ));
        }
        for policy in &self.store_policies {
            glob::Pattern::new(&policy.pattern).map_err(|e| {
                Error::invalid_config(format!("bad store pattern '{}': {e}", policy.pattern))
            })?;
            if let Some(size) = policy.segment_size {
                Segmentation::new(size)?;
            }
        }
        let mut names = HashSet::new();
        for profile in &self.ch_profiles {
            profile.validate()?;
            if !names.insert(profile.name.as_str()) {
                return Err(Error::invalid_config(format!(
                    "duplicate CH profile '{}'",
                    profile.name
                )));
            }
            if profile.edge_based && !self.turn_costs {
                return Err(Error::invalid_config(format!(
                    "edge-based CH profile '{}' needs turn costs",
                    profile.name
                )));
            }
        }
        Ok(())
    }

    /// Build the store directory described by this configuration
    pub fn directory(&self) -> Result<Directory> {
        self.validate()?;
        let mut dir = match &self.location {
            Some(location) => Directory::new(location, self.default_type)?,
            None => Directory::in_memory(),
        };
        dir = dir.with_segment_size(self.segment_size)?;
        for policy in &self.store_policies {
            dir = dir.with_policy(&policy.pattern, policy.da_type, policy.segment_size)?;
        }
        Ok(dir)
    }

    /// Profile configuration by name
    pub fn ch_profile(&self, name: &str) -> Option<&ChConfig> {
        self.ch_profiles.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = GraphConfig::default();
        assert_eq!(config.default_type, DaType::Ram);
        assert_eq!(config.segment_size, DEFAULT_SEGMENT_SIZE);
        assert!(config.validate().is_ok());
        assert!(config.directory().unwrap().location().is_none());
    }

    #[test]
    fn test_from_json() {
        let tmp = TempDir::new().unwrap();
        let json = format!(
            r#"{{
                "location": {:?},
                "default_type": "RAM_STORE",
                "segment_size": 4096,
                "store_policies": [
                    {{ "pattern": "nodes_ch*", "da_type": "MMAP" }},
                    {{ "pattern": "shortcuts_*", "da_type": "OFF_HEAP_STORE", "segment_size": 1024 }}
                ],
                "turn_costs": true,
                "ch_profiles": [{{ "name": "car", "edge_based": true }}, {{ "name": "bike" }}]
            }}"#,
            tmp.path()
        );
        let config = GraphConfig::from_json_str(&json).unwrap();
        assert_eq!(config.store_policies.len(), 2);
        assert!(!config.elevation);
        assert_eq!(config.initial_bytes, DEFAULT_INITIAL_BYTES);
        assert_eq!(config.ch_profile("bike").unwrap().weight_bits, 30);
        assert!(config.ch_profile("car").unwrap().edge_based);

        let dir = config.directory().unwrap();
        assert_eq!(dir.resolve("nodes_ch_car").da_type, DaType::Mmap);
        assert_eq!(dir.resolve("nodes_ch_car").segment_size, 4096);
        assert_eq!(dir.resolve("shortcuts_car").segment_size, 1024);
        assert_eq!(dir.resolve("edges").da_type, DaType::RamStore);
    }

    #[test]
    fn test_from_json_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("graph.json");
        std::fs::write(&path, r#"{ "elevation": true }"#).unwrap();
        let config = GraphConfig::from_json_file(&path).unwrap();
        assert!(config.elevation);
        assert!(GraphConfig::from_json_file(tmp.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_validation_errors() {
        let bad_segment = GraphConfig::in_memory().with_segment_size(1000);
        assert!(matches!(bad_segment.validate(), Err(Error::InvalidConfig(_))));

        let no_location = GraphConfig {
            default_type: DaType::Mmap,
            ..GraphConfig::default()
        };
        assert!(matches!(no_location.validate(), Err(Error::InvalidConfig(_))));

        let bad_pattern = GraphConfig::in_memory().with_policy("nodes[", DaType::Ram, None);
        assert!(bad_pattern.validate().is_err());

        let duplicate = GraphConfig::in_memory()
            .with_ch_profile(ChConfig::node_based("car"))
            .with_ch_profile(ChConfig::node_based("car"));
        assert!(duplicate.validate().is_err());

        let edge_based = GraphConfig::in_memory().with_ch_profile(ChConfig::edge_based("car"));
        assert!(edge_based.validate().is_err());
        assert!(edge_based.with_turn_costs(true).validate().is_ok());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = GraphConfig::from_json_str(r#"{ "default_type": "FLOPPY" }"#);
        assert!(matches!(result, Err(Error::Json(_))));
    }
}
