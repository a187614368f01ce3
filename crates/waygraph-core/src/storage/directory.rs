//! Directory - maps logical store names to backends
//!
//! A directory owns a location and a backend policy. Policies are glob
//! patterns over store names; the first matching pattern decides the backend
//! and segment size, otherwise the directory default applies:
//!
//! ```text
//! nodes_ch_*  -> MMAP, 64 KiB segments
//! geometry    -> RAM_STORE
//! *           -> default type / default segment size
//! ```
//!
//! Every name handed out is recorded. The record is written to
//! `manifest.json` by [`Directory::flush_manifest`] and read back when a
//! directory is opened on an existing location, so reopened stores keep the
//! backend and segment size they were created with.

use super::{DEFAULT_SEGMENT_SIZE, DaType, DataAccess, Segmentation, new_data_access};
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name of the directory manifest
pub const MANIFEST_NAME: &str = "manifest.json";

/// Backend and segment size of one logical store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSpec {
    /// Backend type
    pub da_type: DaType,
    /// Segment size in bytes
    pub segment_size: u32,
}

#[derive(Debug, Clone)]
struct Policy {
    pattern: glob::Pattern,
    da_type: DaType,
    segment_size: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    default_type: DaType,
    segment_size: u32,
    stores: BTreeMap<String, StoreSpec>,
}

/// Registry of the stores in one location
#[derive(Debug)]
pub struct Directory {
    location: Option<PathBuf>,
    default_type: DaType,
    segment_size: u32,
    policies: Vec<Policy>,
    registry: Mutex<BTreeMap<String, StoreSpec>>,
}

impl Directory {
    /// Open a directory at `location`, creating it if needed
    ///
    /// An existing manifest pre-populates the registry.
    pub fn new<P: AsRef<Path>>(location: P, default_type: DaType) -> Result<Self> {
        let location = location.as_ref().to_path_buf();
        std::fs::create_dir_all(&location)?;
        let mut registry = BTreeMap::new();
        let manifest_path = location.join(MANIFEST_NAME);
        if manifest_path.exists() {
            let manifest: Manifest = serde_json::from_slice(&std::fs::read(&manifest_path)?)?;
            tracing::debug!(
                "Loaded manifest {:?} with {} stores",
                manifest_path,
                manifest.stores.len()
            );
            registry = manifest.stores;
        }
        Ok(Self {
            location: Some(location),
            default_type,
            segment_size: DEFAULT_SEGMENT_SIZE,
            policies: Vec::new(),
            registry: Mutex::new(registry),
        })
    }

    /// A directory without a location; only non-storing types are allowed
    pub fn in_memory() -> Self {
        Self {
            location: None,
            default_type: DaType::Ram,
            segment_size: DEFAULT_SEGMENT_SIZE,
            policies: Vec::new(),
            registry: Mutex::new(BTreeMap::new()),
        }
    }

    /// Default segment size for names without a sized policy
    pub fn with_segment_size(mut self, segment_size: u32) -> Result<Self> {
        Segmentation::new(segment_size)?;
        self.segment_size = segment_size;
        Ok(self)
    }

    /// Append a name policy; earlier policies take precedence
    pub fn with_policy(
        mut self,
        pattern: &str,
        da_type: DaType,
        segment_size: Option<u32>,
    ) -> Result<Self> {
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| Error::invalid_config(format!("bad store pattern '{pattern}': {e}")))?;
        if let Some(size) = segment_size {
            Segmentation::new(size)?;
        }
        self.check_type(da_type)?;
        self.policies.push(Policy {
            pattern,
            da_type,
            segment_size,
        });
        Ok(self)
    }

    fn check_type(&self, da_type: DaType) -> Result<()> {
        if da_type.is_storing() && self.location.is_none() {
            return Err(Error::invalid_config(format!(
                "store type {da_type} needs a directory location"
            )));
        }
        Ok(())
    }

    /// Location of persisted stores, if any
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Type used when no policy matches
    pub fn default_type(&self) -> DaType {
        self.default_type
    }

    /// Default segment size
    pub fn segment_size(&self) -> u32 {
        self.segment_size
    }

    /// Backend and segment size a request for `name` would get
    ///
    /// Already registered names keep their recorded spec.
    pub fn resolve(&self, name: &str) -> StoreSpec {
        if let Some(spec) = self.registry.lock().get(name) {
            return *spec;
        }
        self.policy_for(name)
    }

    /// Backend a request for `name` would get
    pub fn default_type_for(&self, name: &str) -> DaType {
        self.resolve(name).da_type
    }

    fn policy_for(&self, name: &str) -> StoreSpec {
        self.policies
            .iter()
            .find(|p| p.pattern.matches(name))
            .map(|p| StoreSpec {
                da_type: p.da_type,
                segment_size: p.segment_size.unwrap_or(self.segment_size),
            })
            .unwrap_or(StoreSpec {
                da_type: self.default_type,
                segment_size: self.segment_size,
            })
    }

    /// Create a store handle for `name` using the resolved policy
    pub fn create(&self, name: &str) -> Result<Box<dyn DataAccess>> {
        let spec = self.resolve(name);
        self.create_with(name, spec.da_type, spec.segment_size)
    }

    /// Create a store handle with an explicit type and segment size
    ///
    /// Requesting a registered name again with a different type or segment
    /// size fails with `Error::IncompatibleType`.
    pub fn create_with(
        &self,
        name: &str,
        da_type: DaType,
        segment_size: u32,
    ) -> Result<Box<dyn DataAccess>> {
        if name == MANIFEST_NAME || name.ends_with(".lock") {
            return Err(Error::invalid_config(format!("reserved store name '{name}'")));
        }
        self.check_type(da_type)?;
        let requested = StoreSpec {
            da_type,
            segment_size,
        };
        let mut registry = self.registry.lock();
        if let Some(existing) = registry.get(name) {
            if *existing != requested {
                return Err(Error::IncompatibleType {
                    name: name.to_string(),
                    reason: format!(
                        "registered as {} / {} bytes, requested {} / {} bytes",
                        existing.da_type, existing.segment_size, da_type, segment_size
                    ),
                });
            }
        }
        let store = new_data_access(name, da_type, self.location.as_deref(), segment_size)?;
        registry.insert(name.to_string(), requested);
        Ok(store)
    }

    /// Whether `name` has been handed out or recorded
    pub fn contains(&self, name: &str) -> bool {
        self.registry.lock().contains_key(name)
    }

    /// Registered names and their specs
    pub fn stores(&self) -> Vec<(String, StoreSpec)> {
        self.registry
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Forget `name` and delete its persisted bytes
    ///
    /// The caller closes any open handle first.
    pub fn remove(&self, name: &str) -> Result<()> {
        self.registry.lock().remove(name);
        if let Some(location) = &self.location {
            let path = location.join(name);
            if path.exists() {
                std::fs::remove_file(&path)?;
                tracing::debug!("Removed store file {:?}", path);
            }
        }
        Ok(())
    }

    /// Remove every registered store and the manifest
    pub fn clear(&self) -> Result<()> {
        let names: Vec<String> = self.registry.lock().keys().cloned().collect();
        for name in names {
            self.remove(&name)?;
        }
        if let Some(location) = &self.location {
            let manifest = location.join(MANIFEST_NAME);
            if manifest.exists() {
                std::fs::remove_file(manifest)?;
            }
        }
        Ok(())
    }

    /// Persist the registry as `manifest.json`
    pub fn flush_manifest(&self) -> Result<()> {
        let Some(location) = &self.location else {
            return Ok(());
        };
        let manifest = Manifest {
            default_type: self.default_type,
            segment_size: self.segment_size,
            stores: self.registry.lock().clone(),
        };
        std::fs::write(
            location.join(MANIFEST_NAME),
            serde_json::to_vec_pretty(&manifest)?,
        )?;
        Ok(())
    }
}
