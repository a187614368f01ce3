//! Storable key/value properties
//!
//! Small string map persisted as JSON inside its own [`DataAccess`]. Used for
//! graph-wide facts that do not fit into a store header: component versions,
//! the flag layout, dimension, CH profile names.

use super::DataAccess;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Key/value properties of a graph
pub struct Properties {
    da: Box<dyn DataAccess>,
    map: BTreeMap<String, String>,
    dirty: bool,
}

impl std::fmt::Debug for Properties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Properties")
            .field("store", &self.da.name())
            .field("map", &self.map)
            .finish()
    }
}

impl Properties {
    /// Wrap a store; call `create` or `load_existing` next
    pub fn new(da: Box<dyn DataAccess>) -> Self {
        Self {
            da,
            map: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Allocate the backing store
    pub fn create(&mut self, bytes: u64) -> Result<()> {
        self.da.create(bytes)
    }

    /// Load persisted properties; `Ok(false)` if there are none
    pub fn load_existing(&mut self) -> Result<bool> {
        if !self.da.load_existing()? {
            return Ok(false);
        }
        let len = self.da.get_u32(0)? as usize;
        let mut buf = vec![0u8; len];
        self.da.get_bytes(4, &mut buf)?;
        self.map = serde_json::from_slice(&buf)?;
        self.dirty = false;
        Ok(true)
    }

    /// Store a value
    pub fn put(&mut self, key: &str, value: impl ToString) {
        self.map.insert(key.to_string(), value.to_string());
        self.dirty = true;
    }

    /// Read a value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Read and parse a value
    pub fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                Error::storage(format!("property '{key}' has unparsable value '{raw}'"))
            }),
        }
    }

    /// Remove a value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let old = self.map.remove(key);
        self.dirty |= old.is_some();
        old
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no property is set
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Record the version of a component under `version.<component>`
    pub fn put_version(&mut self, component: &str, version: i32) {
        self.put(&format!("version.{component}"), version);
    }

    /// Fail with `VersionMismatch` if a recorded version differs from `expected`
    ///
    /// A missing entry is also a mismatch: stores without version stamps were
    /// not written by this build.
    pub fn check_version(&self, component: &str, expected: i32) -> Result<()> {
        let found: Option<i32> = self.get_parsed(&format!("version.{component}"))?;
        match found {
            Some(v) if v == expected => Ok(()),
            Some(v) => Err(Error::version_mismatch(component, expected as i64, v as i64)),
            None => Err(Error::version_mismatch(component, expected as i64, -1)),
        }
    }

    /// Record every `(component, version)` pair
    pub fn put_current_versions(&mut self, versions: &[(&str, i32)]) {
        for (component, version) in versions {
            self.put_version(component, *version);
        }
    }

    /// [`Properties::check_version`] for every `(component, version)` pair
    pub fn check_versions(&self, versions: &[(&str, i32)]) -> Result<()> {
        versions
            .iter()
            .try_for_each(|(component, version)| self.check_version(component, *version))
    }

    /// Persist the map
    pub fn flush(&mut self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.map)?;
        self.da.ensure_capacity(4 + bytes.len() as u64)?;
        self.da.set_u32(0, bytes.len() as u32)?;
        self.da.set_bytes(4, &bytes)?;
        self.da.flush()?;
        self.dirty = false;
        Ok(())
    }

    /// Whether there are unflushed changes
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Release the backing store
    pub fn close(&mut self) {
        self.da.close();
    }

    /// Whether the backing store is closed
    pub fn is_closed(&self) -> bool {
        self.da.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DaType, new_data_access};
    use tempfile::TempDir;

    fn create_test_properties(dir: &TempDir) -> Properties {
        Properties::new(new_data_access("properties", DaType::RamStore, Some(dir.path()), 64).unwrap())
    }

    #[test]
    fn test_put_flush_load() {
        let dir = TempDir::new().unwrap();
        {
            let mut props = create_test_properties(&dir);
            props.create(100).unwrap();
            props.put("graph.dimension", 3);
            props.put("graph.flags", "car_access|1|0");
            props.put_version("nodes", 4);
            assert!(props.is_dirty());
            props.flush().unwrap();
            assert!(!props.is_dirty());
            props.close();
        }
        let mut props = create_test_properties(&dir);
        assert!(props.load_existing().unwrap());
        assert_eq!(props.len(), 3);
        assert_eq!(props.get("graph.flags"), Some("car_access|1|0"));
        assert_eq!(props.get_parsed::<u32>("graph.dimension").unwrap(), Some(3));
        props.check_version("nodes", 4).unwrap();
    }

    #[test]
    fn test_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut props = create_test_properties(&dir);
        props.create(10).unwrap();
        props.put_version("edges", 2);
        let err = props.check_version("edges", 3).unwrap_err();
        assert!(matches!(err, Error::VersionMismatch { expected: 3, found: 2, .. }));
        assert!(props.check_version("geometry", 1).is_err());
    }

    #[test]
    fn test_version_sets() {
        let dir = TempDir::new().unwrap();
        let mut props = create_test_properties(&dir);
        props.create(10).unwrap();
        let versions = [("nodes", 3), ("edges", 3), ("geometry", 2)];
        props.put_current_versions(&versions);
        props.check_versions(&versions).unwrap();
        assert!(matches!(
            props.check_versions(&[("nodes", 3), ("edges", 4)]),
            Err(Error::VersionMismatch { expected: 4, found: 3, .. })
        ));
        assert!(props.check_versions(&[("turn_costs", 2)]).is_err());
    }

    #[test]
    fn test_large_values_grow_store() {
        let dir = TempDir::new().unwrap();
        let mut props = create_test_properties(&dir);
        props.create(10).unwrap();
        props.put("long", "x".repeat(1000));
        props.flush().unwrap();
        props.close();

        let mut props = create_test_properties(&dir);
        assert!(props.load_existing().unwrap());
        assert_eq!(props.get("long").map(str::len), Some(1000));
    }

    #[test]
    fn test_unparsable_value() {
        let dir = TempDir::new().unwrap();
        let mut props = create_test_properties(&dir);
        props.put("n", "abc");
        assert!(props.get_parsed::<u32>("n").is_err());
        assert_eq!(props.remove("n").as_deref(), Some("abc"));
        assert!(props.is_empty());
    }
}
