//! Edge names and other string key/value pairs
//!
//! Entries are appended to their own store and referenced from the edge
//! record by byte offset; offset 0 means "none".
//!
//! ```text
//! PAIRS(2) | KEY_LEN(2) KEY | VALUE_LEN(2) VALUE | ...
//! ```
//!
//! Identical entries share one record while the earlier copy is still in an
//! in-memory cache of up to 10,000 distinct entries. The cache is dropped
//! when full and on reload, so later duplicates get a record of their own.

use crate::storage::DataAccess;
use crate::{Error, Result};
use std::collections::HashMap;

/// Version stamp of the key/value store
pub const KEY_VALUE_VERSION: i32 = 1;

/// Key used for the street name
pub const NAME_KEY: &str = "name";

const H_VERSION: usize = 0;
const H_NEXT: usize = 1;
const DEDUP_CACHE_LIMIT: usize = 10_000;

pub(crate) struct KeyValueStore {
    da: Box<dyn DataAccess>,
    next: u32,
    recent: HashMap<Vec<u8>, u32>,
}

impl KeyValueStore {
    pub(crate) fn new(da: Box<dyn DataAccess>) -> Self {
        Self {
            da,
            next: 4,
            recent: HashMap::new(),
        }
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
        if version != KEY_VALUE_VERSION {
            return Err(Error::version_mismatch(
                self.da.name(),
                KEY_VALUE_VERSION as i64,
                version as i64,
            ));
        }
        self.next = self.da.get_header(H_NEXT)? as u32;
        self.recent.clear();
        Ok(())
    }

    pub(crate) fn write_headers(&mut self) -> Result<()> {
        self.da.set_header(H_VERSION, KEY_VALUE_VERSION)?;
        self.da.set_header(H_NEXT, self.next as i32)
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

    fn encode(pairs: &[(String, String)]) -> Result<Vec<u8>> {
        if pairs.len() > u16::MAX as usize {
            return Err(Error::value_too_large(format!("{} key/value pairs", pairs.len())));
        }
        let mut buf = Vec::new();
        buf.extend_from_slice(&(pairs.len() as u16).to_le_bytes());
        for (key, value) in pairs {
            for s in [key, value] {
                if s.len() > u16::MAX as usize {
                    return Err(Error::value_too_large(format!(
                        "key/value string of {} bytes",
                        s.len()
                    )));
                }
                buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
        }
        Ok(buf)
    }

    /// Append `pairs` and return the reference (0 for no pairs)
    pub(crate) fn add(&mut self, pairs: &[(String, String)]) -> Result<u32> {
        if pairs.is_empty() {
            return Ok(0);
        }
        let bytes = Self::encode(pairs)?;
        if let Some(reference) = self.recent.get(&bytes) {
            return Ok(*reference);
        }
        let reference = self.next;
        let end = reference as u64 + bytes.len() as u64;
        if end > u32::MAX as u64 {
            return Err(Error::value_too_large("key/value store exceeds 4 GiB"));
        }
        self.da.ensure_capacity(end)?;
        self.da.set_bytes(reference as u64, &bytes)?;
        self.next = end as u32;
        if self.recent.len() >= DEDUP_CACHE_LIMIT {
            self.recent.clear();
        }
        self.recent.insert(bytes, reference);
        Ok(reference)
    }

    fn read_string(&self, address: &mut u64) -> Result<String> {
        let mut len = [0u8; 2];
        self.da.get_bytes(*address, &mut len)?;
        let len = u16::from_le_bytes(len) as usize;
        let mut buf = vec![0u8; len];
        self.da.get_bytes(*address + 2, &mut buf)?;
        *address += 2 + len as u64;
        String::from_utf8(buf).map_err(|e| Error::storage(format!("corrupt key/value entry: {e}")))
    }

    /// Read the pairs of a reference (empty for 0)
    pub(crate) fn get(&self, reference: u32) -> Result<Vec<(String, String)>> {
        if reference == 0 {
            return Ok(Vec::new());
        }
        let mut address = reference as u64;
        let count = self.da.get_short(address)? as u16 as usize;
        address += 2;
        let mut pairs = Vec::with_capacity(count);
        for _ in 0..count {
            let key = self.read_string(&mut address)?;
            let value = self.read_string(&mut address)?;
            pairs.push((key, value));
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RamDataAccess;

    fn create_test_store() -> KeyValueStore {
        let mut store = KeyValueStore::new(Box::new(RamDataAccess::new("key_values", 32).unwrap()));
        store.create(32).unwrap();
        store
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_add_get() {
        let mut store = create_test_store();
        let kv = pairs(&[(NAME_KEY, "Hauptstraße"), ("ref", "B 96")]);
        let reference = store.add(&kv).unwrap();
        assert_ne!(reference, 0);
        assert_eq!(store.get(reference).unwrap(), kv);
    }

    #[test]
    fn test_empty_is_zero() {
        let mut store = create_test_store();
        assert_eq!(store.add(&[]).unwrap(), 0);
        assert!(store.get(0).unwrap().is_empty());
    }

    #[test]
    fn test_repeated_entries_share_record() {
        let mut store = create_test_store();
        let a = store.add(&pairs(&[(NAME_KEY, "Main Street")])).unwrap();
        let b = store.add(&pairs(&[(NAME_KEY, "Side Street")])).unwrap();
        let c = store.add(&pairs(&[(NAME_KEY, "Main Street")])).unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
    }

    #[test]
    fn test_dedup_cache_is_bounded() {
        let mut store = create_test_store();
        let first = store.add(&pairs(&[(NAME_KEY, "street 0")])).unwrap();
        for i in 1..DEDUP_CACHE_LIMIT {
            store.add(&pairs(&[(NAME_KEY, &format!("street {i}"))])).unwrap();
        }
        // still cached after 9,999 other entries
        assert_eq!(store.add(&pairs(&[(NAME_KEY, "street 0")])).unwrap(), first);

        store.add(&pairs(&[(NAME_KEY, "one more")])).unwrap();
        let again = store.add(&pairs(&[(NAME_KEY, "street 0")])).unwrap();
        assert_ne!(again, first);
        assert_eq!(store.get(again).unwrap(), store.get(first).unwrap());
    }

    #[test]
    fn test_entries_cross_segments() {
        let mut store = create_test_store();
        let long = "x".repeat(100);
        let reference = store.add(&pairs(&[(NAME_KEY, &long)])).unwrap();
        assert_eq!(store.get(reference).unwrap()[0].1, long);
    }

    #[test]
    fn test_headers_round_trip() {
        let mut store = create_test_store();
        store.add(&pairs(&[("k", "v")])).unwrap();
        let next = store.next;
        store.write_headers().unwrap();
        store.next = 4;
        store.read_headers().unwrap();
        assert_eq!(store.next, next);
    }
}
