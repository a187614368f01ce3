//! Heap-backed segmented store

use super::header::{StoreHeader, open_store_file, write_store_file};
use super::{DaType, DataAccess, HEADER_SLOTS, StoreMeta};
use crate::{Error, Result};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Segments held in process heap memory
///
/// With a location the store is written to `location/name` on flush and can be
/// loaded back; without one it lives only as long as the process.
#[derive(Debug)]
pub struct RamDataAccess {
    meta: StoreMeta,
    location: Option<PathBuf>,
    segments: Vec<Box<[u8]>>,
}

impl RamDataAccess {
    /// Create an in-memory store that is never persisted
    pub fn new(name: &str, segment_size: u32) -> Result<Self> {
        Ok(Self {
            meta: StoreMeta::new(name, segment_size)?,
            location: None,
            segments: Vec::new(),
        })
    }

    /// Create a heap store that persists to `location/name` on flush
    pub fn storing(name: &str, location: &Path, segment_size: u32) -> Result<Self> {
        Ok(Self {
            meta: StoreMeta::new(name, segment_size)?,
            location: Some(location.to_path_buf()),
            segments: Vec::new(),
        })
    }

    fn path(&self) -> Option<PathBuf> {
        self.location.as_ref().map(|l| l.join(&self.meta.name))
    }

    fn new_segment(&self) -> Box<[u8]> {
        vec![0u8; self.meta.segmentation.size() as usize].into_boxed_slice()
    }
}

impl DataAccess for RamDataAccess {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn da_type(&self) -> DaType {
        if self.location.is_some() {
            DaType::RamStore
        } else {
            DaType::Ram
        }
    }

    fn create(&mut self, bytes: u64) -> Result<()> {
        self.meta.ensure_open()?;
        if !self.segments.is_empty() {
            return Err(Error::illegal_state(format!(
                "store '{}' already created",
                self.meta.name
            )));
        }
        self.ensure_capacity(bytes.max(1))?;
        tracing::debug!(
            "Created heap store '{}' with {} segments",
            self.meta.name,
            self.segments.len()
        );
        Ok(())
    }

    fn load_existing(&mut self) -> Result<bool> {
        self.meta.ensure_open()?;
        if !self.segments.is_empty() {
            return Err(Error::illegal_state(format!(
                "store '{}' already initialized",
                self.meta.name
            )));
        }
        let Some(path) = self.path() else {
            return Ok(false);
        };
        let Some((header, mut reader)) = open_store_file(&self.meta.name, &path)? else {
            return Ok(false);
        };
        self.meta.adopt_segment_size(header.segment_size)?;
        let count = (header.capacity / header.segment_size as u64) as usize;
        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            let mut segment = self.new_segment();
            reader.read_exact(&mut segment)?;
            segments.push(segment);
        }
        self.segments = segments;
        self.meta.header = header.slots;
        self.meta.flushed = true;
        tracing::debug!(
            "Loaded heap store '{}' ({} bytes)",
            self.meta.name,
            header.capacity
        );
        Ok(true)
    }

    fn ensure_capacity(&mut self, bytes: u64) -> Result<bool> {
        self.meta.ensure_open()?;
        let needed = self.meta.segmentation.segments_for(bytes);
        if needed <= self.segments.len() {
            return Ok(false);
        }
        while self.segments.len() < needed {
            let segment = self.new_segment();
            self.segments.push(segment);
        }
        Ok(true)
    }

    fn trim_to(&mut self, bytes: u64) -> Result<()> {
        self.meta.ensure_open()?;
        let keep = self.meta.segmentation.segments_for(bytes);
        self.segments.truncate(keep);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.meta.ensure_open()?;
        if let Some(path) = self.path() {
            let header = StoreHeader {
                capacity: self.capacity(),
                segment_size: self.meta.segmentation.size(),
                slots: self.meta.header,
            };
            write_store_file(&path, &header, &self.segments)?;
            tracing::debug!("Flushed heap store '{}' to {:?}", self.meta.name, path);
        }
        self.meta.flushed = true;
        Ok(())
    }

    fn close(&mut self) {
        self.segments = Vec::new();
        self.meta.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.meta.closed
    }

    fn rename(&mut self, new_name: &str) -> Result<()> {
        self.meta.ensure_renamable()?;
        if let (Some(from), Some(location)) = (self.path(), self.location.as_ref()) {
            std::fs::rename(from, location.join(new_name))?;
        }
        self.meta.name = new_name.to_string();
        Ok(())
    }

    fn segment_size(&self) -> u32 {
        self.meta.segmentation.size()
    }

    fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn segment(&self, index: usize) -> &[u8] {
        &self.segments[index]
    }

    fn segment_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.segments[index]
    }

    fn header_slots(&self) -> &[i32; HEADER_SLOTS] {
        &self.meta.header
    }

    fn header_slots_mut(&mut self) -> &mut [i32; HEADER_SLOTS] {
        &mut self.meta.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store() {
        let mut da = RamDataAccess::new("mem", 64).unwrap();
        assert_eq!(da.da_type(), DaType::Ram);
        assert!(!da.load_existing().unwrap());
        da.create(10).unwrap();
        assert_eq!(da.segment_count(), 1);
        da.set_int(8, 3).unwrap();
        da.flush().unwrap();
        assert_eq!(da.get_int(8).unwrap(), 3);
    }

    #[test]
    fn test_rename_in_memory_after_flush() {
        let mut da = RamDataAccess::new("a", 64).unwrap();
        da.create(64).unwrap();
        assert!(da.rename("b").is_err());
        da.flush().unwrap();
        da.rename("b").unwrap();
        assert_eq!(da.name(), "b");
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(
            RamDataAccess::new("", 64),
            Err(Error::InvalidConfig(_))
        ));
    }
}
