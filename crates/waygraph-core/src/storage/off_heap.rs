//! Off-heap segmented store backed by anonymous native mappings

use super::header::{StoreHeader, open_store_file, write_store_file};
use super::{DaType, DataAccess, HEADER_SLOTS, StoreMeta};
use crate::{Error, Result};
use memmap2::MmapMut;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Whether accessors verify addresses against the current capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundsCheck {
    /// Out-of-range access returns `Error::OutOfRange`
    Checked,
    /// The capacity check is skipped.
    ///
    /// An address beyond the capacity panics on the segment index instead of
    /// returning an error. Only select this for stores whose callers are known
    /// to stay within `ensure_capacity`.
    Unchecked,
}

/// Segments allocated outside the allocator as anonymous mappings
///
/// Memory is obtained and released explicitly per segment. With a location
/// the store persists like a heap store on flush.
#[derive(Debug)]
pub struct OffHeapDataAccess {
    meta: StoreMeta,
    location: Option<PathBuf>,
    segments: Vec<MmapMut>,
    bounds: BoundsCheck,
}

impl OffHeapDataAccess {
    /// Create an off-heap store; `location` enables persistence
    pub fn new(
        name: &str,
        location: Option<&Path>,
        segment_size: u32,
        bounds: BoundsCheck,
    ) -> Result<Self> {
        Ok(Self {
            meta: StoreMeta::new(name, segment_size)?,
            location: location.map(Path::to_path_buf),
            segments: Vec::new(),
            bounds,
        })
    }

    fn path(&self) -> Option<PathBuf> {
        self.location.as_ref().map(|l| l.join(&self.meta.name))
    }

    fn allocate_segment(&self) -> Result<MmapMut> {
        Ok(MmapMut::map_anon(self.meta.segmentation.size() as usize)?)
    }
}

impl DataAccess for OffHeapDataAccess {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn da_type(&self) -> DaType {
        match (self.location.is_some(), self.bounds) {
            (_, BoundsCheck::Unchecked) => DaType::OffHeapUnchecked,
            (true, BoundsCheck::Checked) => DaType::OffHeapStore,
            (false, BoundsCheck::Checked) => DaType::OffHeap,
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
            "Created off-heap store '{}' with {} segments",
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
            let mut segment = self.allocate_segment()?;
            reader.read_exact(&mut segment)?;
            segments.push(segment);
        }
        self.segments = segments;
        self.meta.header = header.slots;
        self.meta.flushed = true;
        Ok(true)
    }

    fn ensure_capacity(&mut self, bytes: u64) -> Result<bool> {
        self.meta.ensure_open()?;
        let needed = self.meta.segmentation.segments_for(bytes);
        if needed <= self.segments.len() {
            return Ok(false);
        }
        while self.segments.len() < needed {
            let segment = self.allocate_segment()?;
            self.segments.push(segment);
        }
        Ok(true)
    }

    fn trim_to(&mut self, bytes: u64) -> Result<()> {
        self.meta.ensure_open()?;
        let keep = self.meta.segmentation.segments_for(bytes);
        // dropping a mapping unmaps it
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

    fn bounds_checked(&self) -> bool {
        self.bounds == BoundsCheck::Checked
    }
}
