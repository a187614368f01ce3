//! Memory-mapped segmented store

use super::header::{HEADER_SIZE, StoreHeader, open_store_file};
use super::{DaType, DataAccess, HEADER_SLOTS, StoreMeta};
use crate::{Error, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Store whose segments are mappings of `location/name`
///
/// Bytes live in the OS page cache. Every segment is its own mapping at
/// `HEADER_SIZE + index * segment_size`, so growth never remaps existing
/// segments and slices handed out earlier stay valid.
#[derive(Debug)]
pub struct MmapDataAccess {
    meta: StoreMeta,
    location: PathBuf,
    file: Option<File>,
    segments: Vec<MmapMut>,
}

impl MmapDataAccess {
    /// Create a handle for `location/name`; nothing is opened until
    /// `create` or `load_existing`
    pub fn new(name: &str, location: &Path, segment_size: u32) -> Result<Self> {
        Ok(Self {
            meta: StoreMeta::new(name, segment_size)?,
            location: location.to_path_buf(),
            file: None,
            segments: Vec::new(),
        })
    }

    fn path(&self) -> PathBuf {
        self.location.join(&self.meta.name)
    }

    fn file(&self) -> Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| Error::illegal_state(format!("store '{}' not created", self.meta.name)))
    }

    fn map_segment(&self, index: usize) -> Result<MmapMut> {
        let size = self.meta.segmentation.size() as u64;
        let offset = HEADER_SIZE as u64 + index as u64 * size;
        // SAFETY: the file is owned by this store and only resized through it;
        // mappings are dropped before the file is truncated below them.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(size as usize)
                .map_mut(self.file()?)?
        };
        Ok(mmap)
    }

    fn map_segments(&mut self, count: usize) -> Result<()> {
        while self.segments.len() < count {
            let mmap = self.map_segment(self.segments.len())?;
            self.segments.push(mmap);
        }
        Ok(())
    }

    fn file_len_for(&self, segments: usize) -> u64 {
        HEADER_SIZE as u64 + segments as u64 * self.meta.segmentation.size() as u64
    }
}

impl DataAccess for MmapDataAccess {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn da_type(&self) -> DaType {
        DaType::Mmap
    }

    fn create(&mut self, bytes: u64) -> Result<()> {
        self.meta.ensure_open()?;
        if self.file.is_some() {
            return Err(Error::illegal_state(format!(
                "store '{}' already created",
                self.meta.name
            )));
        }
        std::fs::create_dir_all(&self.location)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.path())?;
        self.file = Some(file);
        self.ensure_capacity(bytes.max(1))?;
        tracing::debug!(
            "Created mmap store '{}' with {} segments",
            self.meta.name,
            self.segments.len()
        );
        Ok(())
    }

    fn load_existing(&mut self) -> Result<bool> {
        self.meta.ensure_open()?;
        if self.file.is_some() {
            return Err(Error::illegal_state(format!(
                "store '{}' already initialized",
                self.meta.name
            )));
        }
        let path = self.path();
        let Some((header, _reader)) = open_store_file(&self.meta.name, &path)? else {
            return Ok(false);
        };
        self.meta.adopt_segment_size(header.segment_size)?;
        self.file = Some(OpenOptions::new().read(true).write(true).open(&path)?);
        let count = (header.capacity / header.segment_size as u64) as usize;
        self.map_segments(count)?;
        self.meta.header = header.slots;
        self.meta.flushed = true;
        tracing::debug!(
            "Mapped existing store '{}' ({} bytes)",
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
        let len = self.file_len_for(needed);
        self.file()?.set_len(len)?;
        self.map_segments(needed)?;
        Ok(true)
    }

    fn trim_to(&mut self, bytes: u64) -> Result<()> {
        self.meta.ensure_open()?;
        let keep = self.meta.segmentation.segments_for(bytes);
        if keep >= self.segments.len() {
            return Ok(());
        }
        // drop mappings before shrinking the file underneath them
        self.segments.truncate(keep);
        let len = self.file_len_for(keep);
        self.file()?.set_len(len)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.meta.ensure_open()?;
        let header = StoreHeader {
            capacity: self.capacity(),
            segment_size: self.meta.segmentation.size(),
            slots: self.meta.header,
        };
        let mut file = self.file()?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.encode())?;
        for segment in &self.segments {
            segment.flush()?;
        }
        self.file()?.sync_data()?;
        self.meta.flushed = true;
        tracing::debug!("Flushed mmap store '{}'", self.meta.name);
        Ok(())
    }

    fn close(&mut self) {
        self.segments = Vec::new();
        self.file = None;
        self.meta.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.meta.closed
    }

    fn rename(&mut self, new_name: &str) -> Result<()> {
        self.meta.ensure_renamable()?;
        std::fs::rename(self.path(), self.location.join(new_name))?;
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
    use tempfile::TempDir;

    #[test]
    fn test_file_grows_with_segments() {
        let dir = TempDir::new().unwrap();
        let mut da = MmapDataAccess::new("edges", dir.path(), 4096).unwrap();
        da.create(100).unwrap();
        let path = dir.path().join("edges");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 100 + 4096);

        da.ensure_capacity(3 * 4096).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 100 + 3 * 4096);

        da.trim_to(4097).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 100 + 2 * 4096);
    }

    #[test]
    fn test_unaligned_segment_offsets() {
        // the header shifts every segment off page alignment
        let dir = TempDir::new().unwrap();
        let mut da = MmapDataAccess::new("small", dir.path(), 16).unwrap();
        da.create(16 * 10).unwrap();
        for i in 0..40u64 {
            da.set_int(i * 4, i as i32 * 3).unwrap();
        }
        for i in 0..40u64 {
            assert_eq!(da.get_int(i * 4).unwrap(), i as i32 * 3);
        }
    }

    #[test]
    fn test_create_twice_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut da = MmapDataAccess::new("twice", dir.path(), 64).unwrap();
        da.create(64).unwrap();
        assert!(matches!(da.create(64), Err(Error::IllegalState(_))));
    }
}
