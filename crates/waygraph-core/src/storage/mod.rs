//! Storage layer - segmented byte stores and their registry
//!
//! Every persistent structure of the graph lives in a [`DataAccess`]: a growable
//! array of bytes split into fixed-size segments. A logical address `a` maps to
//! segment `a >> power` and offset `a & (segment_size - 1)`.
//!
//! Backends:
//! - [`RamDataAccess`]: heap segments, optionally written to a file on flush
//! - [`MmapDataAccess`]: one memory mapping per segment of the backing file
//! - [`OffHeapDataAccess`]: anonymous native mappings, optionally written on flush
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────────────────────┬───────────┬───────────┬─────┐
//! │ header (100 bytes)           │ segment 0 │ segment 1 │ ... │
//! │ magic, version, capacity,    │           │           │     │
//! │ segment size, 20 i32 slots   │           │           │     │
//! └──────────────────────────────┴───────────┴───────────┴─────┘
//! ```

mod da_type;
pub mod directory;
mod header;
pub mod lock;
mod mmap;
mod off_heap;
pub mod properties;
mod ram;

pub use da_type::DaType;
pub use directory::Directory;
pub use header::{HEADER_SIZE, HEADER_SLOTS, STORE_FORMAT_VERSION};
pub use lock::{LockFactory, LockMode, StorageLock};
pub use mmap::MmapDataAccess;
pub use off_heap::{BoundsCheck, OffHeapDataAccess};
pub use properties::Properties;
pub use ram::RamDataAccess;

use crate::{Error, Result};
use std::path::Path;

/// Segment size used when the caller never configures one (1 MiB)
pub const DEFAULT_SEGMENT_SIZE: u32 = 1 << 20;

/// Segmented, growable byte store
///
/// Implementations provide raw segment access and lifecycle; typed accessors
/// are provided on top of [`DataAccess::get_bytes`] / [`DataAccess::set_bytes`].
/// Multi-byte values are little-endian.
pub trait DataAccess: Send + Sync {
    /// Logical name of this store
    fn name(&self) -> &str;

    /// Backend type
    fn da_type(&self) -> DaType;

    /// Allocate and zero-fill at least `bytes` bytes (at least one segment)
    fn create(&mut self, bytes: u64) -> Result<()>;

    /// Attach to persisted bytes
    ///
    /// Returns `Ok(false)` when nothing has been persisted yet.
    fn load_existing(&mut self) -> Result<bool>;

    /// Grow by appending whole segments until `bytes` are addressable
    ///
    /// Returns `true` if new segments were added.
    fn ensure_capacity(&mut self, bytes: u64) -> Result<bool>;

    /// Discard trailing segments not needed for `bytes` (keeps at least one)
    fn trim_to(&mut self, bytes: u64) -> Result<()>;

    /// Persist header and payload
    fn flush(&mut self) -> Result<()>;

    /// Release all memory and mappings; any further use fails with `Closed`
    fn close(&mut self);

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;

    /// Rename the store and move its persisted bytes
    ///
    /// Only legal after a successful [`DataAccess::flush`].
    fn rename(&mut self, new_name: &str) -> Result<()>;

    /// Segment size in bytes (power of two)
    fn segment_size(&self) -> u32;

    /// Number of allocated segments
    fn segment_count(&self) -> usize;

    /// Raw segment bytes
    fn segment(&self, index: usize) -> &[u8];

    /// Raw mutable segment bytes
    fn segment_mut(&mut self, index: usize) -> &mut [u8];

    /// Header metadata slots
    fn header_slots(&self) -> &[i32; HEADER_SLOTS];

    /// Mutable header metadata slots
    fn header_slots_mut(&mut self) -> &mut [i32; HEADER_SLOTS];

    /// Whether accessors verify addresses against the capacity
    fn bounds_checked(&self) -> bool {
        true
    }

    /// Addressable bytes
    fn capacity(&self) -> u64 {
        self.segment_count() as u64 * self.segment_size() as u64
    }

    /// Validate an access of `len` bytes at `address`
    fn check_access(&self, address: u64, len: usize) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed(self.name().to_string()));
        }
        if self.bounds_checked() && address.saturating_add(len as u64) > self.capacity() {
            return Err(Error::OutOfRange {
                store: self.name().to_string(),
                address,
                len,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    /// Copy `out.len()` bytes starting at `address`
    fn get_bytes(&self, address: u64, out: &mut [u8]) -> Result<()> {
        self.check_access(address, out.len())?;
        let size = self.segment_size() as u64;
        let power = self.segment_size().trailing_zeros();
        let mut addr = address;
        let mut done = 0;
        while done < out.len() {
            let offset = (addr & (size - 1)) as usize;
            let n = (size as usize - offset).min(out.len() - done);
            let segment = self.segment((addr >> power) as usize);
            out[done..done + n].copy_from_slice(&segment[offset..offset + n]);
            done += n;
            addr += n as u64;
        }
        Ok(())
    }

    /// Write `bytes` starting at `address`
    fn set_bytes(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        self.check_access(address, bytes.len())?;
        let size = self.segment_size() as u64;
        let power = self.segment_size().trailing_zeros();
        let mut addr = address;
        let mut done = 0;
        while done < bytes.len() {
            let offset = (addr & (size - 1)) as usize;
            let n = (size as usize - offset).min(bytes.len() - done);
            let segment = self.segment_mut((addr >> power) as usize);
            segment[offset..offset + n].copy_from_slice(&bytes[done..done + n]);
            done += n;
            addr += n as u64;
        }
        Ok(())
    }

    /// Read a signed 32-bit integer
    fn get_int(&self, address: u64) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.get_bytes(address, &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Write a signed 32-bit integer
    fn set_int(&mut self, address: u64, value: i32) -> Result<()> {
        self.set_bytes(address, &value.to_le_bytes())
    }

    /// Read an unsigned 32-bit integer
    fn get_u32(&self, address: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.get_bytes(address, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Write an unsigned 32-bit integer
    fn set_u32(&mut self, address: u64, value: u32) -> Result<()> {
        self.set_bytes(address, &value.to_le_bytes())
    }

    /// Read a signed 16-bit integer
    fn get_short(&self, address: u64) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.get_bytes(address, &mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    /// Write a signed 16-bit integer
    fn set_short(&mut self, address: u64, value: i16) -> Result<()> {
        self.set_bytes(address, &value.to_le_bytes())
    }

    /// Read a single byte
    fn get_byte(&self, address: u64) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.get_bytes(address, &mut buf)?;
        Ok(buf[0])
    }

    /// Write a single byte
    fn set_byte(&mut self, address: u64, value: u8) -> Result<()> {
        self.set_bytes(address, &[value])
    }

    /// Read header metadata slot `slot`
    fn get_header(&self, slot: usize) -> Result<i32> {
        if self.is_closed() {
            return Err(Error::Closed(self.name().to_string()));
        }
        self.header_slots()
            .get(slot)
            .copied()
            .ok_or_else(|| Error::invalid_argument(format!("header slot {slot} >= {HEADER_SLOTS}")))
    }

    /// Write header metadata slot `slot`
    fn set_header(&mut self, slot: usize, value: i32) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed(self.name().to_string()));
        }
        let slots = self.header_slots_mut();
        match slots.get_mut(slot) {
            Some(v) => {
                *v = value;
                Ok(())
            }
            None => Err(Error::invalid_argument(format!(
                "header slot {slot} >= {HEADER_SLOTS}"
            ))),
        }
    }

    /// Copy header slots and all bytes into `other`
    ///
    /// `other` must already be created. Both stores stay independent afterwards.
    fn copy_to(&self, other: &mut dyn DataAccess) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed(self.name().to_string()));
        }
        *other.header_slots_mut() = *self.header_slots();
        other.ensure_capacity(self.capacity())?;
        let mut address = 0u64;
        for index in 0..self.segment_count() {
            let segment = self.segment(index);
            other.set_bytes(address, segment)?;
            address += segment.len() as u64;
        }
        Ok(())
    }
}

/// Validated segment geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Segmentation {
    size: u32,
}

impl Segmentation {
    /// Reject segment sizes that are not a power of two `>= 2`
    pub(crate) fn new(size: u32) -> Result<Self> {
        if size < 2 || !size.is_power_of_two() {
            return Err(Error::invalid_config(format!(
                "segment size must be a power of two >= 2, got {size}"
            )));
        }
        Ok(Self { size })
    }

    pub(crate) fn size(&self) -> u32 {
        self.size
    }

    /// Number of segments needed to address `bytes` bytes (at least one)
    pub(crate) fn segments_for(&self, bytes: u64) -> usize {
        bytes.div_ceil(self.size as u64).max(1) as usize
    }
}

/// Lifecycle and header state shared by all backends
#[derive(Debug)]
pub(crate) struct StoreMeta {
    pub(crate) name: String,
    pub(crate) segmentation: Segmentation,
    pub(crate) header: [i32; HEADER_SLOTS],
    pub(crate) closed: bool,
    pub(crate) flushed: bool,
}

impl StoreMeta {
    pub(crate) fn new(name: &str, segment_size: u32) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::invalid_config("store name must not be empty"));
        }
        Ok(Self {
            name: name.to_string(),
            segmentation: Segmentation::new(segment_size)?,
            header: [0; HEADER_SLOTS],
            closed: false,
            flushed: false,
        })
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed(self.name.clone()));
        }
        Ok(())
    }

    pub(crate) fn ensure_renamable(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.flushed {
            return Err(Error::illegal_state(format!(
                "cannot rename '{}' before it was flushed",
                self.name
            )));
        }
        Ok(())
    }

    /// Adopt the segment size found on disk
    pub(crate) fn adopt_segment_size(&mut self, persisted: u32) -> Result<()> {
        if persisted != self.segmentation.size() {
            tracing::warn!(
                "Store '{}' was persisted with segment size {}, configured {}; using persisted size",
                self.name,
                persisted,
                self.segmentation.size()
            );
            self.segmentation = Segmentation::new(persisted)?;
        }
        Ok(())
    }
}

/// Create a store of the requested backend type
///
/// Storing types need a `location`; the file is `location/name`.
pub fn new_data_access(
    name: &str,
    da_type: DaType,
    location: Option<&Path>,
    segment_size: u32,
) -> Result<Box<dyn DataAccess>> {
    let require_location = || {
        location.ok_or_else(|| {
            Error::invalid_config(format!("store type {da_type} for '{name}' needs a location"))
        })
    };
    Ok(match da_type {
        DaType::Ram => Box::new(RamDataAccess::new(name, segment_size)?),
        DaType::RamStore => Box::new(RamDataAccess::storing(
            name,
            require_location()?,
            segment_size,
        )?),
        DaType::Mmap => Box::new(MmapDataAccess::new(name, require_location()?, segment_size)?),
        DaType::OffHeap => Box::new(OffHeapDataAccess::new(
            name,
            None,
            segment_size,
            BoundsCheck::Checked,
        )?),
        DaType::OffHeapStore => Box::new(OffHeapDataAccess::new(
            name,
            Some(require_location()?),
            segment_size,
            BoundsCheck::Checked,
        )?),
        DaType::OffHeapUnchecked => Box::new(OffHeapDataAccess::new(
            name,
            Some(require_location()?),
            segment_size,
            BoundsCheck::Unchecked,
        )?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const ALL_TYPES: [DaType; 6] = [
        DaType::Ram,
        DaType::RamStore,
        DaType::Mmap,
        DaType::OffHeap,
        DaType::OffHeapStore,
        DaType::OffHeapUnchecked,
    ];

    fn create_test_store(da_type: DaType, dir: &TempDir, segment_size: u32) -> Box<dyn DataAccess> {
        new_data_access("test", da_type, Some(dir.path()), segment_size).unwrap()
    }

    #[test]
    fn test_segment_size_validation() {
        assert!(Segmentation::new(0).is_err());
        assert!(Segmentation::new(1).is_err());
        assert!(Segmentation::new(3).is_err());
        assert!(Segmentation::new(100).is_err());
        assert!(Segmentation::new(2).is_ok());
        assert!(Segmentation::new(1 << 16).is_ok());

        let dir = TempDir::new().unwrap();
        for da_type in ALL_TYPES {
            let err = new_data_access("x", da_type, Some(dir.path()), 48).err().unwrap();
            assert!(matches!(err, Error::InvalidConfig(_)), "{da_type}");
        }
    }

    #[test]
    fn test_storing_type_needs_location() {
        let err = new_data_access("x", DaType::Mmap, None, 128).err().unwrap();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(new_data_access("x", DaType::Ram, None, 128).is_ok());
    }

    #[test]
    fn test_read_write_all_backends() {
        let dir = TempDir::new().unwrap();
        for da_type in ALL_TYPES {
            let mut da = create_test_store(da_type, &dir, 128);
            da.create(300).unwrap();
            assert_eq!(da.segment_count(), 3);
            assert_eq!(da.capacity(), 384);

            da.set_int(0, -7).unwrap();
            da.set_int(124, i32::MAX).unwrap();
            da.set_u32(200, u32::MAX - 1).unwrap();
            da.set_short(260, -300).unwrap();
            da.set_byte(383, 0xAB).unwrap();

            assert_eq!(da.get_int(0).unwrap(), -7, "{da_type}");
            assert_eq!(da.get_int(124).unwrap(), i32::MAX);
            assert_eq!(da.get_u32(200).unwrap(), u32::MAX - 1);
            assert_eq!(da.get_short(260).unwrap(), -300);
            assert_eq!(da.get_byte(383).unwrap(), 0xAB);
            // fresh bytes are zero
            assert_eq!(da.get_int(64).unwrap(), 0);
            da.close();
        }
    }

    #[test]
    fn test_bytes_across_segments() {
        let dir = TempDir::new().unwrap();
        let mut da = create_test_store(DaType::Ram, &dir, 16);
        da.create(64).unwrap();

        let payload: Vec<u8> = (0..40).collect();
        da.set_bytes(10, &payload).unwrap();
        let mut out = vec![0u8; 40];
        da.get_bytes(10, &mut out).unwrap();
        assert_eq!(out, payload);

        // an int straddling the boundary of segment 0 and 1
        da.set_int(14, 0x0102_0304).unwrap();
        assert_eq!(da.get_int(14).unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_out_of_range() {
        let dir = TempDir::new().unwrap();
        for da_type in ALL_TYPES {
            if da_type == DaType::OffHeapUnchecked {
                continue;
            }
            let mut da = create_test_store(da_type, &dir, 64);
            da.create(64).unwrap();
            assert!(da.get_int(60).is_ok());
            let err = da.get_int(61).unwrap_err();
            assert!(matches!(err, Error::OutOfRange { .. }), "{da_type}");
            assert!(matches!(da.set_byte(64, 1), Err(Error::OutOfRange { .. })));
            da.close();
        }
    }

    #[test]
    fn test_unchecked_backend_skips_capacity_check() {
        let dir = TempDir::new().unwrap();
        let mut da = create_test_store(DaType::OffHeapUnchecked, &dir, 64);
        assert!(!da.bounds_checked());
        da.create(64).unwrap();
        // the check is skipped, the access itself panics on the slice index
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| da.get_int(64)));
        assert!(result.is_err());
    }

    #[test]
    fn test_growth_and_trim() {
        let dir = TempDir::new().unwrap();
        for da_type in ALL_TYPES {
            let mut da = create_test_store(da_type, &dir, 32);
            da.create(32).unwrap();
            da.set_int(28, 11).unwrap();

            assert!(!da.ensure_capacity(32).unwrap());
            assert!(da.ensure_capacity(100).unwrap());
            assert_eq!(da.segment_count(), 4);
            da.set_int(96, 22).unwrap();
            assert_eq!(da.get_int(28).unwrap(), 11);

            da.trim_to(40).unwrap();
            assert_eq!(da.segment_count(), 2);
            assert_eq!(da.get_int(28).unwrap(), 11);
            if da.bounds_checked() {
                assert!(matches!(da.get_int(96), Err(Error::OutOfRange { .. })));
            }

            // never below one segment
            da.trim_to(0).unwrap();
            assert_eq!(da.segment_count(), 1);
            da.close();
        }
    }

    #[test]
    fn test_flush_and_load() {
        for da_type in [DaType::RamStore, DaType::Mmap, DaType::OffHeapStore] {
            let dir = TempDir::new().unwrap();
            {
                let mut da = create_test_store(da_type, &dir, 64);
                da.create(200).unwrap();
                da.set_int(0, 42).unwrap();
                da.set_int(196, -42).unwrap();
                da.set_header(0, 7).unwrap();
                da.set_header(HEADER_SLOTS - 1, -1).unwrap();
                da.flush().unwrap();
                da.close();
            }
            {
                let mut da = create_test_store(da_type, &dir, 64);
                assert!(da.load_existing().unwrap(), "{da_type}");
                assert_eq!(da.capacity(), 256);
                assert_eq!(da.get_int(0).unwrap(), 42);
                assert_eq!(da.get_int(196).unwrap(), -42);
                assert_eq!(da.get_header(0).unwrap(), 7);
                assert_eq!(da.get_header(HEADER_SLOTS - 1).unwrap(), -1);
                da.close();
            }
        }
    }

    #[test]
    fn test_load_missing_returns_false() {
        let dir = TempDir::new().unwrap();
        for da_type in ALL_TYPES {
            let mut da = create_test_store(da_type, &dir, 64);
            assert!(!da.load_existing().unwrap(), "{da_type}");
        }
    }

    #[test]
    fn test_load_adopts_persisted_segment_size() {
        let dir = TempDir::new().unwrap();
        {
            let mut da = create_test_store(DaType::Mmap, &dir, 64);
            da.create(128).unwrap();
            da.set_int(100, 5).unwrap();
            da.flush().unwrap();
        }
        let mut da = create_test_store(DaType::RamStore, &dir, 1024);
        assert!(da.load_existing().unwrap());
        assert_eq!(da.segment_size(), 64);
        assert_eq!(da.get_int(100).unwrap(), 5);
    }

    #[test]
    fn test_closed_access() {
        let dir = TempDir::new().unwrap();
        for da_type in ALL_TYPES {
            let mut da = create_test_store(da_type, &dir, 64);
            da.create(64).unwrap();
            da.close();
            assert!(da.is_closed());
            assert!(matches!(da.get_int(0), Err(Error::Closed(_))), "{da_type}");
            assert!(matches!(da.set_int(0, 1), Err(Error::Closed(_))));
            assert!(matches!(da.get_header(0), Err(Error::Closed(_))));
            assert!(matches!(da.ensure_capacity(1000), Err(Error::Closed(_))));
            assert!(matches!(da.flush(), Err(Error::Closed(_))));
        }
    }

    #[test]
    fn test_rename_requires_flush() {
        let dir = TempDir::new().unwrap();
        for da_type in [DaType::RamStore, DaType::Mmap, DaType::OffHeapStore] {
            let mut da = create_test_store(da_type, &dir, 64);
            da.create(64).unwrap();
            da.set_int(4, 99).unwrap();
            assert!(matches!(da.rename("moved"), Err(Error::IllegalState(_))));

            da.flush().unwrap();
            da.rename("moved").unwrap();
            assert_eq!(da.name(), "moved");
            assert!(dir.path().join("moved").exists());
            assert!(!dir.path().join("test").exists());
            da.close();

            let mut reopened = new_data_access("moved", da_type, Some(dir.path()), 64).unwrap();
            assert!(reopened.load_existing().unwrap());
            assert_eq!(reopened.get_int(4).unwrap(), 99);
            reopened.close();
            std::fs::remove_file(dir.path().join("moved")).unwrap();
        }
    }

    #[test]
    fn test_copy_to_is_independent() {
        let dir = TempDir::new().unwrap();
        let mut source = create_test_store(DaType::Ram, &dir, 32);
        source.create(100).unwrap();
        source.set_int(80, 1234).unwrap();
        source.set_header(3, 9).unwrap();

        let mut target = new_data_access("copy", DaType::Mmap, Some(dir.path()), 32).unwrap();
        target.create(10).unwrap();
        source.copy_to(target.as_mut()).unwrap();
        assert_eq!(target.get_int(80).unwrap(), 1234);
        assert_eq!(target.get_header(3).unwrap(), 9);

        target.set_int(80, 1).unwrap();
        assert_eq!(source.get_int(80).unwrap(), 1234);
    }

    #[test]
    fn test_create_twice_is_rejected() {
        let mut da = RamDataAccess::new("twice", 64).unwrap();
        da.create(10).unwrap();
        assert!(matches!(da.create(10), Err(Error::IllegalState(_))));
    }

    proptest! {
        #[test]
        fn prop_growth_never_corrupts(
            steps in proptest::collection::vec((0u64..4096, any::<i32>()), 1..40)
        ) {
            let mut da = RamDataAccess::new("grow", 16).unwrap();
            da.create(16).unwrap();
            let mut written: Vec<(u64, i32)> = Vec::new();
            for (grow_to, value) in steps {
                da.ensure_capacity(grow_to + 4).unwrap();
                let address = (grow_to / 4) * 4;
                da.set_int(address, value).unwrap();
                written.retain(|(a, _)| *a != address);
                written.push((address, value));
                for (a, v) in &written {
                    prop_assert_eq!(da.get_int(*a).unwrap(), *v);
                }
            }
        }
    }
}
