//! Persisted store header and whole-file segment I/O
//!
//! The header is a fixed 100-byte block at the start of every store file. It
//! is written once per flush and read before any payload is mapped.

use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Size of the header region in bytes
pub const HEADER_SIZE: usize = 100;

/// Number of free `i32` metadata slots in the header
pub const HEADER_SLOTS: usize = 20;

/// Layout version of the store file itself
pub const STORE_FORMAT_VERSION: u32 = 1;

/// "WGDA" in native byte order; a foreign-endian file fails the magic check
const MAGIC: u32 = u32::from_ne_bytes(*b"WGDA");

/// On-disk header (100 bytes, native byte order)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RawHeader {
    magic: u32,
    format_version: u32,
    capacity_lo: u32,
    capacity_hi: u32,
    segment_size: u32,
    slots: [i32; HEADER_SLOTS],
}

const _: () = assert!(std::mem::size_of::<RawHeader>() == HEADER_SIZE);

/// Decoded header contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoreHeader {
    pub(crate) capacity: u64,
    pub(crate) segment_size: u32,
    pub(crate) slots: [i32; HEADER_SLOTS],
}

impl StoreHeader {
    pub(crate) fn encode(&self) -> [u8; HEADER_SIZE] {
        let raw = RawHeader {
            magic: MAGIC,
            format_version: STORE_FORMAT_VERSION,
            capacity_lo: self.capacity as u32,
            capacity_hi: (self.capacity >> 32) as u32,
            segment_size: self.segment_size,
            slots: self.slots,
        };
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(bytemuck::bytes_of(&raw));
        out
    }

    pub(crate) fn decode(name: &str, bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let raw = bytemuck::pod_read_unaligned::<RawHeader>(bytes);
        if raw.magic != MAGIC {
            return Err(Error::storage(format!(
                "'{name}' is not a store file (bad magic {:#010x})",
                raw.magic
            )));
        }
        if raw.format_version != STORE_FORMAT_VERSION {
            return Err(Error::version_mismatch(
                name,
                STORE_FORMAT_VERSION as i64,
                raw.format_version as i64,
            ));
        }
        let capacity = (raw.capacity_hi as u64) << 32 | raw.capacity_lo as u64;
        if raw.segment_size < 2
            || !raw.segment_size.is_power_of_two()
            || capacity % raw.segment_size as u64 != 0
        {
            return Err(Error::storage(format!(
                "'{name}' has a corrupt header: capacity {capacity}, segment size {}",
                raw.segment_size
            )));
        }
        Ok(Self {
            capacity,
            segment_size: raw.segment_size,
            slots: raw.slots,
        })
    }
}

/// Write header and all segments to `path`, replacing any previous content
pub(crate) fn write_store_file<S: AsRef<[u8]>>(
    path: &Path,
    header: &StoreHeader,
    segments: &[S],
) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&header.encode())?;
    for segment in segments {
        writer.write_all(segment.as_ref())?;
    }
    let file = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

/// Open a persisted store and read its header
///
/// Returns `None` if the file is missing or empty. The reader is positioned at
/// the first payload byte.
pub(crate) fn open_store_file(
    name: &str,
    path: &Path,
) -> Result<Option<(StoreHeader, BufReader<File>)>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(None);
    }
    if len < HEADER_SIZE as u64 {
        return Err(Error::storage(format!(
            "'{name}' is truncated: {len} bytes, header needs {HEADER_SIZE}"
        )));
    }
    let mut reader = BufReader::new(file);
    let mut buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut buf)?;
    let header = StoreHeader::decode(name, &buf)?;
    if len < HEADER_SIZE as u64 + header.capacity {
        return Err(Error::storage(format!(
            "'{name}' is truncated: header claims {} payload bytes, file has {}",
            header.capacity,
            len - HEADER_SIZE as u64
        )));
    }
    Ok(Some((header, reader)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_header() -> StoreHeader {
        let mut slots = [0; HEADER_SLOTS];
        slots[0] = 3;
        slots[19] = -5;
        StoreHeader {
            capacity: 256,
            segment_size: 128,
            slots,
        }
    }

    #[test]
    fn test_header_size() {
        assert_eq!(std::mem::size_of::<RawHeader>(), 100);
    }

    #[test]
    fn test_encode_decode() {
        let header = sample_header();
        let bytes = header.encode();
        assert_eq!(StoreHeader::decode("h", &bytes).unwrap(), header);
    }

    #[test]
    fn test_large_capacity_survives() {
        let mut header = sample_header();
        header.capacity = 6 * (1 << 32);
        let decoded = StoreHeader::decode("h", &header.encode()).unwrap();
        assert_eq!(decoded.capacity, 6 * (1 << 32));
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = sample_header().encode();
        bytes[4..8].copy_from_slice(&(STORE_FORMAT_VERSION + 1).to_ne_bytes());
        let err = StoreHeader::decode("h", &bytes).unwrap_err();
        assert!(matches!(err, Error::VersionMismatch { .. }));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample_header().encode();
        bytes[0] = b'X';
        assert!(matches!(
            StoreHeader::decode("h", &bytes),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let segments = vec![vec![1u8; 128], vec![2u8; 128]];
        write_store_file(&path, &sample_header(), &segments).unwrap();

        let (header, mut reader) = open_store_file("store", &path).unwrap().unwrap();
        assert_eq!(header, sample_header());
        let mut payload = Vec::new();
        reader.read_to_end(&mut payload).unwrap();
        assert_eq!(payload.len(), 256);
        assert_eq!(payload[127], 1);
        assert_eq!(payload[128], 2);
    }

    #[test]
    fn test_missing_and_empty_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("none");
        assert!(open_store_file("none", &path).unwrap().is_none());
        std::fs::write(&path, b"").unwrap();
        assert!(open_store_file("none", &path).unwrap().is_none());
        std::fs::write(&path, b"short").unwrap();
        assert!(open_store_file("none", &path).is_err());
    }
}
