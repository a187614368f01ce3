//! Pillar-node geometry storage
//!
//! Geometries are appended to their own store and referenced from the edge
//! record by an index in 4-byte units; reference 0 means "no geometry".
//!
//! ```text
//! COUNT(4) | LAT(4) LON(4) [ELE(4)] | LAT(4) LON(4) [ELE(4)] | ...
//! ```
//!
//! A geometry that grows beyond its slot is appended anew and the old slot is
//! abandoned; compaction of the geometry store is not attempted.

use super::store::{degree_to_int, ele_to_int, int_to_degree, int_to_ele};
use crate::storage::DataAccess;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Version stamp of the geometry store
pub const GEOMETRY_VERSION: i32 = 2;

const H_VERSION: usize = 0;
const H_NEXT_REF: usize = 1;
const H_DIMENSION: usize = 2;

/// A point in degrees, with elevation in metres on 3D graphs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lon: f64,
    /// Elevation in metres
    pub ele: Option<f64>,
}

impl GeoPoint {
    /// 2D point
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon, ele: None }
    }

    /// 3D point
    pub fn with_ele(lat: f64, lon: f64, ele: f64) -> Self {
        Self {
            lat,
            lon,
            ele: Some(ele),
        }
    }
}

/// Which points `fetch_way_geometry` returns
///
/// Points come in traversal order: base tower node, pillars, adjacent tower
/// node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchMode {
    /// Include the base tower node
    pub base: bool,
    /// Include pillar nodes
    pub pillars: bool,
    /// Include the adjacent tower node
    pub adj: bool,
}

impl FetchMode {
    /// Only the two tower nodes
    pub const TOWER_ONLY: FetchMode = FetchMode {
        base: true,
        pillars: false,
        adj: true,
    };
    /// Only pillar nodes
    pub const PILLAR_ONLY: FetchMode = FetchMode {
        base: false,
        pillars: true,
        adj: false,
    };
    /// Base tower node followed by pillars
    pub const BASE_AND_PILLAR: FetchMode = FetchMode {
        base: true,
        pillars: true,
        adj: false,
    };
    /// Pillars followed by the adjacent tower node
    pub const PILLAR_AND_ADJ: FetchMode = FetchMode {
        base: false,
        pillars: true,
        adj: true,
    };
    /// The full way
    pub const ALL: FetchMode = FetchMode {
        base: true,
        pillars: true,
        adj: true,
    };
}

/// Append-only store of pillar geometries
pub(crate) struct GeometryStore {
    da: Box<dyn DataAccess>,
    elevation: bool,
    next_ref: u32,
}

impl GeometryStore {
    pub(crate) fn new(da: Box<dyn DataAccess>, elevation: bool) -> Self {
        Self {
            da,
            elevation,
            // slot 0 stays unused so that 0 can mean "none"
            next_ref: 1,
        }
    }

    fn ints_per_point(&self) -> u32 {
        if self.elevation { 3 } else { 2 }
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
        if version != GEOMETRY_VERSION {
            return Err(Error::version_mismatch(
                self.da.name(),
                GEOMETRY_VERSION as i64,
                version as i64,
            ));
        }
        let dimension = self.da.get_header(H_DIMENSION)?;
        if dimension != self.ints_per_point() as i32 {
            return Err(Error::invalid_config(format!(
                "geometry was stored with dimension {dimension}"
            )));
        }
        self.next_ref = self.da.get_header(H_NEXT_REF)? as u32;
        Ok(())
    }

    pub(crate) fn write_headers(&mut self) -> Result<()> {
        self.da.set_header(H_VERSION, GEOMETRY_VERSION)?;
        self.da.set_header(H_NEXT_REF, self.next_ref as i32)?;
        self.da.set_header(H_DIMENSION, self.ints_per_point() as i32)
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

    /// Bytes in use
    pub(crate) fn bytes_used(&self) -> u64 {
        self.next_ref as u64 * 4
    }

    fn encode(&self, points: &[GeoPoint]) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(4 + points.len() * 4 * self.ints_per_point() as usize);
        buf.extend_from_slice(&(points.len() as u32).to_le_bytes());
        for point in points {
            buf.extend_from_slice(&degree_to_int(point.lat, 90.0, "latitude")?.to_le_bytes());
            buf.extend_from_slice(&degree_to_int(point.lon, 180.0, "longitude")?.to_le_bytes());
            if self.elevation {
                let ele = ele_to_int(point.ele.unwrap_or(0.0))?;
                buf.extend_from_slice(&ele.to_le_bytes());
            } else if point.ele.is_some() {
                return Err(Error::invalid_argument("elevation given for a 2D graph"));
            }
        }
        Ok(buf)
    }

    /// Store `points` (in creation direction) and return the reference
    ///
    /// `existing` is reused when its slot can hold the new points.
    pub(crate) fn write(&mut self, existing: u32, points: &[GeoPoint]) -> Result<u32> {
        if points.is_empty() {
            return Ok(0);
        }
        let bytes = self.encode(points)?;
        if existing != 0 {
            let capacity = self.da.get_u32(existing as u64 * 4)? as usize;
            if capacity >= points.len() {
                self.da.set_bytes(existing as u64 * 4, &bytes)?;
                return Ok(existing);
            }
        }
        let ints = (bytes.len() / 4) as u64;
        let reference = self.next_ref;
        let end = reference as u64 + ints;
        if end > u32::MAX as u64 {
            return Err(Error::value_too_large("geometry store exceeds 16 GiB"));
        }
        self.da.ensure_capacity(end * 4)?;
        self.da.set_bytes(reference as u64 * 4, &bytes)?;
        self.next_ref = end as u32;
        Ok(reference)
    }

    /// Read the points of a reference (empty for 0)
    pub(crate) fn read(&self, reference: u32) -> Result<Vec<GeoPoint>> {
        if reference == 0 {
            return Ok(Vec::new());
        }
        let address = reference as u64 * 4;
        let count = self.da.get_u32(address)? as usize;
        let per_point = self.ints_per_point() as usize;
        let len = count as u64 * per_point as u64 * 4;
        if address + 4 + len > self.da.capacity() {
            return Err(Error::storage(format!(
                "geometry {reference} claims {count} points beyond the store end"
            )));
        }
        let mut raw = vec![0u8; len as usize];
        self.da.get_bytes(address + 4, &mut raw)?;
        let ints: Vec<i32> = raw
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(ints
            .chunks_exact(per_point)
            .map(|p| GeoPoint {
                lat: int_to_degree(p[0]),
                lon: int_to_degree(p[1]),
                ele: self.elevation.then(|| int_to_ele(p[2])),
            })
            .collect())
    }
}
