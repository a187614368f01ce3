//! Bounding box of all written node coordinates

use serde::{Deserialize, Serialize};

/// Geographic bounds, widened on every node write and never shrunk
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    /// Smallest longitude
    pub min_lon: f64,
    /// Largest longitude
    pub max_lon: f64,
    /// Smallest latitude
    pub min_lat: f64,
    /// Largest latitude
    pub max_lat: f64,
    /// Smallest elevation (3D graphs)
    pub min_ele: f64,
    /// Largest elevation (3D graphs)
    pub max_ele: f64,
    /// Whether elevation bounds are tracked
    pub elevation: bool,
}

impl BBox {
    /// A box containing nothing
    pub fn empty(elevation: bool) -> Self {
        Self {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
            min_ele: f64::INFINITY,
            max_ele: f64::NEG_INFINITY,
            elevation,
        }
    }

    /// Whether at least one point was added
    pub fn is_valid(&self) -> bool {
        self.min_lon <= self.max_lon && self.min_lat <= self.max_lat
    }

    /// Widen the box to contain a point
    pub fn extend(&mut self, lat: f64, lon: f64, ele: Option<f64>) {
        self.min_lat = self.min_lat.min(lat);
        self.max_lat = self.max_lat.max(lat);
        self.min_lon = self.min_lon.min(lon);
        self.max_lon = self.max_lon.max(lon);
        if let (true, Some(ele)) = (self.elevation, ele) {
            self.min_ele = self.min_ele.min(ele);
            self.max_ele = self.max_ele.max(ele);
        }
    }

    /// Whether a point lies inside the box (edges inclusive)
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_box() {
        let bbox = BBox::empty(false);
        assert!(!bbox.is_valid());
        assert!(!bbox.contains(0.0, 0.0));
    }

    #[test]
    fn test_extend() {
        let mut bbox = BBox::empty(true);
        bbox.extend(50.0, 10.0, Some(300.0));
        bbox.extend(49.0, 11.5, Some(120.0));
        assert!(bbox.is_valid());
        assert_eq!(bbox.min_lat, 49.0);
        assert_eq!(bbox.max_lat, 50.0);
        assert_eq!(bbox.min_lon, 10.0);
        assert_eq!(bbox.max_lon, 11.5);
        assert_eq!(bbox.min_ele, 120.0);
        assert_eq!(bbox.max_ele, 300.0);
        assert!(bbox.contains(49.5, 11.0));
        assert!(!bbox.contains(51.0, 11.0));
    }

    #[test]
    fn test_elevation_ignored_for_2d() {
        let mut bbox = BBox::empty(false);
        bbox.extend(1.0, 1.0, Some(5.0));
        assert_eq!(bbox.min_ele, f64::INFINITY);
    }
}
