//! Geographic extents in degrees

use serde::{Deserialize, Serialize};

use crate::core::types::DVec2;

/// Longitude/latitude rectangle in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Extent {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self { west, south, east, north }
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Center as (lon, lat)
    pub fn center(&self) -> DVec2 {
        DVec2::new((self.west + self.east) * 0.5, (self.south + self.north) * 0.5)
    }

    /// Inclusive on the west/north edges, exclusive on east/south, so a point
    /// on a shared edge belongs to exactly one tile.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.west && lon < self.east && lat <= self.north && lat > self.south
    }

    pub fn intersects(&self, other: &Extent) -> bool {
        self.west < other.east && self.east > other.west &&
        self.south < other.north && self.north > other.south
    }
}
