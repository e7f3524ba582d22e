//! Bounding volume of a tile, handed to the camera for culling and error metrics

use super::address::TileAddress;
use super::extent::Extent;
use super::scheme::TilingScheme;
use crate::core::types::DVec3;
use crate::math::{BoundingSphere, Ellipsoid};

/// Samples per side used to fit the bounding sphere.
const BOUNDS_SAMPLES: usize = 5;

/// Bounding volume of one tile surface patch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileBounds {
    pub address: TileAddress,
    pub extent: Extent,
    pub sphere: BoundingSphere,
    pub min_height: f64,
    pub max_height: f64,
}

impl TileBounds {
    /// Fit a bounding sphere around the tile surface between two heights.
    pub fn compute(
        scheme: &TilingScheme,
        ellipsoid: &Ellipsoid,
        address: TileAddress,
        min_height: f64,
        max_height: f64,
    ) -> Self {
        let extent = scheme.extent(&address);
        let mut points = Vec::with_capacity(BOUNDS_SAMPLES * BOUNDS_SAMPLES * 2);
        let step = 1.0 / (BOUNDS_SAMPLES - 1) as f64;

        for i in 0..BOUNDS_SAMPLES {
            for j in 0..BOUNDS_SAMPLES {
                let ll = scheme.grid_lonlat(&address, j as f64 * step, i as f64 * step);
                points.push(ellipsoid.geodetic_to_cartesian(ll.x, ll.y, min_height));
                points.push(ellipsoid.geodetic_to_cartesian(ll.x, ll.y, max_height));
            }
        }

        let mut sphere = BoundingSphere::from_points(&points);

        // The surface bulges between samples; pad by the sagitta of the
        // widest sample interval.
        let span = extent.width().max(extent.height()).to_radians() * step;
        let sagitta =
            (ellipsoid.maximum_radius() + max_height.max(0.0)) * (1.0 - (span * 0.5).cos());
        sphere.radius += sagitta;

        Self { address, extent, sphere, min_height, max_height }
    }

    /// Distance from a point to the bounding sphere surface.
    pub fn distance_to(&self, point: DVec3) -> f64 {
        self.sphere.distance_to(point)
    }
}
