//! Reference ellipsoid and geodetic conversions

use serde::{Deserialize, Serialize};

use crate::core::types::DVec3;

/// Oblate ellipsoid of revolution, z axis through the north pole,
/// x axis through (lon 0, lat 0).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    /// Semi-major axis in meters
    pub equatorial_radius: f64,
    /// Semi-minor axis in meters
    pub polar_radius: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        equatorial_radius: 6_378_137.0,
        polar_radius: 6_356_752.314_245,
    };

    /// Unit sphere, handy for tests.
    pub const UNIT_SPHERE: Ellipsoid = Ellipsoid {
        equatorial_radius: 1.0,
        polar_radius: 1.0,
    };

    pub fn new(equatorial_radius: f64, polar_radius: f64) -> Self {
        Self { equatorial_radius, polar_radius }
    }

    /// First eccentricity squared
    pub fn eccentricity_sq(&self) -> f64 {
        let a = self.equatorial_radius;
        let b = self.polar_radius;
        1.0 - (b * b) / (a * a)
    }

    pub fn maximum_radius(&self) -> f64 {
        self.equatorial_radius.max(self.polar_radius)
    }

    /// Equatorial circumference in meters
    pub fn circumference(&self) -> f64 {
        2.0 * std::f64::consts::PI * self.equatorial_radius
    }

    /// Geodetic longitude/latitude (degrees) and height (meters) to cartesian.
    pub fn geodetic_to_cartesian(&self, lon: f64, lat: f64, height: f64) -> DVec3 {
        let (sin_lon, cos_lon) = lon.to_radians().sin_cos();
        let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
        let e2 = self.eccentricity_sq();
        let n = self.equatorial_radius / (1.0 - e2 * sin_lat * sin_lat).sqrt();

        DVec3::new(
            (n + height) * cos_lat * cos_lon,
            (n + height) * cos_lat * sin_lon,
            (n * (1.0 - e2) + height) * sin_lat,
        )
    }

    /// Outward surface normal at a geodetic position.
    pub fn geodetic_normal(&self, lon: f64, lat: f64) -> DVec3 {
        let (sin_lon, cos_lon) = lon.to_radians().sin_cos();
        let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
        DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat)
    }

    /// Local east/north/up frame at a geodetic position.
    pub fn east_north_up(&self, lon: f64, lat: f64) -> [DVec3; 3] {
        let (sin_lon, cos_lon) = lon.to_radians().sin_cos();
        let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
        let east = DVec3::new(-sin_lon, cos_lon, 0.0);
        let north = DVec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
        let up = DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat);
        [east, north, up]
    }
}

impl Default for Ellipsoid {
    fn default() -> Self {
        Self::WGS84
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equator_and_pole() {
        let e = Ellipsoid::WGS84;
        let p = e.geodetic_to_cartesian(0.0, 0.0, 0.0);
        assert!((p.x - e.equatorial_radius).abs() < 1e-6);
        assert!(p.y.abs() < 1e-6 && p.z.abs() < 1e-6);

        let pole = e.geodetic_to_cartesian(0.0, 90.0, 0.0);
        assert!((pole.z - e.polar_radius).abs() < 1e-3);
    }

    #[test]
    fn test_height_moves_along_normal() {
        let e = Ellipsoid::WGS84;
        let ground = e.geodetic_to_cartesian(30.0, 45.0, 0.0);
        let raised = e.geodetic_to_cartesian(30.0, 45.0, 1000.0);
        let n = e.geodetic_normal(30.0, 45.0);
        assert!(((raised - ground) - n * 1000.0).length() < 1e-6);
    }

    #[test]
    fn test_enu_orthonormal() {
        let [east, north, up] = Ellipsoid::WGS84.east_north_up(12.0, -33.0);
        assert!(east.dot(north).abs() < 1e-12);
        assert!(east.dot(up).abs() < 1e-12);
        assert!((east.cross(north) - up).length() < 1e-12);
    }
}
