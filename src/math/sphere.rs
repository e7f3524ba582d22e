//! Bounding sphere used for tile culling and distance estimates

use super::aabb::Aabb;
use crate::core::types::DVec3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingSphere {
    pub center: DVec3,
    pub radius: f64,
}

impl BoundingSphere {
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Sphere around the AABB center that contains every point.
    pub fn from_points(points: &[DVec3]) -> Self {
        let center = Aabb::from_points(points.iter().copied()).center();
        let radius = points
            .iter()
            .map(|p| p.distance(center))
            .fold(0.0, f64::max);
        Self { center, radius }
    }

    /// Distance from a point to the sphere surface, zero inside.
    pub fn distance_to(&self, point: DVec3) -> f64 {
        (point.distance(self.center) - self.radius).max(0.0)
    }

    pub fn contains_point(&self, point: DVec3) -> bool {
        point.distance(self.center) <= self.radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_points_contains_all() {
        let points = [
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(-1.0, 0.0, 0.0),
            DVec3::new(0.0, 3.0, 0.0),
        ];
        let sphere = BoundingSphere::from_points(&points);
        for p in points {
            assert!(sphere.contains_point(p));
        }
    }

    #[test]
    fn test_distance_to() {
        let sphere = BoundingSphere::new(DVec3::ZERO, 2.0);
        assert_eq!(sphere.distance_to(DVec3::new(5.0, 0.0, 0.0)), 3.0);
        assert_eq!(sphere.distance_to(DVec3::new(1.0, 0.0, 0.0)), 0.0);
    }
}
