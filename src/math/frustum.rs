//! View frustum for culling

use crate::core::types::{DVec3, DVec4, DMat4};
use super::sphere::BoundingSphere;

/// A plane defined by normal and distance from origin
#[derive(Clone, Copy, Debug)]
pub struct Plane {
    pub normal: DVec3,
    pub distance: f64,
}

impl Plane {
    pub fn new(normal: DVec3, distance: f64) -> Self {
        Self { normal, distance }
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.distance
    }
}

/// View frustum with 6 planes (Near, Far, Left, Right, Top, Bottom)
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract frustum planes from view-projection matrix
    pub fn from_view_projection(vp: &DMat4) -> Self {
        let m = vp.to_cols_array_2d();
        let row = |r: usize| DVec4::new(m[0][r], m[1][r], m[2][r], m[3][r]);
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        Self {
            planes: [
                Self::normalize_plane(r3 + r2), // near
                Self::normalize_plane(r3 - r2), // far
                Self::normalize_plane(r3 + r0), // left
                Self::normalize_plane(r3 - r0), // right
                Self::normalize_plane(r3 - r1), // top
                Self::normalize_plane(r3 + r1), // bottom
            ],
        }
    }

    fn normalize_plane(plane: DVec4) -> Plane {
        let normal = plane.truncate();
        let len = normal.length();
        Plane {
            normal: normal / len,
            distance: plane.w / len,
        }
    }

    /// Check if point is inside frustum
    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes.iter().all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    /// Conservative sphere test: false only if the sphere is fully outside one plane.
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(sphere.center) >= -sphere.radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frustum() -> Frustum {
        let proj = DMat4::perspective_rh(60f64.to_radians(), 1.0, 0.1, 100.0);
        let view = DMat4::look_at_rh(DVec3::new(0.0, 0.0, 5.0), DVec3::ZERO, DVec3::Y);
        Frustum::from_view_projection(&(proj * view))
    }

    #[test]
    fn test_plane_distance() {
        let plane = Plane::new(DVec3::Y, 0.0);
        assert_eq!(plane.distance_to_point(DVec3::new(0.0, 5.0, 0.0)), 5.0);
        assert_eq!(plane.distance_to_point(DVec3::new(0.0, -3.0, 0.0)), -3.0);
    }

    #[test]
    fn test_frustum_contains_point() {
        let frustum = test_frustum();
        assert!(frustum.contains_point(DVec3::ZERO));
        // Behind the camera
        assert!(!frustum.contains_point(DVec3::new(0.0, 0.0, 10.0)));
    }

    #[test]
    fn test_sphere_culling() {
        let frustum = test_frustum();
        assert!(frustum.intersects_sphere(&BoundingSphere::new(DVec3::ZERO, 1.0)));
        // Far off to the side
        assert!(!frustum.intersects_sphere(&BoundingSphere::new(DVec3::new(50.0, 0.0, 0.0), 1.0)));
        // Straddling the left plane
        assert!(frustum.intersects_sphere(&BoundingSphere::new(DVec3::new(-4.0, 0.0, 0.0), 2.0)));
    }
}
