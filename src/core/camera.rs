//! Camera and the view capability consumed by the tile walk

use crate::core::types::{DMat3, DMat4, DQuat, DVec3};
use crate::math::Frustum;
use crate::tile::TileBounds;

/// What the quad-tree needs to know about the viewer.
///
/// Implemented by [`Camera`]; tests and embedders can supply their own.
pub trait View {
    /// Viewer position in world (ECEF) coordinates.
    fn eye(&self) -> DVec3;

    /// False only if the tile is certainly outside the view.
    fn is_visible(&self, bounds: &TileBounds) -> bool;

    /// Projected size in pixels of a world-space error at the tile's distance.
    fn screen_space_error(&self, bounds: &TileBounds, geometric_error: f64) -> f64;
}

/// Perspective camera in double precision world space
#[derive(Clone, Debug)]
pub struct Camera {
    /// World position
    pub position: DVec3,
    /// Rotation as quaternion
    pub rotation: DQuat,
    /// Vertical field of view in radians
    pub fov_y: f64,
    /// Aspect ratio (width / height)
    pub aspect: f64,
    /// Near clip plane
    pub near: f64,
    /// Far clip plane
    pub far: f64,
    /// Viewport height in pixels, used for screen-space error
    pub viewport_height: f64,
}

impl Camera {
    /// Create a new camera
    pub fn new(position: DVec3, fov_y_degrees: f64, aspect: f64) -> Self {
        Self {
            position,
            rotation: DQuat::IDENTITY,
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near: 1.0,
            far: 1.0e8,
            viewport_height: 1080.0,
        }
    }

    /// Create camera looking at a target
    pub fn look_at(position: DVec3, target: DVec3, up: DVec3) -> Self {
        let mut camera = Self::new(position, 60.0, 16.0 / 9.0);
        camera.point_at(target, up);
        camera
    }

    /// Re-aim the camera without moving it
    pub fn point_at(&mut self, target: DVec3, up: DVec3) {
        let forward = (target - self.position).normalize();
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);
        self.rotation = DQuat::from_mat3(&DMat3::from_cols(right, up, -forward));
    }

    /// Get view matrix (world to camera space)
    pub fn view_matrix(&self) -> DMat4 {
        let rotation_matrix = DMat4::from_quat(self.rotation.conjugate());
        let translation_matrix = DMat4::from_translation(-self.position);
        rotation_matrix * translation_matrix
    }

    /// Get projection matrix (camera to clip space)
    pub fn projection_matrix(&self) -> DMat4 {
        DMat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Get combined view-projection matrix
    pub fn view_projection(&self) -> DMat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection())
    }

    /// Get forward direction (negative Z in camera space)
    pub fn forward(&self) -> DVec3 {
        self.rotation * -DVec3::Z
    }

    /// Update aspect ratio and viewport height (call on window resize)
    pub fn set_viewport(&mut self, width: f64, height: f64) {
        self.aspect = width / height;
        self.viewport_height = height;
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(DVec3::new(0.0, 0.0, 5.0), 60.0, 16.0 / 9.0)
    }
}

impl View for Camera {
    fn eye(&self) -> DVec3 {
        self.position
    }

    fn is_visible(&self, bounds: &TileBounds) -> bool {
        self.frustum().intersects_sphere(&bounds.sphere)
    }

    fn screen_space_error(&self, bounds: &TileBounds, geometric_error: f64) -> f64 {
        let distance = bounds.distance_to(self.position).max(self.near);
        geometric_error * self.viewport_height / (2.0 * distance * (self.fov_y * 0.5).tan())
    }
}
