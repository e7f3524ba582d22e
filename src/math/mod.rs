//! Mathematical utilities: bounds, culling and the reference ellipsoid

pub mod aabb;
pub mod sphere;
pub mod frustum;
pub mod ellipsoid;

pub use aabb::Aabb;
pub use sphere::BoundingSphere;
pub use frustum::{Plane, Frustum};
pub use ellipsoid::Ellipsoid;
