//! Core type aliases and re-exports

pub use glam::{
    DVec2, DVec3, DVec4,
    DMat3, DMat4,
    DQuat,
    Vec2, Vec3,
};

/// Standard Result type for the crate
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;
