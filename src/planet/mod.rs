//! The planet: layers, terrain provider and the per-frame driver

pub mod layer;
pub mod globe;

pub use layer::{LayerDescriptor, LayerId, TerrainDescriptor};
pub use globe::{FrameStats, Planet};
