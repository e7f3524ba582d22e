//! Elevation data, tile meshes and procedural terrain

pub mod elevation;
pub use elevation::{ElevationFormat, ElevationGrid};

pub mod mesh;
pub use mesh::{MeshParams, TerrainMesh, TerrainVertex};

pub mod generator;
pub use generator::{ProceduralKind, ProceduralSource, TerrainGenerator, TerrainParams};
