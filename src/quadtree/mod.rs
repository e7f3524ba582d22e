//! Quad-tree of tiles: nodes, segments, materials and neighbor stitching

pub mod neighbor;
pub mod material;
pub mod segment;
pub mod node;
pub mod lod;
pub mod tree;

pub use neighbor::{neighbor_address, NeighborRelation, NEIGHBOUR, OPPART, OPSIDE, SIDE_QUADRANTS};
pub use material::{LoadTracker, Material, MaterialStatus, TextureBias};
pub use segment::{Segment, TerrainState};
pub use node::{QuadNode, RenderState};
pub use lod::{geometric_error, LodDecision};
pub use tree::{QuadTree, WalkStats};
