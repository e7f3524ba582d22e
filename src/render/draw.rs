//! Draw list handed to the renderer each frame

use crate::core::types::DVec3;
use crate::planet::LayerId;
use crate::quadtree::TextureBias;
use crate::tile::TileAddress;

use super::backend::{GeometryHandle, TextureHandle};

/// One imagery layer to blend onto a tile
#[derive(Clone, Debug, PartialEq)]
pub struct LayerDraw {
    pub layer: LayerId,
    pub texture: TextureHandle,
    /// Sub-rectangle of `texture` covering this tile
    pub bias: TextureBias,
    pub opacity: f32,
    /// Tile the texture was loaded for; differs from the drawn tile while an
    /// ancestor stands in.
    pub source: TileAddress,
}

/// One tile draw call
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCommand {
    pub address: TileAddress,
    pub geometry: GeometryHandle,
    /// Mesh vertices are relative to this point
    pub center: DVec3,
    /// Bottom-most layer first
    pub layers: Vec<LayerDraw>,
}

impl DrawCommand {
    /// True if any layer is drawn from an ancestor texture
    pub fn uses_fallback(&self) -> bool {
        self.layers.iter().any(|l| l.source != self.address)
    }
}
