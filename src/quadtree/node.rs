//! Quad-tree node

use crate::tile::{Side, TileAddress};

use super::neighbor::NeighborRelation;
use super::segment::Segment;

/// How a node took part in the last walk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderState {
    /// Not drawn: culled, or covered by a rendering ancestor
    NotRendering,
    /// Draws its own segment
    Rendering,
    /// Delegates drawing to its children
    WalkThrough,
}

/// Node of the tile tree.
///
/// Nodes live in the tree's arena keyed by address; `parent` and `children`
/// are addresses into it, so there is no owning pointer from child to parent.
#[derive(Debug)]
pub struct QuadNode {
    pub address: TileAddress,
    pub parent: Option<TileAddress>,
    /// Children in quadrant order, present after a split
    pub children: Option<[TileAddress; 4]>,
    pub state: RenderState,
    pub segment: Segment,
    /// Relation to the tile across each side, valid while rendering
    pub neighbors: [NeighborRelation; 4],
    /// Edge lattice size (log2) per side, derived from `neighbors`
    pub side_size_log2: [u32; 4],
    /// Consecutive frames the children have not been drawn
    pub idle_frames: u32,
}

impl QuadNode {
    pub fn new(segment: Segment, grid_size_log2: u32) -> Self {
        let address = segment.address;
        Self {
            address,
            parent: address.parent(),
            children: None,
            state: RenderState::NotRendering,
            segment,
            neighbors: [NeighborRelation::Hidden; 4],
            side_size_log2: [grid_size_log2; 4],
            idle_frames: 0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn is_rendering(&self) -> bool {
        self.state == RenderState::Rendering
    }

    pub fn neighbor(&self, side: Side) -> NeighborRelation {
        self.neighbors[side.index()]
    }
}
