//! Tile addressing: (x, y, zoom), quadrants and sides

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a child tile inside its parent.
///
/// `y` grows southwards, so the north-west child has the smallest x and y.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Quadrant {
    NW = 0,
    NE = 1,
    SW = 2,
    SE = 3,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [Quadrant::NW, Quadrant::NE, Quadrant::SW, Quadrant::SE];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index & 3]
    }

    /// Column/row offset of this quadrant inside its parent.
    pub fn offset(self) -> (u32, u32) {
        PART_OFFSET[self.index()]
    }
}

/// Column/row offset of each quadrant, indexed by [`Quadrant`].
pub const PART_OFFSET: [(u32, u32); 4] = [(0, 0), (1, 0), (0, 1), (1, 1)];

/// One edge of a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    N = 0,
    E = 1,
    S = 2,
    W = 3,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::N, Side::E, Side::S, Side::W];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn opposite(self) -> Side {
        crate::quadtree::neighbor::OPSIDE[self.index()]
    }
}

/// Address of a tile in the quad-tree.
///
/// The address is the stable identity of a node: it never changes once the
/// node exists and is used as the key of the node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileAddress {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl TileAddress {
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }

    /// Parent address, `None` for level-zero tiles.
    pub fn parent(&self) -> Option<TileAddress> {
        if self.zoom == 0 {
            return None;
        }
        Some(TileAddress::new(self.x >> 1, self.y >> 1, self.zoom - 1))
    }

    /// Quadrant of this tile inside its parent, `None` for level-zero tiles.
    pub fn quadrant(&self) -> Option<Quadrant> {
        if self.zoom == 0 {
            return None;
        }
        Some(Quadrant::from_index(((self.y & 1) << 1 | (self.x & 1)) as usize))
    }

    pub fn child(&self, quadrant: Quadrant) -> TileAddress {
        let (dx, dy) = quadrant.offset();
        TileAddress::new(self.x * 2 + dx, self.y * 2 + dy, self.zoom + 1)
    }

    /// Children in [`Quadrant`] order.
    pub fn children(&self) -> [TileAddress; 4] {
        Quadrant::ALL.map(|q| self.child(q))
    }

    /// Ancestor (or self) at the given zoom level.
    pub fn ancestor_at(&self, zoom: u8) -> Option<TileAddress> {
        if zoom > self.zoom {
            return None;
        }
        let shift = self.zoom - zoom;
        Some(TileAddress::new(self.x >> shift, self.y >> shift, zoom))
    }

    /// True if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &TileAddress) -> bool {
        self.zoom < other.zoom && other.ancestor_at(self.zoom) == Some(*self)
    }

    /// Iterator over strict ancestors, nearest first.
    pub fn ancestors(self) -> impl Iterator<Item = TileAddress> {
        std::iter::successors(self.parent(), |a| a.parent())
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}
