//! Neighbor lookup tables for terrain stitching
//!
//! Neighbors are a pure function of the tile address: a child either has its
//! neighbor inside the same parent (a sibling) or it is the mirrored child of
//! the parent's neighbor on that side. Three tables indexed by quadrant and
//! side encode this, so each lookup walks up at most until the first sibling
//! hit and never searches the tree geometrically.

use crate::tile::{Quadrant, Side, TileAddress, TilingScheme};

use Quadrant::{NE, NW, SE, SW};

/// Side facing each side, indexed by [`Side`].
pub const OPSIDE: [Side; 4] = [Side::S, Side::W, Side::N, Side::E];

/// Sibling adjacent to a quadrant on each side, `None` when the neighbor lies
/// outside the parent. Indexed `[quadrant][side]`.
#[rustfmt::skip]
pub const NEIGHBOUR: [[Option<Quadrant>; 4]; 4] = [
    //   N          E          S          W
    [None,      Some(NE), Some(SW), None],     // NW
    [None,      None,     Some(SE), Some(NW)], // NE
    [Some(NW),  Some(SE), None,     None],     // SW
    [Some(NE),  None,     None,     Some(SW)], // SE
];

/// Quadrant of the parent's neighbor that borders a child across a parent
/// edge: the child mirrored across that edge. Indexed `[quadrant][side]`.
#[rustfmt::skip]
pub const OPPART: [[Quadrant; 4]; 4] = [
    //  N   E   S   W
    [SW, NE, SW, NE], // NW
    [SE, NW, SE, NW], // NE
    [NW, SE, NW, SE], // SW
    [NE, SW, NE, SW], // SE
];

/// The two children of a tile touching each side, west/north first.
#[rustfmt::skip]
pub const SIDE_QUADRANTS: [[Quadrant; 2]; 4] = [
    [NW, NE], // N
    [NE, SE], // E
    [SW, SE], // S
    [NW, SW], // W
];

/// Address of the same-zoom tile across `side`, `None` past the poles.
///
/// East/west wrap around the antimeridian.
pub fn neighbor_address(
    scheme: &TilingScheme,
    address: TileAddress,
    side: Side,
) -> Option<TileAddress> {
    let (Some(parent), Some(quadrant)) = (address.parent(), address.quadrant()) else {
        return root_neighbor(scheme, address, side);
    };

    match NEIGHBOUR[quadrant.index()][side.index()] {
        Some(sibling) => Some(parent.child(sibling)),
        None => {
            let across = neighbor_address(scheme, parent, side)?;
            Some(across.child(OPPART[quadrant.index()][side.index()]))
        }
    }
}

fn root_neighbor(scheme: &TilingScheme, address: TileAddress, side: Side) -> Option<TileAddress> {
    let x = address.x as i64;
    match side {
        Side::N | Side::S => None,
        Side::E => Some(TileAddress::new(scheme.wrap_x(0, x + 1), address.y, 0)),
        Side::W => Some(TileAddress::new(scheme.wrap_x(0, x - 1), address.y, 0)),
    }
}

/// How the tile across a side is drawn this frame, from the point of view of
/// a rendering node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborRelation {
    /// Edge of the tiling (pole)
    Boundary,
    /// Neighbor renders at the same zoom
    Same,
    /// Neighbor is an ancestor-level tile this many levels shallower
    Coarser(u8),
    /// Neighbor is split; its children meet our edge
    Finer,
    /// Nothing is drawn across the edge (culled)
    Hidden,
}

impl NeighborRelation {
    /// log2 of the number of edge segments shared with the neighbor's lattice.
    ///
    /// A coarser neighbor `d` levels up covers our edge with `grid >> d`
    /// segments; every other relation keeps the full grid resolution.
    pub fn side_size_log2(self, grid_size_log2: u32) -> u32 {
        match self {
            NeighborRelation::Coarser(d) => grid_size_log2.saturating_sub(d as u32),
            _ => grid_size_log2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Neighbor by direct index arithmetic.
    fn ground_truth(scheme: &TilingScheme, a: TileAddress, side: Side) -> Option<TileAddress> {
        let (x, y) = (a.x as i64, a.y as i64);
        let ny = scheme.tiles_y(a.zoom) as i64;
        match side {
            Side::N if y == 0 => None,
            Side::S if y == ny - 1 => None,
            Side::N => Some(TileAddress::new(a.x, a.y - 1, a.zoom)),
            Side::S => Some(TileAddress::new(a.x, a.y + 1, a.zoom)),
            Side::E => Some(TileAddress::new(scheme.wrap_x(a.zoom, x + 1), a.y, a.zoom)),
            Side::W => Some(TileAddress::new(scheme.wrap_x(a.zoom, x - 1), a.y, a.zoom)),
        }
    }

    #[test]
    fn test_tables_are_consistent() {
        for q in Quadrant::ALL {
            for side in Side::ALL {
                if let Some(sibling) = NEIGHBOUR[q.index()][side.index()] {
                    // Looking back from the sibling lands on us
                    assert_eq!(NEIGHBOUR[sibling.index()][side.opposite().index()], Some(q));
                } else {
                    // Mirrored quadrant sits on the opposite edge of its own parent
                    let mirror = OPPART[q.index()][side.index()];
                    assert!(SIDE_QUADRANTS[side.opposite().index()].contains(&mirror));
                    assert!(SIDE_QUADRANTS[side.index()].contains(&q));
                }
            }
        }
        for side in Side::ALL {
            assert_eq!(side.opposite().opposite(), side);
        }
    }

    #[test]
    fn test_matches_index_arithmetic() {
        for scheme in [TilingScheme::WebMercator, TilingScheme::Geographic] {
            for zoom in 0..5u8 {
                for y in 0..scheme.tiles_y(zoom) {
                    for x in 0..scheme.tiles_x(zoom) {
                        let a = TileAddress::new(x, y, zoom);
                        for side in Side::ALL {
                            assert_eq!(
                                neighbor_address(&scheme, a, side),
                                ground_truth(&scheme, a, side),
                                "{a} side {side:?} in {scheme:?}"
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_antimeridian_wrap() {
        let scheme = TilingScheme::WebMercator;
        let a = TileAddress::new(0, 5, 3);
        assert_eq!(neighbor_address(&scheme, a, Side::W), Some(TileAddress::new(7, 5, 3)));
        let b = TileAddress::new(7, 5, 3);
        assert_eq!(neighbor_address(&scheme, b, Side::E), Some(a));
    }

    #[test]
    fn test_side_size_log2() {
        assert_eq!(NeighborRelation::Same.side_size_log2(5), 5);
        assert_eq!(NeighborRelation::Finer.side_size_log2(5), 5);
        assert_eq!(NeighborRelation::Coarser(2).side_size_log2(5), 3);
        assert_eq!(NeighborRelation::Coarser(9).side_size_log2(5), 0);
    }
}
