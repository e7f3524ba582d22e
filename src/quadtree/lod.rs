//! Screen-space-error level of detail
//!
//! A tile is refined while the world-space error of its mesh, projected to
//! the screen, exceeds a pixel threshold. Each zoom level halves the error,
//! so the walk converges on the coarsest tiles whose error is sub-threshold.

use crate::core::camera::View;
use crate::math::Ellipsoid;
use crate::tile::{TileBounds, TilingScheme};

/// Outcome of the level-of-detail test for one node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LodDecision {
    /// Outside the view; nothing below it is drawn
    Cull,
    /// Detailed enough; draw this node
    Render,
    /// Too coarse; draw its children instead
    Refine,
}

/// Geometric error in meters of a tile mesh at `zoom`.
///
/// The spacing of the mesh lattice along the equator: one tile width divided
/// by the number of grid cells.
///
/// # Examples
/// ```
/// use terrae::math::Ellipsoid;
/// use terrae::quadtree::lod::geometric_error;
/// use terrae::tile::TilingScheme;
///
/// let e = Ellipsoid::WGS84;
/// let root = geometric_error(&TilingScheme::WebMercator, &e, 0, 32);
/// let child = geometric_error(&TilingScheme::WebMercator, &e, 1, 32);
/// assert!((root / child - 2.0).abs() < 1e-12);
/// ```
pub fn geometric_error(
    scheme: &TilingScheme,
    ellipsoid: &Ellipsoid,
    zoom: u8,
    grid_size: u32,
) -> f64 {
    ellipsoid.circumference() / (scheme.tiles_x(zoom) as f64 * grid_size as f64)
}

/// Decide how a node is drawn this frame.
///
/// # Arguments
/// * `view` - Viewer supplying culling and projection
/// * `bounds` - Bounding volume of the node
/// * `max_zoom` - Deepest zoom the tree may reach
/// * `error` - Geometric error of the node, see [`geometric_error`]
/// * `max_sse` - Largest acceptable screen-space error in pixels
///
/// Ties (`sse == max_sse`) render the node rather than refining it.
pub fn decide(
    view: &dyn View,
    bounds: &TileBounds,
    max_zoom: u8,
    error: f64,
    max_sse: f64,
) -> LodDecision {
    if !view.is_visible(bounds) {
        return LodDecision::Cull;
    }
    if bounds.address.zoom >= max_zoom || view.screen_space_error(bounds, error) <= max_sse {
        LodDecision::Render
    } else {
        LodDecision::Refine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DVec3;
    use crate::tile::TileAddress;

    /// Projects every error to a fixed multiple of itself.
    struct FixedView {
        visible: bool,
        pixels_per_meter: f64,
    }

    impl View for FixedView {
        fn eye(&self) -> DVec3 {
            DVec3::ZERO
        }

        fn is_visible(&self, _bounds: &TileBounds) -> bool {
            self.visible
        }

        fn screen_space_error(&self, _bounds: &TileBounds, geometric_error: f64) -> f64 {
            geometric_error * self.pixels_per_meter
        }
    }

    fn bounds(zoom: u8) -> TileBounds {
        let address = TileAddress::new(0, 0, zoom);
        TileBounds::compute(&TilingScheme::WebMercator, &Ellipsoid::WGS84, address, 0.0, 0.0)
    }

    #[test]
    fn test_geographic_root_is_half_world() {
        let e = Ellipsoid::WGS84;
        let merc = geometric_error(&TilingScheme::WebMercator, &e, 0, 16);
        let geo = geometric_error(&TilingScheme::Geographic, &e, 0, 16);
        assert!((merc / geo - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_decisions() {
        let b = bounds(2);
        let hidden = FixedView { visible: false, pixels_per_meter: 1.0 };
        assert_eq!(decide(&hidden, &b, 19, 10.0, 2.0), LodDecision::Cull);

        let view = FixedView { visible: true, pixels_per_meter: 0.5 };
        assert_eq!(decide(&view, &b, 19, 10.0, 2.0), LodDecision::Refine);
        // Exactly at the threshold does not split
        assert_eq!(decide(&view, &b, 19, 4.0, 2.0), LodDecision::Render);
        // Max zoom stops refinement regardless of error
        assert_eq!(decide(&view, &b, 2, 1000.0, 2.0), LodDecision::Render);
    }
}
