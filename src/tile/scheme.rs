//! Tiling schemes: which tiles exist at a zoom level and where they lie

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::address::TileAddress;
use super::extent::Extent;
use crate::core::types::DVec2;

/// Latitude limit of the square Web Mercator world.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// How the globe surface is cut into tiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TilingScheme {
    /// EPSG:3857, one root tile, `2^z x 2^z` tiles per level.
    #[default]
    WebMercator,
    /// EPSG:4326, two root tiles, `2^(z+1) x 2^z` tiles per level.
    Geographic,
}

impl TilingScheme {
    pub fn tiles_x(&self, zoom: u8) -> u32 {
        match self {
            TilingScheme::WebMercator => 1 << zoom,
            TilingScheme::Geographic => 2 << zoom,
        }
    }

    pub fn tiles_y(&self, zoom: u8) -> u32 {
        1 << zoom
    }

    /// Level-zero tiles, west to east.
    pub fn roots(&self) -> Vec<TileAddress> {
        (0..self.tiles_x(0)).map(|x| TileAddress::new(x, 0, 0)).collect()
    }

    pub fn is_valid(&self, address: &TileAddress) -> bool {
        address.zoom < 32
            && address.x < self.tiles_x(address.zoom)
            && address.y < self.tiles_y(address.zoom)
    }

    /// Wrap a column index around the antimeridian.
    pub fn wrap_x(&self, zoom: u8, x: i64) -> u32 {
        x.rem_euclid(self.tiles_x(zoom) as i64) as u32
    }

    /// Geographic extent of a tile in degrees.
    pub fn extent(&self, address: &TileAddress) -> Extent {
        let nw = self.grid_lonlat(address, 0.0, 0.0);
        let se = self.grid_lonlat(address, 1.0, 1.0);
        Extent::new(nw.x, se.y, se.x, nw.y)
    }

    /// Longitude/latitude of the point at fraction (u, v) across the tile,
    /// u west to east and v north to south. Points are spaced uniformly in
    /// the scheme's projected space so imagery maps linearly onto them.
    pub fn grid_lonlat(&self, address: &TileAddress, u: f64, v: f64) -> DVec2 {
        let fx = address.x as f64 + u;
        let fy = address.y as f64 + v;
        match self {
            TilingScheme::WebMercator => {
                let n = self.tiles_y(address.zoom) as f64;
                let lon = fx / n * 360.0 - 180.0;
                let lat = (PI * (1.0 - 2.0 * fy / n)).sinh().atan().to_degrees();
                DVec2::new(lon, lat)
            }
            TilingScheme::Geographic => {
                let size = 180.0 / self.tiles_y(address.zoom) as f64;
                DVec2::new(-180.0 + fx * size, 90.0 - fy * size)
            }
        }
    }

    /// Tile containing (lon, lat) at the given zoom, clamped to the scheme.
    pub fn tile_at(&self, lon: f64, lat: f64, zoom: u8) -> TileAddress {
        let nx = self.tiles_x(zoom);
        let ny = self.tiles_y(zoom);
        let (fx, fy) = match self {
            TilingScheme::WebMercator => {
                let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
                let fx = (lon + 180.0) / 360.0;
                let fy = (1.0 - lat.tan().asinh() / PI) / 2.0;
                (fx, fy)
            }
            TilingScheme::Geographic => ((lon + 180.0) / 360.0, (90.0 - lat) / 180.0),
        };
        let x = self.wrap_x(zoom, (fx * nx as f64).floor() as i64);
        let y = ((fy * ny as f64).floor().max(0.0) as u32).min(ny - 1);
        TileAddress::new(x, y, zoom)
    }
}
