//! Extent and tile math: addresses, tiling schemes and tile bounds

pub mod address;
pub mod extent;
pub mod scheme;
pub mod bounds;

pub use address::{TileAddress, Quadrant, Side, PART_OFFSET};
pub use extent::Extent;
pub use scheme::{TilingScheme, MAX_MERCATOR_LAT};
pub use bounds::TileBounds;
