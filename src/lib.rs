//! Terrae - quad-tree tile manager for streamed virtual globes

pub mod core;
pub mod math;
pub mod tile;
pub mod quadtree;
pub mod terrain;
pub mod streaming;
pub mod render;
pub mod planet;
