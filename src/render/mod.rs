//! GPU capability and draw list

pub mod backend;
pub mod draw;

pub use backend::{GeometryHandle, GpuBackend, GpuError, GpuLedger, HeadlessGpu, TextureHandle};
pub use draw::{DrawCommand, LayerDraw};
