//! GPU capability consumed by the tile manager
//!
//! The tile manager never talks to a graphics API directly. It creates and
//! deletes opaque buffers through [`GpuBackend`] and hands [`DrawCommand`]s
//! to whoever owns the real renderer.
//!
//! [`DrawCommand`]: super::draw::DrawCommand

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::streaming::DecodedImage;
use crate::terrain::TerrainMesh;

/// Opaque texture handle issued by a [`GpuBackend`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Opaque vertex/index buffer pair issued by a [`GpuBackend`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeometryHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GpuError {
    /// Every handle is invalid; the owner must rebuild all GPU resources.
    #[error("GPU context lost")]
    ContextLost,

    #[error("GPU allocation failed: {0}")]
    Allocation(String),
}

/// Buffer and texture management on the rendering device.
pub trait GpuBackend {
    fn create_texture(&mut self, image: &DecodedImage) -> Result<TextureHandle, GpuError>;
    fn delete_texture(&mut self, handle: TextureHandle);
    fn create_geometry(&mut self, mesh: &TerrainMesh) -> Result<GeometryHandle, GpuError>;
    fn delete_geometry(&mut self, handle: GeometryHandle);
}

/// Bookkeeping of a [`HeadlessGpu`], shared so it can be inspected after the
/// backend has been handed to a planet.
#[derive(Debug, Default)]
pub struct GpuLedger {
    next_id: u64,
    pub live_textures: HashSet<TextureHandle>,
    pub live_geometry: HashSet<GeometryHandle>,
    pub textures_created: u64,
    pub textures_deleted: u64,
    pub geometry_created: u64,
    pub geometry_deleted: u64,
    /// Deletes of handles that were not live
    pub double_deletes: u64,
    pub texture_bytes: usize,
    lost: bool,
}

impl GpuLedger {
    /// Make every following create fail with [`GpuError::ContextLost`] and
    /// forget all live handles, like a real device reset.
    pub fn lose_context(&mut self) {
        self.lost = true;
        self.live_textures.clear();
        self.live_geometry.clear();
        self.texture_bytes = 0;
    }

    pub fn restore_context(&mut self) {
        self.lost = false;
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Backend without a device: hands out counters and records every call.
#[derive(Clone, Debug, Default)]
pub struct HeadlessGpu {
    ledger: Arc<Mutex<GpuLedger>>,
}

impl HeadlessGpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the shared ledger
    pub fn ledger(&self) -> MutexGuard<'_, GpuLedger> {
        // A poisoned ledger only means a test panicked mid-update; keep reading it.
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl GpuBackend for HeadlessGpu {
    fn create_texture(&mut self, image: &DecodedImage) -> Result<TextureHandle, GpuError> {
        let mut ledger = self.ledger();
        if ledger.lost {
            return Err(GpuError::ContextLost);
        }
        if image.width == 0 || image.height == 0 {
            return Err(GpuError::Allocation("zero-sized texture".into()));
        }
        let handle = TextureHandle(ledger.next());
        ledger.live_textures.insert(handle);
        ledger.textures_created += 1;
        ledger.texture_bytes += image.rgba.len();
        Ok(handle)
    }

    fn delete_texture(&mut self, handle: TextureHandle) {
        let mut ledger = self.ledger();
        if ledger.live_textures.remove(&handle) {
            ledger.textures_deleted += 1;
        } else if !ledger.lost {
            ledger.double_deletes += 1;
        }
    }

    fn create_geometry(&mut self, mesh: &TerrainMesh) -> Result<GeometryHandle, GpuError> {
        let mut ledger = self.ledger();
        if ledger.lost {
            return Err(GpuError::ContextLost);
        }
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return Err(GpuError::Allocation("empty mesh".into()));
        }
        let handle = GeometryHandle(ledger.next());
        ledger.live_geometry.insert(handle);
        ledger.geometry_created += 1;
        Ok(handle)
    }

    fn delete_geometry(&mut self, handle: GeometryHandle) {
        let mut ledger = self.ledger();
        if ledger.live_geometry.remove(&handle) {
            ledger.geometry_deleted += 1;
        } else if !ledger.lost {
            ledger.double_deletes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> DecodedImage {
        DecodedImage { width: 2, height: 2, rgba: vec![255; 16] }
    }

    #[test]
    fn test_create_delete() {
        let mut gpu = HeadlessGpu::new();
        let observer = gpu.clone();

        let t = gpu.create_texture(&image()).unwrap();
        assert_eq!(observer.ledger().live_textures.len(), 1);
        assert_eq!(observer.ledger().texture_bytes, 16);

        gpu.delete_texture(t);
        gpu.delete_texture(t);
        let ledger = observer.ledger();
        assert_eq!(ledger.textures_deleted, 1);
        assert_eq!(ledger.double_deletes, 1);
        assert!(ledger.live_textures.is_empty());
    }

    #[test]
    fn test_context_loss() {
        let mut gpu = HeadlessGpu::new();
        let t = gpu.create_texture(&image()).unwrap();

        gpu.ledger().lose_context();
        assert_eq!(gpu.create_texture(&image()), Err(GpuError::ContextLost));
        // Handles from the lost context are gone, deleting them is harmless
        gpu.delete_texture(t);
        assert_eq!(gpu.ledger().double_deletes, 0);

        gpu.ledger().restore_context();
        assert!(gpu.create_texture(&image()).is_ok());
    }
}
