//! Imagery layers and the terrain provider

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::streaming::TileSource;
use crate::terrain::ElevationFormat;

/// Handle of an imagery layer, unique for the planet's lifetime
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub u32);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// Imagery layer as supplied by the embedder
#[derive(Clone)]
pub struct LayerDescriptor {
    pub name: String,
    pub source: Arc<dyn TileSource>,
    /// Below this zoom the layer is not drawn
    pub min_zoom: u8,
    /// Deepest zoom the provider serves; deeper tiles use its texture
    pub max_zoom: u8,
    pub opacity: f32,
    pub visible: bool,
}

impl LayerDescriptor {
    pub fn new(name: impl Into<String>, source: Arc<dyn TileSource>) -> Self {
        Self {
            name: name.into(),
            source,
            min_zoom: 0,
            max_zoom: 19,
            opacity: 1.0,
            visible: true,
        }
    }

    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom.max(min_zoom);
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }
}

impl fmt::Debug for LayerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerDescriptor")
            .field("name", &self.name)
            .field("source", &self.source.name())
            .field("min_zoom", &self.min_zoom)
            .field("max_zoom", &self.max_zoom)
            .field("opacity", &self.opacity)
            .field("visible", &self.visible)
            .finish()
    }
}

/// Elevation provider
#[derive(Clone)]
pub struct TerrainDescriptor {
    pub source: Arc<dyn TileSource>,
    pub format: ElevationFormat,
    /// Shallower tiles are flat plates
    pub min_zoom: u8,
    /// Deeper tiles upsample the grid of their ancestor at this zoom
    pub max_zoom: u8,
}

impl TerrainDescriptor {
    pub fn new(source: Arc<dyn TileSource>, format: ElevationFormat) -> Self {
        Self { source, format, min_zoom: 0, max_zoom: 15 }
    }

    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom.max(min_zoom);
        self
    }
}

impl fmt::Debug for TerrainDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerrainDescriptor")
            .field("source", &self.source.name())
            .field("format", &self.format)
            .field("min_zoom", &self.min_zoom)
            .field("max_zoom", &self.max_zoom)
            .finish()
    }
}

/// Registered layer
#[derive(Debug, Clone)]
pub(crate) struct Layer {
    pub id: LayerId,
    pub desc: LayerDescriptor,
    /// Bumped by invalidation; materials loaded at an older version reload
    pub version: u64,
}

impl Layer {
    /// Zoom of the tile whose texture a node at `zoom` displays.
    pub fn source_zoom(&self, zoom: u8) -> u8 {
        zoom.min(self.desc.max_zoom)
    }

    pub fn is_drawn_at(&self, zoom: u8) -> bool {
        self.desc.visible && zoom >= self.desc.min_zoom
    }
}
