//! Error types for terrae

use thiserror::Error;

use crate::planet::LayerId;
use crate::render::GpuError;
use crate::tile::TileAddress;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tile address {0} is outside the tiling scheme")]
    InvalidAddress(TileAddress),

    #[error("Unknown layer {0:?}")]
    UnknownLayer(LayerId),
}

/// Failure of a single tile fetch or decode.
///
/// These never abort a frame: the owning segment or material records the
/// failure and keeps rendering its fallback.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("tile {0} is outside the provider's range")]
    OutOfRange(TileAddress),

    #[error("tile {0} not found")]
    NotFound(TileAddress),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl FetchError {
    /// Permanent failures are not retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, FetchError::OutOfRange(_) | FetchError::NotFound(_))
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::Io(e.to_string())
    }
}
