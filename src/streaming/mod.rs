//! Tile sources, bounded loading queues and the async loader

pub mod source;
pub mod disk_io;
pub mod decode;
pub mod request_queue;
pub mod loader;
pub mod cache;
pub mod retry;

pub use crate::core::error::FetchError;
pub use source::{DiskCacheSource, FetchFuture, FileTileSource, TileSource};
pub use disk_io::{
    compress_tile, decompress_tile,
    save_tile, load_tile, delete_tile,
    tile_path,
};
pub use decode::{DecodeJob, DecodedImage, Payload};
pub use request_queue::{LoadingQueue, ResourceKind, Ticket, TileRequest};
pub use loader::{LoadOutcome, Loader, LoaderStats};
pub use cache::{TextureCache, TextureKey};
pub use retry::RetryPolicy;
