//! Tile byte providers
//!
//! The tile manager only ever asks "give me the bytes of tile (x, y, z)".
//! Network transports, archives and generators plug in behind [`TileSource`].

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use crate::core::error::FetchError;
use crate::tile::TileAddress;

use super::disk_io;

/// Future returned by [`TileSource::fetch`]
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, FetchError>> + Send + 'static>>;

/// Asynchronous provider of encoded tile bytes.
///
/// `fetch` is called on the frame thread when a request is dispatched; the
/// returned future is driven on the loader's runtime.
pub trait TileSource: Send + Sync {
    fn fetch(&self, address: TileAddress) -> FetchFuture;

    /// Short name for log output
    fn name(&self) -> &str {
        "tiles"
    }
}

/// Tiles stored as files under a directory, e.g. `{z}/{x}/{y}.png`
#[derive(Clone, Debug)]
pub struct FileTileSource {
    root: PathBuf,
    template: String,
}

impl FileTileSource {
    /// # Arguments
    /// * `root` - Base directory
    /// * `template` - Relative path with `{z}`, `{x}` and `{y}` placeholders
    pub fn new(root: impl Into<PathBuf>, template: impl Into<String>) -> Self {
        Self { root: root.into(), template: template.into() }
    }

    pub fn path_for(&self, address: TileAddress) -> PathBuf {
        let relative = self
            .template
            .replace("{z}", &address.zoom.to_string())
            .replace("{x}", &address.x.to_string())
            .replace("{y}", &address.y.to_string());
        self.root.join(relative)
    }
}

impl TileSource for FileTileSource {
    fn fetch(&self, address: TileAddress) -> FetchFuture {
        let path = self.path_for(address);
        Box::pin(async move {
            tokio::fs::read(&path).await.map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => FetchError::NotFound(address),
                _ => FetchError::from(e),
            })
        })
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Wraps another source and keeps an LZ4-compressed copy of every tile it
/// returns under `cache_dir`.
pub struct DiskCacheSource {
    inner: Arc<dyn TileSource>,
    cache_dir: PathBuf,
}

impl DiskCacheSource {
    pub fn new(inner: Arc<dyn TileSource>, cache_dir: impl Into<PathBuf>) -> Self {
        Self { inner, cache_dir: cache_dir.into() }
    }
}

impl TileSource for DiskCacheSource {
    fn fetch(&self, address: TileAddress) -> FetchFuture {
        let inner = Arc::clone(&self.inner);
        let cache_dir = self.cache_dir.clone();
        Box::pin(async move {
            match disk_io::load_tile(&cache_dir, address).await {
                Ok(Some(bytes)) => return Ok(bytes),
                Ok(None) => {}
                Err(e) => log::warn!("Ignoring unreadable cache entry for {}: {}", address, e),
            }

            let bytes = inner.fetch(address).await?;
            if let Err(e) = disk_io::save_tile(&cache_dir, address, &bytes).await {
                log::warn!("Failed to cache tile {}: {}", address, e);
            }
            Ok(bytes)
        })
    }

    fn name(&self) -> &str {
        "disk-cache"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Counting {
        calls: AtomicUsize,
    }

    impl TileSource for Counting {
        fn fetch(&self, address: TileAddress) -> FetchFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(address.to_string().into_bytes()) })
        }
    }

    #[tokio::test]
    async fn test_file_source() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let source = FileTileSource::new(temp_dir.path(), "{z}/{x}/{y}.png");
        let addr = TileAddress::new(3, 1, 2);

        let path = source.path_for(addr);
        assert!(path.ends_with("2/3/1.png"));
        assert_eq!(source.fetch(addr).await, Err(FetchError::NotFound(addr)));

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"png").unwrap();
        assert_eq!(source.fetch(addr).await.unwrap(), b"png".to_vec());
    }

    #[tokio::test]
    async fn test_disk_cache_hits_inner_once() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let inner = Arc::new(Counting { calls: AtomicUsize::new(0) });
        let cached = DiskCacheSource::new(inner.clone(), temp_dir.path());
        let addr = TileAddress::new(0, 1, 1);

        assert_eq!(cached.fetch(addr).await.unwrap(), b"1/0/1".to_vec());
        assert_eq!(cached.fetch(addr).await.unwrap(), b"1/0/1".to_vec());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
