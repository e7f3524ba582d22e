//! On-disk tile cache I/O

use crate::tile::TileAddress;
use std::io;
use std::path::{Path, PathBuf};

/// Compress fetched tile bytes using LZ4
pub fn compress_tile(bytes: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(bytes)
}

/// Decompress cached tile bytes
pub fn decompress_tile(data: &[u8]) -> Result<Vec<u8>, io::Error> {
    lz4_flex::decompress_size_prepended(data).map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidData, format!("LZ4 decompression failed: {}", e))
    })
}

/// Get the cache file path for a tile
pub fn tile_path(base_dir: &Path, address: TileAddress) -> PathBuf {
    // One directory per zoom and column keeps directories small
    // Format: base_dir/{z}/{x}/{y}.lz4
    base_dir
        .join(address.zoom.to_string())
        .join(address.x.to_string())
        .join(format!("{}.lz4", address.y))
}

/// Save tile bytes to disk (compressed)
pub async fn save_tile(
    base_dir: &Path,
    address: TileAddress,
    bytes: &[u8],
) -> Result<(), io::Error> {
    let path = tile_path(base_dir, address);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::write(&path, compress_tile(bytes)).await?;
    Ok(())
}

/// Load tile bytes from disk (if cached)
pub async fn load_tile(
    base_dir: &Path,
    address: TileAddress,
) -> Result<Option<Vec<u8>>, io::Error> {
    let path = tile_path(base_dir, address);

    let compressed = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    Ok(Some(decompress_tile(&compressed)?))
}

/// Delete a cached tile
pub async fn delete_tile(base_dir: &Path, address: TileAddress) -> Result<(), io::Error> {
    match tokio::fs::remove_file(tile_path(base_dir, address)).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tile_path() {
        let path = tile_path(Path::new("/cache"), TileAddress::new(5, 9, 4));
        assert_eq!(path, PathBuf::from("/cache/4/5/9.lz4"));
    }

    #[test]
    fn test_compression() {
        let bytes = vec![7u8; 4096];
        let compressed = compress_tile(&bytes);
        assert!(compressed.len() < bytes.len());
        assert_eq!(decompress_tile(&compressed).unwrap(), bytes);
        assert!(decompress_tile(&[1, 2, 3]).is_err());
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let addr = TileAddress::new(1, 2, 3);

        assert_eq!(load_tile(temp_dir.path(), addr).await.unwrap(), None);

        save_tile(temp_dir.path(), addr, b"tile bytes").await.expect("Failed to save");
        let loaded = load_tile(temp_dir.path(), addr).await.expect("Failed to load");
        assert_eq!(loaded.as_deref(), Some(&b"tile bytes"[..]));

        delete_tile(temp_dir.path(), addr).await.expect("Failed to delete");
        delete_tile(temp_dir.path(), addr).await.expect("Second delete is a no-op");
        assert_eq!(load_tile(temp_dir.path(), addr).await.unwrap(), None);
    }
}
