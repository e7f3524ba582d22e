//! Tile decoders run on blocking worker threads
//!
//! Decoders receive the fetched bytes by value and return owned results;
//! they never see the tree.

use crate::core::error::FetchError;
use crate::terrain::{ElevationFormat, ElevationGrid};

/// RGBA8 image ready for upload
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl DecodedImage {
    /// Decode any format the `image` crate recognises.
    pub fn decode(bytes: &[u8]) -> Result<Self, FetchError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| FetchError::Decode(e.to_string()))?
            .to_rgba8();
        Ok(Self { width: img.width(), height: img.height(), rgba: img.into_raw() })
    }
}

/// How to turn fetched bytes into a payload
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DecodeJob {
    Image,
    Elevation {
        format: ElevationFormat,
        /// Tile size in meters (east-west, north-south) for normal computation
        tile_size: (f64, f64),
    },
}

/// Output of a decode
#[derive(Clone, Debug)]
pub enum Payload {
    Image(DecodedImage),
    Elevation(ElevationGrid),
}

impl DecodeJob {
    pub fn run(self, bytes: &[u8]) -> Result<Payload, FetchError> {
        match self {
            DecodeJob::Image => DecodedImage::decode(bytes).map(Payload::Image),
            DecodeJob::Elevation { format, tile_size } => {
                let mut grid = ElevationGrid::decode(bytes, format)?;
                grid.compute_normals(tile_size.0, tile_size.1);
                Ok(Payload::Elevation(grid))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    #[test]
    fn test_decode_png() {
        let img = RgbaImage::from_pixel(4, 2, Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();

        let Payload::Image(decoded) = DecodeJob::Image.run(&bytes).unwrap() else {
            panic!("expected image");
        };
        assert_eq!((decoded.width, decoded.height), (4, 2));
        assert_eq!(&decoded.rgba[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(DecodeJob::Image.run(b"not an image"), Err(FetchError::Decode(_))));
    }

    #[test]
    fn test_elevation_gets_normals() {
        let grid = ElevationGrid::flat(3);
        let job =
            DecodeJob::Elevation { format: ElevationFormat::RawF32, tile_size: (100.0, 100.0) };
        let Payload::Elevation(decoded) = job.run(&grid.to_raw_bytes()).unwrap() else {
            panic!("expected elevation");
        };
        assert_eq!(decoded.normals.as_ref().map(Vec::len), Some(9));
    }
}
