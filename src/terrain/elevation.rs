//! Elevation grids and their tile formats

use serde::{Deserialize, Serialize};

use crate::core::error::FetchError;

/// Encoding of elevation tiles served by a terrain provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElevationFormat {
    /// Little-endian `f32` samples of a square grid, row-major from the north-west corner
    #[default]
    RawF32,
    /// PNG, `height = R * 256 + G + B / 256 - 32768`
    Terrarium,
    /// PNG, `height = -10000 + (R * 65536 + G * 256 + B) * 0.1`
    MapboxRgb,
}

/// Square grid of heights in meters covering a tile edge to edge.
///
/// Sample `(0, 0)` is the north-west corner and `(size - 1, size - 1)` the
/// south-east corner, so neighboring grids share their border samples.
#[derive(Clone, Debug, PartialEq)]
pub struct ElevationGrid {
    pub size: usize,
    pub heights: Vec<f32>,
    pub min: f32,
    pub max: f32,
    /// Tangent-space (east, north, up) normals, one per sample
    pub normals: Option<Vec<[f32; 3]>>,
}

impl ElevationGrid {
    pub fn new(size: usize, heights: Vec<f32>) -> Result<Self, FetchError> {
        if size < 2 || heights.len() != size * size {
            return Err(FetchError::Decode(format!(
                "expected {size}x{size} heights, got {}",
                heights.len()
            )));
        }
        let (min, max) = heights
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &h| (lo.min(h), hi.max(h)));
        Ok(Self { size, heights, min, max, normals: None })
    }

    /// Grid of zeros
    pub fn flat(size: usize) -> Self {
        let size = size.max(2);
        Self { size, heights: vec![0.0; size * size], min: 0.0, max: 0.0, normals: None }
    }

    pub fn get(&self, col: usize, row: usize) -> f32 {
        self.heights[row * self.size + col]
    }

    /// Bilinear sample at fraction `(u, v)`, u west to east, v north to south.
    pub fn sample_bilinear(&self, u: f64, v: f64) -> f32 {
        let last = (self.size - 1) as f64;
        let fx = (u.clamp(0.0, 1.0) * last) as f32;
        let fy = (v.clamp(0.0, 1.0) * last) as f32;
        let x0 = (fx.floor() as usize).min(self.size - 2);
        let y0 = (fy.floor() as usize).min(self.size - 2);
        let tx = fx - x0 as f32;
        let ty = fy - y0 as f32;

        let h00 = self.get(x0, y0);
        let h10 = self.get(x0 + 1, y0);
        let h01 = self.get(x0, y0 + 1);
        let h11 = self.get(x0 + 1, y0 + 1);
        let top = h00 + (h10 - h00) * tx;
        let bottom = h01 + (h11 - h01) * tx;
        top + (bottom - top) * ty
    }

    /// Upsample the sub-rectangle `offset .. offset + scale` (fractions of this
    /// grid) into a new grid, e.g. the part of an ancestor's grid covering a
    /// descendant tile.
    pub fn sub_grid(&self, offset: [f64; 2], scale: f64, size: usize) -> Self {
        let size = size.max(2);
        let last = (size - 1) as f64;
        let mut heights = Vec::with_capacity(size * size);
        for row in 0..size {
            for col in 0..size {
                let u = offset[0] + col as f64 / last * scale;
                let v = offset[1] + row as f64 / last * scale;
                heights.push(self.sample_bilinear(u, v));
            }
        }
        let (min, max) = heights
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &h| (lo.min(h), hi.max(h)));
        Self { size, heights, min, max, normals: None }
    }

    /// Central-difference normals for a tile `width` x `height` meters across.
    pub fn compute_normals(&mut self, width: f64, height: f64) {
        let n = self.size;
        let dx = (width / (n - 1) as f64) as f32;
        let dy = (height / (n - 1) as f64) as f32;
        let mut normals = Vec::with_capacity(n * n);

        for row in 0..n {
            for col in 0..n {
                let west = self.get(col.saturating_sub(1), row);
                let east = self.get((col + 1).min(n - 1), row);
                let north = self.get(col, row.saturating_sub(1));
                let south = self.get(col, (row + 1).min(n - 1));
                let span_x = ((col + 1).min(n - 1) - col.saturating_sub(1)) as f32 * dx;
                let span_y = ((row + 1).min(n - 1) - row.saturating_sub(1)) as f32 * dy;

                let dh_de = (east - west) / span_x;
                let dh_dn = (north - south) / span_y;
                let len = (dh_de * dh_de + dh_dn * dh_dn + 1.0).sqrt();
                normals.push([-dh_de / len, -dh_dn / len, 1.0 / len]);
            }
        }
        self.normals = Some(normals);
    }

    /// Decode a fetched terrain tile.
    pub fn decode(bytes: &[u8], format: ElevationFormat) -> Result<Self, FetchError> {
        match format {
            ElevationFormat::RawF32 => Self::decode_raw(bytes),
            ElevationFormat::Terrarium => Self::decode_png(bytes, |r, g, b| {
                r * 256.0 + g + b / 256.0 - 32768.0
            }),
            ElevationFormat::MapboxRgb => Self::decode_png(bytes, |r, g, b| {
                -10000.0 + (r * 65536.0 + g * 256.0 + b) * 0.1
            }),
        }
    }

    fn decode_raw(bytes: &[u8]) -> Result<Self, FetchError> {
        if bytes.len() % 4 != 0 {
            return Err(FetchError::Decode(format!("raw grid of {} bytes", bytes.len())));
        }
        let heights: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let size = (heights.len() as f64).sqrt().round() as usize;
        Self::new(size, heights)
    }

    fn decode_png(bytes: &[u8], height: impl Fn(f32, f32, f32) -> f32) -> Result<Self, FetchError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| FetchError::Decode(e.to_string()))?
            .to_rgb8();
        if img.width() != img.height() {
            return Err(FetchError::Decode(format!(
                "terrain tile must be square, got {}x{}",
                img.width(),
                img.height()
            )));
        }
        let heights = img
            .pixels()
            .map(|p| height(p[0] as f32, p[1] as f32, p[2] as f32))
            .collect();
        Self::new(img.width() as usize, heights)
    }

    /// Encode as [`ElevationFormat::RawF32`].
    pub fn to_raw_bytes(&self) -> Vec<u8> {
        self.heights.iter().flat_map(|h| h.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn ramp(size: usize) -> ElevationGrid {
        // Height grows eastwards by 10 m per sample
        let heights = (0..size * size).map(|i| (i % size) as f32 * 10.0).collect();
        ElevationGrid::new(size, heights).unwrap()
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(ElevationGrid::new(3, vec![0.0; 8]).is_err());
        let g = ElevationGrid::new(2, vec![1.0, -2.0, 5.0, 0.0]).unwrap();
        assert_eq!((g.min, g.max), (-2.0, 5.0));
    }

    #[test]
    fn test_bilinear() {
        let g = ramp(5);
        assert_eq!(g.sample_bilinear(0.0, 0.0), 0.0);
        assert_eq!(g.sample_bilinear(1.0, 0.3), 40.0);
        assert!((g.sample_bilinear(0.5, 0.5) - 20.0).abs() < 1e-4);
        assert!((g.sample_bilinear(0.125, 1.0) - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_sub_grid_matches_parent() {
        let parent = ramp(9);
        // North-east quadrant
        let child = parent.sub_grid([0.5, 0.0], 0.5, 5);
        assert_eq!(child.size, 5);
        assert!((child.get(0, 0) - 40.0).abs() < 1e-4);
        assert!((child.get(4, 4) - 80.0).abs() < 1e-4);
        assert!((child.min - 40.0).abs() < 1e-4);
    }

    #[test]
    fn test_raw_roundtrip() {
        let g = ramp(4);
        let decoded = ElevationGrid::decode(&g.to_raw_bytes(), ElevationFormat::RawF32).unwrap();
        assert_eq!(decoded, g);
        assert!(ElevationGrid::decode(&[0u8; 7], ElevationFormat::RawF32).is_err());
    }

    #[test]
    fn test_terrarium_png() {
        // 128*256 + 0 + 0 - 32768 = 0, then +100 m via the green channel
        let img = RgbImage::from_fn(2, 2, |x, _| Rgb([128, (x * 100) as u8, 0]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();

        let g = ElevationGrid::decode(&bytes, ElevationFormat::Terrarium).unwrap();
        assert_eq!(g.heights, vec![0.0, 100.0, 0.0, 100.0]);
    }

    #[test]
    fn test_normals_tilt_downhill() {
        let mut g = ramp(5);
        g.compute_normals(40.0, 40.0);
        let normals = g.normals.as_ref().unwrap();
        // Slope rises eastwards at 45 degrees, so normals lean west
        let [e, n, u] = normals[2 * 5 + 2];
        assert!(e < 0.0);
        assert!(n.abs() < 1e-6);
        assert!((e.abs() - u).abs() < 1e-5);
    }
}
