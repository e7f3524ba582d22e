//! Noise-based procedural tiles
//!
//! Generates elevation and shaded imagery for any tile from fractal noise
//! sampled on the unit sphere, so tiles match across every edge and zoom.
//! Used by the demo and benchmarks in place of a real tile server.

use std::io::Cursor;
use std::sync::Arc;

use image::{ImageFormat, Rgba, RgbaImage};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use crate::core::error::FetchError;
use crate::streaming::{FetchFuture, TileSource};
use crate::tile::{TileAddress, TilingScheme};

use super::elevation::ElevationGrid;

/// Parameters controlling terrain generation
#[derive(Clone, Debug)]
pub struct TerrainParams {
    pub seed: u32,
    pub frequency: f64,    // Features per unit-sphere radian (larger = busier)
    pub height_scale: f32, // Peak height above sea level in meters
    pub octaves: u32,      // FBM octaves (detail levels)
    pub persistence: f32,  // FBM persistence (0.5 typical)
    pub lacunarity: f32,   // FBM lacunarity (2.0 typical)
    pub sea_level: f32,    // Height below which is "water"
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            frequency: 3.0,
            height_scale: 6000.0,
            octaves: 8,
            persistence: 0.5,
            lacunarity: 2.0,
            sea_level: 0.0,
        }
    }
}

/// Procedural terrain generator using fractal Brownian motion (FBM)
pub struct TerrainGenerator {
    params: TerrainParams,
    noise: Fbm<Perlin>,
}

impl TerrainGenerator {
    /// Create a new terrain generator with the given parameters
    pub fn new(params: TerrainParams) -> Self {
        let noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(params.persistence as f64)
            .set_lacunarity(params.lacunarity as f64);

        Self { params, noise }
    }

    /// Get terrain parameters
    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Terrain height in meters at a geodetic position (degrees)
    pub fn height_at(&self, lon: f64, lat: f64) -> f32 {
        let (sin_lon, cos_lon) = lon.to_radians().sin_cos();
        let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
        let f = self.params.frequency;
        let p = [cos_lat * cos_lon * f, cos_lat * sin_lon * f, sin_lat * f];

        // Noise in [-1, 1], scaled symmetric around sea level
        let noise_value = self.noise.get(p);
        self.params.sea_level + (noise_value * self.params.height_scale as f64) as f32
    }

    /// Heights for a tile, `samples` per side edge to edge
    pub fn elevation(
        &self,
        scheme: &TilingScheme,
        address: TileAddress,
        samples: usize,
    ) -> ElevationGrid {
        let samples = samples.max(2);
        let last = (samples - 1) as f64;
        let mut heights = Vec::with_capacity(samples * samples);
        for row in 0..samples {
            for col in 0..samples {
                let ll = scheme.grid_lonlat(&address, col as f64 / last, row as f64 / last);
                heights.push(self.height_at(ll.x, ll.y));
            }
        }
        let min = heights.iter().copied().fold(f32::INFINITY, f32::min);
        let max = heights.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        ElevationGrid { size: samples, heights, min, max, normals: None }
    }

    /// Hypsometric colour for a height
    pub fn color_at(&self, height: f32) -> Rgba<u8> {
        let rel = (height - self.params.sea_level) / self.params.height_scale;
        if rel < 0.0 {
            let depth = (-rel).min(1.0);
            let shade = 1.0 - depth;
            return Rgba([(20.0 * shade) as u8, (70.0 * shade) as u8 + 30, 160, 255]);
        }
        let stops: [(f32, [f32; 3]); 4] = [
            (0.0, [70.0, 130.0, 60.0]),
            (0.3, [150.0, 140.0, 80.0]),
            (0.6, [120.0, 100.0, 80.0]),
            (0.8, [245.0, 245.0, 250.0]),
        ];
        let mut color = stops[stops.len() - 1].1;
        for pair in stops.windows(2) {
            let ((h0, c0), (h1, c1)) = (pair[0], pair[1]);
            if rel < h1 {
                let t = ((rel - h0) / (h1 - h0)).clamp(0.0, 1.0);
                color = [0, 1, 2].map(|i| c0[i] + (c1[i] - c0[i]) * t);
                break;
            }
        }
        Rgba([color[0] as u8, color[1] as u8, color[2] as u8, 255])
    }

    /// PNG image of a tile, `size` pixels square
    pub fn imagery_png(
        &self,
        scheme: &TilingScheme,
        address: TileAddress,
        size: u32,
    ) -> Result<Vec<u8>, FetchError> {
        let grid = self.elevation(scheme, address, size as usize);
        let img =
            RgbaImage::from_fn(size, size, |x, y| self.color_at(grid.get(x as usize, y as usize)));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(bytes)
    }
}

/// What a [`ProceduralSource`] serves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProceduralKind {
    /// PNG tiles of `size` pixels
    Imagery { size: u32 },
    /// Raw `f32` grids of `samples` per side
    Elevation { samples: usize },
}

/// Tile source backed by a [`TerrainGenerator`]
#[derive(Clone)]
pub struct ProceduralSource {
    generator: Arc<TerrainGenerator>,
    scheme: TilingScheme,
    kind: ProceduralKind,
    max_zoom: u8,
}

impl ProceduralSource {
    pub fn new(
        generator: Arc<TerrainGenerator>,
        scheme: TilingScheme,
        kind: ProceduralKind,
        max_zoom: u8,
    ) -> Self {
        Self { generator, scheme, kind, max_zoom }
    }
}

impl TileSource for ProceduralSource {
    fn fetch(&self, address: TileAddress) -> FetchFuture {
        let generator = Arc::clone(&self.generator);
        let scheme = self.scheme;
        let kind = self.kind;
        let max_zoom = self.max_zoom;
        Box::pin(async move {
            if address.zoom > max_zoom || !scheme.is_valid(&address) {
                return Err(FetchError::OutOfRange(address));
            }
            match kind {
                ProceduralKind::Imagery { size } => generator.imagery_png(&scheme, address, size),
                ProceduralKind::Elevation { samples } => {
                    Ok(generator.elevation(&scheme, address, samples).to_raw_bytes())
                }
            }
        })
    }

    fn name(&self) -> &str {
        "procedural"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::DecodedImage;
    use crate::terrain::ElevationFormat;

    #[test]
    fn test_terrain_params_default() {
        let params = TerrainParams::default();
        assert_eq!(params.seed, 12345);
        assert_eq!(params.octaves, 8);
        assert_eq!(params.persistence, 0.5);
    }

    #[test]
    fn test_height_at_consistency() {
        let generator = TerrainGenerator::new(TerrainParams::default());
        let h1 = generator.height_at(12.5, 41.9);
        let h2 = generator.height_at(12.5, 41.9);
        assert_eq!(h1, h2);
        assert!(h1.abs() <= generator.params().height_scale * 2.0);
    }

    #[test]
    fn test_edges_match_between_tiles() {
        let generator = TerrainGenerator::new(TerrainParams::default());
        let scheme = TilingScheme::WebMercator;
        let west = generator.elevation(&scheme, TileAddress::new(4, 5, 4), 9);
        let east = generator.elevation(&scheme, TileAddress::new(5, 5, 4), 9);
        for row in 0..9 {
            assert!((west.get(8, row) - east.get(0, row)).abs() < 1e-3);
        }
    }

    #[tokio::test]
    async fn test_source_serves_decodable_tiles() {
        let generator = Arc::new(TerrainGenerator::new(TerrainParams::default()));
        let scheme = TilingScheme::Geographic;
        let addr = TileAddress::new(3, 1, 2);

        let kind = ProceduralKind::Imagery { size: 16 };
        let imagery = ProceduralSource::new(generator.clone(), scheme, kind, 10);
        let img = DecodedImage::decode(&imagery.fetch(addr).await.unwrap()).unwrap();
        assert_eq!((img.width, img.height), (16, 16));

        let kind = ProceduralKind::Elevation { samples: 5 };
        let terrain = ProceduralSource::new(generator, scheme, kind, 1);
        assert_eq!(terrain.fetch(addr).await, Err(FetchError::OutOfRange(addr)));
        let bytes = terrain.fetch(TileAddress::new(1, 0, 1)).await.unwrap();
        let grid = ElevationGrid::decode(&bytes, ElevationFormat::RawF32).unwrap();
        assert_eq!(grid.size, 5);
    }
}
