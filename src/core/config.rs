//! Planet configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::math::Ellipsoid;
use crate::tile::TilingScheme;

/// Tunables of the tile manager. Every field has a default, so a JSON file
/// only needs to list what it overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanetConfig {
    /// How the surface is cut into tiles
    pub tiling: TilingScheme,
    /// Reference ellipsoid
    pub ellipsoid: Ellipsoid,
    /// Deepest zoom level the tree may split to
    pub max_zoom: u8,
    /// Mesh segments per tile side (power of two)
    pub grid_size: u32,
    /// Split threshold in pixels; a node splits only when its error is strictly greater
    pub max_screen_space_error: f64,
    /// Consecutive frames all children must spend not rendering before they are pruned
    pub merge_hysteresis_frames: u32,
    /// In-flight imagery fetches
    pub imagery_max_concurrent: usize,
    /// In-flight terrain fetches
    pub terrain_max_concurrent: usize,
    /// Failed loads before a material or terrain gives up for good
    pub max_load_attempts: u32,
    /// First retry delay; doubled on each further failure
    pub retry_base_delay_ms: u64,
    /// Upper bound of the retry delay
    pub retry_max_delay_ms: u64,
    /// Orphaned textures kept for nodes that may come back
    pub texture_cache_capacity: usize,
    /// Skirt depth as a fraction of the tile's geometric size
    pub skirt_ratio: f64,
}

impl Default for PlanetConfig {
    fn default() -> Self {
        Self {
            tiling: TilingScheme::WebMercator,
            ellipsoid: Ellipsoid::WGS84,
            max_zoom: 19,
            grid_size: 32,
            max_screen_space_error: 2.0,
            merge_hysteresis_frames: 8,
            imagery_max_concurrent: 8,
            terrain_max_concurrent: 4,
            max_load_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
            texture_cache_capacity: 256,
            skirt_ratio: 0.05,
        }
    }
}

impl PlanetConfig {
    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PlanetConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from file (sync)
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Save to file (sync)
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.grid_size.is_power_of_two() || self.grid_size < 2 || self.grid_size > 256 {
            return Err(Error::Config(format!(
                "grid_size must be a power of two in 2..=256, got {}",
                self.grid_size
            )));
        }
        if self.max_zoom > 24 {
            return Err(Error::Config(format!("max_zoom {} exceeds 24", self.max_zoom)));
        }
        if self.imagery_max_concurrent == 0 || self.terrain_max_concurrent == 0 {
            return Err(Error::Config("concurrency limits must be at least 1".into()));
        }
        if self.max_load_attempts == 0 {
            return Err(Error::Config("max_load_attempts must be at least 1".into()));
        }
        if !(self.max_screen_space_error > 0.0) {
            return Err(Error::Config("max_screen_space_error must be positive".into()));
        }
        if self.ellipsoid.equatorial_radius <= 0.0 || self.ellipsoid.polar_radius <= 0.0 {
            return Err(Error::Config("ellipsoid radii must be positive".into()));
        }
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    /// log2 of `grid_size`
    pub fn grid_size_log2(&self) -> u32 {
        self.grid_size.trailing_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_valid() {
        let config = PlanetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.grid_size_log2(), 5);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PlanetConfig::from_json_str(
            r#"{ "tiling": "Geographic", "max_zoom": 12, "merge_hysteresis_frames": 3 }"#,
        ).expect("parse failed");
        assert_eq!(config.tiling, TilingScheme::Geographic);
        assert_eq!(config.max_zoom, 12);
        assert_eq!(config.merge_hysteresis_frames, 3);
        assert_eq!(config.grid_size, PlanetConfig::default().grid_size);
    }

    #[test]
    fn test_rejects_bad_grid_size() {
        let err = PlanetConfig::from_json_str(r#"{ "grid_size": 24 }"#);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("nested/planet.json");

        let config = PlanetConfig {
            max_zoom: 7,
            imagery_max_concurrent: 2,
            ..Default::default()
        };
        config.save(&path).expect("save failed");

        let loaded = PlanetConfig::load(&path).expect("load failed");
        assert_eq!(loaded, config);
    }
}
