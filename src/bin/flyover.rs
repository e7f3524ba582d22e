//! Headless flyover - descends from orbit to street level and logs what the
//! tile manager does every frame.
//!
//! Usage: cargo run --release --bin flyover -- [OPTIONS]
//!
//! Options:
//!   --lon <DEG>        Target longitude (default: 7.65)
//!   --lat <DEG>        Target latitude (default: 45.97)
//!   --frames <N>       Frames of descent (default: 120)
//!   --config <FILE>    Planet config JSON (default: built-in defaults)
//!   --tiles <DIR>      Imagery from `<DIR>/{z}/{x}/{y}.png` instead of noise
//!   --cache <DIR>      Keep fetched imagery in an lz4 disk cache
//!   --seed <SEED>      Noise seed for procedural tiles (default: 12345)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use terrae::core::types::Result;
use terrae::core::{Camera, PlanetConfig};
use terrae::planet::{LayerDescriptor, Planet, TerrainDescriptor};
use terrae::render::HeadlessGpu;
use terrae::streaming::{DiskCacheSource, FileTileSource, TileSource};
use terrae::terrain::{
    ElevationFormat, ProceduralKind, ProceduralSource, TerrainGenerator, TerrainParams,
};

const START_ALTITUDE: f64 = 2.0e7;
const END_ALTITUDE: f64 = 200.0;

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let args: Vec<String> = std::env::args().collect();
    let lon = parse_f64_arg(&args, "--lon").unwrap_or(7.65);
    let lat = parse_f64_arg(&args, "--lat").unwrap_or(45.97);
    let frames = parse_usize_arg(&args, "--frames").unwrap_or(120).max(2);
    let seed = parse_u32_arg(&args, "--seed").unwrap_or(12345);

    let config = match parse_str_arg(&args, "--config") {
        Some(path) => PlanetConfig::load(&PathBuf::from(path))?,
        None => PlanetConfig::default(),
    };

    println!("=== Terrae Flyover ===");
    println!("Target: {:.4}, {:.4}", lon, lat);
    println!("Tiling: {:?}, max zoom {}", config.tiling, config.max_zoom);
    println!("Frames: {}", frames);
    println!();

    let generator = Arc::new(TerrainGenerator::new(TerrainParams { seed, ..Default::default() }));
    let scheme = config.tiling;
    let ellipsoid = config.ellipsoid;

    let mut imagery: Arc<dyn TileSource> = match parse_str_arg(&args, "--tiles") {
        Some(dir) => Arc::new(FileTileSource::new(dir, "{z}/{x}/{y}.png")),
        None => Arc::new(ProceduralSource::new(
            Arc::clone(&generator),
            scheme,
            ProceduralKind::Imagery { size: 256 },
            config.max_zoom,
        )),
    };
    if let Some(dir) = parse_str_arg(&args, "--cache") {
        imagery = Arc::new(DiskCacheSource::new(imagery, dir));
    }
    let terrain = Arc::new(ProceduralSource::new(
        Arc::clone(&generator),
        scheme,
        ProceduralKind::Elevation { samples: 65 },
        14,
    ));

    let gpu = HeadlessGpu::new();
    let mut planet = Planet::new(config, gpu.clone())?;
    let terrain = TerrainDescriptor::new(terrain, ElevationFormat::RawF32).with_zoom_range(2, 14);
    planet.set_terrain(Some(terrain));
    planet.add_layer(LayerDescriptor::new("imagery", imagery));

    let target = ellipsoid.geodetic_to_cartesian(lon, lat, 0.0);
    let [_, north, up] = ellipsoid.east_north_up(lon, lat);
    let start = Instant::now();

    for i in 0..frames {
        // Exponential descent, tilting from straight down towards the horizon
        let t = i as f64 / (frames - 1) as f64;
        let altitude = START_ALTITUDE * (END_ALTITUDE / START_ALTITUDE).powf(t);
        let eye = target + up * altitude - north * altitude * 0.5 * t;
        let camera = Camera::look_at(eye, target, north);

        let stats = match planet.on_frame(&camera) {
            Ok(stats) => stats,
            Err(e) => {
                log::error!("Frame {} failed: {}", i, e);
                break;
            }
        };
        log::info!(
            "alt {:>10.0} m | nodes {:>4} | draw {:>3} | split {:>2} merge {:>2} | \
             req {:>3} drop {:>2} | loads {}/{}",
            altitude,
            stats.nodes,
            stats.draw_calls,
            stats.splits,
            stats.merges,
            stats.requests_issued,
            stats.requests_dropped,
            stats.active_loads,
            stats.pending_loads
        );
        planet.wait_for_loads(Duration::from_millis(50));
    }

    let deepest = planet.visible_segments().iter().map(|s| s.address.zoom).max().unwrap_or(0);
    let fallback = planet.draw_commands().iter().filter(|c| c.uses_fallback()).count();
    let loader = planet.loader_stats();
    drop(planet);

    let ledger = gpu.ledger();
    println!();
    println!("Finished in {:.2?}", start.elapsed());
    println!("Deepest zoom drawn:   {}", deepest);
    println!("Tiles on ancestor imagery: {}", fallback);
    println!(
        "Fetches: {} started, {} completed, {} dropped, {} cancelled",
        loader.fetches_started, loader.completions, loader.dropped, loader.cancelled
    );
    println!(
        "GPU: {} textures / {} meshes created, {} live after drop, {} double deletes",
        ledger.textures_created,
        ledger.geometry_created,
        ledger.live_textures.len() + ledger.live_geometry.len(),
        ledger.double_deletes
    );
    Ok(())
}

fn parse_f64_arg(args: &[String], flag: &str) -> Option<f64> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
