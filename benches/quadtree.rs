use criterion::{criterion_group, criterion_main, Criterion, black_box};

use terrae::core::{Camera, PlanetConfig};
use terrae::math::Ellipsoid;
use terrae::quadtree::{neighbor_address, QuadTree, Segment};
use terrae::terrain::{ElevationGrid, MeshParams, TerrainMesh};
use terrae::tile::{Side, TileAddress, TilingScheme};

fn bench_neighbor_lookup(c: &mut Criterion) {
    let scheme = TilingScheme::WebMercator;
    let tiles: Vec<TileAddress> = (0..1024u32)
        .map(|i| TileAddress::new(i * 97 % 4096, i * 31 % 4096, 12))
        .collect();

    c.bench_function("neighbor_lookup_z12", |b| {
        b.iter(|| {
            let mut found = 0usize;
            for tile in &tiles {
                for side in Side::ALL {
                    found += neighbor_address(&scheme, black_box(*tile), side).is_some() as usize;
                }
            }
            found
        });
    });
}

fn bench_walk(c: &mut Criterion) {
    let config = PlanetConfig::default();
    let ellipsoid = config.ellipsoid;
    let target = ellipsoid.geodetic_to_cartesian(7.65, 45.97, 0.0);
    let [_, north, up] = ellipsoid.east_north_up(7.65, 45.97);

    for altitude in [1.0e6, 1.0e4] {
        let eye = target + up * altitude - north * altitude * 0.3;
        let camera = Camera::look_at(eye, target, north);
        let mut tree = QuadTree::new(&config);
        // Settle the tree so the bench measures a steady-state frame
        for _ in 0..32 {
            tree.walk(&camera, &mut |_: &mut Segment| {});
        }

        c.bench_function(&format!("walk_steady_{}m", altitude as u64), |b| {
            b.iter(|| {
                let stats = tree.walk(black_box(&camera), &mut |_: &mut Segment| {});
                tree.resolve_neighbors();
                stats
            });
        });
    }
}

fn bench_mesh_build(c: &mut Criterion) {
    let scheme = TilingScheme::WebMercator;
    let ellipsoid = Ellipsoid::WGS84;
    let heights = (0..65 * 65).map(|i| ((i % 65) as f32 * 0.3).sin() * 500.0).collect();
    let grid = ElevationGrid::new(65, heights).unwrap_or_else(|_| ElevationGrid::flat(65));

    for grid_size in [16u32, 32, 64] {
        let log2 = grid_size.trailing_zeros();
        c.bench_function(&format!("mesh_build_{}", grid_size), |b| {
            b.iter(|| {
                TerrainMesh::build(&MeshParams {
                    scheme: &scheme,
                    ellipsoid: &ellipsoid,
                    address: black_box(TileAddress::new(2135, 1444, 12)),
                    elevation: Some(&grid),
                    grid_size,
                    side_size_log2: [log2, log2 - 1, log2, log2],
                    skirt_depth: 50.0,
                })
            });
        });
    }
}

criterion_group!(benches, bench_neighbor_lookup, bench_walk, bench_mesh_build);
criterion_main!(benches);
