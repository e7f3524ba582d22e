//! Tile mesh construction with crack-free edges

use bytemuck::{Pod, Zeroable};

use crate::core::types::DVec3;
use crate::math::Ellipsoid;
use crate::tile::{Side, TileAddress, TilingScheme};

use super::elevation::ElevationGrid;

/// GPU vertex layout of a terrain tile
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TerrainVertex {
    /// Position relative to [`TerrainMesh::center`]
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// Imagery coordinates, (0, 0) at the north-west corner
    pub uv: [f32; 2],
}

/// Inputs of [`TerrainMesh::build`]
#[derive(Clone, Copy, Debug)]
pub struct MeshParams<'a> {
    pub scheme: &'a TilingScheme,
    pub ellipsoid: &'a Ellipsoid,
    pub address: TileAddress,
    /// Heights covering exactly this tile; `None` for a flat plate
    pub elevation: Option<&'a ElevationGrid>,
    /// Segments per side, a power of two
    pub grid_size: u32,
    /// Per side, log2 of the neighbor's segment count along the shared edge
    pub side_size_log2: [u32; 4],
    /// Depth of the skirt hanging below each edge, in meters
    pub skirt_depth: f64,
}

/// Triangle mesh of one tile, positions relative to `center`
#[derive(Clone, Debug)]
pub struct TerrainMesh {
    pub center: DVec3,
    pub vertices: Vec<TerrainVertex>,
    pub indices: Vec<u32>,
    /// Vertices of the surface lattice; skirt vertices follow them
    pub surface_vertex_count: usize,
}

impl TerrainMesh {
    /// Build the surface lattice, snap edges shared with coarser neighbors
    /// onto the neighbor's lattice, then hang skirts off every edge.
    pub fn build(params: &MeshParams<'_>) -> Self {
        let n = params.grid_size.max(1) as usize;
        let log_n = n.trailing_zeros();
        let stride = n + 1;
        let inv = 1.0 / n as f64;

        let mut positions = Vec::with_capacity(stride * stride);
        let mut normals = Vec::with_capacity(stride * stride);
        let mut uvs = Vec::with_capacity(stride * stride);

        for row in 0..stride {
            for col in 0..stride {
                let (u, v) = (col as f64 * inv, row as f64 * inv);
                let ll = params.scheme.grid_lonlat(&params.address, u, v);
                let h = params.elevation.map_or(0.0, |g| g.sample_bilinear(u, v) as f64);
                positions.push(params.ellipsoid.geodetic_to_cartesian(ll.x, ll.y, h));
                normals.push(surface_normal(params, ll.x, ll.y, u, v));
                uvs.push([u as f32, v as f32]);
            }
        }

        for side in Side::ALL {
            let ssl = params.side_size_log2[side.index()];
            if ssl >= log_n {
                continue;
            }
            let step = 1usize << (log_n - ssl);
            for k in 0..=n {
                let k0 = k - k % step;
                if k0 == k {
                    continue;
                }
                let t = (k - k0) as f64 / step as f64;
                let (i, i0, i1) = (
                    edge_index(side, k, n),
                    edge_index(side, k0, n),
                    edge_index(side, k0 + step, n),
                );
                positions[i] = positions[i0].lerp(positions[i1], t);
                normals[i] = normals[i0].lerp(normals[i1], t).normalize_or_zero();
            }
        }

        let center_ll = params.scheme.grid_lonlat(&params.address, 0.5, 0.5);
        let center = params.ellipsoid.geodetic_to_cartesian(center_ll.x, center_ll.y, 0.0);

        let mut vertices: Vec<TerrainVertex> = (0..positions.len())
            .map(|i| TerrainVertex {
                position: (positions[i] - center).as_vec3().to_array(),
                normal: normals[i].as_vec3().to_array(),
                uv: uvs[i],
            })
            .collect();

        let mut indices = Vec::with_capacity(6 * n * n + 24 * n);
        for row in 0..n {
            for col in 0..n {
                let a = (row * stride + col) as u32;
                let b = a + 1;
                let c = a + stride as u32;
                let d = c + 1;
                indices.extend_from_slice(&[a, c, d, a, d, b]);
            }
        }

        let surface_vertex_count = vertices.len();
        for side in Side::ALL {
            let base = vertices.len() as u32;
            for k in 0..=n {
                let i = edge_index(side, k, n);
                let drop = normals[i] * params.skirt_depth;
                let mut skirt = vertices[i];
                skirt.position = (positions[i] - drop - center).as_vec3().to_array();
                vertices.push(skirt);
            }
            for k in 0..n {
                let top0 = edge_index(side, k, n) as u32;
                let top1 = edge_index(side, k + 1, n) as u32;
                let (bot0, bot1) = (base + k as u32, base + k as u32 + 1);
                indices.extend_from_slice(&[top0, bot0, bot1, top0, bot1, top1]);
            }
        }

        Self { center, vertices, indices, surface_vertex_count }
    }

    /// The `k`-th surface vertex along a side, counted
    /// west to east on N/S and north to south on E/W.
    pub fn edge_vertex(&self, side: Side, k: usize, grid_size: u32) -> &TerrainVertex {
        &self.vertices[edge_index(side, k, grid_size as usize)]
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

fn edge_index(side: Side, k: usize, n: usize) -> usize {
    let stride = n + 1;
    match side {
        Side::N => k,
        Side::S => n * stride + k,
        Side::W => k * stride,
        Side::E => k * stride + n,
    }
}

fn surface_normal(params: &MeshParams<'_>, lon: f64, lat: f64, u: f64, v: f64) -> DVec3 {
    let up = params.ellipsoid.geodetic_normal(lon, lat);
    let Some(normals) = params.elevation.and_then(|g| g.normals.as_ref().map(|n| (g, n))) else {
        return up;
    };
    let (grid, normals) = normals;
    let last = (grid.size - 1) as f64;
    let col = (u * last).round() as usize;
    let row = (v * last).round() as usize;
    let [e, n, z] = normals[row.min(grid.size - 1) * grid.size + col.min(grid.size - 1)];
    let [east, north, up] = params.ellipsoid.east_north_up(lon, lat);
    (east * e as f64 + north * n as f64 + up * z as f64).normalize_or_zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params<'a>(
        scheme: &'a TilingScheme,
        ellipsoid: &'a Ellipsoid,
        elevation: Option<&'a ElevationGrid>,
        side_size_log2: [u32; 4],
    ) -> MeshParams<'a> {
        MeshParams {
            scheme,
            ellipsoid,
            address: TileAddress::new(301, 387, 10),
            elevation,
            grid_size: 8,
            side_size_log2,
            skirt_depth: 100.0,
        }
    }

    fn position(mesh: &TerrainMesh, v: &TerrainVertex) -> DVec3 {
        mesh.center + glam::Vec3::from(v.position).as_dvec3()
    }

    #[test]
    fn test_vertex_and_index_counts() {
        let (s, e) = (TilingScheme::WebMercator, Ellipsoid::WGS84);
        let mesh = TerrainMesh::build(&params(&s, &e, None, [3; 4]));
        assert_eq!(mesh.surface_vertex_count, 81);
        assert_eq!(mesh.vertices.len(), 81 + 4 * 9);
        assert_eq!(mesh.triangle_count(), 2 * 64 + 4 * 2 * 8);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn test_corners_on_ellipsoid() {
        let (s, e) = (TilingScheme::WebMercator, Ellipsoid::WGS84);
        let mesh = TerrainMesh::build(&params(&s, &e, None, [3; 4]));
        let addr = TileAddress::new(301, 387, 10);
        let nw = s.grid_lonlat(&addr, 0.0, 0.0);
        let expected = e.geodetic_to_cartesian(nw.x, nw.y, 0.0);
                assert!((position(&mesh, &mesh.vertices[0]) - expected).length() < 0.1);
        assert_eq!(mesh.vertices[0].uv, [0.0, 0.0]);
        assert_eq!(mesh.vertices[80].uv, [1.0, 1.0]);
    }

    #[test]
    fn test_edge_snapped_to_coarser_lattice() {
        let (s, e) = (TilingScheme::WebMercator, Ellipsoid::WGS84);
        let heights = (0..81).map(|i| ((i * 37) % 11) as f32 * 50.0).collect();
        let grid = ElevationGrid::new(9, heights).unwrap();

        // East neighbor one level coarser: 4 segments instead of 8 along the edge
        let mesh = TerrainMesh::build(&params(&s, &e, Some(&grid), [3, 2, 3, 3]));
        for k in (1..8).step_by(2) {
            let mid = position(&mesh, mesh.edge_vertex(Side::E, k, 8));
            let a = position(&mesh, mesh.edge_vertex(Side::E, k - 1, 8));
            let b = position(&mesh, mesh.edge_vertex(Side::E, k + 1, 8));
            assert!((mid - (a + b) * 0.5).length() < 0.05, "vertex {k} not on chord");
        }

        // West side untouched: odd vertices keep their own height
        let unsnapped = TerrainMesh::build(&params(&s, &e, Some(&grid), [3; 4]));
        assert_eq!(mesh.edge_vertex(Side::W, 3, 8), unsnapped.edge_vertex(Side::W, 3, 8));
    }

    #[test]
    fn test_skirts_hang_below_edges() {
        let (s, e) = (TilingScheme::WebMercator, Ellipsoid::WGS84);
        let mesh = TerrainMesh::build(&params(&s, &e, None, [3; 4]));
        let top = position(&mesh, &mesh.vertices[0]);
        let skirt = position(&mesh, &mesh.vertices[mesh.surface_vertex_count]);
        assert!((top.length() - skirt.length() - 100.0).abs() < 0.5);
    }
}
