//! Renderable unit of a quad-tree node

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::types::DVec3;
use crate::planet::LayerId;
use crate::render::{GeometryHandle, GpuBackend, TextureHandle};
use crate::streaming::Ticket;
use crate::terrain::ElevationGrid;
use crate::tile::{TileAddress, TileBounds};

use super::material::{LoadTracker, Material, MaterialStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerrainState {
    NotLoaded,
    Loading,
    Ready,
    Error,
}

/// Geometry, terrain and imagery of one tile.
///
/// `geometry` only exists while terrain is `Ready`; until then the segment
/// draws `placeholder`, built from an ancestor's grid or as a flat plate.
#[derive(Debug)]
pub struct Segment {
    pub address: TileAddress,
    pub bounds: TileBounds,
    terrain_state: TerrainState,
    pub terrain: LoadTracker,
    elevation: Option<Arc<ElevationGrid>>,
    /// Tile the elevation was loaded for (self or the ancestor it was cut from)
    elevation_source: Option<TileAddress>,
    geometry: Option<GeometryHandle>,
    placeholder: Option<GeometryHandle>,
    /// Ancestor grid the placeholder was cut from, `None` for a flat plate
    placeholder_source: Option<TileAddress>,
    /// Origin of the drawable mesh's relative positions
    center: DVec3,
    /// Neighbor lattice sizes the current mesh was built for
    built_sides: [u32; 4],
    /// Terrain changed since the mesh was built
    dirty: bool,
    materials: HashMap<LayerId, Material>,
}

impl Segment {
    pub fn new(address: TileAddress, bounds: TileBounds) -> Self {
        Self {
            address,
            bounds,
            terrain_state: TerrainState::NotLoaded,
            terrain: LoadTracker::default(),
            elevation: None,
            elevation_source: None,
            geometry: None,
            placeholder: None,
            placeholder_source: None,
            center: DVec3::ZERO,
            built_sides: [0; 4],
            dirty: true,
            materials: HashMap::new(),
        }
    }

    pub fn terrain_state(&self) -> TerrainState {
        self.terrain_state
    }

    pub fn elevation(&self) -> Option<&Arc<ElevationGrid>> {
        self.elevation.as_ref()
    }

    pub fn elevation_source(&self) -> Option<TileAddress> {
        self.elevation_source
    }

    /// Real geometry; `None` unless terrain is ready
    pub fn geometry(&self) -> Option<GeometryHandle> {
        if self.terrain_state == TerrainState::Ready { self.geometry } else { None }
    }

    pub fn placeholder(&self) -> Option<GeometryHandle> {
        self.placeholder
    }

    pub fn placeholder_source(&self) -> Option<TileAddress> {
        self.placeholder_source
    }

    /// Geometry to draw this frame
    pub fn drawable_geometry(&self) -> Option<GeometryHandle> {
        self.geometry().or(self.placeholder)
    }

    pub fn center(&self) -> DVec3 {
        self.center
    }

    pub fn begin_terrain_load(&mut self, ticket: Ticket) {
        self.terrain_state = TerrainState::Loading;
        self.terrain.begin(ticket);
    }

    /// Drop an outstanding terrain request.
    pub fn abort_terrain(&mut self) -> Option<Ticket> {
        let ticket = self.terrain.ticket.take();
        if self.terrain_state == TerrainState::Loading {
            self.terrain_state = TerrainState::NotLoaded;
        }
        ticket
    }

    /// Mark terrain failed; the caller has already updated `terrain`.
    pub fn set_terrain_error(&mut self) {
        self.terrain_state = TerrainState::Error;
    }

    /// Drop loaded elevation so terrain is fetched again, e.g. after the
    /// provider changed. Returns the outstanding ticket.
    pub fn reset_terrain(&mut self) -> Option<Ticket> {
        let ticket = self.abort_terrain();
        self.terrain.reset();
        self.terrain_state = TerrainState::NotLoaded;
        self.elevation = None;
        self.elevation_source = None;
        self.dirty = true;
        ticket
    }

    /// Install elevation (`None` for a flat tile) and mark the mesh stale.
    pub fn set_elevation(&mut self, grid: Option<Arc<ElevationGrid>>, source: TileAddress) {
        self.terrain.succeed();
        self.elevation = grid;
        self.elevation_source = Some(source);
        self.terrain_state = TerrainState::Ready;
        self.dirty = true;
    }

    /// True if the real mesh must be (re)built for these neighbor sizes
    pub fn needs_geometry(&self, sides: [u32; 4]) -> bool {
        self.terrain_state == TerrainState::Ready
            && (self.geometry.is_none() || self.dirty || self.built_sides != sides)
    }

    /// Install a freshly built mesh, returning handles that are now unused.
    pub fn set_geometry(
        &mut self,
        geometry: GeometryHandle,
        center: DVec3,
        sides: [u32; 4],
    ) -> Vec<GeometryHandle> {
        self.built_sides = sides;
        self.center = center;
        self.dirty = false;
        let mut old: Vec<GeometryHandle> = self.geometry.replace(geometry).into_iter().collect();
        old.extend(self.placeholder.take());
        self.placeholder_source = None;
        old
    }

    /// True if the placeholder must be (re)built from `source`
    pub fn needs_placeholder(&self, source: Option<TileAddress>, sides: [u32; 4]) -> bool {
        self.terrain_state != TerrainState::Ready
            && (self.placeholder.is_none()
                || self.placeholder_source != source
                || self.built_sides != sides)
    }

    pub fn set_placeholder(
        &mut self,
        geometry: GeometryHandle,
        center: DVec3,
        source: Option<TileAddress>,
        sides: [u32; 4],
    ) -> Option<GeometryHandle> {
        self.built_sides = sides;
        self.center = center;
        self.placeholder_source = source;
        self.placeholder.replace(geometry)
    }

    pub fn material(&self, layer: LayerId) -> Option<&Material> {
        self.materials.get(&layer)
    }

    pub fn material_mut(&mut self, layer: LayerId) -> Option<&mut Material> {
        self.materials.get_mut(&layer)
    }

    /// Material of a layer, created empty on first use
    pub fn material_entry(&mut self, layer: LayerId) -> &mut Material {
        self.materials.entry(layer).or_insert_with(|| Material::new(layer))
    }

    /// Remove a layer's material, handing back its texture.
    pub fn remove_material(&mut self, layer: LayerId) -> Option<Material> {
        self.materials.remove(&layer)
    }

    /// Texture of a layer if one is loaded (possibly at an old version)
    pub fn texture(&self, layer: LayerId) -> Option<TextureHandle> {
        self.materials.get(&layer).and_then(Material::texture)
    }

    /// Outstanding tickets: terrain first, then one per loading material
    pub fn tickets(&self) -> impl Iterator<Item = (Option<LayerId>, Ticket)> + '_ {
        let terrain = self.terrain.ticket.map(|t| (None, t));
        let imagery = self
            .materials
            .values()
            .filter(|m| m.status() == MaterialStatus::Loading)
            .filter_map(|m| m.ticket().map(|t| (Some(m.layer), t)));
        terrain.into_iter().chain(imagery)
    }

    /// Delete every GPU resource this segment owns. Safe to call twice.
    pub fn release(&mut self, gpu: &mut dyn GpuBackend) {
        if let Some(geometry) = self.geometry.take() {
            gpu.delete_geometry(geometry);
        }
        if let Some(placeholder) = self.placeholder.take() {
            gpu.delete_geometry(placeholder);
        }
        for material in self.materials.values_mut() {
            if let Some(texture) = material.take_texture() {
                gpu.delete_texture(texture);
            }
        }
    }

    /// Forget all GPU handles after a context loss. Terrain data survives;
    /// meshes are rebuilt and textures reloaded.
    pub fn forget_gpu(&mut self) {
        self.geometry = None;
        self.placeholder = None;
        self.placeholder_source = None;
        self.dirty = true;
        self.abort_terrain();
        for material in self.materials.values_mut() {
            material.forget_gpu();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Ellipsoid;
    use crate::render::HeadlessGpu;
    use crate::streaming::DecodedImage;
    use crate::terrain::{MeshParams, TerrainMesh};
    use crate::tile::TilingScheme;

    fn segment() -> Segment {
        let addr = TileAddress::new(1, 1, 1);
        let scheme = TilingScheme::WebMercator;
        let bounds = TileBounds::compute(&scheme, &Ellipsoid::WGS84, addr, 0.0, 0.0);
        Segment::new(addr, bounds)
    }

    fn mesh() -> TerrainMesh {
        TerrainMesh::build(&MeshParams {
            scheme: &TilingScheme::WebMercator,
            ellipsoid: &Ellipsoid::WGS84,
            address: TileAddress::new(1, 1, 1),
            elevation: None,
            grid_size: 2,
            side_size_log2: [1; 4],
            skirt_depth: 10.0,
        })
    }

    #[test]
    fn test_geometry_only_when_ready() {
        let mut gpu = HeadlessGpu::new();
        let mut seg = segment();

        let plate = gpu.create_geometry(&mesh()).unwrap();
        assert!(seg.needs_placeholder(None, [1; 4]));
        seg.set_placeholder(plate, DVec3::ZERO, None, [1; 4]);
        assert!(!seg.needs_placeholder(None, [1; 4]));
        assert_eq!(seg.geometry(), None);
        assert_eq!(seg.drawable_geometry(), Some(plate));

        seg.set_elevation(None, seg.address);
        assert!(seg.needs_geometry([1; 4]));
        let real = gpu.create_geometry(&mesh()).unwrap();
        assert_eq!(seg.set_geometry(real, DVec3::X, [1; 4]), vec![plate]);
        assert_eq!(seg.geometry(), Some(real));
        assert_eq!(seg.center(), DVec3::X);
        assert!(!seg.needs_geometry([1; 4]));
        // A neighbor changed resolution
        assert!(seg.needs_geometry([0, 1, 1, 1]));
    }

    #[test]
    fn test_release_once() {
        let mut gpu = HeadlessGpu::new();
        let observer = gpu.clone();
        let mut seg = segment();

        let geometry = gpu.create_geometry(&mesh()).unwrap();
        seg.set_elevation(None, seg.address);
        seg.set_geometry(geometry, DVec3::X, [1; 4]);
        let image = DecodedImage { width: 1, height: 1, rgba: vec![0; 4] };
        let texture = gpu.create_texture(&image).unwrap();
        let address = seg.address;
        let m = seg.material_entry(LayerId(1));
        m.begin_loading(Ticket(1), 0);
        m.complete(Ticket(1), texture, address).unwrap();

        seg.release(&mut gpu);
        seg.release(&mut gpu);
        let ledger = observer.ledger();
        assert_eq!(ledger.geometry_deleted, 1);
        assert_eq!(ledger.textures_deleted, 1);
        assert_eq!(ledger.double_deletes, 0);
    }

    #[test]
    fn test_tickets() {
        let mut seg = segment();
        seg.begin_terrain_load(Ticket(4));
        seg.material_entry(LayerId(2)).begin_loading(Ticket(5), 0);
        seg.material_entry(LayerId(3));

        let tickets: Vec<_> = seg.tickets().collect();
        assert_eq!(tickets, vec![(None, Ticket(4)), (Some(LayerId(2)), Ticket(5))]);

        assert_eq!(seg.abort_terrain(), Some(Ticket(4)));
        assert_eq!(seg.terrain_state(), TerrainState::NotLoaded);
    }
}
