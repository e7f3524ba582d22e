//! Per-frame orchestration of the tile tree
//!
//! A frame runs in a fixed order: apply the loads that finished since the
//! last frame, walk the tree, stitch neighbors, bring every rendering node's
//! terrain, geometry and imagery up to date, refill the loading queues and
//! finally build the draw list. Loads complete on the runtime but are only
//! observed at the start of a frame, so a frame sees one consistent state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;

use crate::core::camera::View;
use crate::core::config::PlanetConfig;
use crate::core::error::{Error, FetchError};
use crate::core::types::Result;
use crate::quadtree::{
    MaterialStatus, QuadNode, QuadTree, RenderState, Segment, TerrainState, TextureBias,
};
use crate::render::{DrawCommand, GpuBackend, GpuError, LayerDraw};
use crate::streaming::{
    DecodeJob, DecodedImage, LoadOutcome, Loader, LoaderStats, Payload, ResourceKind, RetryPolicy,
    TextureCache, TileRequest,
};
use crate::terrain::{ElevationGrid, MeshParams, TerrainMesh};
use crate::tile::TileAddress;

use super::layer::{Layer, LayerDescriptor, LayerId, TerrainDescriptor};

/// What happened during one frame
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    /// Nodes in the tree after the walk
    pub nodes: usize,
    pub rendering: usize,
    pub splits: usize,
    pub merges: usize,
    pub requests_issued: usize,
    /// Pending requests discarded as stale
    pub requests_dropped: usize,
    pub completions_applied: usize,
    pub pending_loads: usize,
    pub active_loads: usize,
    pub draw_calls: usize,
}

/// Root of a streamed globe
pub struct Planet {
    config: PlanetConfig,
    tree: QuadTree,
    gpu: Box<dyn GpuBackend>,
    loader: Loader,
    layers: Vec<Layer>,
    next_layer_id: u32,
    terrain: Option<TerrainDescriptor>,
    texture_cache: TextureCache,
    retry: RetryPolicy,
    frame: u64,
    draw_list: Vec<DrawCommand>,
    /// Set when the GPU context was lost; cleared by a rebuild
    gpu_lost: bool,
}

impl Planet {
    /// Create a planet with its own loader runtime
    pub fn new(config: PlanetConfig, gpu: impl GpuBackend + 'static) -> Result<Self> {
        config.validate()?;
        let loader = Loader::new(config.imagery_max_concurrent, config.terrain_max_concurrent)?;
        Ok(Self::build(config, Box::new(gpu), loader))
    }

    /// Create a planet whose loads run on an existing tokio runtime
    pub fn with_runtime_handle(
        config: PlanetConfig,
        gpu: impl GpuBackend + 'static,
        handle: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let loader = Loader::with_handle(
            config.imagery_max_concurrent,
            config.terrain_max_concurrent,
            handle,
        );
        Ok(Self::build(config, Box::new(gpu), loader))
    }

    fn build(config: PlanetConfig, gpu: Box<dyn GpuBackend>, loader: Loader) -> Self {
        log::info!(
            "Planet: {:?} tiling, max zoom {}, grid {}",
            config.tiling,
            config.max_zoom,
            config.grid_size
        );
        Self {
            tree: QuadTree::new(&config),
            texture_cache: TextureCache::new(config.texture_cache_capacity),
            retry: RetryPolicy::from_config(&config),
            config,
            gpu,
            loader,
            layers: Vec::new(),
            next_layer_id: 1,
            terrain: None,
            frame: 0,
            draw_list: Vec::new(),
            gpu_lost: false,
        }
    }

    pub fn config(&self) -> &PlanetConfig {
        &self.config
    }

    pub fn tree(&self) -> &QuadTree {
        &self.tree
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn loader_stats(&self) -> LoaderStats {
        self.loader.stats()
    }

    pub fn is_gpu_lost(&self) -> bool {
        self.gpu_lost
    }

    /// Replace the elevation provider, dropping all loaded terrain.
    pub fn set_terrain(&mut self, terrain: Option<TerrainDescriptor>) {
        let mut addresses = Vec::with_capacity(self.tree.len());
        for node in self.tree.nodes_mut() {
            if let Some(ticket) = node.segment.reset_terrain() {
                self.loader.cancel(ResourceKind::Terrain, ticket);
            }
            addresses.push(node.address);
        }
        for address in &addresses {
            self.tree.refresh_bounds(address);
        }
        match &terrain {
            Some(t) => log::info!(
                "Terrain provider {} (zoom {}..={})",
                t.source.name(),
                t.min_zoom,
                t.max_zoom
            ),
            None => log::info!("Terrain disabled, globe is smooth"),
        }
        self.terrain = terrain;
    }

    /// Register an imagery layer on top of the existing ones.
    pub fn add_layer(&mut self, desc: LayerDescriptor) -> LayerId {
        let id = LayerId(self.next_layer_id);
        self.next_layer_id += 1;
        log::info!("Added {} '{}' from {}", id, desc.name, desc.source.name());
        self.layers.push(Layer { id, desc, version: 0 });
        id
    }

    /// Remove a layer, cancelling its loads and deleting its textures.
    pub fn remove_layer(&mut self, id: LayerId) -> Result<LayerDescriptor> {
        let index = self.layers.iter().position(|l| l.id == id).ok_or(Error::UnknownLayer(id))?;
        let layer = self.layers.remove(index);

        for node in self.tree.nodes_mut() {
            if let Some(mut material) = node.segment.remove_material(id) {
                if let Some(ticket) = material.abort() {
                    self.loader.cancel(ResourceKind::Imagery(id), ticket);
                }
                if let Some(texture) = material.take_texture() {
                    self.gpu.delete_texture(texture);
                }
            }
        }
        for texture in self.texture_cache.remove_layer(id) {
            self.gpu.delete_texture(texture);
        }
        for command in &mut self.draw_list {
            command.layers.retain(|l| l.layer != id);
        }

        log::info!("Removed {} '{}'", id, layer.desc.name);
        Ok(layer.desc)
    }

    pub fn layer(&self, id: LayerId) -> Option<&LayerDescriptor> {
        self.layers.iter().find(|l| l.id == id).map(|l| &l.desc)
    }

    /// Layer ids, bottom-most first
    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|l| l.id).collect()
    }

    fn layer_mut(&mut self, id: LayerId) -> Result<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id).ok_or(Error::UnknownLayer(id))
    }

    pub fn set_layer_visible(&mut self, id: LayerId, visible: bool) -> Result<()> {
        self.layer_mut(id)?.desc.visible = visible;
        Ok(())
    }

    pub fn set_layer_opacity(&mut self, id: LayerId, opacity: f32) -> Result<()> {
        self.layer_mut(id)?.desc.opacity = opacity.clamp(0.0, 1.0);
        Ok(())
    }

    /// Force every material of a layer to reload.
    ///
    /// Current textures stay on screen until their replacements arrive;
    /// failures are forgotten so terminal tiles are tried again.
    pub fn invalidate_layer(&mut self, id: LayerId) -> Result<()> {
        let layer = self.layer_mut(id)?;
        layer.version += 1;
        let version = layer.version;

        for node in self.tree.nodes_mut() {
            if let Some(material) = node.segment.material_mut(id) {
                if let Some(ticket) = material.invalidate() {
                    self.loader.cancel(ResourceKind::Imagery(id), ticket);
                }
            }
        }
        for texture in self.texture_cache.remove_layer(id) {
            self.gpu.delete_texture(texture);
        }

        log::info!("Invalidated {} (version {})", id, version);
        Ok(())
    }

    /// Advance one frame for the given view.
    ///
    /// # Returns
    /// Frame statistics, or `Error::Gpu(ContextLost)` once the GPU context is
    /// gone; call [`rebuild_gpu_resources`](Self::rebuild_gpu_resources) to recover
    pub fn on_frame(&mut self, view: &dyn View) -> Result<FrameStats> {
        if self.gpu_lost {
            return Err(Error::Gpu(GpuError::ContextLost));
        }
        self.frame += 1;
        let now = Instant::now();
        let mut stats = FrameStats { frame: self.frame, ..Default::default() };

        for outcome in self.loader.drain_completions() {
            if self.apply_outcome(outcome, now)? {
                stats.completions_applied += 1;
            }
        }

        let walk = {
            let gpu = &mut self.gpu;
            let loader = &mut self.loader;
            self.tree.walk(view, &mut |segment: &mut Segment| {
                // Running loads finish so their texture can be cached
                let tickets: Vec<_> = segment.tickets().collect();
                for (layer, ticket) in tickets {
                    let kind = layer.map_or(ResourceKind::Terrain, ResourceKind::Imagery);
                    loader.cancel_if_pending(kind, ticket);
                }
                segment.release(&mut **gpu);
            })
        };
        stats.splits = walk.splits;
        stats.merges = walk.merges;

        self.tree.resolve_neighbors();
        let rendering = self.tree.rendering();

        for &address in &rendering {
            self.update_terrain(address, now, &mut stats);
            self.update_geometry(address)?;
            self.update_materials(address, now, &mut stats);
        }

        let dropped = {
            let caps = self.provider_caps();
            let tree = &self.tree;
            self.loader.pump(|request| is_eligible(tree, &caps, request))
        };
        for request in &dropped {
            self.reset_owner(request);
        }
        stats.requests_dropped = dropped.len();

        self.build_draw_list(&rendering);

        stats.nodes = self.tree.len();
        stats.rendering = rendering.len();
        stats.pending_loads = self.loader.pending_count();
        stats.active_loads = self.loader.active_count();
        stats.draw_calls = self.draw_list.len();
        log::debug!(
            "Frame {}: {} nodes, {} rendering, {} requests, {} applied, {} pending, {} active",
            stats.frame,
            stats.nodes,
            stats.rendering,
            stats.requests_issued,
            stats.completions_applied,
            stats.pending_loads,
            stats.active_loads
        );
        Ok(stats)
    }

    /// Segments drawn in the last frame, in address order
    pub fn visible_segments(&self) -> Vec<&Segment> {
        self.tree
            .rendering()
            .iter()
            .filter_map(|a| self.tree.get(a))
            .map(|n| &n.segment)
            .collect()
    }

    /// Draw calls built by the last frame
    pub fn draw_commands(&self) -> &[DrawCommand] {
        &self.draw_list
    }

    /// Segment of a tile if its node exists
    pub fn segment(&self, address: TileAddress) -> Result<Option<&Segment>> {
        if !self.tree.scheme().is_valid(&address) {
            return Err(Error::InvalidAddress(address));
        }
        Ok(self.tree.get(&address).map(|n| &n.segment))
    }

    /// Block until running loads report back or `timeout` passes.
    /// Their results are applied by the next frame.
    pub fn wait_for_loads(&mut self, timeout: Duration) -> bool {
        self.loader.wait_idle(timeout)
    }

    /// Recover from a lost GPU context with a fresh backend.
    ///
    /// The tree and loaded elevation survive; every GPU handle is forgotten
    /// and meshes and textures are recreated over the next frames.
    pub fn rebuild_gpu_resources(&mut self, gpu: impl GpuBackend + 'static) {
        self.gpu = Box::new(gpu);
        self.loader.clear();
        for node in self.tree.nodes_mut() {
            node.segment.forget_gpu();
        }
        self.texture_cache.clear();
        self.draw_list.clear();
        self.gpu_lost = false;
        log::info!("GPU resources rebuilt for {} nodes", self.tree.len());
    }

    /// Context loss aborts the frame; other GPU failures only affect one resource.
    fn note_gpu_error(&mut self, error: &GpuError) -> Result<()> {
        match error {
            GpuError::ContextLost => {
                if !self.gpu_lost {
                    log::warn!("GPU context lost, resources must be rebuilt");
                }
                self.gpu_lost = true;
                Err(Error::Gpu(GpuError::ContextLost))
            }
            GpuError::Allocation(msg) => {
                log::warn!("GPU allocation failed: {}", msg);
                Ok(())
            }
        }
    }

    fn apply_outcome(&mut self, outcome: LoadOutcome, now: Instant) -> Result<bool> {
        let LoadOutcome { request, result } = outcome;
        match request.kind {
            ResourceKind::Terrain => {
                let result = result.and_then(|payload| match payload {
                    Payload::Elevation(grid) => Ok(grid),
                    Payload::Image(_) => {
                        Err(FetchError::Decode("expected an elevation grid".into()))
                    }
                });
                Ok(self.apply_terrain(&request, result, now))
            }
            ResourceKind::Imagery(layer) => {
                let result = result.and_then(|payload| match payload {
                    Payload::Image(image) => Ok(image),
                    Payload::Elevation(_) => Err(FetchError::Decode("expected an image".into())),
                });
                self.apply_imagery(layer, &request, result, now)
            }
        }
    }

    fn apply_terrain(
        &mut self,
        request: &TileRequest,
        result: std::result::Result<ElevationGrid, FetchError>,
        now: Instant,
    ) -> bool {
        let address = request.address;
        let Some(node) = self.tree.get_mut(&address) else {
            log::trace!("Dropping terrain of pruned tile {}", address);
            return false;
        };
        let segment = &mut node.segment;
        if !segment.terrain.owns(request.ticket) {
            return false;
        }

        match result {
            Ok(grid) => {
                segment.set_elevation(Some(Arc::new(grid)), address);
                self.tree.refresh_bounds(&address);
            }
            Err(error) => {
                let terminal = segment.terrain.fail(error.clone(), &self.retry, now);
                segment.set_terrain_error();
                log::warn!(
                    "Terrain {} failed (attempt {}): {}{}",
                    address,
                    segment.terrain.attempts,
                    error,
                    if terminal { ", giving up" } else { "" }
                );
            }
        }
        true
    }

    fn apply_imagery(
        &mut self,
        layer: LayerId,
        request: &TileRequest,
        result: std::result::Result<DecodedImage, FetchError>,
        now: Instant,
    ) -> Result<bool> {
        let address = request.address;
        let Some(version) = self.layers.iter().find(|l| l.id == layer).map(|l| l.version) else {
            return Ok(false);
        };
        if request.version != version {
            log::trace!("Dropping {} {} loaded at old version {}", address, layer, request.version);
            return Ok(false);
        }

        let image = match result {
            Ok(image) => image,
            Err(error) => {
                let Some(material) = self.tree.material_mut(&address, layer) else {
                    return Ok(false);
                };
                if !material.fail(request.ticket, error.clone(), &self.retry, now) {
                    return Ok(false);
                }
                log::warn!(
                    "Imagery {} {} failed (attempt {}): {}{}",
                    address,
                    layer,
                    material.attempts(),
                    error,
                    if material.is_terminal() { ", giving up" } else { "" }
                );
                return Ok(true);
            }
        };

        let owned = self
            .tree
            .get(&address)
            .and_then(|n| n.segment.material(layer))
            .is_some_and(|m| m.ticket() == Some(request.ticket));
        if !owned {
            // Pruned while loading: keep the texture one level down in case
            // the parent splits again
            let parked = !self.tree.contains(&address)
                && address.parent().is_some_and(|p| self.tree.contains(&p));
            if !parked {
                return Ok(false);
            }
            let texture = match self.gpu.create_texture(&image) {
                Ok(texture) => texture,
                Err(e) => {
                    self.note_gpu_error(&e)?;
                    return Ok(false);
                }
            };
            for evicted in self.texture_cache.insert((address, layer), texture, version) {
                self.gpu.delete_texture(evicted);
            }
            log::trace!("Cached texture of pruned tile {} {}", address, layer);
            return Ok(true);
        }

        let texture = match self.gpu.create_texture(&image) {
            Ok(texture) => texture,
            Err(e) => {
                self.note_gpu_error(&e)?;
                if let Some(material) = self.tree.material_mut(&address, layer) {
                    let error = FetchError::Decode(e.to_string());
                    material.fail(request.ticket, error, &self.retry, now);
                }
                return Ok(true);
            }
        };
        let installed = match self.tree.material_mut(&address, layer) {
            Some(material) => material.complete(request.ticket, texture, address),
            None => Err(texture),
        };
        match installed {
            Ok(Some(replaced)) => self.gpu.delete_texture(replaced),
            Ok(None) => {}
            Err(unused) => self.gpu.delete_texture(unused),
        }
        Ok(true)
    }

    fn update_terrain(&mut self, address: TileAddress, now: Instant, stats: &mut FrameStats) {
        let zoom_range = self.terrain.as_ref().map(|t| (t.min_zoom, t.max_zoom));
        let Some((min_zoom, max_zoom)) = zoom_range else {
            self.mark_flat(address);
            return;
        };
        if address.zoom < min_zoom {
            self.mark_flat(address);
            return;
        }
        let ready = |n: &QuadNode| n.segment.terrain_state() == TerrainState::Ready;
        if self.tree.get(&address).is_none_or(ready) {
            return;
        }
        if address.zoom <= max_zoom {
            self.request_terrain(address, now, stats);
            return;
        }

        // Deeper than the provider: cut the grid out of the ancestor at its max zoom
        let Some(source) = address.ancestor_at(max_zoom) else {
            return;
        };
        let Some(ancestor) = self.tree.get(&source) else {
            return;
        };
        match ancestor.segment.terrain_state() {
            TerrainState::Ready => {
                let (width, height) = tile_size_m(&self.tree, address);
                let grid = ancestor.segment.elevation().map(|g| {
                    let (offset, scale) = sub_extent(address, source);
                    let mut sub = g.sub_grid(offset, scale, g.size);
                    sub.compute_normals(width, height);
                    Arc::new(sub)
                });
                if let Some(node) = self.tree.get_mut(&address) {
                    node.segment.set_elevation(grid, source);
                }
                self.tree.refresh_bounds(&address);
            }
            TerrainState::Error if ancestor.segment.terrain.terminal => {
                let error = ancestor
                    .segment
                    .terrain
                    .last_error
                    .clone()
                    .unwrap_or(FetchError::OutOfRange(source));
                if let Some(node) = self.tree.get_mut(&address) {
                    if node.segment.terrain_state() != TerrainState::Error {
                        node.segment.terrain.fail_permanently(error);
                        node.segment.set_terrain_error();
                    }
                }
            }
            _ => self.request_terrain(source, now, stats),
        }
    }

    fn mark_flat(&mut self, address: TileAddress) {
        if let Some(node) = self.tree.get_mut(&address) {
            if node.segment.terrain_state() != TerrainState::Ready {
                node.segment.set_elevation(None, address);
            }
        }
    }

    fn request_terrain(&mut self, owner: TileAddress, now: Instant, stats: &mut FrameStats) {
        let Some(terrain) = self.terrain.as_ref() else {
            return;
        };
        let Some(node) = self.tree.get_mut(&owner) else {
            return;
        };
        let segment = &mut node.segment;
        match segment.terrain_state() {
            TerrainState::Ready => return,
            TerrainState::Loading => {
                if let Some(ticket) = segment.terrain.ticket {
                    self.loader.touch(ResourceKind::Terrain, ticket, self.frame);
                }
                return;
            }
            TerrainState::NotLoaded | TerrainState::Error => {
                if !segment.terrain.retry_due(now) {
                    return;
                }
            }
        }

        let ticket = self.loader.next_ticket();
        segment.begin_terrain_load(ticket);
        let decode = DecodeJob::Elevation {
            format: terrain.format,
            tile_size: tile_size_m(&self.tree, owner),
        };
        let request = TileRequest {
            ticket,
            address: owner,
            kind: ResourceKind::Terrain,
            version: 0,
            priority: self.frame,
        };
        self.loader.submit(request, Arc::clone(&terrain.source), decode);
        stats.requests_issued += 1;
    }

    fn build_mesh(
        &self,
        address: TileAddress,
        elevation: Option<&ElevationGrid>,
        sides: [u32; 4],
    ) -> TerrainMesh {
        let grid_size = self.tree.grid_size();
        let tile_width = self.tree.geometric_error(address.zoom) * grid_size as f64;
        TerrainMesh::build(&MeshParams {
            scheme: self.tree.scheme(),
            ellipsoid: self.tree.ellipsoid(),
            address,
            elevation,
            grid_size,
            side_size_log2: sides,
            skirt_depth: self.config.skirt_ratio * tile_width,
        })
    }

    /// Build the real mesh once terrain is ready, or a placeholder from the
    /// nearest ancestor grid until then.
    fn update_geometry(&mut self, address: TileAddress) -> Result<()> {
        let Some(node) = self.tree.get(&address) else {
            return Ok(());
        };
        let sides = node.side_size_log2;

        if node.segment.needs_geometry(sides) {
            let elevation = node.segment.elevation().cloned();
            let mesh = self.build_mesh(address, elevation.as_deref(), sides);
            let handle = match self.gpu.create_geometry(&mesh) {
                Ok(handle) => handle,
                Err(e) => return self.note_gpu_error(&e),
            };
            if let Some(node) = self.tree.get_mut(&address) {
                for old in node.segment.set_geometry(handle, mesh.center, sides) {
                    self.gpu.delete_geometry(old);
                }
            }
            return Ok(());
        }
        if node.segment.terrain_state() == TerrainState::Ready {
            return Ok(());
        }

        let ancestor = self
            .tree
            .nearest_ancestor(address, |n| n.segment.elevation().is_some())
            .and_then(|n| n.segment.elevation().map(|g| (n.address, Arc::clone(g))));
        let source = ancestor.as_ref().map(|(a, _)| *a);
        if !node.segment.needs_placeholder(source, sides) {
            return Ok(());
        }

        let grid = ancestor.map(|(a, g)| {
            let (offset, scale) = sub_extent(address, a);
            g.sub_grid(offset, scale, g.size)
        });
        let mesh = self.build_mesh(address, grid.as_ref(), sides);
        let handle = match self.gpu.create_geometry(&mesh) {
            Ok(handle) => handle,
            Err(e) => return self.note_gpu_error(&e),
        };
        if let Some(node) = self.tree.get_mut(&address) {
            if let Some(old) = node.segment.set_placeholder(handle, mesh.center, source, sides) {
                self.gpu.delete_geometry(old);
            }
        }
        Ok(())
    }

    fn update_materials(&mut self, address: TileAddress, now: Instant, stats: &mut FrameStats) {
        for index in 0..self.layers.len() {
            let layer = &self.layers[index];
            if !layer.is_drawn_at(address.zoom) {
                continue;
            }
            let id = layer.id;
            let owner = address.ancestor_at(layer.source_zoom(address.zoom)).unwrap_or(address);

            if owner != address {
                // The provider stops short of this zoom; draw its deepest tile
                if let Some(node) = self.tree.get_mut(&address) {
                    let material = node.segment.material_entry(id);
                    if !material.is_terminal() {
                        material.fail_permanently(FetchError::OutOfRange(address));
                    }
                }
            }
            self.request_imagery(owner, index, now, stats);
        }
    }

    fn request_imagery(
        &mut self,
        owner: TileAddress,
        index: usize,
        now: Instant,
        stats: &mut FrameStats,
    ) {
        let layer = &self.layers[index];
        let (id, version) = (layer.id, layer.version);
        let Some(node) = self.tree.get_mut(&owner) else {
            return;
        };
        let material = node.segment.material_entry(id);

        if material.status() == MaterialStatus::Loading {
            if let Some(ticket) = material.ticket() {
                self.loader.touch(ResourceKind::Imagery(id), ticket, self.frame);
            }
            return;
        }
        if !material.wants_load(version, now) {
            return;
        }
        if let Some(texture) = self.texture_cache.adopt((owner, id), version) {
            if let Some(old) = material.adopt(texture, version, owner) {
                self.gpu.delete_texture(old);
            }
            log::trace!("Adopted cached texture for {} {}", owner, id);
            return;
        }

        let ticket = self.loader.next_ticket();
        material.begin_loading(ticket, version);
        let request = TileRequest {
            ticket,
            address: owner,
            kind: ResourceKind::Imagery(id),
            version,
            priority: self.frame,
        };
        self.loader.submit(request, Arc::clone(&layer.desc.source), DecodeJob::Image);
        stats.requests_issued += 1;
    }

    /// Deepest zoom each resource is fetched at
    fn provider_caps(&self) -> Vec<(ResourceKind, u8)> {
        let terrain = self.terrain.as_ref().map(|t| (ResourceKind::Terrain, t.max_zoom));
        let layers = self.layers.iter().map(|l| (ResourceKind::Imagery(l.id), l.desc.max_zoom));
        terrain.into_iter().chain(layers).collect()
    }

    /// Return the owner of a discarded request to its idle state so it asks
    /// again once it is back in view.
    fn reset_owner(&mut self, request: &TileRequest) {
        let Some(node) = self.tree.get_mut(&request.address) else {
            return;
        };
        match request.kind {
            ResourceKind::Terrain => {
                if node.segment.terrain.owns(request.ticket) {
                    node.segment.abort_terrain();
                }
            }
            ResourceKind::Imagery(layer) => {
                if let Some(material) = node.segment.material_mut(layer) {
                    if material.ticket() == Some(request.ticket) {
                        material.abort();
                    }
                }
            }
        }
    }

    fn build_draw_list(&mut self, rendering: &[TileAddress]) {
        self.draw_list.clear();
        let mut applied = Vec::new();

        for &address in rendering {
            let Some(node) = self.tree.get(&address) else {
                continue;
            };
            let Some(geometry) = node.segment.drawable_geometry() else {
                continue;
            };

            let mut layers = Vec::with_capacity(self.layers.len());
            for layer in &self.layers {
                if !layer.is_drawn_at(address.zoom) {
                    continue;
                }
                // Own texture, else the nearest ancestor's
                let found = std::iter::once(address).chain(address.ancestors()).find_map(|a| {
                    self.tree.get(&a).and_then(|n| n.segment.texture(layer.id)).map(|t| (a, t))
                });
                let Some((source, texture)) = found else {
                    continue;
                };
                let bias = TextureBias::between(address, source);
                applied.push((address, layer.id, source, bias));
                layers.push(LayerDraw {
                    layer: layer.id,
                    texture,
                    bias,
                    opacity: layer.desc.opacity,
                    source,
                });
            }

            self.draw_list.push(DrawCommand {
                address,
                geometry,
                center: node.segment.center(),
                layers,
            });
        }

        for (address, layer, source, bias) in applied {
            if let Some(material) = self.tree.material_mut(&address, layer) {
                material.apply(source, bias);
            }
        }
    }
}

impl Drop for Planet {
    fn drop(&mut self) {
        if self.gpu_lost {
            return;
        }
        for node in self.tree.nodes_mut() {
            node.segment.release(&mut *self.gpu);
        }
        for texture in self.texture_cache.drain() {
            self.gpu.delete_texture(texture);
        }
    }
}

/// A pending request is still worth running only if its node exists, takes
/// part in drawing and still waits for this very ticket, and no other tile
/// covers the same ground with the same resource.
///
/// A split node's request is superseded once a descendant loads or holds that
/// resource itself, unless the node sits at the provider's deepest zoom and
/// serves everything below it. A request under a rendering ancestor that
/// already holds the resource is superseded as well.
fn is_eligible(tree: &QuadTree, caps: &[(ResourceKind, u8)], request: &TileRequest) -> bool {
    let Some(node) = tree.get(&request.address) else {
        return false;
    };
    if node.state == RenderState::NotRendering {
        return false;
    }
    let waiting = match request.kind {
        ResourceKind::Terrain => node.segment.terrain.owns(request.ticket),
        ResourceKind::Imagery(layer) => {
            node.segment.material(layer).is_some_and(|m| m.ticket() == Some(request.ticket))
        }
    };
    if !waiting {
        return false;
    }

    let capped = caps
        .iter()
        .any(|&(kind, zoom)| kind == request.kind && zoom == request.address.zoom);
    let split = node.state == RenderState::WalkThrough;
    if split && !capped && descendant_holds(tree, node, request.kind) {
        return false;
    }
    !request.address.ancestors().any(|a| {
        tree.get(&a).is_some_and(|n| n.is_rendering() && has_ready(&n.segment, request.kind))
    })
}

/// The resource is loaded for this segment
fn has_ready(segment: &Segment, kind: ResourceKind) -> bool {
    match kind {
        ResourceKind::Terrain => segment.terrain_state() == TerrainState::Ready,
        ResourceKind::Imagery(layer) => segment.texture(layer).is_some(),
    }
}

/// Some descendant of `node` has the resource loaded or on its way
fn descendant_holds(tree: &QuadTree, node: &QuadNode, kind: ResourceKind) -> bool {
    let mut stack: Vec<TileAddress> = node.children.into_iter().flatten().collect();
    while let Some(address) = stack.pop() {
        let Some(descendant) = tree.get(&address) else {
            continue;
        };
        let loading = match kind {
            ResourceKind::Terrain => descendant.segment.terrain.ticket.is_some(),
            ResourceKind::Imagery(layer) => {
                descendant.segment.material(layer).is_some_and(|m| m.ticket().is_some())
            }
        };
        if loading || has_ready(&descendant.segment, kind) {
            return true;
        }
        stack.extend(descendant.children.into_iter().flatten());
    }
    false
}

/// Offset and scale of `node` inside its ancestor `source`, as fractions of
/// the ancestor tile.
fn sub_extent(node: TileAddress, source: TileAddress) -> ([f64; 2], f64) {
    let n = (1u64 << node.zoom.saturating_sub(source.zoom)) as f64;
    let offset = [
        (node.x as f64 - source.x as f64 * n) / n,
        (node.y as f64 - source.y as f64 * n) / n,
    ];
    (offset, 1.0 / n)
}

/// Approximate size of a tile in meters (east-west, north-south).
fn tile_size_m(tree: &QuadTree, address: TileAddress) -> (f64, f64) {
    let extent = tree.scheme().extent(&address);
    let radius = tree.ellipsoid().maximum_radius();
    let lat = extent.center().y.to_radians();
    (
        radius * extent.width().to_radians() * lat.cos().max(1e-3),
        radius * extent.height().to_radians(),
    )
}
