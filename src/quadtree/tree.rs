//! Tile tree: visibility walk, split/merge and neighbor resolution
//!
//! Nodes are stored in an arena keyed by their address. A walk visits the
//! tree from the roots once per frame and leaves every node in one of three
//! render states; the rendering nodes always form an antichain that covers
//! every visible part of the globe exactly once.

use std::collections::HashMap;

use crate::core::camera::View;
use crate::core::config::PlanetConfig;
use crate::math::Ellipsoid;
use crate::planet::LayerId;
use crate::tile::{Side, TileAddress, TileBounds, TilingScheme};

use super::lod::{self, LodDecision};
use super::material::Material;
use super::neighbor::{neighbor_address, NeighborRelation};
use super::node::{QuadNode, RenderState};
use super::segment::Segment;

/// Structural changes made by one walk
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub visited: usize,
    pub splits: usize,
    pub merges: usize,
    /// Nodes removed by merges
    pub pruned: usize,
}

pub struct QuadTree {
    scheme: TilingScheme,
    ellipsoid: Ellipsoid,
    grid_size: u32,
    max_zoom: u8,
    max_sse: f64,
    hysteresis: u32,
    nodes: HashMap<TileAddress, QuadNode>,
    roots: Vec<TileAddress>,
}

impl QuadTree {
    /// Create a tree holding the scheme's root tiles
    pub fn new(config: &PlanetConfig) -> Self {
        let mut tree = Self {
            scheme: config.tiling,
            ellipsoid: config.ellipsoid,
            grid_size: config.grid_size,
            max_zoom: config.max_zoom,
            max_sse: config.max_screen_space_error,
            hysteresis: config.merge_hysteresis_frames,
            nodes: HashMap::new(),
            roots: config.tiling.roots(),
        };
        for root in tree.roots.clone() {
            tree.insert(root, 0.0, 0.0);
        }
        tree
    }

    fn insert(&mut self, address: TileAddress, min_height: f64, max_height: f64) {
        let bounds =
            TileBounds::compute(&self.scheme, &self.ellipsoid, address, min_height, max_height);
        let node = QuadNode::new(Segment::new(address, bounds), self.grid_size_log2());
        self.nodes.insert(address, node);
    }

    pub fn scheme(&self) -> &TilingScheme {
        &self.scheme
    }

    pub fn ellipsoid(&self) -> &Ellipsoid {
        &self.ellipsoid
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    pub fn grid_size_log2(&self) -> u32 {
        self.grid_size.trailing_zeros()
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    pub fn roots(&self) -> &[TileAddress] {
        &self.roots
    }

    pub fn get(&self, address: &TileAddress) -> Option<&QuadNode> {
        self.nodes.get(address)
    }

    pub fn get_mut(&mut self, address: &TileAddress) -> Option<&mut QuadNode> {
        self.nodes.get_mut(address)
    }

    pub fn contains(&self, address: &TileAddress) -> bool {
        self.nodes.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &QuadNode> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut QuadNode> {
        self.nodes.values_mut()
    }

    /// Geometric error of a tile mesh at `zoom`
    pub fn geometric_error(&self, zoom: u8) -> f64 {
        lod::geometric_error(&self.scheme, &self.ellipsoid, zoom, self.grid_size)
    }

    /// Material of a layer on the node at `address`, if both exist
    pub fn material_mut(&mut self, address: &TileAddress, layer: LayerId) -> Option<&mut Material> {
        self.nodes.get_mut(address).and_then(|n| n.segment.material_mut(layer))
    }

    /// Nearest strict ancestor of `address` present in the tree that satisfies `predicate`
    pub fn nearest_ancestor(
        &self,
        address: TileAddress,
        predicate: impl Fn(&QuadNode) -> bool,
    ) -> Option<&QuadNode> {
        address.ancestors().filter_map(|a| self.nodes.get(&a)).find(|n| predicate(n))
    }

    /// Refit a node's bounding volume to its current elevation range.
    pub fn refresh_bounds(&mut self, address: &TileAddress) {
        let Some(node) = self.nodes.get_mut(address) else {
            return;
        };
        let (min, max) = node
            .segment
            .elevation()
            .map(|grid| (grid.min as f64, grid.max as f64))
            .unwrap_or((0.0, 0.0));
        node.segment.bounds =
            TileBounds::compute(&self.scheme, &self.ellipsoid, *address, min, max);
    }

    /// Run the visibility walk for one frame.
    ///
    /// # Arguments
    /// * `view` - Viewer deciding culling and refinement
    /// * `release` - Called with the segment of every pruned node before it is dropped
    pub fn walk(&mut self, view: &dyn View, release: &mut dyn FnMut(&mut Segment)) -> WalkStats {
        let mut stats = WalkStats::default();
        for root in self.roots.clone() {
            self.walk_node(root, view, release, &mut stats);
        }
        if stats.splits > 0 || stats.merges > 0 {
            log::debug!(
                "Walk: {} splits, {} merges ({} nodes pruned), {} nodes",
                stats.splits,
                stats.merges,
                stats.pruned,
                self.nodes.len()
            );
        }
        stats
    }

    fn walk_node(
        &mut self,
        address: TileAddress,
        view: &dyn View,
        release: &mut dyn FnMut(&mut Segment),
        stats: &mut WalkStats,
    ) {
        let Some(node) = self.nodes.get(&address) else {
            return;
        };
        stats.visited += 1;
        let bounds = node.segment.bounds;
        let children = node.children;
        let error = self.geometric_error(address.zoom);

        match lod::decide(view, &bounds, self.max_zoom, error, self.max_sse) {
            LodDecision::Cull => {
                if children.is_some() {
                    self.merge(address, release, stats);
                }
                self.set_state(address, RenderState::NotRendering);
            }
            LodDecision::Render => {
                self.set_state(address, RenderState::Rendering);
                if let Some(children) = children {
                    for child in children {
                        self.hide_subtree(child);
                    }
                    if self.bump_idle(address) >= self.hysteresis {
                        self.merge(address, release, stats);
                    }
                }
            }
            LodDecision::Refine => {
                let children = match children {
                    Some(children) => children,
                    None => {
                        stats.splits += 1;
                        self.split(address)
                    }
                };
                self.set_state(address, RenderState::WalkThrough);
                for child in children {
                    self.walk_node(child, view, release, stats);
                }

                let all_idle = children.iter().all(|c| {
                    self.nodes.get(c).is_none_or(|n| n.state == RenderState::NotRendering)
                });
                if !all_idle {
                    self.reset_idle(address);
                } else if self.bump_idle(address) >= self.hysteresis {
                    self.merge(address, release, stats);
                    self.set_state(address, RenderState::Rendering);
                }
            }
        }
    }

    fn set_state(&mut self, address: TileAddress, state: RenderState) {
        if let Some(node) = self.nodes.get_mut(&address) {
            node.state = state;
            if node.children.is_none() {
                node.idle_frames = 0;
            }
        }
    }

    fn bump_idle(&mut self, address: TileAddress) -> u32 {
        match self.nodes.get_mut(&address) {
            Some(node) => {
                node.idle_frames += 1;
                node.idle_frames
            }
            None => 0,
        }
    }

    fn reset_idle(&mut self, address: TileAddress) {
        if let Some(node) = self.nodes.get_mut(&address) {
            node.idle_frames = 0;
        }
    }

    /// Mark a subtree as not drawn.
    fn hide_subtree(&mut self, address: TileAddress) {
        let mut stack = vec![address];
        while let Some(address) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(&address) {
                node.state = RenderState::NotRendering;
                stack.extend(node.children.into_iter().flatten());
            }
        }
    }

    /// Create the four children of a leaf. Their bounds start from the
    /// parent's height range until their own terrain arrives.
    fn split(&mut self, address: TileAddress) -> [TileAddress; 4] {
        let (min, max) = self
            .nodes
            .get(&address)
            .map(|n| (n.segment.bounds.min_height, n.segment.bounds.max_height))
            .unwrap_or((0.0, 0.0));
        let children = address.children();
        for child in children {
            self.insert(child, min, max);
        }
        if let Some(node) = self.nodes.get_mut(&address) {
            node.children = Some(children);
            node.idle_frames = 0;
        }
        log::trace!("Split {}", address);
        children
    }

    /// Prune every descendant of `address`, releasing each segment exactly once.
    fn merge(
        &mut self,
        address: TileAddress,
        release: &mut dyn FnMut(&mut Segment),
        stats: &mut WalkStats,
    ) {
        let Some(children) = self.nodes.get_mut(&address).and_then(|n| {
            n.idle_frames = 0;
            n.children.take()
        }) else {
            return;
        };

        let mut doomed = Vec::new();
        for child in children {
            self.collect_post_order(child, &mut doomed);
        }
        for descendant in &doomed {
            if let Some(mut node) = self.nodes.remove(descendant) {
                release(&mut node.segment);
            }
        }

        stats.merges += 1;
        stats.pruned += doomed.len();
        log::trace!("Merged {} ({} nodes pruned)", address, doomed.len());
    }

    fn collect_post_order(&self, address: TileAddress, out: &mut Vec<TileAddress>) {
        if let Some(children) = self.nodes.get(&address).and_then(|n| n.children) {
            for child in children {
                self.collect_post_order(child, out);
            }
        }
        out.push(address);
    }

    /// Addresses of rendering nodes in ascending order
    pub fn rendering(&self) -> Vec<TileAddress> {
        let mut rendering: Vec<TileAddress> =
            self.nodes.values().filter(|n| n.is_rendering()).map(|n| n.address).collect();
        rendering.sort_unstable();
        rendering
    }

    /// How the tile across `side` of `address` is drawn this frame.
    pub fn relation(&self, address: TileAddress, side: Side) -> NeighborRelation {
        let Some(across) = neighbor_address(&self.scheme, address, side) else {
            return NeighborRelation::Boundary;
        };
        if self.nodes.get(&across).is_some_and(|n| n.state == RenderState::WalkThrough) {
            return NeighborRelation::Finer;
        }
        std::iter::once(across)
            .chain(across.ancestors())
            .find(|a| self.nodes.get(a).is_some_and(QuadNode::is_rendering))
            .map(|a| {
                if a.zoom == address.zoom {
                    NeighborRelation::Same
                } else {
                    NeighborRelation::Coarser(address.zoom - a.zoom)
                }
            })
            .unwrap_or(NeighborRelation::Hidden)
    }

    /// Refresh the neighbor relations and edge lattice sizes of every
    /// rendering node. Must run after the walk.
    pub fn resolve_neighbors(&mut self) {
        let grid_log2 = self.grid_size_log2();
        for address in self.rendering() {
            let relations = Side::ALL.map(|side| self.relation(address, side));
            if let Some(node) = self.nodes.get_mut(&address) {
                node.neighbors = relations;
                node.side_size_log2 = relations.map(|r| r.side_size_log2(grid_log2));
            }
        }
    }
}
