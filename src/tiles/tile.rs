//! Arena-backed tile tree

use glam::DMat4;
use serde::{Deserialize, Serialize};

use crate::overlay::RasterMappedToTile;
use crate::renderer::ResourceHandle;

use super::bounds::BoundingVolume;
use super::content::{TileContent, TileLoadState};
use super::id::TileId;

/// Refinement strategy toward child tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TileRefine {
    /// Children replace the parent.
    #[default]
    Replace,
    /// Children render in addition to the parent.
    Add,
}

/// Index of a tile in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileIndex(pub u32);

impl TileIndex {
    fn idx(self) -> usize {
        self.0 as usize
    }
}

/// How the selection traversal last classified a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionResult {
    #[default]
    None,
    Culled,
    Rendered,
    Refined,
}

/// Per-frame selection record.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionState {
    pub frame_number: u32,
    pub result: SelectionResult,
}

/// Closure a loader attaches to run on the main lane once content commits;
/// used to graft external-tileset children and availability-driven
/// quadtree expansion into the arena.
pub type TileInitializer = Box<dyn FnOnce(&mut TileArena, TileIndex) + Send>;

/// A node of the bounding-volume hierarchy.
///
/// The transform is pre-composed with the parent chain; consumers must not
/// multiply it again. Structure fields are public; the load state, content
/// slot, and renderer handles are owned by the content manager.
pub struct Tile {
    pub id: TileId,
    pub parent: Option<TileIndex>,
    pub children: Vec<TileIndex>,
    pub bounding_volume: BoundingVolume,
    pub content_bounding_volume: Option<BoundingVolume>,
    pub viewer_request_volume: Option<BoundingVolume>,
    pub geometric_error: f64,
    pub refine: TileRefine,
    pub transform: DMat4,
    pub unconditionally_refine: bool,
    pub raster_tiles: Vec<RasterMappedToTile>,

    pub(crate) state: TileLoadState,
    pub(crate) content: TileContent,
    pub(crate) worker_resources: Option<ResourceHandle>,
    pub(crate) main_resources: Option<ResourceHandle>,
    pub(crate) initializer: Option<TileInitializer>,
    pub(crate) selection: SelectionState,
}

impl Tile {
    pub fn new(
        id: TileId,
        bounding_volume: BoundingVolume,
        geometric_error: f64,
        refine: TileRefine,
        transform: DMat4,
    ) -> Self {
        Self {
            id,
            parent: None,
            children: Vec::new(),
            bounding_volume,
            content_bounding_volume: None,
            viewer_request_volume: None,
            geometric_error,
            refine,
            transform,
            unconditionally_refine: false,
            raster_tiles: Vec::new(),
            state: TileLoadState::Unloaded,
            content: TileContent::Unknown,
            worker_resources: None,
            main_resources: None,
            initializer: None,
            selection: SelectionState::default(),
        }
    }

    pub fn state(&self) -> TileLoadState {
        self.state
    }

    /// The content slot, readable only in `ContentLoaded` and `Done`.
    pub fn content(&self) -> Option<&TileContent> {
        match self.state {
            TileLoadState::ContentLoaded | TileLoadState::Done => Some(&self.content),
            _ => None,
        }
    }

    pub fn selection(&self) -> SelectionState {
        self.selection
    }

    pub fn is_renderable(&self) -> bool {
        self.state == TileLoadState::Done && self.content.render_content().is_some()
    }

    pub(crate) fn has_renderable_model(&self) -> bool {
        self.is_renderable()
            && self
                .content
                .render_content()
                .is_some_and(|c| c.model.is_some())
    }
}

/// Flat arena owning every tile of a tileset; parent/child links are
/// indices, which keeps the back-pointer cycle out of the ownership graph.
#[derive(Default)]
pub struct TileArena {
    tiles: Vec<Tile>,
}

impl TileArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, mut tile: Tile, parent: Option<TileIndex>) -> TileIndex {
        tile.parent = parent;
        let index = TileIndex(self.tiles.len() as u32);
        self.tiles.push(tile);
        if let Some(parent) = parent {
            self.tiles[parent.idx()].children.push(index);
        }
        index
    }

    pub fn get(&self, index: TileIndex) -> Option<&Tile> {
        self.tiles.get(index.idx())
    }

    pub fn get_mut(&mut self, index: TileIndex) -> Option<&mut Tile> {
        self.tiles.get_mut(index.idx())
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn indices(&self) -> impl Iterator<Item = TileIndex> {
        (0..self.tiles.len() as u32).map(TileIndex)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileIndex, &Tile)> {
        self.tiles
            .iter()
            .enumerate()
            .map(|(i, t)| (TileIndex(i as u32), t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::bounds::BoundingSphere;
    use glam::DVec3;

    fn sphere_tile(radius: f64) -> Tile {
        Tile::new(
            TileId::Url(String::new()),
            BoundingVolume::Sphere(BoundingSphere {
                center: DVec3::ZERO,
                radius,
            }),
            16.0,
            TileRefine::Replace,
            DMat4::IDENTITY,
        )
    }

    #[test]
    fn test_arena_links_parent_and_children() {
        let mut arena = TileArena::new();
        let root = arena.alloc(sphere_tile(100.0), None);
        let child = arena.alloc(sphere_tile(50.0), Some(root));

        assert_eq!(arena.get(child).unwrap().parent, Some(root));
        assert_eq!(arena.get(root).unwrap().children, vec![child]);
    }

    #[test]
    fn test_content_gated_by_state() {
        let mut tile = sphere_tile(1.0);
        assert!(tile.content().is_none());

        tile.state = TileLoadState::ContentLoaded;
        assert!(tile.content().is_some());

        tile.state = TileLoadState::ContentLoading;
        assert!(tile.content().is_none());
    }
}
