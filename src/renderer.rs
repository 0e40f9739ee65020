//! Renderer-facing collaborator seam

use std::any::Any;

use glam::DMat4;

use crate::mesh::Model;
use crate::tiles::{Tile, TileIndex};

/// Opaque renderer resource handle passed between lanes.
pub type ResourceHandle = Box<dyn Any + Send>;

/// Prepares renderer resources for loaded tile content.
///
/// `prepare_in_worker` runs on the worker pool right after decode;
/// `prepare_in_main` runs on the main lane when the tile transitions to
/// `Done`. `free` must accept either handle being absent, since unload can
/// happen from either phase.
pub trait PrepareRendererResources: Send + Sync {
    fn prepare_in_worker(&self, model: &Model, transform: &DMat4) -> Option<ResourceHandle>;

    fn prepare_in_main(&self, tile: &Tile, worker: Option<ResourceHandle>)
        -> Option<ResourceHandle>;

    fn free(&self, tile: TileIndex, worker: Option<ResourceHandle>, main: Option<ResourceHandle>);
}
