//! The tile tree and its lifecycle: bounding volumes, load states, content
//! loaders, the per-frame selection traversal, and the tileset façade.

mod bounds;
mod content;
mod id;
mod json_loader;
mod loader;
mod manager;
mod selection;
mod terrain_loader;
mod tile;
mod tileset;

pub use bounds::{BoundingRegion, BoundingSphere, BoundingVolume, OrientedBoundingBox};
pub use content::{TileContent, TileLoadState, TileRenderContent};
pub use id::{OctreeTileId, QuadtreeTileId, QuadtreeTileRange, TileAvailability, TileId};
pub use json_loader::TilesetJsonLoader;
pub use loader::{
    state_for_http_failure, Attribution, BackoffTracker, LoaderResult, TileLoadInput,
    TileLoadResult, TilesetContentLoader, TilesetExternals,
};
pub use manager::{ContentOptions, TilesetContentManager};
pub use selection::{select_tiles, SelectionOutput, ViewState};
pub use terrain_loader::LayerJsonTerrainLoader;
pub use tile::{
    SelectionResult, SelectionState, Tile, TileArena, TileIndex, TileInitializer, TileRefine,
};
pub use tileset::{Tileset, TilesetOptions, ViewUpdateResult};
