//! Geographic quadtree tiling scheme

use serde::{Deserialize, Serialize};

use super::GlobeRectangle;

/// Identifier of a tile in a quadtree: level plus column/row at that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuadtreeTileId {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl QuadtreeTileId {
    pub fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }

    pub fn parent(self) -> Option<QuadtreeTileId> {
        if self.level == 0 {
            None
        } else {
            Some(QuadtreeTileId::new(self.level - 1, self.x / 2, self.y / 2))
        }
    }

    pub fn children(self) -> [QuadtreeTileId; 4] {
        let level = self.level + 1;
        let x = self.x * 2;
        let y = self.y * 2;
        [
            QuadtreeTileId::new(level, x, y),
            QuadtreeTileId::new(level, x + 1, y),
            QuadtreeTileId::new(level, x, y + 1),
            QuadtreeTileId::new(level, x + 1, y + 1),
        ]
    }
}

/// Tiling of the full globe rectangle with a 2x1 root grid, the layout used
/// by quantized-mesh terrain layers.
#[derive(Debug, Clone, Copy)]
pub struct GeographicTilingScheme {
    pub rectangle: GlobeRectangle,
    pub root_tiles_x: u32,
    pub root_tiles_y: u32,
}

impl Default for GeographicTilingScheme {
    fn default() -> Self {
        Self {
            rectangle: GlobeRectangle::MAXIMUM,
            root_tiles_x: 2,
            root_tiles_y: 1,
        }
    }
}

impl GeographicTilingScheme {
    pub fn tiles_x_at_level(&self, level: u32) -> u32 {
        self.root_tiles_x << level
    }

    pub fn tiles_y_at_level(&self, level: u32) -> u32 {
        self.root_tiles_y << level
    }

    /// Geodetic rectangle covered by the given tile. Rows count from the
    /// south edge, matching the quantized-mesh layer convention.
    pub fn tile_rectangle(&self, id: QuadtreeTileId) -> GlobeRectangle {
        let tiles_x = self.tiles_x_at_level(id.level) as f64;
        let tiles_y = self.tiles_y_at_level(id.level) as f64;
        let width = self.rectangle.width() / tiles_x;
        let height = self.rectangle.height() / tiles_y;

        let west = self.rectangle.west + id.x as f64 * width;
        let south = self.rectangle.south + id.y as f64 * height;
        GlobeRectangle::new(west, south, west + width, south + height)
    }
}
