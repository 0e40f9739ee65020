//! Raster overlay tile providers

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use glam::DVec2;

use crate::asset::AssetAccessor;
use crate::geodesy::{Projection, QuadtreeTileId, Rectangle};
use crate::runtime::AsyncSystem;

use super::RasterOverlayOptions;

/// Load state of an overlay tile's texture.
#[derive(Debug, Default)]
pub enum OverlayTileState {
    #[default]
    Unloaded,
    Loading,
    /// Raw encoded texel payload; decoding is the renderer's concern.
    Loaded(Vec<u8>),
    Failed,
}

/// One imagery tile of an overlay, with a lazily-loaded texture.
#[derive(Debug)]
pub struct RasterOverlayTile {
    pub key: QuadtreeTileId,
    /// Projected rectangle this tile covers.
    pub rectangle: Rectangle,
    pub state: OverlayTileState,
}

/// An overlay tile bound to a geometry tile: which texture to sample and
/// how to remap the geometry tile's overlay UVs into it.
#[derive(Clone)]
pub struct RasterMappedToTile {
    pub overlay_id: u32,
    pub texture_coordinate_id: u32,
    pub tile: Arc<Mutex<RasterOverlayTile>>,
    /// `uv_tex = uv * scale + translation`
    pub translation: DVec2,
    pub scale: DVec2,
}

impl std::fmt::Debug for RasterMappedToTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterMappedToTile")
            .field("overlay_id", &self.overlay_id)
            .field("translation", &self.translation)
            .field("scale", &self.scale)
            .finish()
    }
}

/// Serves overlay tiles for one overlay layer.
///
/// A placeholder provider stands in while the real provider is created;
/// it serves no tiles and is swapped out on the main lane.
pub struct RasterOverlayTileProvider {
    pub overlay_id: u32,
    pub projection: Projection,
    options: Option<RasterOverlayOptions>,
    tiles: Mutex<HashMap<QuadtreeTileId, Arc<Mutex<RasterOverlayTile>>>>,
}

impl RasterOverlayTileProvider {
    pub fn new(overlay_id: u32, options: RasterOverlayOptions) -> Self {
        Self {
            overlay_id,
            projection: options.projection,
            options: Some(options),
            tiles: Mutex::new(HashMap::new()),
        }
    }

    pub fn placeholder(overlay_id: u32, projection: Projection) -> Self {
        Self {
            overlay_id,
            projection,
            options: None,
            tiles: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.options.is_none()
    }

    /// Projected rectangle covered by the whole overlay.
    pub fn coverage_rectangle(&self) -> Option<Rectangle> {
        let options = self.options.as_ref()?;
        Some(self.projection.project_rectangle(&options.tiling.rectangle))
    }

    /// Pick the overlay level whose tiles are no wider than the geometry
    /// rectangle, so one overlay tile covers it at adequate resolution.
    fn level_for_rectangle(&self, rectangle: &Rectangle) -> Option<u32> {
        let options = self.options.as_ref()?;
        let coverage = self.coverage_rectangle()?;
        if rectangle.width() <= 0.0 {
            return Some(0);
        }
        let mut level = 0u32;
        while level < options.maximum_level {
            let tile_width = coverage.width() / (options.tiling.tiles_x_at_level(level) as f64);
            if tile_width <= rectangle.width() {
                break;
            }
            level += 1;
        }
        Some(level)
    }

    fn tile_at(&self, key: QuadtreeTileId) -> Option<Arc<Mutex<RasterOverlayTile>>> {
        let options = self.options.as_ref()?;
        let mut tiles = self.tiles.lock().unwrap();
        Some(
            tiles
                .entry(key)
                .or_insert_with(|| {
                    let rectangle = self
                        .projection
                        .project_rectangle(&options.tiling.tile_rectangle(key));
                    Arc::new(Mutex::new(RasterOverlayTile {
                        key,
                        rectangle,
                        state: OverlayTileState::Unloaded,
                    }))
                })
                .clone(),
        )
    }

    /// Bind the overlay tile covering the centre of `geometry_rectangle`
    /// (geodetic) and compute the UV remap into that tile.
    pub fn map_to_geometry_tile(
        &self,
        geometry_rectangle: &crate::geodesy::GlobeRectangle,
        texture_coordinate_id: u32,
    ) -> Option<RasterMappedToTile> {
        let options = self.options.as_ref()?;
        let geometry = self.projection.project_rectangle(geometry_rectangle);
        let coverage = self.coverage_rectangle()?;
        if !coverage.intersects(&geometry) {
            return None;
        }

        let level = self.level_for_rectangle(&geometry)?;
        let tiles_x = options.tiling.tiles_x_at_level(level) as f64;
        let tiles_y = options.tiling.tiles_y_at_level(level) as f64;

        let center = DVec2::new(
            (geometry.min_x + geometry.max_x) * 0.5,
            (geometry.min_y + geometry.max_y) * 0.5,
        );
        let fx = ((center.x - coverage.min_x) / coverage.width()).clamp(0.0, 1.0 - 1e-12);
        let fy = ((center.y - coverage.min_y) / coverage.height()).clamp(0.0, 1.0 - 1e-12);
        let key = QuadtreeTileId::new(level, (fx * tiles_x) as u32, (fy * tiles_y) as u32);

        let tile = self.tile_at(key)?;
        let overlay_rect = tile.lock().unwrap().rectangle;

        let scale = DVec2::new(
            geometry.width() / overlay_rect.width(),
            geometry.height() / overlay_rect.height(),
        );
        let translation = DVec2::new(
            (geometry.min_x - overlay_rect.min_x) / overlay_rect.width(),
            (geometry.min_y - overlay_rect.min_y) / overlay_rect.height(),
        );

        Some(RasterMappedToTile {
            overlay_id: self.overlay_id,
            texture_coordinate_id,
            tile,
            translation,
            scale,
        })
    }

    /// Fetch the tile's texture if it is not already loading or loaded.
    pub fn load_tile_texture(
        &self,
        tile: Arc<Mutex<RasterOverlayTile>>,
        system: &AsyncSystem,
        accessor: &Arc<dyn AssetAccessor>,
    ) {
        let Some(options) = self.options.as_ref() else {
            return;
        };

        let url = {
            let mut guard = tile.lock().unwrap();
            if !matches!(guard.state, OverlayTileState::Unloaded) {
                return;
            }
            guard.state = OverlayTileState::Loading;
            options
                .url_template
                .replace("{z}", &guard.key.level.to_string())
                .replace("{x}", &guard.key.x.to_string())
                .replace("{y}", &guard.key.y.to_string())
        };

        let tile = tile.clone();
        accessor
            .get(system, &url, &[])
            .then_in_main(move |response| {
                let mut guard = tile.lock().unwrap();
                guard.state = if response.is_success() {
                    OverlayTileState::Loaded(response.body)
                } else {
                    log::warn!(
                        "overlay tile fetch failed with {} for {}",
                        response.status,
                        response.url
                    );
                    OverlayTileState::Failed
                };
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::{GeographicProjection, GeographicTilingScheme, GlobeRectangle};

    fn provider() -> RasterOverlayTileProvider {
        RasterOverlayTileProvider::new(
            0,
            RasterOverlayOptions {
                name: "imagery".into(),
                url_template: "https://o.example/{z}/{x}/{y}.png".into(),
                projection: Projection::Geographic(GeographicProjection),
                tiling: GeographicTilingScheme::default(),
                maximum_level: 18,
                tile_width: 256,
                tile_height: 256,
            },
        )
    }

    #[test]
    fn test_mapping_covers_geometry_rectangle() {
        let provider = provider();
        // A level-2-sized geometry tile in the eastern hemisphere.
        let geometry = GlobeRectangle::new(0.0, 0.0, 0.3, 0.3);
        let mapped = provider.map_to_geometry_tile(&geometry, 0).unwrap();

        let tile = mapped.tile.lock().unwrap();
        assert!(tile.rectangle.width() >= 0.3);
        // UV (0,0) of the geometry tile must land inside the overlay tile.
        assert!(mapped.translation.x >= 0.0 && mapped.translation.x <= 1.0);
        assert!(mapped.translation.y >= 0.0 && mapped.translation.y <= 1.0);
        assert!(mapped.scale.x <= 1.0 + 1e-9);
    }

    #[test]
    fn test_placeholder_serves_nothing() {
        let placeholder = RasterOverlayTileProvider::placeholder(
            1,
            Projection::Geographic(GeographicProjection),
        );
        assert!(placeholder.is_placeholder());
        assert!(placeholder
            .map_to_geometry_tile(&GlobeRectangle::new(0.0, 0.0, 0.1, 0.1), 1)
            .is_none());
    }

    #[test]
    fn test_tile_cache_is_keyed() {
        let provider = provider();
        let a = provider.tile_at(QuadtreeTileId::new(1, 0, 0)).unwrap();
        let b = provider.tile_at(QuadtreeTileId::new(1, 0, 0)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
