//! Quantized-mesh terrain loader bootstrapped from layer.json

use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::asset::resolve_url;
use crate::error::{Error, Result};
use crate::geodesy::{self, Ellipsoid, GeographicTilingScheme, QuadtreeTileId};
use crate::quantized::decode_quantized_mesh;
use crate::runtime::Future;

use super::bounds::{BoundingRegion, BoundingVolume};
use super::content::{TileContent, TileLoadState, TileRenderContent};
use super::id::{QuadtreeTileRange, TileAvailability, TileId};
use super::loader::{
    state_for_http_failure, Attribution, BackoffTracker, LoaderResult, TileLoadInput,
    TileLoadResult, TilesetContentLoader, TilesetExternals,
};
use super::tile::{Tile, TileArena, TileIndex, TileRefine};

/// Height interval assumed before a tile's real range is decoded.
const DEFAULT_MINIMUM_HEIGHT: f64 = -1000.0;
const DEFAULT_MAXIMUM_HEIGHT: f64 = 9000.0;

/// Heightmap-equivalent screen-space quality used to estimate the level-0
/// geometric error.
const TERRAIN_QUALITY: f64 = 0.25;
const TERRAIN_TILE_WIDTH: f64 = 65.0;

#[derive(Deserialize)]
struct LayerJsonDocument {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    tiles: Vec<String>,
    #[serde(default)]
    available: Vec<Vec<RangeDocument>>,
    #[serde(default)]
    attribution: String,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

#[derive(Deserialize)]
struct RangeDocument {
    #[serde(rename = "startX")]
    start_x: u32,
    #[serde(rename = "startY")]
    start_y: u32,
    #[serde(rename = "endX")]
    end_x: u32,
    #[serde(rename = "endY")]
    end_y: u32,
}

fn level_zero_geometric_error(ellipsoid: &Ellipsoid, tiling: &GeographicTilingScheme) -> f64 {
    ellipsoid.maximum_radius() * 2.0 * std::f64::consts::PI * TERRAIN_QUALITY
        / (TERRAIN_TILE_WIDTH * tiling.root_tiles_x as f64)
}

/// Loader for quantized-mesh terrain layers.
///
/// The tree grows implicitly: each decoded tile contributes availability
/// ranges, and its initialiser creates exactly the available children.
pub struct LayerJsonTerrainLoader {
    base_url: String,
    template: String,
    version: String,
    tiling: GeographicTilingScheme,
    availability: Arc<Mutex<TileAvailability>>,
    backoff: Arc<BackoffTracker>,
}

impl LayerJsonTerrainLoader {
    /// Fetch and parse `layer.json`, creating the synthetic root and the
    /// available level-0 tiles.
    pub fn create_loader(
        externals: &TilesetExternals,
        url: &str,
        headers: Vec<(String, String)>,
    ) -> Future<Result<LoaderResult>> {
        let fetch = externals.accessor.get(&externals.system, url, &headers);
        fetch.then_in_main(move |response| {
            if !response.is_success() {
                return Err(Error::Http {
                    status: response.status,
                    url: response.url,
                });
            }
            let document: LayerJsonDocument = serde_json::from_slice(&response.body)
                .map_err(|e| Error::InvalidLayer(e.to_string()))?;
            let template = document
                .tiles
                .first()
                .cloned()
                .ok_or_else(|| Error::InvalidLayer("no tile URL templates".into()))?;

            let mut availability = TileAvailability::default();
            for (level, ranges) in document.available.iter().enumerate() {
                availability.add_ranges(ranges.iter().map(|r| QuadtreeTileRange {
                    level: level as u32,
                    start_x: r.start_x,
                    start_y: r.start_y,
                    end_x: r.end_x,
                    end_y: r.end_y,
                }));
            }

            let tiling = GeographicTilingScheme::default();
            let error_level_zero = level_zero_geometric_error(&Ellipsoid::WGS84, &tiling);

            let mut arena = TileArena::new();
            let mut root = Tile::new(
                TileId::Url(String::new()),
                BoundingVolume::Region(BoundingRegion::new(
                    tiling.rectangle,
                    DEFAULT_MINIMUM_HEIGHT,
                    DEFAULT_MAXIMUM_HEIGHT,
                )),
                error_level_zero * 2.0,
                TileRefine::Replace,
                geodesy::Y_UP_TO_Z_UP,
            );
            root.unconditionally_refine = true;
            let root = arena.alloc(root, None);

            for y in 0..tiling.root_tiles_y {
                for x in 0..tiling.root_tiles_x {
                    let id = QuadtreeTileId::new(0, x, y);
                    if !availability.is_empty() && !availability.is_available(id) {
                        continue;
                    }
                    let tile = Tile::new(
                        TileId::Quadtree(id),
                        BoundingVolume::Region(BoundingRegion::new(
                            tiling.tile_rectangle(id),
                            DEFAULT_MINIMUM_HEIGHT,
                            DEFAULT_MAXIMUM_HEIGHT,
                        )),
                        error_level_zero,
                        TileRefine::Replace,
                        geodesy::Y_UP_TO_Z_UP,
                    );
                    arena.alloc(tile, Some(root));
                }
            }

            let mut attributions = Vec::new();
            if !document.attribution.is_empty() {
                attributions.push(Attribution {
                    html: document.attribution,
                    collapsible: true,
                });
            }

            Ok(LoaderResult {
                loader: Arc::new(LayerJsonTerrainLoader {
                    base_url: response.url,
                    template,
                    version: document.version,
                    tiling,
                    availability: Arc::new(Mutex::new(availability)),
                    backoff: Arc::new(BackoffTracker::default()),
                }),
                arena,
                root,
                request_headers: headers,
                attributions,
            })
        })
    }

    fn tile_url(&self, id: QuadtreeTileId) -> String {
        let path = self
            .template
            .replace("{z}", &id.level.to_string())
            .replace("{x}", &id.x.to_string())
            .replace("{y}", &id.y.to_string())
            .replace("{version}", &self.version);
        resolve_url(&self.base_url, &path)
    }
}

impl TilesetContentLoader for LayerJsonTerrainLoader {
    fn load_tile_content(
        &self,
        input: TileLoadInput,
        externals: &TilesetExternals,
        headers: Vec<(String, String)>,
    ) -> Future<TileLoadResult> {
        let id = match input.tile_id {
            TileId::Quadtree(id) => id,
            // The synthetic root has nothing to fetch.
            _ => return externals.system.resolved(TileLoadResult::empty_success()),
        };
        if !self.backoff.is_ready(input.tile_index) {
            return externals.system.resolved(TileLoadResult::retry_later(0));
        }

        let url = self.tile_url(id);
        let rectangle = self.tiling.tile_rectangle(id);
        let tiling = self.tiling;
        let availability = self.availability.clone();
        let backoff = self.backoff.clone();
        let tile_index = input.tile_index;

        let fetch = externals.accessor.get(&externals.system, &url, &headers);
        fetch.then_in_worker(move |response| {
            if !response.is_success() {
                if state_for_http_failure(response.status) == TileLoadState::FailedTemporarily {
                    // 401 is handled by credential refresh, not backoff.
                    if response.status != 401 {
                        backoff.record_failure(tile_index);
                    }
                    return TileLoadResult::retry_later(response.status);
                }
                return TileLoadResult::failed(response.status);
            }
            backoff.clear(tile_index);

            let decoded =
                decode_quantized_mesh(&response.body, id, &rectangle, &Ellipsoid::WGS84);
            let Some(model) = decoded.model else {
                log::warn!("truncated quantized-mesh payload at {}", response.url);
                return TileLoadResult::failed(response.status);
            };

            availability
                .lock()
                .unwrap()
                .add_ranges(decoded.available.iter().copied());

            let region = decoded
                .region
                .unwrap_or(BoundingRegion::new(
                    rectangle,
                    DEFAULT_MINIMUM_HEIGHT,
                    DEFAULT_MAXIMUM_HEIGHT,
                ));

            let initializer = Box::new(move |arena: &mut TileArena, index: TileIndex| {
                expand_available_children(arena, index, id, region, tiling, &availability);
            });

            TileLoadResult::success(
                TileContent::Render(TileRenderContent { model: Some(model) }),
                response.url,
            )
            .with_initializer(initializer)
        })
    }
}

/// Tighten the tile's bounds to the decoded height range and create child
/// tiles for exactly the available quadtree children.
fn expand_available_children(
    arena: &mut TileArena,
    index: TileIndex,
    id: QuadtreeTileId,
    region: BoundingRegion,
    tiling: GeographicTilingScheme,
    availability: &Mutex<TileAvailability>,
) {
    let (child_error, refine, transform, children) = {
        let Some(tile) = arena.get_mut(index) else {
            return;
        };
        tile.bounding_volume = BoundingVolume::Region(region);
        (
            tile.geometric_error * 0.5,
            tile.refine,
            tile.transform,
            tile.children.clone(),
        )
    };
    let existing: Vec<QuadtreeTileId> = children
        .iter()
        .filter_map(|&c| match arena.get(c).map(|t| &t.id) {
            Some(TileId::Quadtree(q)) => Some(*q),
            _ => None,
        })
        .collect();

    let availability = availability.lock().unwrap();
    for child_id in id.children() {
        if !availability.is_available(child_id) || existing.contains(&child_id) {
            continue;
        }
        let child = Tile::new(
            TileId::Quadtree(child_id),
            BoundingVolume::Region(BoundingRegion::new(
                tiling.tile_rectangle(child_id),
                region.minimum_height,
                region.maximum_height,
            )),
            child_error,
            refine,
            transform,
        );
        arena.alloc(child, Some(index));
    }
}
