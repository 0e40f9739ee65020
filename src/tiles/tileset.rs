//! Tileset façade tying loaders, manager, selection and overlays together

use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::geodesy::GlobeRectangle;
use crate::overlay::RasterOverlayCollection;
use crate::runtime::Future;

use super::bounds::BoundingVolume;
use super::content::TileLoadState;
use super::json_loader::TilesetJsonLoader;
use super::loader::{Attribution, LoaderResult, TilesetExternals};
use super::manager::{ContentOptions, TilesetContentManager};
use super::selection::{select_tiles, ViewState};
use super::terrain_loader::LayerJsonTerrainLoader;
use super::tile::{TileArena, TileIndex};

/// Tuning knobs for selection and memory bounds.
#[derive(Debug, Clone, Copy)]
pub struct TilesetOptions {
    /// Refinement threshold in pixels of screen-space error.
    pub maximum_screen_space_error: f64,
    /// Per-frame cap on newly started loads; the rest wait a frame.
    pub maximum_loads_per_frame: usize,
    /// Resident-content bound; least-recently-selected tiles unload first.
    pub maximum_resident_tiles: usize,
    pub content: ContentOptions,
}

impl Default for TilesetOptions {
    fn default() -> Self {
        Self {
            maximum_screen_space_error: 16.0,
            maximum_loads_per_frame: 20,
            maximum_resident_tiles: 512,
            content: ContentOptions::default(),
        }
    }
}

/// What one `update_view` pass did.
#[derive(Debug, Default)]
pub struct ViewUpdateResult {
    pub tiles_to_render: Vec<TileIndex>,
    pub tiles_visited: usize,
    pub tiles_culled: usize,
    pub tiles_load_started: usize,
    pub tiles_unloaded: usize,
}

/// A streamed tileset: the tile tree plus everything needed to keep the
/// resident set tracking the camera. The embedding application calls
/// [`Tileset::update_view`] once per frame, and pumps the async system's
/// main lane alongside.
pub struct Tileset {
    externals: TilesetExternals,
    tiles: Arc<Mutex<TileArena>>,
    root: TileIndex,
    manager: TilesetContentManager,
    overlays: RasterOverlayCollection,
    options: TilesetOptions,
    attributions: Vec<Attribution>,
    frame_number: u32,
}

impl Tileset {
    /// Assemble a tileset from a loader-creation result.
    pub fn from_loader_result(
        externals: TilesetExternals,
        result: LoaderResult,
        options: TilesetOptions,
    ) -> Self {
        let headers = Arc::new(Mutex::new(Vec::new()));
        Self::with_shared_headers(externals, result, options, headers)
    }

    /// Like [`Tileset::from_loader_result`], with a caller-provided header
    /// vector. Loaders that push header changes (credential refresh) close
    /// over the same vector.
    fn with_shared_headers(
        externals: TilesetExternals,
        result: LoaderResult,
        options: TilesetOptions,
        headers: Arc<Mutex<Vec<(String, String)>>>,
    ) -> Self {
        *headers.lock().unwrap() = result.request_headers.clone();
        let tiles = Arc::new(Mutex::new(result.arena));
        let manager = TilesetContentManager::new(
            externals.clone(),
            tiles.clone(),
            headers,
            result.loader,
            options.content,
        );
        Self {
            externals,
            tiles,
            root: result.root,
            manager,
            overlays: RasterOverlayCollection::new(),
            options,
            attributions: result.attributions,
            frame_number: 0,
        }
    }

    /// Stream a Cesium-ion asset: resolve the endpoint through `cache`,
    /// build the concrete loader, and route credential refreshes into the
    /// content manager's request headers.
    pub fn from_ion_asset(
        externals: TilesetExternals,
        cache: Arc<crate::ion::EndpointCache>,
        asset_id: u64,
        access_token: &str,
        endpoint_base: &str,
        options: TilesetOptions,
    ) -> Future<Result<Tileset>> {
        let headers: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let listener_headers = headers.clone();
        let listener: crate::ion::HeaderChangeListener =
            Arc::new(move |name: &str, value: &str| {
                super::manager::upsert_header(&listener_headers, name, value);
            });

        let assemble = externals.clone();
        crate::ion::IonTilesetLoader::create_loader(
            &externals,
            cache,
            asset_id,
            access_token,
            endpoint_base,
            listener,
        )
        .then_immediate(move |result| {
            result.map(|result| Tileset::with_shared_headers(assemble, result, options, headers))
        })
    }

    /// Stream an explicit 3D Tiles tileset from its `tileset.json` URL.
    pub fn from_tileset_json_url(
        externals: TilesetExternals,
        url: &str,
        options: TilesetOptions,
    ) -> Future<Result<Tileset>> {
        let assemble = externals.clone();
        TilesetJsonLoader::create_loader(&externals, url, Vec::new()).then_immediate(
            move |result| {
                result.map(|result| Tileset::from_loader_result(assemble, result, options))
            },
        )
    }

    /// Stream quantized-mesh terrain from a `layer.json` URL.
    pub fn from_terrain_layer_url(
        externals: TilesetExternals,
        url: &str,
        options: TilesetOptions,
    ) -> Future<Result<Tileset>> {
        let assemble = externals.clone();
        LayerJsonTerrainLoader::create_loader(&externals, url, Vec::new()).then_immediate(
            move |result| {
                result.map(|result| Tileset::from_loader_result(assemble, result, options))
            },
        )
    }

    pub fn root(&self) -> TileIndex {
        self.root
    }

    pub fn arena(&self) -> Arc<Mutex<TileArena>> {
        self.tiles.clone()
    }

    pub fn content_manager(&self) -> &TilesetContentManager {
        &self.manager
    }

    pub fn overlays_mut(&mut self) -> &mut RasterOverlayCollection {
        &mut self.overlays
    }

    pub fn overlays(&self) -> &RasterOverlayCollection {
        &self.overlays
    }

    pub fn attributions(&self) -> &[Attribution] {
        &self.attributions
    }

    pub fn externals(&self) -> &TilesetExternals {
        &self.externals
    }

    /// Advance the tileset by one frame: finish loads that reached
    /// `ContentLoaded`, bind overlays to newly renderable tiles, select the
    /// frame's tiles, start bounded loading, and evict stale content.
    pub fn update_view(&mut self, view: &ViewState) -> ViewUpdateResult {
        self.frame_number += 1;

        let content_loaded: Vec<TileIndex> = {
            let arena = self.tiles.lock().unwrap();
            arena
                .iter()
                .filter(|(_, t)| t.state() == TileLoadState::ContentLoaded)
                .map(|(i, _)| i)
                .collect()
        };
        for index in content_loaded {
            self.manager.update(index);
        }

        self.bind_overlays();

        let output = {
            let mut arena = self.tiles.lock().unwrap();
            select_tiles(
                &mut arena,
                self.root,
                view,
                self.frame_number,
                self.options.maximum_screen_space_error,
            )
        };

        let specs = self.overlays.uv_specs();
        let mut tiles_load_started = 0;
        for &index in output
            .load_queue
            .iter()
            .take(self.options.maximum_loads_per_frame)
        {
            self.manager.load(index, &specs);
            tiles_load_started += 1;
        }

        let tiles_unloaded = self.evict_stale_tiles();

        ViewUpdateResult {
            tiles_to_render: output.tiles_to_render,
            tiles_visited: output.tiles_visited,
            tiles_culled: output.tiles_culled,
            tiles_load_started,
            tiles_unloaded,
        }
    }

    fn bind_overlays(&mut self) {
        if self.overlays.is_empty() {
            return;
        }
        let to_bind: Vec<(TileIndex, GlobeRectangle)> = {
            let arena = self.tiles.lock().unwrap();
            arena
                .iter()
                .filter(|(_, t)| t.is_renderable() && t.raster_tiles.is_empty())
                .filter_map(|(i, t)| match &t.bounding_volume {
                    BoundingVolume::Region(r) => Some((i, r.rectangle)),
                    _ => None,
                })
                .collect()
        };
        for (index, rectangle) in to_bind {
            let mapped = self.overlays.bind_to_tile(
                &rectangle,
                &self.externals.system,
                &self.externals.accessor,
            );
            if !mapped.is_empty() {
                let mut arena = self.tiles.lock().unwrap();
                if let Some(tile) = arena.get_mut(index) {
                    tile.raster_tiles = mapped;
                }
            }
        }
    }

    /// Unload least-recently-selected content beyond the resident bound.
    /// Tiles selected this frame or still loading are never evicted.
    fn evict_stale_tiles(&mut self) -> usize {
        let (resident, mut candidates) = {
            let arena = self.tiles.lock().unwrap();
            let resident = arena
                .iter()
                .filter(|(_, t)| {
                    matches!(
                        t.state(),
                        TileLoadState::ContentLoading
                            | TileLoadState::ContentLoaded
                            | TileLoadState::Done
                    )
                })
                .count();
            let candidates: Vec<(u32, TileIndex)> = arena
                .iter()
                .filter(|(_, t)| {
                    matches!(
                        t.state(),
                        TileLoadState::ContentLoaded | TileLoadState::Done
                    ) && (t.selection().frame_number != self.frame_number
                        || t.selection().result == super::tile::SelectionResult::Culled)
                })
                .map(|(i, t)| (t.selection().frame_number, i))
                .collect();
            (resident, candidates)
        };

        if resident <= self.options.maximum_resident_tiles {
            return 0;
        }
        let excess = resident - self.options.maximum_resident_tiles;

        candidates.sort_unstable_by_key(|&(frame, _)| frame);
        let mut unloaded = 0;
        for (_, index) in candidates {
            if unloaded >= excess {
                break;
            }
            if self.manager.unload(index) {
                unloaded += 1;
            }
        }
        unloaded
    }
}
