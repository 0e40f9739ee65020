//! Per-tile load coordination: fetch, decode, post-process, renderer prep

use std::sync::{Arc, Mutex};

use crate::mesh::{generate_missing_normals_smooth, resolve_external_data};
use crate::overlay::{create_overlay_texture_coordinates, OverlayUvSpec};
use crate::renderer::{PrepareRendererResources, ResourceHandle};
use crate::runtime::Future;

use super::bounds::BoundingVolume;
use super::content::{TileContent, TileLoadState, TileRenderContent};
use super::loader::{TileLoadInput, TileLoadResult, TilesetContentLoader, TilesetExternals};
use super::tile::{TileArena, TileIndex};

/// Knobs for content post-processing.
#[derive(Debug, Clone, Copy)]
pub struct ContentOptions {
    pub generate_missing_normals: bool,
}

impl Default for ContentOptions {
    fn default() -> Self {
        Self {
            generate_missing_normals: true,
        }
    }
}

/// Drives each tile through the load state machine.
///
/// All state transitions commit on the main lane; a completed load whose
/// tile has moved on is discarded and its worker resources freed. The tile
/// arena and the request-header vector are only ever mutated on the main
/// lane.
pub struct TilesetContentManager {
    externals: TilesetExternals,
    tiles: Arc<Mutex<TileArena>>,
    headers: Arc<Mutex<Vec<(String, String)>>>,
    loader: Arc<dyn TilesetContentLoader>,
    options: ContentOptions,
}

impl TilesetContentManager {
    pub fn new(
        externals: TilesetExternals,
        tiles: Arc<Mutex<TileArena>>,
        headers: Arc<Mutex<Vec<(String, String)>>>,
        loader: Arc<dyn TilesetContentLoader>,
        options: ContentOptions,
    ) -> Self {
        Self {
            externals,
            tiles,
            headers,
            loader,
            options,
        }
    }

    /// Begin loading a tile. No-op unless the tile is `Unloaded` or
    /// `FailedTemporarily`.
    pub fn load(&self, index: TileIndex, overlay_specs: &[OverlayUvSpec]) {
        let input = {
            let mut arena = self.tiles.lock().unwrap();
            let Some(tile) = arena.get_mut(index) else {
                return;
            };
            match tile.state {
                TileLoadState::Unloaded | TileLoadState::FailedTemporarily => {}
                _ => return,
            }
            tile.state = TileLoadState::ContentLoading;
            TileLoadInput {
                tile_index: index,
                tile_id: tile.id.clone(),
                bounding_volume: tile.bounding_volume.clone(),
                transform: tile.transform,
            }
        };

        let headers = self.headers.lock().unwrap().clone();
        let externals = self.externals.clone();
        let options = self.options;
        let specs = overlay_specs.to_vec();
        let post_input = input.clone();
        let post_headers = headers.clone();
        let tiles = self.tiles.clone();
        let preparer = self.externals.preparer.clone();

        self.loader
            .load_tile_content(input, &self.externals, headers)
            .and_then_in_worker(move |result| {
                post_process(externals, options, specs, post_input, post_headers, result)
            })
            .then_in_main(move |(result, worker_handle)| {
                commit_tile_content(&tiles, &preparer, index, result, worker_handle);
            });
    }

    /// Drive post-load work on a `ContentLoaded` tile: run the initialiser,
    /// mark external tilesets unconditionally refined, prepare main-thread
    /// renderer resources, and transition to `Done`.
    pub fn update(&self, index: TileIndex) {
        let mut arena = self.tiles.lock().unwrap();

        let initializer = {
            let Some(tile) = arena.get_mut(index) else {
                return;
            };
            if tile.state != TileLoadState::ContentLoaded {
                return;
            }
            tile.initializer.take()
        };
        if let Some(initializer) = initializer {
            initializer(&mut arena, index);
        }

        let worker_handle = {
            let Some(tile) = arena.get_mut(index) else {
                return;
            };
            if tile.content.is_external() {
                tile.unconditionally_refine = true;
            }
            tile.worker_resources.take()
        };

        let main_handle = {
            let Some(tile) = arena.get(index) else {
                return;
            };
            let has_model = tile
                .content
                .render_content()
                .is_some_and(|c| c.model.is_some());
            if has_model {
                self.externals.preparer.prepare_in_main(tile, worker_handle)
            } else {
                None
            }
        };

        if let Some(tile) = arena.get_mut(index) {
            tile.main_resources = main_handle;
            tile.state = TileLoadState::Done;
        }
    }

    /// Release a tile's content and renderer resources. Returns `false` if
    /// the tile has in-flight work and must be kept.
    pub fn unload(&self, index: TileIndex) -> bool {
        let mut arena = self.tiles.lock().unwrap();
        let Some(tile) = arena.get_mut(index) else {
            return true;
        };

        match tile.state {
            TileLoadState::Unloaded => return true,
            TileLoadState::ContentLoading => return false,
            TileLoadState::ContentLoaded => {
                tile.state = TileLoadState::Unloading;
                let worker = tile.worker_resources.take();
                self.externals.preparer.free(index, worker, None);
            }
            TileLoadState::Done => {
                tile.state = TileLoadState::Unloading;
                let main = tile.main_resources.take();
                self.externals.preparer.free(index, None, main);
            }
            _ => {
                tile.state = TileLoadState::Unloading;
            }
        }

        tile.content = TileContent::Unknown;
        tile.initializer = None;
        tile.raster_tiles.clear();
        tile.state = TileLoadState::Unloaded;
        true
    }

    /// Replace a request header in place, or append it.
    pub fn update_request_header(&self, name: &str, value: &str) {
        upsert_header(&self.headers, name, value);
    }

    /// Snapshot of the current request headers.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        self.headers.lock().unwrap().clone()
    }
}

/// Replace-or-append into a shared header vector.
pub(crate) fn upsert_header(headers: &Mutex<Vec<(String, String)>>, name: &str, value: &str) {
    let mut headers = headers.lock().unwrap();
    match headers.iter_mut().find(|(n, _)| n == name) {
        Some((_, v)) => *v = value.to_string(),
        None => headers.push((name.to_string(), value.to_string())),
    }
}

fn post_process(
    externals: TilesetExternals,
    options: ContentOptions,
    specs: Vec<OverlayUvSpec>,
    input: TileLoadInput,
    headers: Vec<(String, String)>,
    mut result: TileLoadResult,
) -> Future<(TileLoadResult, Option<ResourceHandle>)> {
    if result.state != TileLoadState::ContentLoaded {
        return externals.system.resolved((result, None));
    }
    let model = match &mut result.content {
        TileContent::Render(content) => content.model.take(),
        _ => None,
    };
    let Some(model) = model else {
        return externals.system.resolved((result, None));
    };

    let system = externals.system.clone();
    let accessor = externals.accessor.clone();
    let base_url = result.base_url.clone();
    resolve_external_data(&system, accessor, base_url, headers, model).then_in_worker(
        move |resolved| match resolved {
            Err(e) => {
                log::warn!("external resource resolution failed: {}", e);
                result.state = TileLoadState::Failed;
                result.content = TileContent::Render(TileRenderContent::default());
                (result, None)
            }
            Ok(mut model) => {
                if options.generate_missing_normals {
                    generate_missing_normals_smooth(&mut model);
                }
                if let BoundingVolume::Region(region) = &input.bounding_volume {
                    for spec in &specs {
                        let rectangle = spec.projection.project_rectangle(&region.rectangle);
                        create_overlay_texture_coordinates(
                            &mut model,
                            input.transform,
                            spec.overlay_id,
                            &spec.projection,
                            rectangle,
                        );
                    }
                }
                let handle = externals.preparer.prepare_in_worker(&model, &input.transform);
                if let TileContent::Render(content) = &mut result.content {
                    content.model = Some(model);
                }
                (result, handle)
            }
        },
    )
}

fn commit_tile_content(
    tiles: &Arc<Mutex<TileArena>>,
    preparer: &Arc<dyn PrepareRendererResources>,
    index: TileIndex,
    mut result: TileLoadResult,
    worker_handle: Option<ResourceHandle>,
) {
    let mut arena = tiles.lock().unwrap();
    let Some(tile) = arena.get_mut(index) else {
        preparer.free(index, worker_handle, None);
        return;
    };
    if tile.state != TileLoadState::ContentLoading {
        // The tile moved on while the load was in flight; the result is
        // stale.
        log::debug!("discarding stale load result for tile {:?}", index);
        preparer.free(index, worker_handle, None);
        return;
    }

    match result.state {
        TileLoadState::ContentLoaded => {
            tile.content = result.content;
            tile.initializer = result.initializer.take();
            tile.worker_resources = worker_handle;
            tile.state = TileLoadState::ContentLoaded;
        }
        TileLoadState::Failed => {
            tile.content = result.content;
            tile.state = TileLoadState::Failed;
            preparer.free(index, worker_handle, None);
        }
        TileLoadState::FailedTemporarily => {
            tile.content = TileContent::Unknown;
            tile.state = TileLoadState::FailedTemporarily;
            preparer.free(index, worker_handle, None);
        }
        _ => {
            // Loaders may only report the three states above.
            tile.content = TileContent::Render(TileRenderContent::default());
            tile.state = TileLoadState::Failed;
            preparer.free(index, worker_handle, None);
        }
    }
}
