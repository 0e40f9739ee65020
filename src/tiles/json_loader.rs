//! 3D Tiles tileset.json loader

use std::sync::Arc;

use glam::{DMat3, DMat4, DVec3};
use serde::Deserialize;

use crate::asset::resolve_url;
use crate::error::{Error, Result};
use crate::mesh::parse_glb;
use crate::runtime::Future;

use super::bounds::{BoundingRegion, BoundingSphere, BoundingVolume, OrientedBoundingBox};
use super::content::{TileContent, TileRenderContent};
use super::id::TileId;
use super::loader::{
    state_for_http_failure, BackoffTracker, LoaderResult, TileLoadInput, TileLoadResult,
    TilesetContentLoader, TilesetExternals,
};
use super::tile::{Tile, TileArena, TileIndex, TileRefine};
use crate::geodesy::GlobeRectangle;

#[derive(Deserialize)]
struct TilesetDocument {
    #[allow(dead_code)]
    asset: AssetSection,
    #[serde(rename = "geometricError")]
    #[allow(dead_code)]
    geometric_error: f64,
    root: TileDocument,
}

#[derive(Deserialize)]
struct AssetSection {
    #[allow(dead_code)]
    version: String,
}

#[derive(Deserialize)]
struct TileDocument {
    #[serde(rename = "boundingVolume")]
    bounding_volume: BoundingVolumeDocument,
    #[serde(rename = "geometricError")]
    geometric_error: f64,
    #[serde(default)]
    refine: Option<TileRefine>,
    #[serde(default)]
    content: Option<ContentDocument>,
    #[serde(default)]
    children: Vec<TileDocument>,
    #[serde(default)]
    transform: Option<[f64; 16]>,
    #[serde(default, rename = "viewerRequestVolume")]
    viewer_request_volume: Option<BoundingVolumeDocument>,
}

#[derive(Deserialize)]
struct ContentDocument {
    uri: Option<String>,
    /// Pre-1.0 tilesets use `url`.
    url: Option<String>,
    #[serde(default, rename = "boundingVolume")]
    bounding_volume: Option<BoundingVolumeDocument>,
}

#[derive(Deserialize)]
struct BoundingVolumeDocument {
    #[serde(default)]
    region: Option<[f64; 6]>,
    #[serde(default, rename = "box")]
    oriented_box: Option<[f64; 12]>,
    #[serde(default)]
    sphere: Option<[f64; 4]>,
}

fn convert_bounding_volume(doc: &BoundingVolumeDocument) -> Result<BoundingVolume> {
    if let Some(r) = doc.region {
        return Ok(BoundingVolume::Region(BoundingRegion::new(
            GlobeRectangle::new(r[0], r[1], r[2], r[3]),
            r[4],
            r[5],
        )));
    }
    if let Some(b) = doc.oriented_box {
        return Ok(BoundingVolume::OrientedBox(OrientedBoundingBox {
            center: DVec3::new(b[0], b[1], b[2]),
            half_axes: DMat3::from_cols(
                DVec3::new(b[3], b[4], b[5]),
                DVec3::new(b[6], b[7], b[8]),
                DVec3::new(b[9], b[10], b[11]),
            ),
        }));
    }
    if let Some(s) = doc.sphere {
        return Ok(BoundingVolume::Sphere(BoundingSphere {
            center: DVec3::new(s[0], s[1], s[2]),
            radius: s[3],
        }));
    }
    Err(Error::InvalidTileset(
        "boundingVolume has no region, box or sphere".into(),
    ))
}

fn build_tile(
    arena: &mut TileArena,
    parent: Option<TileIndex>,
    doc: &TileDocument,
    parent_transform: DMat4,
    parent_refine: TileRefine,
    base_url: &str,
) -> Result<TileIndex> {
    let local = doc
        .transform
        .map(|t| DMat4::from_cols_array(&t))
        .unwrap_or(DMat4::IDENTITY);
    // Stored pre-composed; nothing downstream multiplies by the parent again.
    let transform = parent_transform * local;
    let refine = doc.refine.unwrap_or(parent_refine);

    let content_uri = doc
        .content
        .as_ref()
        .and_then(|c| c.uri.as_deref().or(c.url.as_deref()));
    let id = match content_uri {
        Some(uri) => TileId::Url(resolve_url(base_url, uri)),
        None => TileId::Url(String::new()),
    };

    let mut tile = Tile::new(
        id,
        convert_bounding_volume(&doc.bounding_volume)?,
        doc.geometric_error,
        refine,
        transform,
    );
    if let Some(content) = &doc.content {
        if let Some(volume) = &content.bounding_volume {
            tile.content_bounding_volume = Some(convert_bounding_volume(volume)?);
        }
    }
    if let Some(volume) = &doc.viewer_request_volume {
        tile.viewer_request_volume = Some(convert_bounding_volume(volume)?);
    }

    let index = arena.alloc(tile, parent);
    for child in &doc.children {
        build_tile(arena, Some(index), child, transform, refine, base_url)?;
    }
    Ok(index)
}

/// Loader for explicit 3D Tiles tilesets: the root document defines the
/// tile tree, and per-tile content is binary glTF or a nested tileset.
pub struct TilesetJsonLoader {
    backoff: Arc<BackoffTracker>,
}

impl TilesetJsonLoader {
    /// Fetch and parse `tileset.json`, producing the loader and the initial
    /// arena. The document is parsed and the tree built on the main lane.
    pub fn create_loader(
        externals: &TilesetExternals,
        url: &str,
        headers: Vec<(String, String)>,
    ) -> Future<Result<LoaderResult>> {
        let fetch = externals
            .accessor
            .get(&externals.system, url, &headers);
        fetch.then_in_main(move |response| {
            if !response.is_success() {
                return Err(Error::Http {
                    status: response.status,
                    url: response.url,
                });
            }
            let document: TilesetDocument = serde_json::from_slice(&response.body)?;

            let mut arena = TileArena::new();
            let root = build_tile(
                &mut arena,
                None,
                &document.root,
                DMat4::IDENTITY,
                TileRefine::Replace,
                &response.url,
            )?;

            Ok(LoaderResult {
                loader: Arc::new(TilesetJsonLoader {
                    backoff: Arc::new(BackoffTracker::default()),
                }),
                arena,
                root,
                request_headers: headers,
                attributions: Vec::new(),
            })
        })
    }
}

impl TilesetContentLoader for TilesetJsonLoader {
    fn load_tile_content(
        &self,
        input: TileLoadInput,
        externals: &TilesetExternals,
        headers: Vec<(String, String)>,
    ) -> Future<TileLoadResult> {
        let TileId::Url(url) = &input.tile_id else {
            return externals.system.resolved(TileLoadResult::failed(0));
        };
        if url.is_empty() {
            // No content to fetch; the tile is renderable-empty.
            return externals.system.resolved(TileLoadResult::empty_success());
        }
        if !self.backoff.is_ready(input.tile_index) {
            return externals.system.resolved(TileLoadResult::retry_later(0));
        }

        let backoff = self.backoff.clone();
        let tile_index = input.tile_index;
        let fetch = externals.accessor.get(&externals.system, url, &headers);
        fetch.then_in_worker(move |response| {
            if !response.is_success() {
                let state = state_for_http_failure(response.status);
                if state == super::content::TileLoadState::FailedTemporarily {
                    // 401 is handled by credential refresh, not backoff.
                    if response.status != 401 {
                        backoff.record_failure(tile_index);
                    }
                    return TileLoadResult::retry_later(response.status);
                }
                return TileLoadResult::failed(response.status);
            }
            backoff.clear(tile_index);

            if response.body.starts_with(b"glTF") {
                return match parse_glb(&response.body) {
                    Ok(model) => TileLoadResult::success(
                        TileContent::Render(TileRenderContent { model: Some(model) }),
                        response.url,
                    ),
                    Err(e) => {
                        log::warn!("glTF decode failed for {}: {}", response.url, e);
                        TileLoadResult::failed(response.status)
                    }
                };
            }

            // A JSON payload is a nested tileset; graft its root as a child
            // once the content commits on the main lane.
            match serde_json::from_slice::<TilesetDocument>(&response.body) {
                Ok(document) => {
                    let base_url = response.url.clone();
                    let initializer = Box::new(move |arena: &mut TileArena, index: TileIndex| {
                        let Some(tile) = arena.get(index) else {
                            return;
                        };
                        let transform = tile.transform;
                        let refine = tile.refine;
                        if let Err(e) = build_tile(
                            arena,
                            Some(index),
                            &document.root,
                            transform,
                            refine,
                            &base_url,
                        ) {
                            log::warn!("discarding malformed external tileset: {}", e);
                        }
                    });
                    TileLoadResult::success(TileContent::External, response.url)
                        .with_initializer(initializer)
                }
                Err(e) => {
                    log::warn!("unrecognised tile content at {}: {}", response.url, e);
                    TileLoadResult::failed(response.status)
                }
            }
        })
    }
}
