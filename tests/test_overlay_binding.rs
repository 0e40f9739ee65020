//! Raster overlays bound to terrain tiles: UV generation and textures

mod common;

use common::{settle, test_externals};
use terrastream::geodesy::{
    Cartographic, Ellipsoid, GeographicProjection, GeographicTilingScheme, Projection,
    QuadtreeTileId,
};
use terrastream::overlay::{OverlayTileState, RasterOverlay, RasterOverlayOptions};
use terrastream::tiles::{TileId, Tileset, TilesetOptions, ViewState};

const LAYER_URL: &str = "https://ter.example/layer.json";
const WEST_TILE_URL: &str = "https://ter.example/0/0/0.terrain?v=1.0.0";
const EAST_TILE_URL: &str = "https://ter.example/0/1/0.terrain?v=1.0.0";

fn overlay() -> RasterOverlay {
    RasterOverlay::new(RasterOverlayOptions {
        name: "imagery".into(),
        url_template: "https://img.example/{z}/{x}/{y}.png".into(),
        projection: Projection::Geographic(GeographicProjection),
        tiling: GeographicTilingScheme::default(),
        maximum_level: 18,
        tile_width: 256,
        tile_height: 256,
    })
}

fn view() -> ViewState {
    let position = Ellipsoid::WGS84
        .cartographic_to_cartesian(&Cartographic::new(-std::f64::consts::FRAC_PI_2, 0.0, 1.0e7));
    ViewState::new(position, 1080.0, std::f64::consts::FRAC_PI_4)
}

fn terrain_with_overlay() -> (
    terrastream::tiles::TilesetExternals,
    std::sync::Arc<common::MockAssetAccessor>,
    Tileset,
) {
    let (externals, accessor, _preparer) = test_externals();
    accessor.respond_bytes(
        LAYER_URL,
        br#"{
            "tilejson": "2.1.0",
            "version": "1.0.0",
            "tiles": ["{z}/{x}/{y}.terrain?v={version}"],
            "available": [[{"startX": 0, "startY": 0, "endX": 1, "endY": 0}]]
        }"#
        .to_vec(),
    );

    let scheme = GeographicTilingScheme::default();
    accessor.respond_bytes(
        WEST_TILE_URL,
        common::quantized_tile_payload(
            &scheme.tile_rectangle(QuadtreeTileId::new(0, 0, 0)),
            false,
            None,
        ),
    );
    accessor.respond_bytes(
        EAST_TILE_URL,
        common::quantized_tile_payload(
            &scheme.tile_rectangle(QuadtreeTileId::new(0, 1, 0)),
            false,
            None,
        ),
    );
    // Any imagery tile the provider picks.
    for z in 0..4u32 {
        for x in 0..16u32 {
            for y in 0..8u32 {
                accessor.respond_bytes(
                    &format!("https://img.example/{}/{}/{}.png", z, x, y),
                    vec![0xAB; 16],
                );
            }
        }
    }

    let mut tileset = settle(
        &externals.system,
        Tileset::from_terrain_layer_url(externals.clone(), LAYER_URL, TilesetOptions::default()),
    )
    .unwrap();
    tileset.overlays_mut().add(overlay(), &externals.system);

    (externals, accessor, tileset)
}

#[test]
fn test_overlay_uv_attribute_generated_during_load() {
    let (externals, _accessor, mut tileset) = terrain_with_overlay();

    tileset.update_view(&view());
    externals.system.pump();
    tileset.update_view(&view());

    let arena = tileset.arena();
    let arena = arena.lock().unwrap();
    let west = arena
        .iter()
        .find(|(_, t)| t.id == TileId::Quadtree(QuadtreeTileId::new(0, 0, 0)))
        .map(|(_, t)| t)
        .unwrap();

    let model = west
        .content()
        .and_then(|c| c.render_content())
        .and_then(|c| c.model.as_ref())
        .expect("terrain model");
    let primitive = &model.meshes[0].primitives[0];
    let uv = primitive.attributes["_CESIUMOVERLAY_0"];
    let position = primitive.attributes["POSITION"];

    assert_eq!(model.accessors[uv].count, model.accessors[position].count);
    assert_eq!(
        model.accessors[uv].kind,
        terrastream::mesh::AccessorKind::Vec2
    );
}

#[test]
fn test_overlay_tiles_bind_and_fetch_textures() {
    let (externals, accessor, mut tileset) = terrain_with_overlay();

    tileset.update_view(&view());
    externals.system.pump();
    tileset.update_view(&view());
    externals.system.pump();

    let arena = tileset.arena();
    let arena = arena.lock().unwrap();
    let west = arena
        .iter()
        .find(|(_, t)| t.id == TileId::Quadtree(QuadtreeTileId::new(0, 0, 0)))
        .map(|(_, t)| t)
        .unwrap();

    assert_eq!(west.raster_tiles.len(), 1);
    let mapped = &west.raster_tiles[0];
    assert_eq!(mapped.overlay_id, 0);
    assert!(mapped.scale.x > 0.0 && mapped.scale.y > 0.0);

    let overlay_tile = mapped.tile.lock().unwrap();
    assert!(
        matches!(overlay_tile.state, OverlayTileState::Loaded(ref bytes) if bytes == &vec![0xAB; 16]),
        "overlay texture not loaded: {:?}",
        overlay_tile.state
    );
    assert!(accessor
        .requests
        .lock()
        .unwrap()
        .iter()
        .any(|u| u.starts_with("https://img.example/")));
}

#[test]
fn test_uv_values_match_vertex_longitude() {
    let (externals, _accessor, mut tileset) = terrain_with_overlay();

    tileset.update_view(&view());
    externals.system.pump();
    tileset.update_view(&view());

    let arena = tileset.arena();
    let arena = arena.lock().unwrap();
    let west = arena
        .iter()
        .find(|(_, t)| t.id == TileId::Quadtree(QuadtreeTileId::new(0, 0, 0)))
        .map(|(_, t)| t)
        .unwrap();
    let model = west
        .content()
        .and_then(|c| c.render_content())
        .and_then(|c| c.model.as_ref())
        .unwrap();
    let primitive = &model.meshes[0].primitives[0];
    let uv = primitive.attributes["_CESIUMOVERLAY_0"];

    // The payload's four real vertices sit at the quarter points of the
    // tile rectangle, so their overlay UVs land near 0.25 and 0.75.
    let mut us = Vec::new();
    let mut vs = Vec::new();
    for i in 0..4 {
        let bytes = model.element_bytes(uv, i).unwrap();
        us.push(f32::from_le_bytes(bytes[0..4].try_into().unwrap()));
        vs.push(f32::from_le_bytes(bytes[4..8].try_into().unwrap()));
    }
    for expected in [0.25f32, 0.75] {
        assert!(
            us.iter().any(|&u| (u - expected).abs() < 1e-2),
            "no u near {}: {:?}",
            expected,
            us
        );
        assert!(
            vs.iter().any(|&v| (v - expected).abs() < 1e-2),
            "no v near {}: {:?}",
            expected,
            vs
        );
    }
}
