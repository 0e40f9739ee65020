//! Explicit tileset trees: invariants, external tilesets, eviction

mod common;

use common::{settle, test_externals};
use glam::DVec3;
use terrastream::tiles::{
    BoundingVolume, TileId, TileLoadState, Tileset, TilesetOptions, ViewState,
};

/// Small deterministic generator for sample-based containment checks.
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    fn in_unit_sphere(&mut self) -> DVec3 {
        loop {
            let v = DVec3::new(
                self.next_f64() * 2.0 - 1.0,
                self.next_f64() * 2.0 - 1.0,
                self.next_f64() * 2.0 - 1.0,
            );
            if v.length_squared() <= 1.0 {
                return v;
            }
        }
    }
}

#[test]
fn test_parent_volume_contains_child_volume_samples() {
    let (externals, accessor, _preparer) = test_externals();
    accessor.respond_bytes(
        "https://t.example/tileset.json",
        br#"{
            "asset": { "version": "1.0" },
            "geometricError": 256.0,
            "root": {
                "boundingVolume": { "sphere": [0, 0, 0, 100] },
                "geometricError": 64.0,
                "children": [
                    {
                        "boundingVolume": { "sphere": [-50, 0, 0, 50] },
                        "geometricError": 16.0
                    },
                    {
                        "boundingVolume": { "sphere": [50, 0, 0, 50] },
                        "geometricError": 16.0
                    }
                ]
            }
        }"#
        .to_vec(),
    );

    let tileset = settle(
        &externals.system,
        Tileset::from_tileset_json_url(
            externals.clone(),
            "https://t.example/tileset.json",
            TilesetOptions::default(),
        ),
    )
    .unwrap();

    let arena = tileset.arena();
    let arena = arena.lock().unwrap();
    let root = arena.get(tileset.root()).unwrap();
    let mut rng = Lcg(42);

    for &child_index in &root.children {
        let child = arena.get(child_index).unwrap();
        let BoundingVolume::Sphere(sphere) = &child.bounding_volume else {
            panic!("expected sphere bounds");
        };
        for _ in 0..500 {
            let point = sphere.center + rng.in_unit_sphere() * sphere.radius;
            assert!(child.bounding_volume.contains_point(point));
            assert!(
                root.bounding_volume.contains_point(point),
                "parent does not contain {:?}",
                point
            );
        }
    }
}

#[test]
fn test_geometric_error_is_monotonic_down_the_tree() {
    let (externals, accessor, _preparer) = test_externals();
    accessor.respond_bytes(
        "https://t.example/tileset.json",
        br#"{
            "asset": { "version": "1.0" },
            "geometricError": 256.0,
            "root": {
                "boundingVolume": { "sphere": [0, 0, 0, 100] },
                "geometricError": 64.0,
                "children": [
                    {
                        "boundingVolume": { "sphere": [0, 0, 0, 50] },
                        "geometricError": 16.0,
                        "children": [
                            {
                                "boundingVolume": { "sphere": [0, 0, 0, 25] },
                                "geometricError": 4.0
                            }
                        ]
                    }
                ]
            }
        }"#
        .to_vec(),
    );

    let tileset = settle(
        &externals.system,
        Tileset::from_tileset_json_url(
            externals.clone(),
            "https://t.example/tileset.json",
            TilesetOptions::default(),
        ),
    )
    .unwrap();

    let arena = tileset.arena();
    let arena = arena.lock().unwrap();
    for (_, tile) in arena.iter() {
        for &child in &tile.children {
            assert!(arena.get(child).unwrap().geometric_error <= tile.geometric_error);
        }
    }
}

#[test]
fn test_external_tileset_grafts_children_and_refines() {
    let (externals, accessor, _preparer) = test_externals();
    accessor.respond_bytes(
        "https://t.example/tileset.json",
        br#"{
            "asset": { "version": "1.0" },
            "geometricError": 64.0,
            "root": {
                "boundingVolume": { "sphere": [0, 0, 0, 100] },
                "geometricError": 8.0,
                "content": { "uri": "sub/external.json" }
            }
        }"#
        .to_vec(),
    );
    accessor.respond_bytes(
        "https://t.example/sub/external.json",
        br#"{
            "asset": { "version": "1.0" },
            "geometricError": 8.0,
            "root": {
                "boundingVolume": { "sphere": [0, 0, 0, 90] },
                "geometricError": 4.0,
                "content": { "uri": "inner.glb" }
            }
        }"#
        .to_vec(),
    );
    accessor.respond_bytes("https://t.example/sub/inner.glb", common::triangle_glb());

    let mut tileset = settle(
        &externals.system,
        Tileset::from_tileset_json_url(
            externals.clone(),
            "https://t.example/tileset.json",
            TilesetOptions::default(),
        ),
    )
    .unwrap();
    let root = tileset.root();
    let view = ViewState::new(
        DVec3::new(0.0, 0.0, 1000.0),
        1080.0,
        std::f64::consts::FRAC_PI_4,
    );

    tileset.update_view(&view);
    externals.system.pump();
    tileset.update_view(&view);

    let grafted_child = {
        let arena = tileset.arena();
        let arena = arena.lock().unwrap();
        let root_tile = arena.get(root).unwrap();
        assert_eq!(root_tile.state(), TileLoadState::Done);
        assert!(root_tile.unconditionally_refine);
        assert_eq!(root_tile.children.len(), 1);

        let child = arena.get(root_tile.children[0]).unwrap();
        assert_eq!(
            child.id,
            TileId::Url("https://t.example/sub/inner.glb".into())
        );
        root_tile.children[0]
    };

    // The grafted child loads and renders in place of its parent.
    externals.system.pump();
    tileset.update_view(&view);
    externals.system.pump();
    let result = tileset.update_view(&view);
    assert_eq!(result.tiles_to_render, vec![grafted_child]);
}

#[test]
fn test_culled_content_evicts_beyond_resident_bound() {
    let (externals, accessor, preparer) = test_externals();
    accessor.respond_bytes(
        "https://t.example/tileset.json",
        br#"{
            "asset": { "version": "1.0" },
            "geometricError": 4096.0,
            "root": {
                "boundingVolume": { "sphere": [0, 0, 0, 100] },
                "geometricError": 1000.0,
                "content": { "uri": "root.glb" },
                "children": [
                    {
                        "boundingVolume": { "sphere": [0, 0, 0, 80] },
                        "geometricError": 8.0,
                        "content": { "uri": "child.glb" },
                        "viewerRequestVolume": { "sphere": [0, 0, 0, 2000] }
                    }
                ]
            }
        }"#
        .to_vec(),
    );
    accessor.respond_bytes("https://t.example/root.glb", common::triangle_glb());
    accessor.respond_bytes("https://t.example/child.glb", common::triangle_glb());

    let options = TilesetOptions {
        maximum_resident_tiles: 1,
        ..Default::default()
    };
    let mut tileset = settle(
        &externals.system,
        Tileset::from_tileset_json_url(externals.clone(), "https://t.example/tileset.json", options),
    )
    .unwrap();
    let root = tileset.root();

    // Close camera, inside the child's viewer-request volume: the child
    // loads and renders.
    let near = ViewState::new(
        DVec3::new(0.0, 0.0, 1000.0),
        1080.0,
        std::f64::consts::FRAC_PI_4,
    );
    tileset.update_view(&near);
    externals.system.pump();
    tileset.update_view(&near);
    externals.system.pump();
    tileset.update_view(&near);

    let child = {
        let arena = tileset.arena();
        let arena = arena.lock().unwrap();
        let child = arena.get(root).unwrap().children[0];
        assert_eq!(arena.get(child).unwrap().state(), TileLoadState::Done);
        child
    };

    // Far camera, outside the viewer-request volume: the child is culled
    // and, with the resident bound at one, evicted.
    let far = ViewState::new(
        DVec3::new(0.0, 0.0, 1.0e6),
        1080.0,
        std::f64::consts::FRAC_PI_4,
    );
    let result = tileset.update_view(&far);
    assert_eq!(result.tiles_unloaded, 1);

    {
        let arena = tileset.arena();
        let arena = arena.lock().unwrap();
        assert_eq!(arena.get(child).unwrap().state(), TileLoadState::Unloaded);
        assert_eq!(arena.get(root).unwrap().state(), TileLoadState::Done);
    }

    // The child was freed through its main-phase handle.
    let freed = preparer.freed.lock().unwrap();
    assert!(freed.iter().any(|&(tile, worker, main)| {
        tile == child.0 && !worker && main
    }));
}
