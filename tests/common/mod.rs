//! Shared fixtures: a scriptable asset accessor, a recording renderer
//! preparer, and quantized-mesh payload builders.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use glam::{DMat4, DVec3};

use terrastream::asset::{AssetAccessor, Response};
use terrastream::geodesy::{Cartographic, Ellipsoid, GlobeRectangle};
use terrastream::mesh::Model;
use terrastream::renderer::{PrepareRendererResources, ResourceHandle};
use terrastream::runtime::{AsyncSystem, Future, Promise};
use terrastream::tiles::{Tile, TileIndex, TilesetExternals};

/// Scriptable accessor: canned responses per URL, optional held URLs whose
/// futures resolve only when the test releases them, and a request log.
#[derive(Default)]
pub struct MockAssetAccessor {
    responses: Mutex<HashMap<String, VecDeque<Response>>>,
    held: Mutex<HashSet<String>>,
    pending: Mutex<Vec<(String, Promise<Response>)>>,
    pub requests: Mutex<Vec<String>>,
}

impl MockAssetAccessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond_bytes(&self, url: &str, body: Vec<u8>) {
        self.queue_response(url, 200, body);
    }

    pub fn respond_status(&self, url: &str, status: u16) {
        self.queue_response(url, status, Vec::new());
    }

    pub fn queue_response(&self, url: &str, status: u16, body: Vec<u8>) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(Response {
                status,
                headers: Vec::new(),
                body,
                url: url.to_string(),
            });
    }

    /// Make fetches of `url` hang until [`MockAssetAccessor::release`].
    pub fn hold(&self, url: &str) {
        self.held.lock().unwrap().insert(url.to_string());
    }

    /// Resolve every held fetch of `url` with its canned response.
    pub fn release(&self, url: &str) {
        self.held.lock().unwrap().remove(url);
        let pending: Vec<(String, Promise<Response>)> = {
            let mut guard = self.pending.lock().unwrap();
            let (matching, rest) = guard.drain(..).partition(|(u, _)| u.as_str() == url);
            *guard = rest;
            matching
        };
        for (url, promise) in pending {
            promise.resolve(self.next_response(&url));
        }
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    fn next_response(&self, url: &str) -> Response {
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if queue.len() == 1 => queue.front().unwrap().clone(),
            _ => Response {
                status: 404,
                headers: Vec::new(),
                body: Vec::new(),
                url: url.to_string(),
            },
        }
    }
}

impl AssetAccessor for MockAssetAccessor {
    fn get(
        &self,
        system: &AsyncSystem,
        url: &str,
        _headers: &[(String, String)],
    ) -> Future<Response> {
        self.requests.lock().unwrap().push(url.to_string());

        if self.held.lock().unwrap().contains(url) {
            let url = url.to_string();
            return system.create_future(|promise| {
                self.pending.lock().unwrap().push((url, promise));
            });
        }

        system.resolved(self.next_response(url))
    }
}

/// Renderer preparer that hands out counted marker handles and records
/// every free call.
#[derive(Default)]
pub struct RecordingPreparer {
    pub worker_prepared: AtomicUsize,
    pub main_prepared: AtomicUsize,
    /// (tile index, had worker handle, had main handle)
    pub freed: Mutex<Vec<(u32, bool, bool)>>,
}

impl RecordingPreparer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl PrepareRendererResources for RecordingPreparer {
    fn prepare_in_worker(&self, _model: &Model, _transform: &DMat4) -> Option<ResourceHandle> {
        let n = self.worker_prepared.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(n))
    }

    fn prepare_in_main(&self, _tile: &Tile, worker: Option<ResourceHandle>) -> Option<ResourceHandle> {
        drop(worker);
        let n = self.main_prepared.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(n))
    }

    fn free(&self, tile: TileIndex, worker: Option<ResourceHandle>, main: Option<ResourceHandle>) {
        self.freed
            .lock()
            .unwrap()
            .push((tile.0, worker.is_some(), main.is_some()));
    }
}

pub fn test_externals() -> (TilesetExternals, Arc<MockAssetAccessor>, Arc<RecordingPreparer>) {
    let accessor = MockAssetAccessor::new();
    let preparer = RecordingPreparer::new();
    let externals = TilesetExternals {
        system: AsyncSystem::new(0),
        accessor: accessor.clone(),
        preparer: preparer.clone(),
    };
    (externals, accessor, preparer)
}

/// Drive the main lane until the future resolves.
pub fn settle<T: Send + 'static>(system: &AsyncSystem, future: Future<T>) -> T {
    let slot = Arc::new(Mutex::new(None));
    let writer = slot.clone();
    future.then_immediate(move |value| {
        *writer.lock().unwrap() = Some(value);
    });
    for _ in 0..64 {
        if slot.lock().unwrap().is_some() {
            break;
        }
        system.pump();
    }
    let result = slot.lock().unwrap().take().expect("future never resolved");
    result
}

fn zig_zag_encode(value: i32) -> u16 {
    ((value << 1) ^ (value >> 31)) as u16
}

fn push_zig_zag_deltas(out: &mut Vec<u8>, values: &[i32]) {
    let mut previous = 0;
    for &value in values {
        out.extend_from_slice(&zig_zag_encode(value - previous).to_le_bytes());
        previous = value;
    }
}

fn high_water_encode(indices: &[u32]) -> Vec<u16> {
    let mut highest = 0u32;
    indices
        .iter()
        .map(|&index| {
            let code = highest - index;
            if code == 0 {
                highest += 1;
            }
            code as u16
        })
        .collect()
}

/// A four-vertex, two-triangle quantized-mesh tile with all four edge
/// blocks populated. Vertices sit at the quarter points of the quantized
/// range so none land on a pole of a level-0 tile:
/// 0 = (lo,lo), 1 = (hi,lo), 2 = (lo,hi), 3 = (hi,hi) with lo/max = 0.25
/// and hi/max = 0.75.
pub fn quantized_tile_payload(
    rectangle: &GlobeRectangle,
    with_normals: bool,
    availability_json: Option<&str>,
) -> Vec<u8> {
    let center_carto = rectangle.center();
    let center = Ellipsoid::WGS84.cartographic_to_cartesian(&Cartographic::new(
        center_carto.longitude,
        center_carto.latitude,
        0.0,
    ));

    let mut payload = Vec::new();
    push_f64x3(&mut payload, center);
    payload.extend_from_slice(&0.0f32.to_le_bytes()); // minimum height
    payload.extend_from_slice(&100.0f32.to_le_bytes()); // maximum height
    push_f64x3(&mut payload, center); // bounding sphere centre
    payload.extend_from_slice(&1_000_000f64.to_le_bytes()); // radius
    push_f64x3(&mut payload, DVec3::ZERO); // horizon occlusion point
    payload.extend_from_slice(&4u32.to_le_bytes()); // vertex count
    assert_eq!(payload.len(), 92);

    const LO: i32 = 8192;
    const HI: i32 = 24576;
    push_zig_zag_deltas(&mut payload, &[LO, HI, LO, HI]); // u
    push_zig_zag_deltas(&mut payload, &[LO, LO, HI, HI]); // v
    push_zig_zag_deltas(&mut payload, &[0, 0, 0, 0]); // height

    let triangles = [0u32, 1, 2, 2, 1, 3];
    payload.extend_from_slice(&2u32.to_le_bytes()); // triangle count
    for code in high_water_encode(&triangles) {
        payload.extend_from_slice(&code.to_le_bytes());
    }

    // Edge index blocks: west, south, east, north.
    for edge in [[0u16, 2], [0, 1], [1, 3], [2, 3]] {
        payload.extend_from_slice(&2u32.to_le_bytes());
        for index in edge {
            payload.extend_from_slice(&index.to_le_bytes());
        }
    }

    if with_normals {
        payload.push(1u8);
        payload.extend_from_slice(&8u32.to_le_bytes());
        for _ in 0..4 {
            payload.extend_from_slice(&[190u8, 190u8]);
        }
    }

    if let Some(json) = availability_json {
        let body_len = 4 + json.len() as u32;
        payload.push(4u8);
        payload.extend_from_slice(&body_len.to_le_bytes());
        payload.extend_from_slice(&(json.len() as u32).to_le_bytes());
        payload.extend_from_slice(json.as_bytes());
    }

    payload
}

fn push_f64x3(out: &mut Vec<u8>, v: DVec3) {
    out.extend_from_slice(&v.x.to_le_bytes());
    out.extend_from_slice(&v.y.to_le_bytes());
    out.extend_from_slice(&v.z.to_le_bytes());
}

/// Minimal single-triangle GLB payload.
pub fn triangle_glb() -> Vec<u8> {
    let positions: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let indices: [u16; 3] = [0, 1, 2];

    let mut bin = Vec::new();
    for p in positions {
        bin.extend_from_slice(&p.to_le_bytes());
    }
    for i in indices {
        bin.extend_from_slice(&i.to_le_bytes());
    }
    while bin.len() % 4 != 0 {
        bin.push(0);
    }

    let json = serde_json::json!({
        "asset": {"version": "2.0"},
        "buffers": [{"byteLength": bin.len()}],
        "bufferViews": [
            {"buffer": 0, "byteOffset": 0, "byteLength": 36},
            {"buffer": 0, "byteOffset": 36, "byteLength": 6}
        ],
        "accessors": [
            {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
             "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]},
            {"bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR"}
        ],
        "meshes": [{"primitives": [{"attributes": {"POSITION": 0}, "indices": 1}]}],
        "nodes": [{"mesh": 0}],
        "scenes": [{"nodes": [0]}],
        "scene": 0
    });
    let mut json_bytes = serde_json::to_vec(&json).unwrap();
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }

    let total = 12 + 8 + json_bytes.len() + 8 + bin.len();
    let mut glb = Vec::with_capacity(total);
    glb.extend_from_slice(b"glTF");
    glb.extend_from_slice(&2u32.to_le_bytes());
    glb.extend_from_slice(&(total as u32).to_le_bytes());
    glb.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
    glb.extend_from_slice(&0x4E4F_534Au32.to_le_bytes());
    glb.extend_from_slice(&json_bytes);
    glb.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    glb.extend_from_slice(&0x004E_4942u32.to_le_bytes());
    glb.extend_from_slice(&bin);
    glb
}
