//! Binary glTF (GLB) container parsing

use std::collections::HashMap;

use glam::DMat4;
use serde::Deserialize;

use crate::error::{Error, Result};

use super::model::{
    Accessor, AccessorKind, Buffer, BufferView, ComponentType, Image, Material, Mesh, Model, Node,
    Primitive, PrimitiveMode, Scene,
};

const GLB_MAGIC: &[u8; 4] = b"glTF";
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

#[derive(Deserialize)]
struct GltfJson {
    #[serde(default)]
    buffers: Vec<BufferJson>,
    #[serde(default, rename = "bufferViews")]
    buffer_views: Vec<BufferViewJson>,
    #[serde(default)]
    accessors: Vec<AccessorJson>,
    #[serde(default)]
    meshes: Vec<MeshJson>,
    #[serde(default)]
    nodes: Vec<NodeJson>,
    #[serde(default)]
    scenes: Vec<SceneJson>,
    scene: Option<usize>,
    #[serde(default)]
    images: Vec<ImageJson>,
    #[serde(default)]
    materials: Vec<MaterialJson>,
}

#[derive(Deserialize)]
struct BufferJson {
    #[serde(rename = "byteLength")]
    #[allow(dead_code)]
    byte_length: usize,
    uri: Option<String>,
}

#[derive(Deserialize)]
struct BufferViewJson {
    buffer: usize,
    #[serde(default, rename = "byteOffset")]
    byte_offset: usize,
    #[serde(rename = "byteLength")]
    byte_length: usize,
    #[serde(rename = "byteStride")]
    byte_stride: Option<usize>,
}

#[derive(Deserialize)]
struct AccessorJson {
    #[serde(rename = "bufferView")]
    buffer_view: Option<usize>,
    #[serde(default, rename = "byteOffset")]
    byte_offset: usize,
    #[serde(rename = "componentType")]
    component_type: u32,
    count: usize,
    #[serde(rename = "type")]
    kind: String,
    min: Option<Vec<f64>>,
    max: Option<Vec<f64>>,
}

#[derive(Deserialize)]
struct MeshJson {
    primitives: Vec<PrimitiveJson>,
}

#[derive(Deserialize)]
struct PrimitiveJson {
    attributes: HashMap<String, usize>,
    indices: Option<usize>,
    material: Option<usize>,
    mode: Option<u32>,
}

#[derive(Deserialize)]
struct NodeJson {
    mesh: Option<usize>,
    matrix: Option<[f64; 16]>,
    #[serde(default)]
    children: Vec<usize>,
}

#[derive(Deserialize)]
struct SceneJson {
    #[serde(default)]
    nodes: Vec<usize>,
}

#[derive(Deserialize)]
struct ImageJson {
    uri: Option<String>,
}

#[derive(Deserialize)]
struct MaterialJson {
    name: Option<String>,
}

/// Parse a binary glTF payload into the mesh graph.
///
/// External buffer/image URIs are carried through unresolved; see
/// [`super::resolve_external_data`].
pub fn parse_glb(data: &[u8]) -> Result<Model> {
    if data.len() < 12 {
        return Err(Error::InvalidGltf("GLB shorter than its header".into()));
    }
    if &data[0..4] != GLB_MAGIC {
        return Err(Error::InvalidGltf("bad GLB magic".into()));
    }
    let version = read_u32(data, 4)?;
    if version != 2 {
        return Err(Error::InvalidGltf(format!("unsupported GLB version {}", version)));
    }
    let total_length = read_u32(data, 8)? as usize;
    if total_length > data.len() {
        return Err(Error::InvalidGltf("GLB length exceeds payload".into()));
    }

    let mut json_chunk: Option<&[u8]> = None;
    let mut bin_chunk: Option<&[u8]> = None;

    let mut offset = 12usize;
    while offset + 8 <= total_length {
        let chunk_length = read_u32(data, offset)? as usize;
        let chunk_type = read_u32(data, offset + 4)?;
        let start = offset + 8;
        let end = start + chunk_length;
        if end > total_length {
            return Err(Error::InvalidGltf("GLB chunk overruns container".into()));
        }
        match chunk_type {
            CHUNK_JSON => json_chunk = Some(&data[start..end]),
            CHUNK_BIN => bin_chunk = Some(&data[start..end]),
            _ => {}
        }
        offset = end;
    }

    let json_chunk =
        json_chunk.ok_or_else(|| Error::InvalidGltf("GLB missing JSON chunk".into()))?;
    let gltf: GltfJson = serde_json::from_slice(json_chunk)?;

    build_model(gltf, bin_chunk)
}

fn build_model(gltf: GltfJson, bin_chunk: Option<&[u8]>) -> Result<Model> {
    let mut model = Model::default();

    for (i, b) in gltf.buffers.into_iter().enumerate() {
        // The GLB-stored buffer is buffer 0 with no uri.
        let data = if i == 0 && b.uri.is_none() {
            bin_chunk.map(|c| c.to_vec()).unwrap_or_default()
        } else {
            Vec::new()
        };
        model.buffers.push(Buffer { uri: b.uri, data });
    }

    for v in gltf.buffer_views {
        model.buffer_views.push(BufferView {
            buffer: v.buffer,
            byte_offset: v.byte_offset,
            byte_length: v.byte_length,
            byte_stride: v.byte_stride,
        });
    }

    for a in gltf.accessors {
        model.accessors.push(Accessor {
            buffer_view: a.buffer_view,
            byte_offset: a.byte_offset,
            component_type: component_type(a.component_type)?,
            kind: accessor_kind(&a.kind)?,
            count: a.count,
            min: a.min,
            max: a.max,
        });
    }

    for m in gltf.meshes {
        let primitives = m
            .primitives
            .into_iter()
            .map(|p| {
                Ok(Primitive {
                    mode: primitive_mode(p.mode.unwrap_or(4))?,
                    attributes: p.attributes,
                    indices: p.indices,
                    material: p.material,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        model.meshes.push(Mesh { primitives });
    }

    for n in gltf.nodes {
        model.nodes.push(Node {
            mesh: n.mesh,
            matrix: n
                .matrix
                .map(|m| DMat4::from_cols_array(&m))
                .unwrap_or(DMat4::IDENTITY),
            children: n.children,
        });
    }

    for s in gltf.scenes {
        model.scenes.push(Scene { nodes: s.nodes });
    }
    model.scene = gltf.scene;

    for i in gltf.images {
        model.images.push(Image {
            uri: i.uri,
            data: Vec::new(),
        });
    }

    for m in gltf.materials {
        model.materials.push(Material { name: m.name });
    }

    Ok(model)
}

fn component_type(code: u32) -> Result<ComponentType> {
    match code {
        5123 => Ok(ComponentType::U16),
        5125 => Ok(ComponentType::U32),
        5126 => Ok(ComponentType::F32),
        other => Err(Error::InvalidGltf(format!(
            "unsupported accessor componentType {}",
            other
        ))),
    }
}

fn accessor_kind(kind: &str) -> Result<AccessorKind> {
    match kind {
        "SCALAR" => Ok(AccessorKind::Scalar),
        "VEC2" => Ok(AccessorKind::Vec2),
        "VEC3" => Ok(AccessorKind::Vec3),
        other => Err(Error::InvalidGltf(format!(
            "unsupported accessor type {}",
            other
        ))),
    }
}

fn primitive_mode(mode: u32) -> Result<PrimitiveMode> {
    match mode {
        0 => Ok(PrimitiveMode::Points),
        1 => Ok(PrimitiveMode::Lines),
        4 => Ok(PrimitiveMode::Triangles),
        other => Err(Error::InvalidGltf(format!(
            "unsupported primitive mode {}",
            other
        ))),
    }
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .and_then(|w| w.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| Error::InvalidGltf("truncated GLB header".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal single-triangle GLB in memory.
    pub(crate) fn triangle_glb() -> Vec<u8> {
        let positions: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let indices: [u16; 3] = [0, 1, 2];

        let mut bin = Vec::new();
        super::super::model::le::push_f32s(&mut bin, &positions);
        super::super::model::le::push_u16s(&mut bin, &indices);
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
                {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3"},
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
        glb.extend_from_slice(&CHUNK_JSON.to_le_bytes());
        glb.extend_from_slice(&json_bytes);
        glb.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        glb.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        glb.extend_from_slice(&bin);
        glb
    }

    #[test]
    fn test_parse_triangle_glb() {
        let model = parse_glb(&triangle_glb()).unwrap();
        assert_eq!(model.meshes.len(), 1);
        let primitive = &model.meshes[0].primitives[0];
        let position = primitive.attributes["POSITION"];
        assert_eq!(model.accessors[position].count, 3);
        assert_eq!(
            model.read_vec3_f32(position, 1),
            Some(glam::Vec3::new(1.0, 0.0, 0.0))
        );
        assert_eq!(model.read_index(primitive.indices.unwrap(), 2), Some(2));
    }

    #[test]
    fn test_reject_bad_magic() {
        assert!(parse_glb(b"nope").is_err());
        assert!(parse_glb(b"nopenopenopenope").is_err());
    }

    #[test]
    fn test_truncated_glb_is_error() {
        let mut glb = triangle_glb();
        glb.truncate(20);
        assert!(parse_glb(&glb).is_err());
    }
}
