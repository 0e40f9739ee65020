//! Mesh graph produced by content loaders and consumed by the renderer
//! preparer. Buffer contents are stored little-endian, matching the glTF
//! binary convention, regardless of host order.

use std::collections::HashMap;

use glam::{DMat4, DVec3, Vec3};

/// Scalar storage type of an accessor's components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    U16,
    U32,
    F32,
}

impl ComponentType {
    pub fn size(&self) -> usize {
        match self {
            Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
        }
    }
}

/// Element shape of an accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    Scalar,
    Vec2,
    Vec3,
}

impl AccessorKind {
    pub fn component_count(&self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveMode {
    Points,
    Lines,
    Triangles,
}

#[derive(Debug, Clone, Default)]
pub struct Buffer {
    pub uri: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct BufferView {
    pub buffer: usize,
    pub byte_offset: usize,
    pub byte_length: usize,
    pub byte_stride: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Accessor {
    pub buffer_view: Option<usize>,
    pub byte_offset: usize,
    pub component_type: ComponentType,
    pub kind: AccessorKind,
    pub count: usize,
    pub min: Option<Vec<f64>>,
    pub max: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct Primitive {
    pub mode: PrimitiveMode,
    pub attributes: HashMap<String, usize>,
    pub indices: Option<usize>,
    pub material: Option<usize>,
}

impl Default for PrimitiveMode {
    fn default() -> Self {
        Self::Triangles
    }
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub primitives: Vec<Primitive>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub mesh: Option<usize>,
    pub matrix: DMat4,
    pub children: Vec<usize>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            mesh: None,
            matrix: DMat4::IDENTITY,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Image {
    pub uri: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Material {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub nodes: Vec<usize>,
}

/// The in-memory mesh graph: a deliberately small subset of the glTF data
/// model, just enough for terrain and batched-model content.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub buffers: Vec<Buffer>,
    pub buffer_views: Vec<BufferView>,
    pub accessors: Vec<Accessor>,
    pub meshes: Vec<Mesh>,
    pub nodes: Vec<Node>,
    pub scenes: Vec<Scene>,
    pub scene: Option<usize>,
    pub images: Vec<Image>,
    pub materials: Vec<Material>,
}

impl Model {
    /// Raw bytes of element `index` of an accessor, honouring view stride.
    pub fn element_bytes(&self, accessor: usize, index: usize) -> Option<&[u8]> {
        let accessor = self.accessors.get(accessor)?;
        if index >= accessor.count {
            return None;
        }
        let view = self.buffer_views.get(accessor.buffer_view?)?;
        let buffer = self.buffers.get(view.buffer)?;

        let element_size = accessor.component_type.size() * accessor.kind.component_count();
        let stride = view.byte_stride.unwrap_or(element_size);
        let start = view.byte_offset + accessor.byte_offset + index * stride;
        let end = start + element_size;
        if end > view.byte_offset + view.byte_length || end > buffer.data.len() {
            return None;
        }
        Some(&buffer.data[start..end])
    }

    /// Read element `index` of a float VEC3 accessor.
    pub fn read_vec3_f32(&self, accessor: usize, index: usize) -> Option<Vec3> {
        let a = self.accessors.get(accessor)?;
        if a.component_type != ComponentType::F32 || a.kind != AccessorKind::Vec3 {
            return None;
        }
        let bytes = self.element_bytes(accessor, index)?;
        Some(Vec3::new(
            read_f32(bytes, 0)?,
            read_f32(bytes, 4)?,
            read_f32(bytes, 8)?,
        ))
    }

    /// Read a scalar index element, widening u16 to u32.
    pub fn read_index(&self, accessor: usize, index: usize) -> Option<u32> {
        let a = self.accessors.get(accessor)?;
        if a.kind != AccessorKind::Scalar {
            return None;
        }
        let bytes = self.element_bytes(accessor, index)?;
        match a.component_type {
            ComponentType::U16 => Some(u16::from_le_bytes(bytes.try_into().ok()?) as u32),
            ComponentType::U32 => Some(u32::from_le_bytes(bytes.try_into().ok()?)),
            ComponentType::F32 => None,
        }
    }

    /// Append a tightly-packed buffer + view + accessor, returning the
    /// accessor index.
    pub fn push_accessor(
        &mut self,
        data: Vec<u8>,
        component_type: ComponentType,
        kind: AccessorKind,
        count: usize,
        min: Option<Vec<f64>>,
        max: Option<Vec<f64>>,
    ) -> usize {
        let byte_length = data.len();
        self.buffers.push(Buffer {
            uri: None,
            data,
        });
        self.buffer_views.push(BufferView {
            buffer: self.buffers.len() - 1,
            byte_offset: 0,
            byte_length,
            byte_stride: None,
        });
        self.accessors.push(Accessor {
            buffer_view: Some(self.buffer_views.len() - 1),
            byte_offset: 0,
            component_type,
            kind,
            count,
            min,
            max,
        });
        self.accessors.len() - 1
    }

    /// Locations of every primitive reachable from the default scene, with
    /// the accumulated node transform. Falls back to all nodes when no
    /// scene is present.
    pub fn primitives_in_scene(&self) -> Vec<PrimitiveLocation> {
        let mut out = Vec::new();
        let roots: Vec<usize> = match self.scene.and_then(|s| self.scenes.get(s)) {
            Some(scene) => scene.nodes.clone(),
            None => (0..self.nodes.len()).collect(),
        };
        for root in roots {
            self.collect_primitives(root, DMat4::IDENTITY, &mut out);
        }
        out
    }

    fn collect_primitives(&self, node: usize, parent: DMat4, out: &mut Vec<PrimitiveLocation>) {
        let Some(n) = self.nodes.get(node) else {
            return;
        };
        let transform = parent * n.matrix;
        if let Some(mesh) = n.mesh {
            if let Some(m) = self.meshes.get(mesh) {
                for primitive in 0..m.primitives.len() {
                    out.push(PrimitiveLocation {
                        mesh,
                        primitive,
                        transform,
                    });
                }
            }
        }
        for &child in &n.children {
            self.collect_primitives(child, transform, out);
        }
    }
}

/// A primitive's place in the graph plus its accumulated node transform.
#[derive(Debug, Clone, Copy)]
pub struct PrimitiveLocation {
    pub mesh: usize,
    pub primitive: usize,
    pub transform: DMat4,
}

pub(crate) fn read_f32(bytes: &[u8], offset: usize) -> Option<f32> {
    let window = bytes.get(offset..offset + 4)?;
    Some(f32::from_le_bytes(window.try_into().ok()?))
}

/// Little-endian buffer assembly helpers. On little-endian hosts these
/// reduce to a straight byte copy through bytemuck.
pub(crate) mod le {
    pub fn push_f32s(buf: &mut Vec<u8>, values: &[f32]) {
        #[cfg(target_endian = "little")]
        buf.extend_from_slice(bytemuck::cast_slice(values));
        #[cfg(not(target_endian = "little"))]
        for v in values {
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn push_u16s(buf: &mut Vec<u8>, values: &[u16]) {
        #[cfg(target_endian = "little")]
        buf.extend_from_slice(bytemuck::cast_slice(values));
        #[cfg(not(target_endian = "little"))]
        for v in values {
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn push_u32s(buf: &mut Vec<u8>, values: &[u32]) {
        #[cfg(target_endian = "little")]
        buf.extend_from_slice(bytemuck::cast_slice(values));
        #[cfg(not(target_endian = "little"))]
        for v in values {
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }
}

/// Transform a float-precision local position into a double-precision frame.
pub fn transform_position(transform: &DMat4, position: Vec3) -> DVec3 {
    transform.transform_point3(DVec3::new(
        position.x as f64,
        position.y as f64,
        position.z as f64,
    ))
}
