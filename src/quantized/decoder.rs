//! Quantized-mesh binary decoder
//!
//! Parses a terrain payload into the in-memory mesh graph: zig-zag delta
//! vertex decode, high-water-mark index decode, skirt synthesis on all four
//! edges, oct-encoded normals and the child-availability metadata extension.
//! Every read is bounds-checked; a truncated payload yields an empty result
//! rather than an error.

use glam::{DMat4, DVec3, Vec3};
use serde::Deserialize;

use crate::geodesy::{self, Cartographic, Ellipsoid, GlobeRectangle, QuadtreeTileId};
use crate::mesh::{
    AccessorKind, ComponentType, Material, Mesh, Model, Primitive, PrimitiveMode, Scene,
};
use crate::tiles::{BoundingRegion, QuadtreeTileRange};

/// Skirt drop below the tile edge, a constant of the format.
pub const SKIRT_HEIGHT: f64 = 200.0;

const QUANTIZED_MAX: f64 = 32767.0;
const EXTENSION_OCT_NORMALS: u8 = 1;
const EXTENSION_METADATA: u8 = 4;

/// Outcome of a quantized-mesh decode.
#[derive(Debug, Default)]
pub struct QuantizedMeshResult {
    /// The decoded mesh; `None` when the payload was truncated.
    pub model: Option<Model>,
    /// Tightened bounding region using the header's height range.
    pub region: Option<BoundingRegion>,
    /// Child availability ranges from the metadata extension.
    pub available: Vec<QuadtreeTileRange>,
}

struct Header {
    bounding_sphere_center: DVec3,
    minimum_height: f64,
    maximum_height: f64,
    vertex_count: u32,
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(len)?;
        let window = self.data.get(self.offset..end)?;
        self.offset = end;
        Some(window)
    }

    fn read_u8(&mut self) -> Option<u8> {
        Some(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn read_f32(&mut self) -> Option<f32> {
        Some(f32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn read_f64(&mut self) -> Option<f64> {
        Some(f64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    /// Indices of wide meshes start on a 4-byte boundary; the u16 vertex
    /// data can leave the cursor 2-byte aligned.
    fn align_to_4(&mut self) -> Option<()> {
        if self.offset % 4 != 0 {
            self.take(2)?;
        }
        Some(())
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

fn zig_zag_decode(value: u16) -> i32 {
    ((value >> 1) as i32) ^ (-((value & 1) as i32))
}

fn oct_decode(x: u8, y: u8) -> Vec3 {
    let mut nx = geodesy::from_snorm(x, 255);
    let mut ny = geodesy::from_snorm(y, 255);
    let nz = 1.0 - (nx.abs() + ny.abs());

    if nz < 0.0 {
        let old_x = nx;
        nx = (1.0 - ny.abs()) * geodesy::sign_not_zero(old_x);
        ny = (1.0 - old_x.abs()) * geodesy::sign_not_zero(ny);
    }

    let n = DVec3::new(nx, ny, nz).normalize();
    Vec3::new(n.x as f32, n.y as f32, n.z as f32)
}

/// Decode a quantized-mesh payload covering `rectangle`.
///
/// Truncation anywhere before the extension records aborts the decode and
/// returns an empty result; a truncated extension record merely ends
/// extension processing.
pub fn decode_quantized_mesh(
    data: &[u8],
    tile_id: QuadtreeTileId,
    rectangle: &GlobeRectangle,
    ellipsoid: &Ellipsoid,
) -> QuantizedMeshResult {
    decode(data, tile_id, rectangle, ellipsoid).unwrap_or_default()
}

fn read_header(cursor: &mut Cursor) -> Option<Header> {
    // The tile-center triple leads the header; only the bounding-sphere
    // centre participates in the decode.
    let _center = (cursor.read_f64()?, cursor.read_f64()?, cursor.read_f64()?);
    let minimum_height = cursor.read_f32()? as f64;
    let maximum_height = cursor.read_f32()? as f64;
    let bounding_sphere_center = DVec3::new(
        cursor.read_f64()?,
        cursor.read_f64()?,
        cursor.read_f64()?,
    );
    let _bounding_sphere_radius = cursor.read_f64()?;
    let _horizon_occlusion =
        (cursor.read_f64()?, cursor.read_f64()?, cursor.read_f64()?);
    let vertex_count = cursor.read_u32()?;

    Some(Header {
        bounding_sphere_center,
        minimum_height,
        maximum_height,
        vertex_count,
    })
}

fn decode(
    data: &[u8],
    tile_id: QuadtreeTileId,
    rectangle: &GlobeRectangle,
    ellipsoid: &Ellipsoid,
) -> Option<QuantizedMeshResult> {
    let mut cursor = Cursor::new(data);
    let header = read_header(&mut cursor)?;
    let vertex_count = header.vertex_count as usize;

    let u_window = cursor.take(vertex_count * 2)?;
    let v_window = cursor.take(vertex_count * 2)?;
    let h_window = cursor.take(vertex_count * 2)?;

    // Zig-zag encoded deltas, seeded at zero.
    let mut quantized = Vec::with_capacity(vertex_count);
    let (mut u, mut v, mut h) = (0i32, 0i32, 0i32);
    for i in 0..vertex_count {
        u += zig_zag_decode(read_u16_at(u_window, i));
        v += zig_zag_decode(read_u16_at(v_window, i));
        h += zig_zag_decode(read_u16_at(h_window, i));
        quantized.push((u, v, h));
    }

    let wide_indices = header.vertex_count > 65536;
    let index_size = if wide_indices { 4 } else { 2 };
    if wide_indices {
        cursor.align_to_4()?;
    }

    let triangle_count = cursor.read_u32()? as usize;
    let index_count = triangle_count * 3;
    let encoded_indices = cursor.take(index_count * index_size)?;

    let mut indices = Vec::with_capacity(index_count);
    let mut highest: u32 = 0;
    for i in 0..index_count {
        let code = if wide_indices {
            read_u32_at(encoded_indices, i)
        } else {
            read_u16_at(encoded_indices, i) as u32
        };
        indices.push(highest.wrapping_sub(code));
        if code == 0 {
            highest += 1;
        }
    }

    let mut edges = Vec::with_capacity(4);
    for _ in 0..4 {
        let edge_vertex_count = cursor.read_u32()? as usize;
        let window = cursor.take(edge_vertex_count * index_size)?;
        let edge: Vec<u32> = (0..edge_vertex_count)
            .map(|i| {
                if wide_indices {
                    read_u32_at(window, i)
                } else {
                    read_u16_at(window, i) as u32
                }
            })
            .filter(|&i| (i as usize) < vertex_count)
            .collect();
        edges.push(edge);
    }

    // Sort each edge along its varying parameter so adjacent pairs are
    // geometric neighbours: west/east by v, south/north by u.
    edges[0].sort_unstable_by_key(|&i| quantized[i as usize].1);
    edges[1].sort_unstable_by_key(|&i| std::cmp::Reverse(quantized[i as usize].0));
    edges[2].sort_unstable_by_key(|&i| std::cmp::Reverse(quantized[i as usize].1));
    edges[3].sort_unstable_by_key(|&i| quantized[i as usize].0);

    let mut skirt_vertex_count: usize = edges.iter().map(|e| e.len()).sum();
    let mut skirt_index_count: usize = edges
        .iter()
        .map(|e| e.len().saturating_sub(1) * 6)
        .sum();
    if !wide_indices && vertex_count + skirt_vertex_count > 65536 {
        log::warn!(
            "quantized-mesh tile {}/{}/{} too dense for u16 skirts, omitting them",
            tile_id.level,
            tile_id.x,
            tile_id.y
        );
        skirt_vertex_count = 0;
        skirt_index_count = 0;
        for edge in &mut edges {
            edge.clear();
        }
    }

    // Decode positions, preallocating room for the skirt vertices.
    let mut positions: Vec<f32> = Vec::with_capacity((vertex_count + skirt_vertex_count) * 3);
    let mut min = DVec3::splat(f64::MAX);
    let mut max = DVec3::splat(f64::MIN);
    if vertex_count == 0 {
        min = DVec3::ZERO;
        max = DVec3::ZERO;
    }
    for &(u, v, h) in &quantized {
        let longitude = geodesy::lerp(rectangle.west, rectangle.east, u as f64 / QUANTIZED_MAX);
        let latitude = geodesy::lerp(rectangle.south, rectangle.north, v as f64 / QUANTIZED_MAX);
        let height = geodesy::lerp(
            header.minimum_height,
            header.maximum_height,
            h as f64 / QUANTIZED_MAX,
        );

        let position = ellipsoid
            .cartographic_to_cartesian(&Cartographic::new(longitude, latitude, height))
            - header.bounding_sphere_center;

        positions.push(position.x as f32);
        positions.push(position.y as f32);
        positions.push(position.z as f32);

        min = min.min(position);
        max = max.max(position);
    }

    // Extension records; truncation here keeps what was decoded so far.
    let mut normals: Option<Vec<f32>> = None;
    let mut available = Vec::new();
    while cursor.remaining() > 0 {
        let Some(extension_id) = cursor.read_u8() else {
            break;
        };
        let Some(extension_length) = cursor.read_u32() else {
            break;
        };
        let Some(body) = cursor.take(extension_length as usize) else {
            break;
        };

        match extension_id {
            EXTENSION_OCT_NORMALS => {
                if body.len() >= vertex_count * 2 {
                    let mut decoded = Vec::with_capacity((vertex_count + skirt_vertex_count) * 3);
                    for i in 0..vertex_count {
                        let n = oct_decode(body[i * 2], body[i * 2 + 1]);
                        decoded.push(n.x);
                        decoded.push(n.y);
                        decoded.push(n.z);
                    }
                    normals = Some(decoded);
                }
            }
            EXTENSION_METADATA => {
                let mut body_cursor = Cursor::new(body);
                if let Some(json_length) = body_cursor.read_u32() {
                    if let Some(json) = body_cursor.take(json_length as usize) {
                        available = parse_availability(tile_id, json);
                    }
                }
            }
            _ => {}
        }
    }

    // Skirts: duplicate each edge vertex, dropped along the inward surface
    // normal, and stitch a quad strip between edge and duplicates.
    let surface_normal = ellipsoid.geodetic_surface_normal(header.bounding_sphere_center);
    let displacement = surface_normal * -SKIRT_HEIGHT;
    let displacement = Vec3::new(
        displacement.x as f32,
        displacement.y as f32,
        displacement.z as f32,
    );
    for edge in &edges {
        add_skirt(&mut positions, &mut indices, normals.as_mut(), edge, displacement);
    }
    debug_assert_eq!(positions.len(), (vertex_count + skirt_vertex_count) * 3);
    debug_assert_eq!(indices.len(), index_count + skirt_index_count);

    let model = build_model(
        positions,
        normals,
        indices,
        wide_indices,
        min,
        max,
        header.bounding_sphere_center,
    );

    Some(QuantizedMeshResult {
        model: Some(model),
        region: Some(BoundingRegion::new(
            *rectangle,
            header.minimum_height,
            header.maximum_height,
        )),
        available,
    })
}

fn add_skirt(
    positions: &mut Vec<f32>,
    indices: &mut Vec<u32>,
    mut normals: Option<&mut Vec<f32>>,
    edge: &[u32],
    displacement: Vec3,
) {
    if edge.is_empty() {
        return;
    }

    let base = (positions.len() / 3) as u32;
    for &edge_index in edge {
        let i = edge_index as usize * 3;
        let (x, y, z) = (positions[i], positions[i + 1], positions[i + 2]);
        positions.push(x + displacement.x);
        positions.push(y + displacement.y);
        positions.push(z + displacement.z);
        if let Some(normals) = normals.as_mut() {
            let (nx, ny, nz) = (normals[i], normals[i + 1], normals[i + 2]);
            normals.push(nx);
            normals.push(ny);
            normals.push(nz);
        }
    }

    for (i, pair) in edge.windows(2).enumerate() {
        let (edge_index, next_edge_index) = (pair[0], pair[1]);
        let new_index = base + i as u32;
        indices.extend_from_slice(&[
            edge_index,
            next_edge_index,
            new_index,
            new_index,
            next_edge_index,
            new_index + 1,
        ]);
    }
}

fn build_model(
    positions: Vec<f32>,
    normals: Option<Vec<f32>>,
    indices: Vec<u32>,
    wide_indices: bool,
    min: DVec3,
    max: DVec3,
    center: DVec3,
) -> Model {
    let mut model = Model::default();

    let position_count = positions.len() / 3;
    let mut position_data = Vec::with_capacity(positions.len() * 4);
    crate::mesh::le::push_f32s(&mut position_data, &positions);
    let position_accessor = model.push_accessor(
        position_data,
        ComponentType::F32,
        AccessorKind::Vec3,
        position_count,
        Some(vec![min.x, min.y, min.z]),
        Some(vec![max.x, max.y, max.z]),
    );

    let mut primitive = Primitive {
        mode: PrimitiveMode::Triangles,
        ..Default::default()
    };
    primitive
        .attributes
        .insert("POSITION".to_string(), position_accessor);

    if let Some(normals) = normals {
        let count = normals.len() / 3;
        let mut data = Vec::with_capacity(normals.len() * 4);
        crate::mesh::le::push_f32s(&mut data, &normals);
        let accessor = model.push_accessor(
            data,
            ComponentType::F32,
            AccessorKind::Vec3,
            count,
            None,
            None,
        );
        primitive.attributes.insert("NORMAL".to_string(), accessor);
    }

    let index_count = indices.len();
    let index_accessor = if wide_indices {
        let mut data = Vec::with_capacity(index_count * 4);
        crate::mesh::le::push_u32s(&mut data, &indices);
        model.push_accessor(
            data,
            ComponentType::U32,
            AccessorKind::Scalar,
            index_count,
            None,
            None,
        )
    } else {
        let narrow: Vec<u16> = indices.iter().map(|&i| i as u16).collect();
        let mut data = Vec::with_capacity(index_count * 2);
        crate::mesh::le::push_u16s(&mut data, &narrow);
        model.push_accessor(
            data,
            ComponentType::U16,
            AccessorKind::Scalar,
            index_count,
            None,
            None,
        )
    };
    primitive.indices = Some(index_accessor);

    model.materials.push(Material::default());
    primitive.material = Some(0);

    model.meshes.push(Mesh {
        primitives: vec![primitive],
    });

    // Geocentric Z-up to renderer Y-up, translated back to the
    // bounding-sphere centre.
    model.nodes.push(crate::mesh::Node {
        mesh: Some(0),
        matrix: DMat4::from_cols_array(&[
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, -1.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            center.x, center.z, -center.y, 1.0,
        ]),
        children: Vec::new(),
    });
    model.scenes.push(Scene { nodes: vec![0] });
    model.scene = Some(0);

    model
}

#[derive(Deserialize)]
struct MetadataJson {
    #[serde(default)]
    available: Vec<Vec<TileRangeJson>>,
}

#[derive(Deserialize)]
struct TileRangeJson {
    #[serde(rename = "startX")]
    start_x: u32,
    #[serde(rename = "startY")]
    start_y: u32,
    #[serde(rename = "endX")]
    end_x: u32,
    #[serde(rename = "endY")]
    end_y: u32,
}

fn parse_availability(tile_id: QuadtreeTileId, json: &[u8]) -> Vec<QuadtreeTileRange> {
    let metadata: MetadataJson = match serde_json::from_slice(json) {
        Ok(metadata) => metadata,
        Err(e) => {
            log::warn!("ignoring malformed quantized-mesh metadata: {}", e);
            return Vec::new();
        }
    };

    let mut ranges = Vec::new();
    for (offset, level_ranges) in metadata.available.iter().enumerate() {
        let level = tile_id.level + 1 + offset as u32;
        for range in level_ranges {
            ranges.push(QuadtreeTileRange {
                level,
                start_x: range.start_x,
                start_y: range.start_y,
                end_x: range.end_x,
                end_y: range.end_y,
            });
        }
    }
    ranges
}

fn read_u16_at(window: &[u8], index: usize) -> u16 {
    let i = index * 2;
    u16::from_le_bytes([window[i], window[i + 1]])
}

fn read_u32_at(window: &[u8], index: usize) -> u32 {
    let i = index * 4;
    u32::from_le_bytes([window[i], window[i + 1], window[i + 2], window[i + 3]])
}
