//! Smooth normal generation for primitives that lack them

use glam::Vec3;

use super::model::{AccessorKind, ComponentType, Model, PrimitiveMode};
use super::model::le;

/// Generate an area-weighted smooth `NORMAL` attribute for every triangle
/// primitive that has a `POSITION` accessor but no normals.
pub fn generate_missing_normals_smooth(model: &mut Model) {
    for mesh in 0..model.meshes.len() {
        for primitive in 0..model.meshes[mesh].primitives.len() {
            let (position, indices) = {
                let p = &model.meshes[mesh].primitives[primitive];
                if p.mode != PrimitiveMode::Triangles || p.attributes.contains_key("NORMAL") {
                    continue;
                }
                let Some(&position) = p.attributes.get("POSITION") else {
                    continue;
                };
                (position, p.indices)
            };

            let Some(normals) = compute_smooth_normals(model, position, indices) else {
                continue;
            };

            let count = normals.len();
            let mut data = Vec::with_capacity(count * 12);
            for n in &normals {
                le::push_f32s(&mut data, &[n.x, n.y, n.z]);
            }
            let accessor = model.push_accessor(
                data,
                ComponentType::F32,
                AccessorKind::Vec3,
                count,
                None,
                None,
            );
            model.meshes[mesh].primitives[primitive]
                .attributes
                .insert("NORMAL".to_string(), accessor);
        }
    }
}

fn compute_smooth_normals(
    model: &Model,
    position: usize,
    indices: Option<usize>,
) -> Option<Vec<Vec3>> {
    let vertex_count = model.accessors.get(position)?.count;
    let mut normals = vec![Vec3::ZERO; vertex_count];

    let triangle_count = match indices {
        Some(accessor) => model.accessors.get(accessor)?.count / 3,
        None => vertex_count / 3,
    };

    for t in 0..triangle_count {
        let (i0, i1, i2) = match indices {
            Some(accessor) => (
                model.read_index(accessor, t * 3)? as usize,
                model.read_index(accessor, t * 3 + 1)? as usize,
                model.read_index(accessor, t * 3 + 2)? as usize,
            ),
            None => (t * 3, t * 3 + 1, t * 3 + 2),
        };

        let p0 = model.read_vec3_f32(position, i0)?;
        let p1 = model.read_vec3_f32(position, i1)?;
        let p2 = model.read_vec3_f32(position, i2)?;

        // Unnormalised cross product weights the contribution by area.
        let face = (p1 - p0).cross(p2 - p0);
        normals[i0] += face;
        normals[i1] += face;
        normals[i2] += face;
    }

    for n in &mut normals {
        let length = n.length();
        *n = if length > 1e-10 {
            *n / length
        } else {
            Vec3::Z
        };
    }
    Some(normals)
}
