//! Per-vertex overlay texture-coordinate generation

use std::collections::HashMap;

use glam::{DMat4, DVec2};

use crate::geodesy::{Ellipsoid, Projection, Rectangle};
use crate::mesh::{le, AccessorKind, ComponentType, Model};

const ANTI_MERIDIAN_EPSILON: f64 = 1e-5;

/// What an overlay contributes to worker-side post-processing: which
/// attribute to emit and through which projection.
#[derive(Debug, Clone, Copy)]
pub struct OverlayUvSpec {
    pub overlay_id: u32,
    pub projection: Projection,
}

/// Generate a `_CESIUMOVERLAY_<id>` VEC2 accessor for every primitive in
/// the scene that exposes `POSITION`, normalised into `rectangle` on the
/// overlay's projection plane.
///
/// A POSITION accessor shared by several primitives is processed once; the
/// generated accessor is reused. Vertices whose ellipsoid inversion fails
/// get `(0, 0)`. Vertices within epsilon of the anti-meridian that project
/// outside the rectangle are retried on the other side and the closer
/// projection wins.
pub fn create_overlay_texture_coordinates(
    model: &mut Model,
    tile_transform: DMat4,
    texture_coordinate_id: u32,
    projection: &Projection,
    rectangle: Rectangle,
) {
    let attribute_name = format!("_CESIUMOVERLAY_{}", texture_coordinate_id);
    let locations = model.primitives_in_scene();
    let mut generated: HashMap<usize, usize> = HashMap::new();

    for location in locations {
        let position = {
            let primitive = &model.meshes[location.mesh].primitives[location.primitive];
            if primitive.attributes.contains_key(&attribute_name) {
                continue;
            }
            match primitive.attributes.get("POSITION") {
                Some(&position) => position,
                None => continue,
            }
        };

        let uv_accessor = match generated.get(&position) {
            Some(&existing) => existing,
            None => {
                let transform = tile_transform * location.transform;
                let accessor =
                    generate_uv_accessor(model, position, transform, projection, &rectangle);
                generated.insert(position, accessor);
                accessor
            }
        };

        model.meshes[location.mesh].primitives[location.primitive]
            .attributes
            .insert(attribute_name.clone(), uv_accessor);
    }
}

fn generate_uv_accessor(
    model: &mut Model,
    position: usize,
    transform: DMat4,
    projection: &Projection,
    rectangle: &Rectangle,
) -> usize {
    let count = model.accessors[position].count;
    let width = rectangle.width();
    let height = rectangle.height();

    let mut data = Vec::with_capacity(count * 8);
    for i in 0..count {
        let uv = match model.read_vec3_f32(position, i) {
            Some(local) => {
                let ecef = crate::mesh::transform_position(&transform, local);
                project_vertex(ecef, projection, rectangle)
                    .map(|p| {
                        DVec2::new(
                            ((p.x - rectangle.min_x) / width).clamp(0.0, 1.0),
                            ((p.y - rectangle.min_y) / height).clamp(0.0, 1.0),
                        )
                    })
                    .unwrap_or(DVec2::ZERO)
            }
            None => DVec2::ZERO,
        };
        le::push_f32s(&mut data, &[uv.x as f32, uv.y as f32]);
    }

    model.push_accessor(data, ComponentType::F32, AccessorKind::Vec2, count, None, None)
}

fn project_vertex(
    ecef: glam::DVec3,
    projection: &Projection,
    rectangle: &Rectangle,
) -> Option<DVec2> {
    let mut cartographic = Ellipsoid::WGS84.cartesian_to_cartographic(ecef)?;
    let mut projected = projection.project(&cartographic);

    // Near the anti-meridian the projection can land a hemisphere away
    // from an overlay rectangle that straddles it; try the equivalent
    // longitude on the other side and keep whichever is closer.
    let near_anti_meridian =
        (cartographic.longitude.abs() - std::f64::consts::PI).abs() < ANTI_MERIDIAN_EPSILON;
    if near_anti_meridian && !rectangle.contains_point(projected) {
        cartographic.longitude += if cartographic.longitude < 0.0 {
            std::f64::consts::TAU
        } else {
            -std::f64::consts::TAU
        };
        let wrapped = projection.project(&cartographic);
        if rectangle.signed_distance(wrapped) < rectangle.signed_distance(projected) {
            projected = wrapped;
        }
    }

    Some(projected)
}
