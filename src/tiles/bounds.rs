//! Bounding volume variants for tiles

use glam::{DMat3, DMat4, DVec3};

use crate::geodesy::{Cartographic, Ellipsoid, GlobeRectangle};

/// Tagged bounding volume of a tile.
#[derive(Debug, Clone)]
pub enum BoundingVolume {
    /// Geodetic region with a height interval.
    Region(BoundingRegion),
    /// Oriented box defined by centre and half-axes.
    OrientedBox(OrientedBoundingBox),
    /// Sphere defined by centre and radius.
    Sphere(BoundingSphere),
}

/// A rectangle on the WGS84 ellipsoid extruded over a height range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingRegion {
    pub rectangle: GlobeRectangle,
    pub minimum_height: f64,
    pub maximum_height: f64,
}

impl BoundingRegion {
    pub fn new(rectangle: GlobeRectangle, minimum_height: f64, maximum_height: f64) -> Self {
        Self {
            rectangle,
            minimum_height,
            maximum_height,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrientedBoundingBox {
    pub center: DVec3,
    /// Columns are the box half-axes.
    pub half_axes: DMat3,
}

#[derive(Debug, Clone, Copy)]
pub struct BoundingSphere {
    pub center: DVec3,
    pub radius: f64,
}

impl BoundingVolume {
    /// Geocentric centre of the volume.
    pub fn center(&self) -> DVec3 {
        match self {
            Self::Region(r) => {
                let c = r.rectangle.center();
                Ellipsoid::WGS84.cartographic_to_cartesian(&Cartographic::new(
                    c.longitude,
                    c.latitude,
                    (r.minimum_height + r.maximum_height) * 0.5,
                ))
            }
            Self::OrientedBox(b) => b.center,
            Self::Sphere(s) => s.center,
        }
    }

    pub fn contains_point(&self, point: DVec3) -> bool {
        match self {
            Self::Region(r) => match Ellipsoid::WGS84.cartesian_to_cartographic(point) {
                Some(c) => {
                    r.rectangle.contains(&c)
                        && c.height >= r.minimum_height - 1e-6
                        && c.height <= r.maximum_height + 1e-6
                }
                None => false,
            },
            Self::OrientedBox(b) => {
                let local = b.half_axes.inverse() * (point - b.center);
                local.x.abs() <= 1.0 && local.y.abs() <= 1.0 && local.z.abs() <= 1.0
            }
            Self::Sphere(s) => point.distance(s.center) <= s.radius,
        }
    }

    /// Distance from `camera` to the volume surface, zero when inside.
    pub fn distance_to_camera(&self, camera: DVec3) -> f64 {
        match self {
            Self::Region(r) => {
                let Some(c) = Ellipsoid::WGS84.cartesian_to_cartographic(camera) else {
                    return 0.0;
                };
                let clamped = Cartographic::new(
                    c.longitude.clamp(r.rectangle.west, r.rectangle.east),
                    c.latitude.clamp(r.rectangle.south, r.rectangle.north),
                    c.height.clamp(r.minimum_height, r.maximum_height),
                );
                Ellipsoid::WGS84
                    .cartographic_to_cartesian(&clamped)
                    .distance(camera)
            }
            Self::OrientedBox(b) => {
                let local = b.half_axes.inverse() * (camera - b.center);
                let clamped = local.clamp(DVec3::splat(-1.0), DVec3::splat(1.0));
                let nearest = b.center + b.half_axes * clamped;
                nearest.distance(camera)
            }
            Self::Sphere(s) => (camera.distance(s.center) - s.radius).max(0.0),
        }
    }

    /// Transform the volume by `matrix`. Regions are anchored to the
    /// ellipsoid and pass through unchanged.
    pub fn transform(&self, matrix: &DMat4) -> Self {
        match self {
            Self::Region(_) => self.clone(),
            Self::OrientedBox(b) => {
                let center = matrix.transform_point3(b.center);
                let linear = DMat3::from_cols(
                    matrix.x_axis.truncate(),
                    matrix.y_axis.truncate(),
                    matrix.z_axis.truncate(),
                );
                Self::OrientedBox(OrientedBoundingBox {
                    center,
                    half_axes: linear * b.half_axes,
                })
            }
            Self::Sphere(s) => {
                let center = matrix.transform_point3(s.center);
                let (scale, _, _) = matrix.to_scale_rotation_translation();
                let max_scale = scale.x.max(scale.y).max(scale.z);
                Self::Sphere(BoundingSphere {
                    center,
                    radius: s.radius * max_scale,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_contains_and_distance() {
        let v = BoundingVolume::Sphere(BoundingSphere {
            center: DVec3::new(10.0, 0.0, 0.0),
            radius: 2.0,
        });
        assert!(v.contains_point(DVec3::new(11.0, 0.0, 0.0)));
        assert!(!v.contains_point(DVec3::new(13.0, 0.0, 0.0)));
        assert!((v.distance_to_camera(DVec3::new(15.0, 0.0, 0.0)) - 3.0).abs() < 1e-12);
        assert_eq!(v.distance_to_camera(DVec3::new(10.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_box_contains_point() {
        let v = BoundingVolume::OrientedBox(OrientedBoundingBox {
            center: DVec3::ZERO,
            half_axes: DMat3::from_diagonal(DVec3::new(2.0, 1.0, 1.0)),
        });
        assert!(v.contains_point(DVec3::new(1.9, 0.5, -0.5)));
        assert!(!v.contains_point(DVec3::new(2.1, 0.0, 0.0)));
    }

    #[test]
    fn test_region_contains_surface_point() {
        let region = BoundingVolume::Region(BoundingRegion::new(
            GlobeRectangle::new(-0.1, -0.1, 0.1, 0.1),
            -10.0,
            1000.0,
        ));
        let inside = Ellipsoid::WGS84
            .cartographic_to_cartesian(&Cartographic::new(0.0, 0.0, 100.0));
        let outside = Ellipsoid::WGS84
            .cartographic_to_cartesian(&Cartographic::new(0.5, 0.0, 100.0));
        assert!(region.contains_point(inside));
        assert!(!region.contains_point(outside));
    }

    #[test]
    fn test_transformed_box_follows_translation() {
        let v = BoundingVolume::OrientedBox(OrientedBoundingBox {
            center: DVec3::ZERO,
            half_axes: DMat3::IDENTITY,
        });
        let moved = v.transform(&DMat4::from_translation(DVec3::new(5.0, 0.0, 0.0)));
        assert!(moved.contains_point(DVec3::new(5.5, 0.0, 0.0)));
        assert!(!moved.contains_point(DVec3::new(0.0, 0.0, 0.0)));
    }
}
