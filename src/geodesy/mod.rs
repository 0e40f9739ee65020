//! Geospatial primitives: WGS84 ellipsoid math, rectangles, projections,
//! and the geographic quadtree tiling scheme.

mod ellipsoid;
mod projection;
mod rectangle;
mod tiling;

pub use ellipsoid::{Cartographic, Ellipsoid};
pub use projection::{GeographicProjection, Projection, WebMercatorProjection};
pub use rectangle::{GlobeRectangle, Rectangle};
pub use tiling::{GeographicTilingScheme, QuadtreeTileId};

use glam::DMat4;

/// Linear interpolation between `a` and `b`.
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Map an unsigned `value` in `[0, range_max]` to `[-1, 1]`.
pub fn from_snorm(value: u8, range_max: u8) -> f64 {
    value as f64 / range_max as f64 * 2.0 - 1.0
}

/// 1.0 for non-negative values, -1.0 otherwise.
pub fn sign_not_zero(value: f64) -> f64 {
    if value < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Column-major transform taking geocentric Z-up coordinates to the
/// renderer's Y-up convention.
pub const Z_UP_TO_Y_UP: DMat4 = DMat4::from_cols_array(&[
    1.0, 0.0, 0.0, 0.0, //
    0.0, 0.0, -1.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
]);

/// Inverse of [`Z_UP_TO_Y_UP`].
pub const Y_UP_TO_Z_UP: DMat4 = DMat4::from_cols_array(&[
    1.0, 0.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, -1.0, 0.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
]);
