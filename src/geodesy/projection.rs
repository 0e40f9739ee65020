//! Map projections used by raster overlays

use glam::DVec2;

use super::{Cartographic, GlobeRectangle, Rectangle};

/// Tagged projection variant; each maps cartographic coordinates onto a
/// plane whose units are radians on the unit sphere.
#[derive(Debug, Clone, Copy)]
pub enum Projection {
    Geographic(GeographicProjection),
    WebMercator(WebMercatorProjection),
}

impl Projection {
    pub fn project(&self, c: &Cartographic) -> DVec2 {
        match self {
            Self::Geographic(p) => p.project(c),
            Self::WebMercator(p) => p.project(c),
        }
    }

    pub fn project_rectangle(&self, r: &GlobeRectangle) -> Rectangle {
        let sw = self.project(&Cartographic::new(r.west, r.south, 0.0));
        let ne = self.project(&Cartographic::new(r.east, r.north, 0.0));
        Rectangle::new(sw.x, sw.y, ne.x, ne.y)
    }
}

/// Equirectangular plate carrée: the identity on (longitude, latitude).
#[derive(Debug, Clone, Copy, Default)]
pub struct GeographicProjection;

impl GeographicProjection {
    pub fn project(&self, c: &Cartographic) -> DVec2 {
        DVec2::new(c.longitude, c.latitude)
    }
}

/// Spherical web-mercator, latitude clamped to the square domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercatorProjection;

impl WebMercatorProjection {
    /// Latitude beyond which the projection is clamped, ~85.05 degrees.
    pub const MAXIMUM_LATITUDE: f64 = 1.4844222297453324;

    pub fn project(&self, c: &Cartographic) -> DVec2 {
        let lat = c
            .latitude
            .clamp(-Self::MAXIMUM_LATITUDE, Self::MAXIMUM_LATITUDE);
        let y = (std::f64::consts::FRAC_PI_4 + lat * 0.5).tan().ln();
        DVec2::new(c.longitude, y)
    }
}
