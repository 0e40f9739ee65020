//! WGS84 ellipsoid and cartographic conversions

use glam::DVec3;

/// `(longitude, latitude, height)` in radians / metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cartographic {
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
}

impl Cartographic {
    pub fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude,
            latitude,
            height,
        }
    }
}

/// A quadratic surface defined by its three radii.
#[derive(Debug, Clone, Copy)]
pub struct Ellipsoid {
    pub radii: DVec3,
    radii_squared: DVec3,
    one_over_radii_squared: DVec3,
    center_tolerance_squared: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid::new(6378137.0, 6378137.0, 6356752.314245179);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            radii: DVec3::new(x, y, z),
            radii_squared: DVec3::new(x * x, y * y, z * z),
            one_over_radii_squared: DVec3::new(1.0 / (x * x), 1.0 / (y * y), 1.0 / (z * z)),
            center_tolerance_squared: 0.1,
        }
    }

    pub fn maximum_radius(&self) -> f64 {
        self.radii.x.max(self.radii.y).max(self.radii.z)
    }

    /// Outward unit normal of the ellipsoid surface below `position`.
    pub fn geodetic_surface_normal(&self, position: DVec3) -> DVec3 {
        (position * self.one_over_radii_squared).normalize()
    }

    pub fn geodetic_surface_normal_cartographic(&self, c: &Cartographic) -> DVec3 {
        let cos_lat = c.latitude.cos();
        DVec3::new(
            cos_lat * c.longitude.cos(),
            cos_lat * c.longitude.sin(),
            c.latitude.sin(),
        )
    }

    /// Convert cartographic coordinates to the geocentric frame.
    pub fn cartographic_to_cartesian(&self, c: &Cartographic) -> DVec3 {
        let n = self.geodetic_surface_normal_cartographic(c);
        let mut k = self.radii_squared * n;
        let gamma = n.dot(k).sqrt();
        k /= gamma;
        k + n * c.height
    }

    /// Convert a geocentric position to cartographic coordinates.
    ///
    /// Returns `None` when the position is at (or numerically
    /// indistinguishable from) the ellipsoid centre.
    pub fn cartesian_to_cartographic(&self, position: DVec3) -> Option<Cartographic> {
        let surface = self.scale_to_geodetic_surface(position)?;
        let normal = self.geodetic_surface_normal(surface);
        let height_vector = position - surface;

        let longitude = normal.y.atan2(normal.x);
        let latitude = normal.z.clamp(-1.0, 1.0).asin();
        let height = sign(height_vector.dot(position)) * height_vector.length();

        Some(Cartographic::new(longitude, latitude, height))
    }

    /// Scale `position` along the geodetic surface normal to the ellipsoid
    /// surface, via Newton iteration on the surface constraint.
    fn scale_to_geodetic_surface(&self, position: DVec3) -> Option<DVec3> {
        let p2 = position * position;
        let x2 = p2.x * self.one_over_radii_squared.x;
        let y2 = p2.y * self.one_over_radii_squared.y;
        let z2 = p2.z * self.one_over_radii_squared.z;

        let squared_norm = x2 + y2 + z2;
        let ratio = (1.0 / squared_norm).sqrt();
        if squared_norm < self.center_tolerance_squared {
            return if ratio.is_finite() {
                Some(position * ratio)
            } else {
                None
            };
        }

        let intersection = position * ratio;
        let gradient = intersection * self.one_over_radii_squared * 2.0;
        let mut lambda = (1.0 - ratio) * position.length() / (0.5 * gradient.length());
        let mut correction = 0.0;

        loop {
            lambda -= correction;

            let mx = 1.0 / (1.0 + lambda * self.one_over_radii_squared.x);
            let my = 1.0 / (1.0 + lambda * self.one_over_radii_squared.y);
            let mz = 1.0 / (1.0 + lambda * self.one_over_radii_squared.z);

            let func = x2 * mx * mx + y2 * my * my + z2 * mz * mz - 1.0;
            if func.abs() <= 1e-12 {
                return Some(DVec3::new(
                    position.x * mx,
                    position.y * my,
                    position.z * mz,
                ));
            }

            let denominator = x2 * mx * mx * mx * self.one_over_radii_squared.x
                + y2 * my * my * my * self.one_over_radii_squared.y
                + z2 * mz * mz * mz * self.one_over_radii_squared.z;
            correction = func / (-2.0 * denominator);
        }
    }
}

fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}
