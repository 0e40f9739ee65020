//! Geodetic and projected rectangles

use glam::DVec2;
use serde::{Deserialize, Serialize};

use super::Cartographic;

/// A rectangle on the ellipsoid, bounded by longitudes/latitudes in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobeRectangle {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl GlobeRectangle {
    pub const MAXIMUM: GlobeRectangle = GlobeRectangle {
        west: -std::f64::consts::PI,
        south: -std::f64::consts::FRAC_PI_2,
        east: std::f64::consts::PI,
        north: std::f64::consts::FRAC_PI_2,
    };

    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn contains(&self, c: &Cartographic) -> bool {
        c.longitude >= self.west
            && c.longitude <= self.east
            && c.latitude >= self.south
            && c.latitude <= self.north
    }

    pub fn center(&self) -> Cartographic {
        Cartographic::new(
            (self.west + self.east) * 0.5,
            (self.south + self.north) * 0.5,
            0.0,
        )
    }

    pub fn intersects(&self, other: &GlobeRectangle) -> bool {
        self.east >= other.west
            && self.west <= other.east
            && self.north >= other.south
            && self.south <= other.north
    }
}

/// An axis-aligned rectangle in a projection plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Rectangle {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn contains_point(&self, p: DVec2) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    pub fn intersects(&self, other: &Rectangle) -> bool {
        self.max_x >= other.min_x
            && self.min_x <= other.max_x
            && self.max_y >= other.min_y
            && self.min_y <= other.max_y
    }

    /// Signed distance to the rectangle: negative inside, positive outside,
    /// Euclidean when outside in both axes.
    pub fn signed_distance(&self, p: DVec2) -> f64 {
        let dx = (self.min_x - p.x).max(p.x - self.max_x);
        let dy = (self.min_y - p.y).max(p.y - self.max_y);
        if dx > 0.0 && dy > 0.0 {
            (dx * dx + dy * dy).sqrt()
        } else {
            dx.max(dy)
        }
    }
}
