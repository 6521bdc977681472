//! Rotation-aware bounding boxes in meters.
//!
//! A placement's position is its top-left corner in workspace units and
//! its size is in meters; rotation turns it about its own center.  Every
//! value produced here is in meters.

use riglog_core::model::{
    clamp_dimension, normalize_rotation, ItemPlacement, Placement, PlacementBase, ZonePlacement,
    DEFAULT_HEIGHT_M, DEFAULT_WIDTH_M,
};
use serde::Serialize;

use crate::units::to_real_units;

/// Returned by [`compute_bounds`] when there is nothing to measure.
pub const FALLBACK_BOUNDS: Bounds = Bounds {
    min_x: 0.0,
    min_y: 0.0,
    max_x: 10.0,
    max_y: 10.0,
};

// ───────────────────────────────────────────────────────────────────
// Point
// ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline(always)]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Rotate about `center` by `degrees`.
    pub fn rotate_about(&self, center: Point, degrees: f64) -> Point {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let dx = self.x - center.x;
        let dy = self.y - center.y;
        Point {
            x: center.x + dx * cos - dy * sin,
            y: center.y + dx * sin + dy * cos,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Bounds
// ───────────────────────────────────────────────────────────────────

/// Axis-aligned box stored as min/max corners.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Create from origin + size.
    #[inline(always)]
    pub fn from_rect(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x + width,
            max_y: y + height,
        }
    }

    /// Unrotated extent of a placement.
    pub fn of(base: &PlacementBase) -> Self {
        Self::from_rect(
            to_real_units(base.x),
            to_real_units(base.y),
            clamp_dimension(base.width, DEFAULT_WIDTH_M),
            clamp_dimension(base.height, DEFAULT_HEIGHT_M),
        )
    }

    /// Inclusive point test.
    #[inline(always)]
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.min_x
            && point.x <= self.max_x
            && point.y >= self.min_y
            && point.y <= self.max_y
    }

    #[inline(always)]
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    fn include(&mut self, point: Point) {
        self.min_x = self.min_x.min(point.x);
        self.min_y = self.min_y.min(point.y);
        self.max_x = self.max_x.max(point.x);
        self.max_y = self.max_y.max(point.y);
    }

    #[inline(always)]
    pub fn center(&self) -> Point {
        Point::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    #[inline(always)]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    #[inline(always)]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Corners clockwise from the top-left.
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.min_x, self.min_y),
            Point::new(self.max_x, self.min_y),
            Point::new(self.max_x, self.max_y),
            Point::new(self.min_x, self.max_y),
        ]
    }
}

// ───────────────────────────────────────────────────────────────────
// Footprint
// ───────────────────────────────────────────────────────────────────

/// Anything that occupies space on a deck.
pub trait Footprint {
    fn footprint(&self) -> &PlacementBase;

    /// Center in meters.  Rotation turns about the center, so it is
    /// unaffected by it.
    fn center(&self) -> Point {
        Bounds::of(self.footprint()).center()
    }

    /// The four corners after rotation, in meters.
    fn rotated_corners(&self) -> [Point; 4] {
        let base = self.footprint();
        let rect = Bounds::of(base);
        let rotation = normalize_rotation(base.rotation);
        let mut corners = rect.corners();
        if rotation != 0.0 {
            let center = rect.center();
            for corner in corners.iter_mut() {
                *corner = corner.rotate_about(center, rotation);
            }
        }
        corners
    }
}

impl Footprint for PlacementBase {
    fn footprint(&self) -> &PlacementBase {
        self
    }
}

impl Footprint for ItemPlacement {
    fn footprint(&self) -> &PlacementBase {
        &self.base
    }
}

impl Footprint for ZonePlacement {
    fn footprint(&self) -> &PlacementBase {
        &self.base
    }
}

impl Footprint for Placement {
    fn footprint(&self) -> &PlacementBase {
        self.base()
    }
}

impl<T: Footprint + ?Sized> Footprint for &T {
    fn footprint(&self) -> &PlacementBase {
        (**self).footprint()
    }
}

/// Smallest axis-aligned box around every entry, rotation included.
///
/// Returns [`FALLBACK_BOUNDS`] for an empty input.
pub fn compute_bounds<I>(entries: I) -> Bounds
where
    I: IntoIterator,
    I::Item: Footprint,
{
    let mut bounds: Option<Bounds> = None;
    for entry in entries {
        for corner in entry.rotated_corners() {
            match bounds.as_mut() {
                Some(acc) => acc.include(corner),
                None => bounds = Some(Bounds::from_rect(corner.x, corner.y, 0.0, 0.0)),
            }
        }
    }
    bounds.unwrap_or(FALLBACK_BOUNDS)
}
