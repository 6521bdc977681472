//! Canonical outlines for the supported item shapes.
//!
//! Outlines are inscribed in the placement's unrotated box and turned
//! about its center.  Drawing code consumes the vertices as-is.

use riglog_core::model::{normalize_rotation, ItemPlacement, Shape};
use serde::Serialize;

use crate::bounds::{Bounds, Footprint, Point};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ShapeOutline {
    /// Closed polygon, vertices in drawing order.
    Polygon { points: Vec<Point> },
    Ellipse {
        center: Point,
        radius_x: f64,
        radius_y: f64,
        /// Degrees, about `center`.
        rotation: f64,
    },
}

impl ShapeOutline {
    /// Axis-aligned extent of the outline.
    pub fn bounds(&self) -> Bounds {
        match self {
            ShapeOutline::Polygon { points } => {
                let mut iter = points.iter();
                let Some(first) = iter.next() else {
                    return Bounds::from_rect(0.0, 0.0, 0.0, 0.0);
                };
                iter.fold(Bounds::from_rect(first.x, first.y, 0.0, 0.0), |acc, p| {
                    acc.union(&Bounds::from_rect(p.x, p.y, 0.0, 0.0))
                })
            }
            ShapeOutline::Ellipse {
                center,
                radius_x,
                radius_y,
                rotation,
            } => {
                let (sin, cos) = rotation.to_radians().sin_cos();
                let half_w = ((radius_x * cos).powi(2) + (radius_y * sin).powi(2)).sqrt();
                let half_h = ((radius_x * sin).powi(2) + (radius_y * cos).powi(2)).sqrt();
                Bounds {
                    min_x: center.x - half_w,
                    min_y: center.y - half_h,
                    max_x: center.x + half_w,
                    max_y: center.y + half_h,
                }
            }
        }
    }
}

/// Outline of `shape` inscribed in `rect` and rotated about its center.
pub fn build_shape(shape: Shape, rect: Bounds, rotation: f64) -> ShapeOutline {
    let rotation = normalize_rotation(rotation);
    let center = rect.center();

    let vertices = match shape {
        Shape::Circle => {
            return ShapeOutline::Ellipse {
                center,
                radius_x: rect.width() / 2.0,
                radius_y: rect.height() / 2.0,
                rotation,
            };
        }
        Shape::Rectangle => rect.corners().to_vec(),
        // Right angle at the bottom-left corner.
        Shape::RightTriangle => vec![
            Point::new(rect.min_x, rect.min_y),
            Point::new(rect.min_x, rect.max_y),
            Point::new(rect.max_x, rect.max_y),
        ],
        // Apex at the top center, base along the bottom edge.
        Shape::EquilateralTriangle => vec![
            Point::new(center.x, rect.min_y),
            Point::new(rect.max_x, rect.max_y),
            Point::new(rect.min_x, rect.max_y),
        ],
    };

    let points = if rotation == 0.0 {
        vertices
    } else {
        vertices
            .into_iter()
            .map(|p| p.rotate_about(center, rotation))
            .collect()
    };
    ShapeOutline::Polygon { points }
}

/// Outline of an item in meters.
pub fn item_outline(item: &ItemPlacement) -> ShapeOutline {
    build_shape(item.shape, Bounds::of(item.footprint()), item.base.rotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::compute_bounds;
    use riglog_core::model::PlacementBase;

    const EPS: f64 = 1e-9;

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < EPS && (a.y - b.y).abs() < EPS
    }

    #[test]
    fn test_rectangle_matches_corners() {
        let rect = Bounds::from_rect(0.0, 0.0, 4.0, 2.0);
        let ShapeOutline::Polygon { points } = build_shape(Shape::Rectangle, rect, 0.0) else {
            panic!("expected polygon");
        };
        assert_eq!(points, rect.corners().to_vec());
    }

    #[test]
    fn test_triangles_inscribed() {
        let rect = Bounds::from_rect(1.0, 1.0, 4.0, 3.0);
        for shape in [Shape::RightTriangle, Shape::EquilateralTriangle] {
            let outline = build_shape(shape, rect, 0.0);
            let ShapeOutline::Polygon { points } = &outline else {
                panic!("expected polygon");
            };
            assert_eq!(points.len(), 3);
            assert_eq!(outline.bounds(), rect);
        }
    }

    #[test]
    fn test_circle_is_ellipse() {
        let rect = Bounds::from_rect(0.0, 0.0, 6.0, 2.0);
        let outline = build_shape(Shape::Circle, rect, 0.0);
        assert_eq!(
            outline,
            ShapeOutline::Ellipse {
                center: Point::new(3.0, 1.0),
                radius_x: 3.0,
                radius_y: 1.0,
                rotation: 0.0,
            }
        );
        assert_eq!(outline.bounds(), rect);
    }

    #[test]
    fn test_rotated_rectangle_agrees_with_bounds() {
        let mut base = PlacementBase::new("Skid", 4.0, 2.0);
        base.rotation = 45.0;
        let outline = build_shape(Shape::Rectangle, Bounds::of(&base), base.rotation);
        let from_outline = outline.bounds();
        let from_bounds = compute_bounds([&base]);
        assert!(close(from_outline.center(), from_bounds.center()));
        assert!((from_outline.width() - from_bounds.width()).abs() < EPS);
    }

    #[test]
    fn test_rotation_normalized_before_use() {
        let rect = Bounds::from_rect(0.0, 0.0, 2.0, 2.0);
        assert_eq!(
            build_shape(Shape::Rectangle, rect, 450.0),
            build_shape(Shape::Rectangle, rect, 90.0)
        );
    }

    #[test]
    fn test_rotated_ellipse_bounds() {
        let rect = Bounds::from_rect(0.0, 0.0, 4.0, 2.0);
        let outline = build_shape(Shape::Circle, rect, 90.0);
        let b = outline.bounds();
        assert!((b.width() - 2.0).abs() < EPS);
        assert!((b.height() - 4.0).abs() < EPS);
    }
}
