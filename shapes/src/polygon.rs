//! Convex polygons and spheropolygons in the xy plane.

use crate::{require_positive, Dimensions, Shape, ShapeError};
use nalgebra::{UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Convex polygon with vertices given counter-clockwise about its center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvexPolygon {
    vertices: Vec<Vector2<f64>>,
    area: f64,
    radius: f64,
}

impl ConvexPolygon {
    pub fn new(vertices: Vec<Vector2<f64>>) -> Result<Self, ShapeError> {
        check_vertices("convex polygon", &vertices, 3)?;
        let area = signed_area(&vertices);
        if !(area > 0.0) || !is_convex(&vertices) {
            return Err(ShapeError::NotConvex {
                shape: "convex polygon",
            });
        }
        let radius = max_norm(&vertices);
        Ok(Self {
            vertices,
            area,
            radius,
        })
    }

    pub fn vertices(&self) -> &[Vector2<f64>] {
        &self.vertices
    }
}

impl Shape for ConvexPolygon {
    fn circumsphere_radius(&self) -> f64 {
        self.radius
    }

    fn volume(&self) -> f64 {
        self.area
    }

    fn dimensions(&self) -> Dimensions {
        Dimensions::Two
    }

    fn is_orientable(&self) -> bool {
        true
    }

    fn overlaps(
        &self,
        orientation: &UnitQuaternion<f64>,
        other: &Self,
        other_orientation: &UnitQuaternion<f64>,
        r_ab: &Vector3<f64>,
    ) -> bool {
        swept_overlap(
            &self.vertices,
            0.0,
            orientation,
            &other.vertices,
            0.0,
            other_orientation,
            r_ab,
        )
    }
}

/// Convex polygon swept by a disk: the Minkowski sum of the vertex hull and a
/// disk of `sweep_radius`. One vertex gives a disk, two give a 2D
/// spherocylinder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spheropolygon {
    vertices: Vec<Vector2<f64>>,
    sweep_radius: f64,
    area: f64,
    radius: f64,
}

impl Spheropolygon {
    pub fn new(vertices: Vec<Vector2<f64>>, sweep_radius: f64) -> Result<Self, ShapeError> {
        const NAME: &str = "spheropolygon";
        if sweep_radius == 0.0 {
            check_vertices(NAME, &vertices, 3)?;
        } else {
            require_positive(NAME, "sweep_radius", sweep_radius)?;
            check_vertices(NAME, &vertices, 1)?;
        }
        let core_area = if vertices.len() >= 3 {
            let area = signed_area(&vertices);
            if !(area > 0.0) || !is_convex(&vertices) {
                return Err(ShapeError::NotConvex { shape: NAME });
            }
            area
        } else {
            0.0
        };

        let area = core_area
            + perimeter(&vertices) * sweep_radius
            + std::f64::consts::PI * sweep_radius * sweep_radius;
        let radius = max_norm(&vertices) + sweep_radius;

        Ok(Self {
            vertices,
            sweep_radius,
            area,
            radius,
        })
    }

    /// Disk of the given diameter.
    pub fn disk(diameter: f64) -> Result<Self, ShapeError> {
        let diameter = require_positive("disk", "diameter", diameter)?;
        Self::new(vec![Vector2::zeros()], 0.5 * diameter)
    }

    pub fn vertices(&self) -> &[Vector2<f64>] {
        &self.vertices
    }

    pub fn sweep_radius(&self) -> f64 {
        self.sweep_radius
    }
}


impl Shape for Spheropolygon {
    fn circumsphere_radius(&self) -> f64 {
        self.radius
    }

    fn volume(&self) -> f64 {
        self.area
    }

    fn dimensions(&self) -> Dimensions {
        Dimensions::Two
    }

    fn is_orientable(&self) -> bool {
        self.vertices.len() > 1
    }

    fn overlaps(
        &self,
        orientation: &UnitQuaternion<f64>,
        other: &Self,
        other_orientation: &UnitQuaternion<f64>,
        r_ab: &Vector3<f64>,
    ) -> bool {
        swept_overlap(
            &self.vertices,
            self.sweep_radius,
            orientation,
            &other.vertices,
            other.sweep_radius,
            other_orientation,
            r_ab,
        )
    }
}

/// Overlap between two swept convex hulls placed at a relative offset.
pub(crate) fn swept_overlap(
    a: &[Vector2<f64>],
    sweep_a: f64,
    orientation_a: &UnitQuaternion<f64>,
    b: &[Vector2<f64>],
    sweep_b: f64,
    orientation_b: &UnitQuaternion<f64>,
    r_ab: &Vector3<f64>,
) -> bool {
    let offset = Vector2::new(r_ab.x, r_ab.y);
    let a: Vec<Vector2<f64>> = a.iter().map(|v| rotate(orientation_a, v)).collect();
    let b: Vec<Vector2<f64>> = b
        .iter()
        .map(|v| rotate(orientation_b, v) + offset)
        .collect();

    if hulls_intersect(&a, &b) {
        return true;
    }
    let sweep = sweep_a + sweep_b;
    sweep > 0.0 && hull_distance(&a, &b) < sweep
}

fn rotate(q: &UnitQuaternion<f64>, v: &Vector2<f64>) -> Vector2<f64> {
    let r = q * Vector3::new(v.x, v.y, 0.0);
    Vector2::new(r.x, r.y)
}

fn cross(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

fn check_vertices(
    shape: &'static str,
    vertices: &[Vector2<f64>],
    required: usize,
) -> Result<(), ShapeError> {
    if vertices.len() < required {
        return Err(ShapeError::TooFewVertices {
            shape,
            required,
            found: vertices.len(),
        });
    }
    match vertices
        .iter()
        .position(|v| !(v.x.is_finite() && v.y.is_finite()))
    {
        Some(index) => Err(ShapeError::NonFiniteVertex { shape, index }),
        None => Ok(()),
    }
}

fn signed_area(vertices: &[Vector2<f64>]) -> f64 {
    let n = vertices.len();
    0.5 * (0..n)
        .map(|i| cross(&vertices[i], &vertices[(i + 1) % n]))
        .sum::<f64>()
}

fn is_convex(vertices: &[Vector2<f64>]) -> bool {
    let n = vertices.len();
    (0..n).all(|i| {
        let e1 = vertices[(i + 1) % n] - vertices[i];
        let e2 = vertices[(i + 2) % n] - vertices[(i + 1) % n];
        cross(&e1, &e2) >= 0.0
    })
}

fn perimeter(vertices: &[Vector2<f64>]) -> f64 {
    let n = vertices.len();
    if n < 2 {
        return 0.0;
    }
    (0..n)
        .map(|i| (vertices[(i + 1) % n] - vertices[i]).norm())
        .sum()
}

fn max_norm(vertices: &[Vector2<f64>]) -> f64 {
    vertices.iter().map(|v| v.norm()).fold(0.0, f64::max)
}

/// Edges of the hull; a single point yields one degenerate edge.
fn edges(vertices: &[Vector2<f64>]) -> Vec<(Vector2<f64>, Vector2<f64>)> {
    match vertices.len() {
        0 => Vec::new(),
        1 => vec![(vertices[0], vertices[0])],
        2 => vec![(vertices[0], vertices[1])],
        n => (0..n).map(|i| (vertices[i], vertices[(i + 1) % n])).collect(),
    }
}

fn contains(hull: &[Vector2<f64>], p: &Vector2<f64>) -> bool {
    hull.len() >= 3
        && edges(hull)
            .iter()
            .all(|(a, b)| cross(&(b - a), &(p - a)) >= 0.0)
}

fn hulls_intersect(a: &[Vector2<f64>], b: &[Vector2<f64>]) -> bool {
    if b.iter().any(|p| contains(a, p)) || a.iter().any(|p| contains(b, p)) {
        return true;
    }
    let edges_b = edges(b);
    edges(a).iter().any(|(a1, a2)| {
        edges_b
            .iter()
            .any(|(b1, b2)| segments_intersect(a1, a2, b1, b2))
    })
}

fn hull_distance(a: &[Vector2<f64>], b: &[Vector2<f64>]) -> f64 {
    let edges_b = edges(b);
    edges(a)
        .iter()
        .flat_map(|(a1, a2)| {
            edges_b.iter().map(move |(b1, b2)| {
                point_segment_distance(a1, b1, b2)
                    .min(point_segment_distance(a2, b1, b2))
                    .min(point_segment_distance(b1, a1, a2))
                    .min(point_segment_distance(b2, a1, a2))
            })
        })
        .fold(f64::INFINITY, f64::min)
}

fn point_segment_distance(p: &Vector2<f64>, a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 == 0.0 {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

fn orientation(a: &Vector2<f64>, b: &Vector2<f64>, c: &Vector2<f64>) -> f64 {
    cross(&(b - a), &(c - a))
}

fn on_segment(a: &Vector2<f64>, b: &Vector2<f64>, p: &Vector2<f64>) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn segments_intersect(
    p1: &Vector2<f64>,
    p2: &Vector2<f64>,
    q1: &Vector2<f64>,
    q2: &Vector2<f64>,
) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square() -> Vec<Vector2<f64>> {
        vec![
            Vector2::new(-0.5, -0.5),
            Vector2::new(0.5, -0.5),
            Vector2::new(0.5, 0.5),
            Vector2::new(-0.5, 0.5),
        ]
    }

    fn rotation_z(angle: f64) -> UnitQuaternion<f64> {
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle)
    }

    #[test]
    fn test_square_area_and_radius() {
        let square = ConvexPolygon::new(unit_square()).unwrap();
        assert_relative_eq!(square.volume(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(square.circumsphere_radius(), 0.5f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_clockwise_polygon_rejected() {
        let mut vertices = unit_square();
        vertices.reverse();
        assert_eq!(
            ConvexPolygon::new(vertices),
            Err(ShapeError::NotConvex {
                shape: "convex polygon"
            })
        );
    }

    #[test]
    fn test_square_overlap_depends_on_rotation() {
        let square = ConvexPolygon::new(unit_square()).unwrap();
        let identity = UnitQuaternion::identity();
        let r = Vector3::new(1.1, 0.0, 0.0);

        assert!(!square.overlaps(&identity, &square, &identity, &r));
        // A corner of the rotated square reaches 0.707 toward its neighbour.
        let turned = rotation_z(std::f64::consts::FRAC_PI_4);
        assert!(square.overlaps(&identity, &square, &turned, &r));
    }

    #[test]
    fn test_contained_polygon_overlaps() {
        let big = ConvexPolygon::new(unit_square().iter().map(|v| v * 4.0).collect()).unwrap();
        let small = ConvexPolygon::new(unit_square()).unwrap();
        let q = UnitQuaternion::identity();
        assert!(big.overlaps(&q, &small, &q, &Vector3::new(0.3, 0.2, 0.0)));
        assert!(small.overlaps(&q, &big, &q, &Vector3::new(0.3, 0.2, 0.0)));
    }

    #[test]
    fn test_disk_area_and_overlap() {
        let disk = Spheropolygon::disk(1.0).unwrap();
        let q = UnitQuaternion::identity();
        assert_relative_eq!(disk.volume(), std::f64::consts::PI * 0.25, epsilon = 1e-12);
        assert!(!disk.is_orientable());
        assert!(disk.overlaps(&q, &disk, &q, &Vector3::new(0.9, 0.0, 0.0)));
        assert!(!disk.overlaps(&q, &disk, &q, &Vector3::new(1.01, 0.0, 0.0)));
    }

    #[test]
    fn test_rounded_square_gap() {
        let rounded = Spheropolygon::new(unit_square(), 0.1).unwrap();
        let q = UnitQuaternion::identity();
        // Flat faces 1.15 apart: gap 0.15 > 0.1 + 0.1 is false, so they overlap.
        assert!(rounded.overlaps(&q, &rounded, &q, &Vector3::new(1.15, 0.0, 0.0)));
        assert!(!rounded.overlaps(&q, &rounded, &q, &Vector3::new(1.25, 0.0, 0.0)));
        assert_relative_eq!(
            rounded.volume(),
            1.0 + 4.0 * 0.1 + std::f64::consts::PI * 0.01,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_segment_spherocylinders_cross() {
        let rod = Spheropolygon::new(vec![Vector2::new(-1.0, 0.0), Vector2::new(1.0, 0.0)], 0.1)
            .unwrap();
        let identity = UnitQuaternion::identity();
        let upright = rotation_z(std::f64::consts::FRAC_PI_2);
        let r = Vector3::new(0.5, 0.0, 0.0);

        assert!(rod.overlaps(&identity, &rod, &upright, &r));
        assert!(!rod.overlaps(
            &identity,
            &rod,
            &identity,
            &Vector3::new(0.0, 0.25, 0.0)
        ));
    }
}
