use crate::polygon::swept_overlap;
use crate::{ConvexPolygon, Dimensions, Shape, ShapeUnion, Sphere, Spheropolygon};
use nalgebra::{UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Tagged shape variant, for runs that mix shape families or read shapes
/// from a run description.
///
/// 2D variants overlap each other through their swept-hull outlines; a union
/// recurses into its members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnyShape {
    Sphere(Sphere),
    ConvexPolygon(ConvexPolygon),
    Spheropolygon(Spheropolygon),
    Union(ShapeUnion<AnyShape>),
}

impl AnyShape {
    fn outline(&self) -> Option<(&[Vector2<f64>], f64)> {
        match self {
            AnyShape::ConvexPolygon(p) => Some((p.vertices(), 0.0)),
            AnyShape::Spheropolygon(p) => Some((p.vertices(), p.sweep_radius())),
            AnyShape::Sphere(_) | AnyShape::Union(_) => None,
        }
    }
}

impl Shape for AnyShape {
    fn circumsphere_radius(&self) -> f64 {
        match self {
            AnyShape::Sphere(s) => s.circumsphere_radius(),
            AnyShape::ConvexPolygon(s) => s.circumsphere_radius(),
            AnyShape::Spheropolygon(s) => s.circumsphere_radius(),
            AnyShape::Union(s) => s.circumsphere_radius(),
        }
    }

    fn volume(&self) -> f64 {
        match self {
            AnyShape::Sphere(s) => s.volume(),
            AnyShape::ConvexPolygon(s) => s.volume(),
            AnyShape::Spheropolygon(s) => s.volume(),
            AnyShape::Union(s) => s.volume(),
        }
    }

    fn dimensions(&self) -> Dimensions {
        match self {
            AnyShape::Sphere(s) => s.dimensions(),
            AnyShape::ConvexPolygon(s) => s.dimensions(),
            AnyShape::Spheropolygon(s) => s.dimensions(),
            AnyShape::Union(s) => s.dimensions(),
        }
    }

    fn is_orientable(&self) -> bool {
        match self {
            AnyShape::Sphere(s) => s.is_orientable(),
            AnyShape::ConvexPolygon(s) => s.is_orientable(),
            AnyShape::Spheropolygon(s) => s.is_orientable(),
            AnyShape::Union(s) => s.is_orientable(),
        }
    }

    fn overlaps(
        &self,
        orientation: &UnitQuaternion<f64>,
        other: &Self,
        other_orientation: &UnitQuaternion<f64>,
        r_ab: &Vector3<f64>,
    ) -> bool {
        match (self, other) {
            (AnyShape::Union(a), AnyShape::Union(b)) => {
                a.overlaps(orientation, b, other_orientation, r_ab)
            }
            (AnyShape::Union(a), b) => a.overlaps_single(orientation, b, other_orientation, r_ab),
            (a, AnyShape::Union(b)) => {
                b.overlaps_single(other_orientation, a, orientation, &(-r_ab))
            }
            (AnyShape::Sphere(a), AnyShape::Sphere(b)) => {
                a.overlaps(orientation, b, other_orientation, r_ab)
            }
            (a, b) => match (a.outline(), b.outline()) {
                (Some((va, ra)), Some((vb, rb))) => {
                    swept_overlap(va, ra, orientation, vb, rb, other_orientation, r_ab)
                }
                // 2D against 3D shapes never share a box.
                _ => false,
            },
        }
    }
}

impl From<Sphere> for AnyShape {
    fn from(shape: Sphere) -> Self {
        AnyShape::Sphere(shape)
    }
}

impl From<ConvexPolygon> for AnyShape {
    fn from(shape: ConvexPolygon) -> Self {
        AnyShape::ConvexPolygon(shape)
    }
}

impl From<Spheropolygon> for AnyShape {
    fn from(shape: Spheropolygon) -> Self {
        AnyShape::Spheropolygon(shape)
    }
}

impl From<ShapeUnion<AnyShape>> for AnyShape {
    fn from(shape: ShapeUnion<AnyShape>) -> Self {
        AnyShape::Union(shape)
    }
}
