use crate::{Dimensions, Shape, ShapeError};
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

const PLANE_TOLERANCE: f64 = 1e-12;

/// One constituent of a [`ShapeUnion`], placed in the union's body frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionMember<S> {
    pub shape: S,
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl<S: Shape> UnionMember<S> {
    pub fn new(shape: S, position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self {
            shape,
            position,
            orientation,
        }
    }

    fn reach(&self) -> f64 {
        self.position.norm() + self.shape.circumsphere_radius()
    }

    /// No z offset and no rotation other than about z.
    fn in_plane(&self) -> bool {
        let q = self.orientation.quaternion();
        self.position.z.abs() <= PLANE_TOLERANCE
            && q.i.abs() <= PLANE_TOLERANCE
            && q.j.abs() <= PLANE_TOLERANCE
    }
}

/// Rigid compound shape: an ordered list of member shapes.
///
/// The volume is the sum of member volumes, exact only when members do not
/// overlap each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeUnion<S> {
    members: Vec<UnionMember<S>>,
    radius: f64,
    dimensions: Dimensions,
}

impl<S: Shape> ShapeUnion<S> {
    pub fn new(members: Vec<UnionMember<S>>) -> Result<Self, ShapeError> {
        let first = members.first().ok_or(ShapeError::EmptyUnion)?;
        let dimensions = first.shape.dimensions();
        if let Some(other) = members
            .iter()
            .find(|m| m.shape.dimensions() != dimensions)
        {
            return Err(ShapeError::MixedDimensions {
                first: dimensions,
                second: other.shape.dimensions(),
            });
        }
        if dimensions == Dimensions::Two {
            if let Some(index) = members.iter().position(|m| !m.in_plane()) {
                return Err(ShapeError::OutOfPlane { index });
            }
        }
        let radius = members.iter().map(UnionMember::reach).fold(0.0, f64::max);
        Ok(Self {
            members,
            radius,
            dimensions,
        })
    }

    /// Overlap of this union with a single, non-compound shape.
    pub fn overlaps_single(
        &self,
        orientation: &UnitQuaternion<f64>,
        other: &S,
        other_orientation: &UnitQuaternion<f64>,
        r_ab: &Vector3<f64>,
    ) -> bool {
        let reach = other.circumsphere_radius();
        self.members.iter().any(|member| {
            let offset = orientation * member.position;
            let r = r_ab - offset;
            let contact = member.shape.circumsphere_radius() + reach;
            r.norm_squared() <= contact * contact
                && member.shape.overlaps(
                    &(orientation * member.orientation),
                    other,
                    other_orientation,
                    &r,
                )
        })
    }
}

impl<S: Shape> Shape for ShapeUnion<S> {
    fn circumsphere_radius(&self) -> f64 {
        self.radius
    }

    fn volume(&self) -> f64 {
        self.members.iter().map(|m| m.shape.volume()).sum()
    }

    fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    fn is_orientable(&self) -> bool {
        self.members.len() > 1 || self.members.iter().any(|m| m.shape.is_orientable())
    }

    fn overlaps(
        &self,
        orientation: &UnitQuaternion<f64>,
        other: &Self,
        other_orientation: &UnitQuaternion<f64>,
        r_ab: &Vector3<f64>,
    ) -> bool {
        self.members.iter().any(|a| {
            let pos_a = orientation * a.position;
            let q_a = orientation * a.orientation;
            let radius_a = a.shape.circumsphere_radius();
            other.members.iter().any(|b| {
                let r = r_ab + other_orientation * b.position - pos_a;
                let contact = radius_a + b.shape.circumsphere_radius();
                r.norm_squared() <= contact * contact
                    && a.shape
                        .overlaps(&q_a, &b.shape, &(other_orientation * b.orientation), &r)
            })
        })
    }
}
