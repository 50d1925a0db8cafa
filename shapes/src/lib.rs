//! Hard-particle shapes for excluded-volume Monte Carlo.
//!
//! Every shape implements [`Shape`], the capability contract the particle
//! number movers are written against: a pairwise overlap test at a relative
//! pose, a bounding (circumsphere) radius, a volume, and how orientation is
//! handled. The movers never look past this trait.

pub mod any;
mod polygon;
pub mod sphere;
pub mod union;

pub use any::AnyShape;
pub use polygon::{ConvexPolygon, Spheropolygon};
pub use sphere::Sphere;
pub use union::{ShapeUnion, UnionMember};

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Spatial dimensionality a shape lives in.
///
/// 2D shapes are confined to the xy plane and rotate about z only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimensions {
    Two,
    Three,
}

impl Dimensions {
    pub fn count(self) -> usize {
        match self {
            Dimensions::Two => 2,
            Dimensions::Three => 3,
        }
    }

    /// Volume (area in 2D) of a ball of the given radius.
    pub fn ball_volume(self, radius: f64) -> f64 {
        match self {
            Dimensions::Two => std::f64::consts::PI * radius * radius,
            Dimensions::Three => 4.0 / 3.0 * std::f64::consts::PI * radius.powi(3),
        }
    }
}

/// Errors raised while building a shape from user parameters.
#[derive(Debug, Error, PartialEq)]
pub enum ShapeError {
    #[error("{shape}: parameter `{parameter}` must be finite and positive, got {value}")]
    NonPositive {
        shape: &'static str,
        parameter: &'static str,
        value: f64,
    },

    #[error("{shape}: vertex {index} is not finite")]
    NonFiniteVertex { shape: &'static str, index: usize },

    #[error("{shape}: needs at least {required} vertices, got {found}")]
    TooFewVertices {
        shape: &'static str,
        required: usize,
        found: usize,
    },

    #[error("{shape}: vertices must describe a convex polygon in counter-clockwise order")]
    NotConvex { shape: &'static str },

    #[error("union has no members")]
    EmptyUnion,

    #[error("union mixes {first:?} and {second:?} members")]
    MixedDimensions { first: Dimensions, second: Dimensions },

    #[error("union member {index} leaves the xy plane of a 2D union")]
    OutOfPlane { index: usize },
}

/// Capability contract every particle shape satisfies.
///
/// `r_ab` is the vector from the center of `self` to the center of `other`
/// (one periodic image of it); both orientations are given in the box frame.
pub trait Shape: Clone + Send + Sync + std::fmt::Debug {
    /// Radius of a sphere centered on the particle that encloses the shape.
    fn circumsphere_radius(&self) -> f64;

    /// Volume of the shape (area for 2D shapes).
    fn volume(&self) -> f64;

    fn dimensions(&self) -> Dimensions;

    /// Whether the orientation of the shape matters for overlaps.
    fn is_orientable(&self) -> bool;

    fn overlaps(
        &self,
        orientation: &UnitQuaternion<f64>,
        other: &Self,
        other_orientation: &UnitQuaternion<f64>,
        r_ab: &Vector3<f64>,
    ) -> bool;
}

pub(crate) fn require_positive(
    shape: &'static str,
    parameter: &'static str,
    value: f64,
) -> Result<f64, ShapeError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ShapeError::NonPositive {
            shape,
            parameter,
            value,
        })
    }
}
