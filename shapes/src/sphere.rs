use crate::{require_positive, Dimensions, Shape, ShapeError};
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Hard sphere of a given diameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    pub diameter: f64,
}

impl Sphere {
    pub fn new(diameter: f64) -> Result<Self, ShapeError> {
        let diameter = require_positive("sphere", "diameter", diameter)?;
        Ok(Self { diameter })
    }

    pub fn radius(&self) -> f64 {
        0.5 * self.diameter
    }
}

impl Shape for Sphere {
    fn circumsphere_radius(&self) -> f64 {
        self.radius()
    }

    fn volume(&self) -> f64 {
        Dimensions::Three.ball_volume(self.radius())
    }

    fn dimensions(&self) -> Dimensions {
        Dimensions::Three
    }

    fn is_orientable(&self) -> bool {
        false
    }

    fn overlaps(
        &self,
        _orientation: &UnitQuaternion<f64>,
        other: &Self,
        _other_orientation: &UnitQuaternion<f64>,
        r_ab: &Vector3<f64>,
    ) -> bool {
        let contact = self.radius() + other.radius();
        r_ab.norm_squared() < contact * contact
    }
}
