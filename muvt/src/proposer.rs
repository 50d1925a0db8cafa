//! Move selection and pose sampling.
//!
//! Everything here is a pure function of the generator it is handed.

use std::fmt;

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use shapes::{Dimensions, Shape};

use crate::error::MuvtError;
use crate::simbox::SimBox;
use crate::state::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveKind {
    Insertion,
    Deletion,
    Transfer,
}

impl MoveKind {
    pub const ALL: [MoveKind; 3] = [MoveKind::Insertion, MoveKind::Deletion, MoveKind::Transfer];
}

impl fmt::Display for MoveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MoveKind::Insertion => "insertion",
            MoveKind::Deletion => "deletion",
            MoveKind::Transfer => "transfer",
        };
        f.write_str(name)
    }
}

/// Relative attempt weights of the move kinds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveWeights {
    #[serde(default = "default_weight")]
    pub insertion: f64,
    #[serde(default = "default_weight")]
    pub deletion: f64,
    #[serde(default)]
    pub transfer: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl Default for MoveWeights {
    fn default() -> Self {
        Self {
            insertion: 1.0,
            deletion: 1.0,
            transfer: 0.0,
        }
    }
}

impl MoveWeights {
    pub fn transfer_only() -> Self {
        Self {
            insertion: 0.0,
            deletion: 0.0,
            transfer: 1.0,
        }
    }

    pub fn validate(&self, has_partner: bool) -> Result<(), MuvtError> {
        let weights = [self.insertion, self.deletion, self.transfer];
        if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(MuvtError::InvalidConfig(
                "Move weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(MuvtError::InvalidConfig(
                "At least one move weight must be positive".to_string(),
            ));
        }
        if (self.insertion > 0.0) != (self.deletion > 0.0) {
            return Err(MuvtError::InvalidConfig(
                "Insertion and deletion must both be enabled or both disabled".to_string(),
            ));
        }
        if self.transfer > 0.0 && !has_partner {
            return Err(MuvtError::InvalidConfig(
                "Transfer moves need a partner box".to_string(),
            ));
        }
        Ok(())
    }

    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> MoveKind {
        let total = self.insertion + self.deletion + self.transfer;
        let u = rng.gen::<f64>() * total;
        if u < self.insertion {
            MoveKind::Insertion
        } else if u < self.insertion + self.deletion || self.transfer <= 0.0 {
            MoveKind::Deletion
        } else {
            MoveKind::Transfer
        }
    }

    /// Factor applied to the insertion ratio so that unequal insertion and
    /// deletion weights keep detailed balance. Deletions use the inverse.
    pub fn insertion_bias(&self) -> f64 {
        if self.insertion > 0.0 {
            self.deletion / self.insertion
        } else {
            1.0
        }
    }
}

/// How the target type of a move is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSelection {
    #[default]
    Uniform,
    /// Proportional to fugacity.
    Activity,
}

impl TypeSelection {
    /// Pick one of `candidates`. Activity weighting falls back to uniform
    /// when every candidate has zero fugacity.
    pub fn select<F, R>(&self, candidates: &[TypeId], fugacity: F, rng: &mut R) -> Option<TypeId>
    where
        F: Fn(TypeId) -> f64,
        R: Rng + ?Sized,
    {
        if candidates.is_empty() {
            return None;
        }
        let total: f64 = match self {
            TypeSelection::Uniform => 0.0,
            TypeSelection::Activity => candidates.iter().map(|&t| fugacity(t)).sum(),
        };
        if total <= 0.0 {
            return Some(candidates[rng.gen_range(0..candidates.len())]);
        }
        let mut u = rng.gen::<f64>() * total;
        for &t in candidates {
            u -= fugacity(t);
            if u < 0.0 {
                return Some(t);
            }
        }
        candidates.iter().rev().find(|&&t| fugacity(t) > 0.0).copied()
    }
}

/// Uniform orientation for a shape living in `dimensions`.
///
/// 3D: a normalized 4-vector of standard normals is uniform on the rotation
/// group. 2D: a uniform angle about z.
pub fn random_orientation<R: Rng + ?Sized>(dimensions: Dimensions, rng: &mut R) -> UnitQuaternion<f64> {
    match dimensions {
        Dimensions::Two => {
            let angle = rng.gen_range(0.0..std::f64::consts::TAU);
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle)
        }
        Dimensions::Three => loop {
            let q = Quaternion::new(
                rng.sample::<f64, _>(StandardNormal),
                rng.sample::<f64, _>(StandardNormal),
                rng.sample::<f64, _>(StandardNormal),
                rng.sample::<f64, _>(StandardNormal),
            );
            if q.norm() > 1e-12 {
                break UnitQuaternion::from_quaternion(q);
            }
        },
    }
}

/// Orientation for a new particle of the given shape.
pub fn shape_orientation<S: Shape, R: Rng + ?Sized>(shape: &S, rng: &mut R) -> UnitQuaternion<f64> {
    if shape.is_orientable() {
        random_orientation(shape.dimensions(), rng)
    } else {
        UnitQuaternion::identity()
    }
}

/// Pose of an insertion candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertionPose {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

/// Uniform position in the box with a caller-supplied orientation.
pub fn propose_position<R: Rng + ?Sized>(
    simbox: &SimBox,
    orientation: UnitQuaternion<f64>,
    rng: &mut R,
) -> InsertionPose {
    InsertionPose {
        position: simbox.random_position(rng),
        orientation,
    }
}

/// Index into a population of `count`, or `None` when it is empty.
pub fn propose_removal<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Option<usize> {
    (count > 0).then(|| rng.gen_range(0..count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shapes::{Sphere, Spheropolygon};

    #[test]
    fn test_select_follows_weights() {
        let weights = MoveWeights {
            insertion: 1.0,
            deletion: 3.0,
            transfer: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(3);
        let n = 20_000;
        let insertions = (0..n)
            .filter(|_| weights.select(&mut rng) == MoveKind::Insertion)
            .count();
        assert_relative_eq!(insertions as f64 / n as f64, 0.25, epsilon = 0.02);
        assert_relative_eq!(weights.insertion_bias(), 3.0);
    }

    #[test]
    fn test_validate_weights() {
        assert!(MoveWeights::default().validate(false).is_ok());
        assert!(MoveWeights::transfer_only().validate(false).is_err());
        assert!(MoveWeights::transfer_only().validate(true).is_ok());
        let lopsided = MoveWeights {
            insertion: 1.0,
            deletion: 0.0,
            transfer: 0.0,
        };
        assert!(lopsided.validate(false).is_err());
        let negative = MoveWeights {
            insertion: -1.0,
            deletion: 1.0,
            transfer: 0.0,
        };
        assert!(negative.validate(false).is_err());
    }

    #[test]
    fn test_activity_selection() {
        let fugacities = [0.0, 2.0];
        let lookup = |t: TypeId| fugacities[t];
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            assert_eq!(TypeSelection::Activity.select(&[0, 1], lookup, &mut rng), Some(1));
        }
        assert_eq!(TypeSelection::Uniform.select(&[], lookup, &mut rng), None);

        let n = 10_000;
        let picked_first = (0..n)
            .filter(|_| TypeSelection::Uniform.select(&[0, 1], lookup, &mut rng) == Some(0))
            .count();
        assert_relative_eq!(picked_first as f64 / n as f64, 0.5, epsilon = 0.03);
    }

    #[test]
    fn test_orientations_are_unit_and_planar() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..100 {
            let q = random_orientation(Dimensions::Three, &mut rng);
            assert_relative_eq!(q.quaternion().norm(), 1.0, epsilon = 1e-12);

            let planar = random_orientation(Dimensions::Two, &mut rng);
            let axis_tilt = (planar * Vector3::z()).z;
            assert_relative_eq!(axis_tilt, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_uniform_rotation_mean_axis() {
        // a uniformly rotated unit vector has zero mean
        let mut rng = StdRng::seed_from_u64(13);
        let n = 20_000;
        let mean = (0..n)
            .map(|_| random_orientation(Dimensions::Three, &mut rng) * Vector3::x())
            .fold(Vector3::zeros(), |acc, v| acc + v)
            / n as f64;
        assert!(mean.norm() < 0.03);
    }

    #[test]
    fn test_non_orientable_shapes_keep_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        let sphere = Sphere::new(1.0).unwrap();
        assert_eq!(shape_orientation(&sphere, &mut rng), UnitQuaternion::identity());
        let disk = Spheropolygon::disk(1.0).unwrap();
        assert_eq!(shape_orientation(&disk, &mut rng), UnitQuaternion::identity());
    }

    #[test]
    fn test_empty_population_has_no_removal() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(propose_removal(0, &mut rng), None);
        assert!(propose_removal(4, &mut rng).unwrap() < 4);
    }
}
