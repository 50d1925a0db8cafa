//! Implicit depletants.
//!
//! Depletants are never stored. When a move would remove free volume, trial
//! depletants are scattered through the excluded-volume shell of the moving
//! particle, `n ~ Poisson(z_dep * V_shell)` per depletant species. A trial
//! blocks the move if it overlaps the candidate while overlapping nothing
//! already in the box. A move survives with probability
//! `exp(-z_dep * dV_free)`, the exact weight of removing that free volume.

use std::fmt::Debug;

use nalgebra::Vector3;
use rand::Rng;
use rand_distr::{Distribution, Poisson, UnitBall, UnitDisc};
use rayon::prelude::*;
use shapes::{Dimensions, Shape};
use tracing::{debug, warn};

use crate::error::MuvtError;
use crate::overlap::{overlaps_any, Placement};
use crate::proposer::shape_orientation;
use crate::rng::{ProposalKey, LANE_DEPLETANT, LANE_DIAGNOSTIC};
use crate::simbox::SimBox;
use crate::species::{interacts, Species};
use crate::state::BoxState;

#[derive(Debug, Clone)]
pub struct DepletantSpecies<S> {
    pub name: String,
    pub shape: S,
    pub fugacity: f64,
    pub ignore_overlaps: bool,
}

impl<S: Shape> DepletantSpecies<S> {
    pub fn from_species(species: &Species<S>, fugacity: f64) -> Result<Self, MuvtError> {
        if !(fugacity.is_finite() && fugacity >= 0.0) {
            return Err(MuvtError::InvalidConfig(format!(
                "Depletant fugacity of '{}' must be finite and non-negative, got {fugacity}",
                species.name
            )));
        }
        Ok(Self {
            name: species.name.clone(),
            shape: species.shape.clone(),
            fugacity,
            ignore_overlaps: species.ignore_overlaps,
        })
    }
}

/// Region in which trial depletant centers are placed, centered on the
/// candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialShell {
    pub radius: f64,
    pub volume: f64,
    pub dimensions: Dimensions,
}

impl TrialShell {
    fn sample_offset<R: Rng + ?Sized>(&self, rng: &mut R) -> Vector3<f64> {
        match self.dimensions {
            Dimensions::Two => {
                let [x, y]: [f64; 2] = UnitDisc.sample(rng);
                Vector3::new(x, y, 0.0) * self.radius
            }
            Dimensions::Three => {
                let [x, y, z]: [f64; 3] = UnitBall.sample(rng);
                Vector3::new(x, y, z) * self.radius
            }
        }
    }
}

/// Builds the trial shell for a candidate/depletant pair. `None` means the
/// shell is degenerate and the move falls back to the uncorrected weight.
pub trait ShellBuilder: Send + Sync + Debug {
    fn build(&self, simbox: &SimBox, candidate_radius: f64, depletant_radius: f64) -> Option<TrialShell>;
}

/// Ball (disk in 2D) of radius `R_candidate + R_depletant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundingShell;

impl ShellBuilder for BoundingShell {
    fn build(&self, simbox: &SimBox, candidate_radius: f64, depletant_radius: f64) -> Option<TrialShell> {
        let radius = candidate_radius + depletant_radius;
        if !(radius.is_finite() && radius > 0.0) {
            return None;
        }
        // wrapped trial points would be counted twice
        if 2.0 * radius > simbox.min_width() {
            return None;
        }
        let dimensions = simbox.dimensions();
        let volume = dimensions.ball_volume(radius);
        if !(volume.is_finite() && volume > 0.0) {
            return None;
        }
        Some(TrialShell {
            radius,
            volume,
            dimensions,
        })
    }
}

/// Result of the depletant trials for one proposal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepletantOutcome {
    pub trials: u64,
    pub blocked: u64,
    /// Depletant species whose shell could not be built.
    pub fallbacks: u64,
}

impl DepletantOutcome {
    pub fn survives(&self) -> bool {
        self.blocked == 0
    }

    /// Multiplicative acceptance factor, 1 or 0.
    pub fn correction(&self) -> f64 {
        if self.survives() {
            1.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct FreeVolumeEstimator<S, B = BoundingShell> {
    depletants: Vec<DepletantSpecies<S>>,
    builder: B,
}

impl<S: Shape> FreeVolumeEstimator<S, BoundingShell> {
    pub fn new(depletants: Vec<DepletantSpecies<S>>) -> Self {
        Self::with_builder(depletants, BoundingShell)
    }
}

impl<S: Shape, B: ShellBuilder> FreeVolumeEstimator<S, B> {
    pub fn with_builder(depletants: Vec<DepletantSpecies<S>>, builder: B) -> Self {
        Self {
            depletants,
            builder,
        }
    }

    pub fn depletants(&self) -> &[DepletantSpecies<S>] {
        &self.depletants
    }

    /// Run the depletant trials for a candidate about to enter `state`.
    ///
    /// Every trial draws from its own stream keyed on the proposal, the
    /// depletant species and the trial index, so the outcome does not
    /// depend on how rayon schedules the trials.
    pub fn insertion_outcome(
        &self,
        state: &BoxState<S>,
        candidate: &Placement<'_, S>,
        key: ProposalKey,
    ) -> Result<DepletantOutcome, MuvtError> {
        let mut outcome = DepletantOutcome::default();
        let candidate_radius = candidate.shape.circumsphere_radius();

        for (index, depletant) in self.depletants.iter().enumerate() {
            if depletant.fugacity == 0.0 {
                continue;
            }
            let shell = self.builder.build(
                state.simbox(),
                candidate_radius,
                depletant.shape.circumsphere_radius(),
            );
            let mean = shell.map(|s| depletant.fugacity * s.volume);
            let (shell, mean) = match (shell, mean) {
                (Some(shell), Some(mean)) if mean.is_finite() && mean > 0.0 => (shell, mean),
                _ => {
                    warn!(
                        depletant = %depletant.name,
                        "Degenerate depletant shell, accepting without depletant correction"
                    );
                    outcome.fallbacks += 1;
                    continue;
                }
            };

            let species_key = key.child(LANE_DEPLETANT, index as u64);
            let poisson = Poisson::new(mean).map_err(|e| {
                MuvtError::InvalidConfig(format!("Depletant count distribution: {e}"))
            })?;
            let n = poisson.sample(&mut species_key.rng()) as u64;
            outcome.trials += n;

            let blocked = (0..n)
                .into_par_iter()
                .map(|trial| {
                    let trial_key = species_key.child(LANE_DEPLETANT, trial + 1);
                    self.trial_blocks(state, candidate, depletant, &shell, trial_key)
                })
                .collect::<Result<Vec<bool>, MuvtError>>()?
                .into_iter()
                .filter(|&b| b)
                .count() as u64;

            if blocked > 0 {
                debug!(depletant = %depletant.name, trials = n, blocked, "Depletants blocked move");
                outcome.blocked += blocked;
                break;
            }
        }
        Ok(outcome)
    }

    fn trial_blocks(
        &self,
        state: &BoxState<S>,
        candidate: &Placement<'_, S>,
        depletant: &DepletantSpecies<S>,
        shell: &TrialShell,
        key: ProposalKey,
    ) -> Result<bool, MuvtError> {
        if !interacts(candidate.ignore_overlaps, depletant.ignore_overlaps) {
            return Ok(false);
        }
        let mut rng = key.rng();
        let offset = shell.sample_offset(&mut rng);
        let orientation = shape_orientation(&depletant.shape, &mut rng);
        if !candidate
            .shape
            .overlaps(&candidate.orientation, &depletant.shape, &orientation, &offset)
        {
            return Ok(false);
        }
        let placement = Placement {
            shape: &depletant.shape,
            ignore_overlaps: depletant.ignore_overlaps,
            position: state.simbox().wrap(&(candidate.position + offset)),
            orientation,
        };
        Ok(!overlaps_any(state, &placement)?)
    }

    /// Fraction of the box where a depletant of the given index fits,
    /// estimated from `samples` uniform trial placements.
    pub fn free_volume_fraction(
        &self,
        state: &BoxState<S>,
        depletant: usize,
        samples: u64,
        key: ProposalKey,
    ) -> Result<f64, MuvtError> {
        let depletant = self.depletants.get(depletant).ok_or_else(|| {
            MuvtError::InvalidConfig(format!("No depletant with index {depletant}"))
        })?;
        if samples == 0 {
            return Err(MuvtError::InvalidConfig(
                "Free volume estimate needs at least one sample".to_string(),
            ));
        }
        let free = (0..samples)
            .into_par_iter()
            .map(|i| {
                let mut rng = key.child(LANE_DIAGNOSTIC, i).rng();
                let placement = Placement {
                    shape: &depletant.shape,
                    ignore_overlaps: depletant.ignore_overlaps,
                    position: state.simbox().random_position(&mut rng),
                    orientation: shape_orientation(&depletant.shape, &mut rng),
                };
                overlaps_any(state, &placement).map(|hit| u64::from(!hit))
            })
            .collect::<Result<Vec<u64>, MuvtError>>()?
            .into_iter()
            .sum::<u64>();
        Ok(free as f64 / samples as f64)
    }
}
