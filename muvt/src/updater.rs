//! Grand-canonical particle-number updater for one box.
//!
//! Every attempt runs propose, overlap check, depletant trials, accept
//! draw and commit in that order. Commits go through `&mut self`, so the
//! committed configuration is always the result of a sequential ordering
//! of the attempts.

use nalgebra::{UnitQuaternion, Vector3};
use shapes::Shape;
use tracing::{debug, info};

use crate::acceptance::{accept, deletion_ratio, insertion_ratio, Evaluation, Occupancy};
use crate::depletant::{BoundingShell, DepletantOutcome, FreeVolumeEstimator, ShellBuilder};
use crate::error::MuvtError;
use crate::overlap::{overlaps_any, Placement};
use crate::proposer::{
    propose_position, propose_removal, shape_orientation, MoveKind, MoveWeights, TypeSelection,
};
use crate::rng::{ProposalKey, RngStream, LANE_ACCEPT, LANE_DESTINATION, LANE_SOURCE};
use crate::state::{BoxState, Particle, ParticleId, TypeId};
use crate::stats::{MoveCounters, SweepReport};

/// A candidate insertion after its geometric and depletant checks.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertionTrial {
    pub particle: Particle,
    pub overlap: bool,
    pub depletants: DepletantOutcome,
}

/// What a coupled driver needs to know about one type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeSummary {
    pub name: String,
    pub fugacity: f64,
    pub movable: bool,
    pub counted: bool,
}

#[derive(Debug, Clone)]
pub struct UpdaterMuVT<S, B = BoundingShell> {
    state: BoxState<S>,
    depletants: FreeVolumeEstimator<S, B>,
    weights: MoveWeights,
    type_selection: TypeSelection,
    movable: Vec<TypeId>,
    attempts_per_sweep: u64,
    stream: RngStream,
    sweep: u64,
    counters: MoveCounters,
    sweep_counters: MoveCounters,
}

impl<S: Shape, B: ShellBuilder> UpdaterMuVT<S, B> {
    pub fn new(state: BoxState<S>, depletants: FreeVolumeEstimator<S, B>, seed: u64) -> Self {
        let n_types = state.n_types();
        Self {
            movable: (0..n_types).collect(),
            attempts_per_sweep: 1,
            weights: MoveWeights::default(),
            type_selection: TypeSelection::default(),
            stream: RngStream::new(seed),
            sweep: 0,
            counters: MoveCounters::new(n_types),
            sweep_counters: MoveCounters::new(n_types),
            state,
            depletants,
        }
    }

    pub fn with_weights(mut self, weights: MoveWeights) -> Result<Self, MuvtError> {
        weights.validate(false)?;
        self.weights = weights;
        Ok(self)
    }

    pub fn with_type_selection(mut self, type_selection: TypeSelection) -> Self {
        self.type_selection = type_selection;
        self
    }

    pub fn with_attempts_per_sweep(mut self, attempts: u64) -> Result<Self, MuvtError> {
        if attempts == 0 {
            return Err(MuvtError::InvalidConfig(
                "attempts_per_sweep must be at least 1".to_string(),
            ));
        }
        self.attempts_per_sweep = attempts;
        Ok(self)
    }

    /// Restrict moves to the given types; the rest stay fixed.
    pub fn with_movable_types(mut self, types: Vec<TypeId>) -> Result<Self, MuvtError> {
        if let Some(&type_id) = types.iter().find(|&&t| t >= self.state.n_types()) {
            return Err(MuvtError::UnknownType { type_id });
        }
        self.movable = types;
        Ok(self)
    }

    pub fn state(&self) -> &BoxState<S> {
        &self.state
    }

    pub fn estimator(&self) -> &FreeVolumeEstimator<S, B> {
        &self.depletants
    }

    pub fn counters(&self) -> &MoveCounters {
        &self.counters
    }

    pub fn reset_counters(&mut self) {
        self.counters.reset();
        self.sweep_counters.reset();
    }

    pub fn sweep_index(&self) -> u64 {
        self.sweep
    }

    pub fn seed(&self) -> u64 {
        self.stream.seed()
    }

    /// Switch to a fresh random stream, e.g. for a copy run independently.
    pub fn reseed(&mut self, seed: u64) {
        self.stream = RngStream::new(seed);
    }

    pub fn set_fugacity(&mut self, type_id: TypeId, fugacity: f64) -> Result<(), MuvtError> {
        self.state.set_fugacity(type_id, fugacity)
    }

    pub fn type_summaries(&self) -> Vec<TypeSummary> {
        self.state
            .species()
            .iter()
            .enumerate()
            .map(|(type_id, s)| TypeSummary {
                name: s.name.clone(),
                fugacity: s.fugacity,
                movable: self.movable.contains(&type_id),
                counted: !s.ignore_statistics,
            })
            .collect()
    }

    pub fn occupancy(&self, type_id: TypeId) -> Result<Occupancy, MuvtError> {
        let species = self.state.species_of(type_id)?;
        Ok(Occupancy {
            count: self.state.particle_count(type_id),
            volume: self.state.volume(),
            fugacity: species.fugacity,
        })
    }

    /// Load a starting configuration. Fails on the first particle that
    /// overlaps one already placed.
    pub fn insert_initial(&mut self, particles: Vec<Particle>) -> Result<(), MuvtError> {
        for (index, particle) in particles.into_iter().enumerate() {
            let species = self.state.species_of(particle.type_id)?;
            let placement = Placement::new(species, particle.position, particle.orientation);
            if overlaps_any(&self.state, &placement)? {
                return Err(MuvtError::InitialOverlap { index });
            }
            self.state.insert(particle)?;
        }
        Ok(())
    }

    /// Draw a candidate pose for `type_id` and test it against the box.
    ///
    /// Depletant trials only run for a candidate clear of hard overlaps.
    pub fn try_insertion(
        &self,
        type_id: TypeId,
        orientation: Option<UnitQuaternion<f64>>,
        key: ProposalKey,
    ) -> Result<InsertionTrial, MuvtError> {
        let species = self.state.species_of(type_id)?;
        let mut rng = key.child(LANE_DESTINATION, 0).rng();
        let orientation = orientation.unwrap_or_else(|| shape_orientation(&species.shape, &mut rng));
        let pose = propose_position(self.state.simbox(), orientation, &mut rng);
        let placement = Placement::new(species, pose.position, pose.orientation);

        let overlap = overlaps_any(&self.state, &placement)?;
        let depletants = if overlap {
            DepletantOutcome::default()
        } else {
            self.depletants.insertion_outcome(&self.state, &placement, key)?
        };
        Ok(InsertionTrial {
            particle: Particle::new(type_id, pose.position, pose.orientation),
            overlap,
            depletants,
        })
    }

    /// Pick a uniformly random particle of `type_id`, if there is one.
    pub fn draw_removal(
        &self,
        type_id: TypeId,
        key: ProposalKey,
    ) -> Result<Option<(ParticleId, Particle)>, MuvtError> {
        self.state.species_of(type_id)?;
        let mut rng = key.child(LANE_SOURCE, 0).rng();
        let drawn = propose_removal(self.state.particle_count(type_id), &mut rng)
            .and_then(|n| self.state.nth_of_type(type_id, n))
            .and_then(|id| self.state.get(id).map(|p| (id, p.clone())));
        Ok(drawn)
    }

    /// Acceptance of inserting one particle of `type_id`. `bias` is the
    /// deletion-to-insertion attempt weight ratio.
    pub fn evaluate_insertion(
        &self,
        type_id: TypeId,
        bias: f64,
        key: ProposalKey,
    ) -> Result<(Evaluation, InsertionTrial), MuvtError> {
        let trial = self.try_insertion(type_id, None, key)?;
        if trial.overlap {
            return Ok((Evaluation::rejected(), trial));
        }
        let occupancy = self.occupancy(type_id)?;
        let base = bias * insertion_ratio(occupancy.fugacity, occupancy.volume, occupancy.count);
        Ok((Evaluation::new(base, trial.depletants.correction()), trial))
    }

    /// Acceptance of deleting one particle of `type_id`. Removing a particle
    /// only frees volume, so no depletant trials run.
    pub fn evaluate_deletion(
        &self,
        type_id: TypeId,
        bias: f64,
        key: ProposalKey,
    ) -> Result<(Evaluation, Option<ParticleId>), MuvtError> {
        let Some((id, _)) = self.draw_removal(type_id, key)? else {
            return Ok((Evaluation::rejected(), None));
        };
        let occupancy = self.occupancy(type_id)?;
        let base = deletion_ratio(occupancy.fugacity, occupancy.volume, occupancy.count) / bias;
        Ok((Evaluation::new(base, 1.0), Some(id)))
    }

    /// Add a particle decided elsewhere. The overlap check is repeated
    /// against the committed state.
    pub fn commit_insertion(&mut self, particle: Particle) -> Result<ParticleId, MuvtError> {
        let species = self.state.species_of(particle.type_id)?;
        let placement = Placement::new(species, particle.position, particle.orientation);
        if overlaps_any(&self.state, &placement)? {
            return Err(MuvtError::PartnerDesync(
                "insertion no longer fits the committed configuration".to_string(),
            ));
        }
        self.state.insert(particle)
    }

    pub fn commit_removal(&mut self, id: ParticleId) -> Result<Particle, MuvtError> {
        self.state.remove(id)
    }

    fn record(&mut self, kind: MoveKind, type_id: TypeId, accepted: bool) {
        let counted = self
            .state
            .species()
            .get(type_id)
            .map_or(false, |s| !s.ignore_statistics);
        self.counters.record(kind, type_id, counted, accepted);
        self.sweep_counters.record(kind, type_id, counted, accepted);
    }

    fn record_with(&mut self, update: impl Fn(&mut MoveCounters)) {
        update(&mut self.counters);
        update(&mut self.sweep_counters);
    }

    /// Run one grand-canonical move of a given kind and type.
    pub fn attempt_kind(
        &mut self,
        kind: MoveKind,
        type_id: TypeId,
        bias: f64,
        key: ProposalKey,
    ) -> Result<bool, MuvtError> {
        let mut accept_rng = key.child(LANE_ACCEPT, 0).rng();
        let accepted = match kind {
            MoveKind::Insertion => {
                let (evaluation, trial) = self.evaluate_insertion(type_id, bias, key)?;
                let accepted = accept(evaluation.probability, &mut accept_rng);
                if trial.overlap {
                    self.record_with(|c| c.overlap_rejections += 1);
                } else {
                    self.record_with(|c| c.record_depletants(&trial.depletants));
                }
                if accepted {
                    self.state.insert(trial.particle)?;
                }
                accepted
            }
            MoveKind::Deletion => {
                let (evaluation, target) = self.evaluate_deletion(type_id, bias, key)?;
                let accepted = accept(evaluation.probability, &mut accept_rng);
                match target {
                    Some(id) if accepted => {
                        self.state.remove(id)?;
                    }
                    Some(_) => {}
                    None => self.record_with(|c| c.empty_deletions += 1),
                }
                accepted
            }
            MoveKind::Transfer => {
                return Err(MuvtError::InvalidConfig(
                    "Transfer moves need a partner box".to_string(),
                ))
            }
        };
        self.record(kind, type_id, accepted);
        Ok(accepted)
    }

    /// One attempt of the standalone grand-canonical sweep.
    pub fn attempt(&mut self, key: ProposalKey) -> Result<bool, MuvtError> {
        let mut rng = key.rng();
        let kind = self.weights.select(&mut rng);
        let species = self.state.species();
        let Some(type_id) =
            self.type_selection
                .select(&self.movable, |t| species[t].fugacity, &mut rng)
        else {
            return Ok(false);
        };
        self.attempt_kind(kind, type_id, self.weights.insertion_bias(), key)
    }

    /// Close the current sweep and hand back its counters.
    pub fn finish_sweep(&mut self) -> SweepReport {
        let n_types = self.state.n_types();
        let counters = std::mem::replace(&mut self.sweep_counters, MoveCounters::new(n_types));
        let report = SweepReport {
            sweep: self.sweep,
            counts: self.state.counts(),
            counters,
        };
        self.sweep += 1;
        report
    }

    pub fn sweep(&mut self) -> Result<SweepReport, MuvtError> {
        for index in 0..self.attempts_per_sweep {
            let key = self.stream.proposal(self.sweep, index);
            self.attempt(key)?;
        }
        let report = self.finish_sweep();
        debug!(sweep = report.sweep, counts = ?report.counts, "Sweep complete");
        Ok(report)
    }

    pub fn run(&mut self, sweeps: u64) -> Result<Vec<SweepReport>, MuvtError> {
        info!(
            sweeps,
            attempts = self.attempts_per_sweep,
            seed = self.stream.seed(),
            "Starting muVT run"
        );
        let reports = (0..sweeps)
            .map(|_| self.sweep())
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            counts = ?self.state.counts(),
            insertion = self.counters.acceptance_rate(MoveKind::Insertion),
            deletion = self.counters.acceptance_rate(MoveKind::Deletion),
            "muVT run finished"
        );
        Ok(reports)
    }

    /// Monte Carlo estimate of the fraction of the box open to a depletant.
    pub fn free_volume_fraction(&self, depletant: usize, samples: u64) -> Result<f64, MuvtError> {
        let key = self.stream.proposal(self.sweep, u64::MAX);
        self.depletants
            .free_volume_fraction(&self.state, depletant, samples, key)
    }

    /// Positions of every particle of a type, for output.
    pub fn positions_of(&self, type_id: TypeId) -> Vec<Vector3<f64>> {
        self.state
            .particles()
            .filter(|(_, p)| p.type_id == type_id)
            .map(|(_, p)| p.position)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depletant::{DepletantSpecies, TrialShell};
    use crate::overlap::find_overlap;
    use crate::simbox::SimBox;
    use crate::species::Species;
    use approx::assert_relative_eq;
    use shapes::Sphere;

    fn sphere_updater(length: f64, diameter: f64, fugacity: f64) -> UpdaterMuVT<Sphere> {
        let state = BoxState::new(
            SimBox::cubic(length).unwrap(),
            vec![Species::new("A", Sphere::new(diameter).unwrap(), fugacity)],
        )
        .unwrap();
        UpdaterMuVT::new(state, FreeVolumeEstimator::new(Vec::new()), 42)
    }

    #[derive(Debug)]
    struct NoShell;

    impl ShellBuilder for NoShell {
        fn build(&self, _: &SimBox, _: f64, _: f64) -> Option<TrialShell> {
            None
        }
    }

    #[test]
    fn test_empty_deletion_is_counted_reject() {
        let mut updater = sphere_updater(5.0, 1.0, 1.0);
        let key = RngStream::new(1).proposal(0, 0);
        let (evaluation, target) = updater.evaluate_deletion(0, 1.0, key).unwrap();
        assert_eq!(evaluation.probability, 0.0);
        assert!(target.is_none());

        assert!(!updater.attempt_kind(MoveKind::Deletion, 0, 1.0, key).unwrap());
        assert_eq!(updater.counters().empty_deletions, 1);
        assert_eq!(updater.counters().total.deletion.attempted, 1);
    }

    #[test]
    fn test_jammed_box_rejects_insertion() {
        // no point of a box of side 2 is farther than sqrt(3) from its center
        let mut updater = sphere_updater(2.0, 1.9, 1.0);
        updater
            .insert_initial(vec![Particle::new(
                0,
                Vector3::new(1.0, 1.0, 1.0),
                UnitQuaternion::identity(),
            )])
            .unwrap();
        let stream = RngStream::new(3);
        for i in 0..50 {
            let (evaluation, trial) = updater.evaluate_insertion(0, 1.0, stream.proposal(0, i)).unwrap();
            assert!(trial.overlap);
            assert_eq!(evaluation.probability, 0.0);
        }
        assert!(!updater
            .attempt_kind(MoveKind::Insertion, 0, 1.0, stream.proposal(1, 0))
            .unwrap());
        assert_eq!(updater.counters().overlap_rejections, 1);
    }

    #[test]
    fn test_insertion_probability_matches_formula() {
        let updater = sphere_updater(10.0, 0.5, 0.01);
        let key = RngStream::new(5).proposal(0, 0);
        let (evaluation, trial) = updater.evaluate_insertion(0, 1.0, key).unwrap();
        assert!(!trial.overlap);
        assert_relative_eq!(evaluation.base, 10.0, epsilon = 1e-12);
        assert_eq!(evaluation.probability, 1.0);

        let (half, _) = updater.evaluate_insertion(0, 0.05, key).unwrap();
        assert_relative_eq!(half.probability, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_fallback_acceptance_equals_base() {
        let species = vec![
            Species::new("A", Sphere::new(1.0).unwrap(), 0.0005),
            Species::new("D", Sphere::new(0.5).unwrap(), 0.0),
        ];
        let state = BoxState::new(SimBox::cubic(10.0).unwrap(), species.clone()).unwrap();
        let depletant = DepletantSpecies::from_species(&species[1], 50.0).unwrap();
        let forced = UpdaterMuVT::new(
            state.clone(),
            FreeVolumeEstimator::with_builder(vec![depletant], NoShell),
            7,
        );
        let plain = UpdaterMuVT::new(state, FreeVolumeEstimator::new(Vec::new()), 7);

        let stream = RngStream::new(9);
        for i in 0..20 {
            let key = stream.proposal(0, i);
            let (with, trial) = forced.evaluate_insertion(0, 1.0, key).unwrap();
            let (without, _) = plain.evaluate_insertion(0, 1.0, key).unwrap();
            assert_eq!(with.probability, without.probability);
            assert_relative_eq!(with.probability, 0.5, epsilon = 1e-12);
            assert_eq!(trial.depletants.fallbacks, 1);
        }
    }

    #[test]
    fn test_no_overlaps_after_every_commit() {
        let mut updater = sphere_updater(6.0, 1.0, 0.5)
            .with_attempts_per_sweep(20)
            .unwrap();
        for _ in 0..50 {
            updater.sweep().unwrap();
            assert_eq!(find_overlap(updater.state()), None);
        }
        assert!(updater.state().total_count() > 0);
    }

    #[test]
    fn test_same_seed_same_trajectory() {
        let run = || {
            let mut updater = sphere_updater(8.0, 1.0, 0.2)
                .with_attempts_per_sweep(10)
                .unwrap();
            updater
                .run(30)
                .unwrap()
                .into_iter()
                .map(|r| r.counts)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_initial_overlap_rejected() {
        let mut updater = sphere_updater(5.0, 1.0, 1.0);
        let result = updater.insert_initial(vec![
            Particle::new(0, Vector3::new(1.0, 1.0, 1.0), UnitQuaternion::identity()),
            Particle::new(0, Vector3::new(1.5, 1.0, 1.0), UnitQuaternion::identity()),
        ]);
        assert!(matches!(result, Err(MuvtError::InitialOverlap { index: 1 })));
    }

    #[test]
    fn test_transfer_needs_partner() {
        let mut mover = sphere_updater(5.0, 1.0, 1.0);
        assert!(mover
            .attempt_kind(MoveKind::Transfer, 0, 1.0, RngStream::new(0).proposal(0, 0))
            .is_err());
        assert!(sphere_updater(5.0, 1.0, 1.0)
            .with_weights(MoveWeights::transfer_only())
            .is_err());
    }
}
