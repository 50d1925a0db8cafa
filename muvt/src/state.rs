//! Live particle population of one box.
//!
//! `BoxState` is the only place particles are created or destroyed. It keeps
//! per-type membership lists for uniform deletion draws and a cell list for
//! neighbour queries.

use itertools::Either;
use nalgebra::{UnitQuaternion, Vector3};
use shapes::Shape;
use slotmap::{new_key_type, SecondaryMap, SlotMap};
use tracing::debug;

use crate::cell_list::CellList;
use crate::error::MuvtError;
use crate::simbox::SimBox;
use crate::species::Species;

new_key_type! {
    /// Stable identity of a particle within its box.
    pub struct ParticleId;
}

/// Index of a species in the box's species table.
pub type TypeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub type_id: TypeId,
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl Particle {
    pub fn new(type_id: TypeId, position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self {
            type_id,
            position,
            orientation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoxState<S> {
    simbox: SimBox,
    species: Vec<Species<S>>,
    particles: SlotMap<ParticleId, Particle>,
    members: Vec<Vec<ParticleId>>,
    member_slot: SecondaryMap<ParticleId, usize>,
    cells: CellList,
    cell_reach: f64,
    max_radius: f64,
}

impl<S: Shape> BoxState<S> {
    pub fn new(simbox: SimBox, species: Vec<Species<S>>) -> Result<Self, MuvtError> {
        if species.is_empty() {
            return Err(MuvtError::InvalidConfig(
                "At least one species is required".to_string(),
            ));
        }
        let min_width = simbox.min_width();
        for s in &species {
            s.validate(simbox.dimensions(), min_width)?;
        }
        let max_radius = species
            .iter()
            .map(|s| s.shape.circumsphere_radius())
            .fold(0.0, f64::max);
        let cell_reach = 2.0 * max_radius;
        let cells = CellList::new(&simbox, cell_reach);
        debug!(cells = ?cells.dims(), max_radius, "Box state ready");

        Ok(Self {
            members: vec![Vec::new(); species.len()],
            simbox,
            species,
            particles: SlotMap::with_key(),
            member_slot: SecondaryMap::new(),
            cells,
            cell_reach,
            max_radius,
        })
    }

    pub fn simbox(&self) -> &SimBox {
        &self.simbox
    }

    pub fn volume(&self) -> f64 {
        self.simbox.volume()
    }

    pub fn species(&self) -> &[Species<S>] {
        &self.species
    }

    pub fn species_of(&self, type_id: TypeId) -> Result<&Species<S>, MuvtError> {
        self.species
            .get(type_id)
            .ok_or(MuvtError::UnknownType { type_id })
    }

    pub fn n_types(&self) -> usize {
        self.species.len()
    }

    /// Largest circumsphere radius over all species.
    pub fn max_radius(&self) -> f64 {
        self.max_radius
    }

    pub fn set_fugacity(&mut self, type_id: TypeId, fugacity: f64) -> Result<(), MuvtError> {
        if !(fugacity.is_finite() && fugacity >= 0.0) {
            return Err(MuvtError::InvalidConfig(format!(
                "Fugacity must be finite and non-negative, got {fugacity}"
            )));
        }
        let species = self
            .species
            .get_mut(type_id)
            .ok_or(MuvtError::UnknownType { type_id })?;
        species.fugacity = fugacity;
        Ok(())
    }

    pub fn particle_count(&self, type_id: TypeId) -> usize {
        self.members.get(type_id).map_or(0, Vec::len)
    }

    pub fn counts(&self) -> Vec<usize> {
        self.members.iter().map(Vec::len).collect()
    }

    pub fn total_count(&self) -> usize {
        self.particles.len()
    }

    pub fn get(&self, id: ParticleId) -> Option<&Particle> {
        self.particles.get(id)
    }

    pub fn particles(&self) -> impl Iterator<Item = (ParticleId, &Particle)> + Clone + '_ {
        self.particles.iter()
    }

    /// The `n`-th particle of a type, in membership order.
    pub fn nth_of_type(&self, type_id: TypeId, n: usize) -> Option<ParticleId> {
        self.members.get(type_id)?.get(n).copied()
    }

    /// Add a particle. The position is wrapped into the box; overlaps are
    /// the caller's responsibility.
    pub fn insert(&mut self, mut particle: Particle) -> Result<ParticleId, MuvtError> {
        if particle.type_id >= self.species.len() {
            return Err(MuvtError::UnknownType {
                type_id: particle.type_id,
            });
        }
        if particle.position.iter().any(|x| !x.is_finite()) {
            return Err(MuvtError::NonFinite {
                quantity: "particle position",
            });
        }
        particle.position = self.simbox.wrap(&particle.position);

        let type_id = particle.type_id;
        let position = particle.position;
        let id = self.particles.insert(particle);
        self.member_slot.insert(id, self.members[type_id].len());
        self.members[type_id].push(id);
        self.cells.insert(&self.simbox, id, &position);
        Ok(id)
    }

    pub fn remove(&mut self, id: ParticleId) -> Result<Particle, MuvtError> {
        let particle = self.particles.remove(id).ok_or(MuvtError::UnknownParticle)?;
        let slot = self
            .member_slot
            .remove(id)
            .ok_or(MuvtError::UnknownParticle)?;
        let members = &mut self.members[particle.type_id];
        members.swap_remove(slot);
        if let Some(&moved) = members.get(slot) {
            self.member_slot.insert(moved, slot);
        }
        self.cells.remove(id);
        Ok(particle)
    }

    /// Every particle whose center may lie within `reach` of `position`.
    ///
    /// Served from the cell list when `reach` fits in one cell, otherwise
    /// from the whole population.
    pub fn neighbors<'a>(
        &'a self,
        position: &Vector3<f64>,
        reach: f64,
    ) -> impl Iterator<Item = (ParticleId, &'a Particle)> + 'a {
        if reach <= self.cell_reach {
            Either::Left(
                self.cells
                    .neighbor_cells(&self.simbox, position)
                    .into_iter()
                    .flat_map(move |cell| {
                        self.cells
                            .cell(cell)
                            .iter()
                            .map(move |&id| (id, &self.particles[id]))
                    }),
            )
        } else {
            Either::Right(self.particles.iter())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapes::Sphere;

    fn state() -> BoxState<Sphere> {
        BoxState::new(
            SimBox::cubic(10.0).unwrap(),
            vec![
                Species::new("A", Sphere::new(1.0).unwrap(), 0.1),
                Species::new("B", Sphere::new(0.5).unwrap(), 0.2),
            ],
        )
        .unwrap()
    }

    fn at(type_id: TypeId, x: f64, y: f64, z: f64) -> Particle {
        Particle::new(type_id, Vector3::new(x, y, z), UnitQuaternion::identity())
    }

    #[test]
    fn test_insert_and_remove_track_counts() {
        let mut state = state();
        let a = state.insert(at(0, 1.0, 1.0, 1.0)).unwrap();
        let b = state.insert(at(0, 5.0, 5.0, 5.0)).unwrap();
        let c = state.insert(at(1, 8.0, 8.0, 8.0)).unwrap();
        assert_eq!(state.counts(), vec![2, 1]);

        let removed = state.remove(a).unwrap();
        assert_eq!(removed.type_id, 0);
        assert_eq!(state.counts(), vec![1, 1]);
        assert_eq!(state.nth_of_type(0, 0), Some(b));
        assert_eq!(state.nth_of_type(1, 0), Some(c));
        assert!(matches!(state.remove(a), Err(MuvtError::UnknownParticle)));
    }

    #[test]
    fn test_insert_wraps_position() {
        let mut state = state();
        let id = state.insert(at(1, 11.0, -1.0, 3.0)).unwrap();
        let p = state.get(id).unwrap();
        assert!((p.position - Vector3::new(1.0, 9.0, 3.0)).norm() < 1e-12);
    }

    #[test]
    fn test_insert_rejects_bad_particles() {
        let mut state = state();
        assert!(matches!(
            state.insert(at(5, 1.0, 1.0, 1.0)),
            Err(MuvtError::UnknownType { type_id: 5 })
        ));
        assert!(matches!(
            state.insert(at(0, f64::NAN, 1.0, 1.0)),
            Err(MuvtError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_neighbors_cover_nearby_particles() {
        let mut state = state();
        let near = state.insert(at(0, 9.8, 0.1, 5.0)).unwrap();
        state.insert(at(0, 5.0, 5.0, 5.0)).unwrap();

        let found: Vec<ParticleId> = state
            .neighbors(&Vector3::new(0.2, 0.1, 5.0), 1.0)
            .map(|(id, _)| id)
            .collect();
        assert!(found.contains(&near));

        let everything = state.neighbors(&Vector3::new(0.2, 0.1, 5.0), 50.0).count();
        assert_eq!(everything, 2);
    }

    #[test]
    fn test_empty_species_table_rejected() {
        assert!(BoxState::<Sphere>::new(SimBox::cubic(5.0).unwrap(), Vec::new()).is_err());
    }
}
