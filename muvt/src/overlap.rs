//! Overlap evaluation against the committed population of a box.
//!
//! Broad phase: cell-list neighbours, then every periodic image whose
//! bounding spheres touch. Narrow phase: the shape contract. The first
//! overlap found ends the scan.

use itertools::Itertools;
use nalgebra::{UnitQuaternion, Vector3};
use shapes::Shape;

use crate::error::MuvtError;
use crate::species::{interacts, Species};
use crate::state::{BoxState, Particle, ParticleId};

/// A shape at a pose, tested against a box without being part of it.
#[derive(Debug, Clone)]
pub struct Placement<'a, S> {
    pub shape: &'a S,
    pub ignore_overlaps: bool,
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl<'a, S: Shape> Placement<'a, S> {
    pub fn new(
        species: &'a Species<S>,
        position: Vector3<f64>,
        orientation: UnitQuaternion<f64>,
    ) -> Self {
        Self {
            shape: &species.shape,
            ignore_overlaps: species.ignore_overlaps,
            position,
            orientation,
        }
    }
}

/// Whether the placement overlaps any particle in the box.
pub fn overlaps_any<S: Shape>(
    state: &BoxState<S>,
    placement: &Placement<'_, S>,
) -> Result<bool, MuvtError> {
    if placement.position.iter().any(|x| !x.is_finite()) {
        return Err(MuvtError::NonFinite {
            quantity: "candidate position",
        });
    }
    if placement.orientation.coords.iter().any(|x| !x.is_finite()) {
        return Err(MuvtError::NonFinite {
            quantity: "candidate orientation",
        });
    }

    let radius = placement.shape.circumsphere_radius();
    let reach = radius + state.max_radius();
    let species = state.species();

    for (_, particle) in state.neighbors(&placement.position, reach) {
        let other = &species[particle.type_id];
        if !interacts(placement.ignore_overlaps, other.ignore_overlaps) {
            continue;
        }
        let contact = radius + other.shape.circumsphere_radius();
        let hit = state
            .simbox()
            .images_within(&(particle.position - placement.position), contact)
            .any(|r_ab| {
                placement
                    .shape
                    .overlaps(&placement.orientation, &other.shape, &particle.orientation, &r_ab)
            });
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

fn pair_overlaps<S: Shape>(state: &BoxState<S>, a: &Particle, b: &Particle) -> bool {
    let species = state.species();
    let (sa, sb) = (&species[a.type_id], &species[b.type_id]);
    if !interacts(sa.ignore_overlaps, sb.ignore_overlaps) {
        return false;
    }
    let contact = sa.shape.circumsphere_radius() + sb.shape.circumsphere_radius();
    state
        .simbox()
        .images_within(&(b.position - a.position), contact)
        .any(|r_ab| {
            sa.shape
                .overlaps(&a.orientation, &sb.shape, &b.orientation, &r_ab)
        })
}

/// Exhaustive pairwise check of the whole configuration. Returns the first
/// overlapping pair, if any.
pub fn find_overlap<S: Shape>(state: &BoxState<S>) -> Option<(ParticleId, ParticleId)> {
    state
        .particles()
        .tuple_combinations()
        .find(|((_, a), (_, b))| pair_overlaps(state, a, b))
        .map(|((ia, _), (ib, _))| (ia, ib))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simbox::SimBox;
    use nalgebra::Vector2;
    use shapes::{AnyShape, ConvexPolygon, Sphere, Spheropolygon};

    fn spheres() -> BoxState<Sphere> {
        BoxState::new(
            SimBox::cubic(10.0).unwrap(),
            vec![
                Species::new("A", Sphere::new(1.0).unwrap(), 1.0),
                Species::new("ghost", Sphere::new(1.0).unwrap(), 1.0).ignoring_overlaps(true),
            ],
        )
        .unwrap()
    }

    fn place(state: &mut BoxState<Sphere>, type_id: usize, x: f64, y: f64, z: f64) -> ParticleId {
        state
            .insert(Particle::new(
                type_id,
                Vector3::new(x, y, z),
                UnitQuaternion::identity(),
            ))
            .unwrap()
    }

    #[test]
    fn test_overlap_across_boundary() {
        let mut state = spheres();
        place(&mut state, 0, 9.7, 5.0, 5.0);
        let species = &state.species()[0];

        let touching = Placement::new(species, Vector3::new(0.5, 5.0, 5.0), UnitQuaternion::identity());
        assert!(overlaps_any(&state, &touching).unwrap());

        let clear = Placement::new(species, Vector3::new(0.8, 5.0, 5.0), UnitQuaternion::identity());
        assert!(!overlaps_any(&state, &clear).unwrap());
    }

    #[test]
    fn test_ignore_overlaps_needs_both_types() {
        let mut state = spheres();
        place(&mut state, 1, 5.0, 5.0, 5.0);
        let species = state.species();

        let ghost = Placement::new(&species[1], Vector3::new(5.2, 5.0, 5.0), UnitQuaternion::identity());
        assert!(!overlaps_any(&state, &ghost).unwrap());

        let solid = Placement::new(&species[0], Vector3::new(5.2, 5.0, 5.0), UnitQuaternion::identity());
        assert!(overlaps_any(&state, &solid).unwrap());
    }

    #[test]
    fn test_non_finite_candidate_is_an_error() {
        let state = spheres();
        let placement = Placement::new(
            &state.species()[0],
            Vector3::new(f64::NAN, 0.0, 0.0),
            UnitQuaternion::identity(),
        );
        assert!(matches!(
            overlaps_any(&state, &placement),
            Err(MuvtError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_large_shape_scans_whole_box() {
        let mut state = spheres();
        place(&mut state, 0, 1.0, 1.0, 1.0);
        let big = Sphere::new(8.0).unwrap();
        let placement = Placement {
            shape: &big,
            ignore_overlaps: false,
            position: Vector3::new(3.0, 3.0, 3.0),
            orientation: UnitQuaternion::identity(),
        };
        assert!(overlaps_any(&state, &placement).unwrap());
    }

    #[test]
    fn test_find_overlap() {
        let mut state = spheres();
        let a = place(&mut state, 0, 2.0, 2.0, 2.0);
        place(&mut state, 0, 6.0, 6.0, 6.0);
        assert_eq!(find_overlap(&state), None);

        let b = place(&mut state, 0, 2.5, 2.0, 2.0);
        let pair = find_overlap(&state).unwrap();
        assert!(pair == (a, b) || pair == (b, a));

        // ghosts do not collide with each other
        let mut ghosts = spheres();
        place(&mut ghosts, 1, 2.0, 2.0, 2.0);
        place(&mut ghosts, 1, 2.1, 2.0, 2.0);
        assert_eq!(find_overlap(&ghosts), None);
    }

    #[test]
    fn test_overlap_through_far_image() {
        // off-center rod reaching past half the box width
        let rod = Spheropolygon::new(vec![Vector2::new(0.0, 0.0), Vector2::new(1.4, 0.0)], 0.05)
            .unwrap();
        let disk = Spheropolygon::disk(0.6).unwrap();
        let mut state = BoxState::new(
            SimBox::rectangle(3.0, 10.0).unwrap(),
            vec![
                Species::new("rod", AnyShape::from(rod), 1.0),
                Species::new("disk", AnyShape::from(disk), 1.0),
            ],
        )
        .unwrap();
        let rod_id = state
            .insert(Particle::new(
                0,
                Vector3::new(1.5, 5.0, 0.0),
                UnitQuaternion::identity(),
            ))
            .unwrap();

        // the nearest image of the rod is clear; the one a box width away is not
        let position = Vector3::new(0.05, 5.0, 0.0);
        let touching = Placement::new(&state.species()[1], position, UnitQuaternion::identity());
        assert!(overlaps_any(&state, &touching).unwrap());

        let clear = Placement::new(
            &state.species()[1],
            Vector3::new(0.8, 5.0, 0.0),
            UnitQuaternion::identity(),
        );
        assert!(!overlaps_any(&state, &clear).unwrap());

        let disk_id = state
            .insert(Particle::new(1, position, UnitQuaternion::identity()))
            .unwrap();
        let pair = find_overlap(&state).unwrap();
        assert!(pair == (rod_id, disk_id) || pair == (disk_id, rod_id));
    }

    #[test]
    fn test_narrow_phase_uses_orientation() {
        let square = ConvexPolygon::new(vec![
            Vector2::new(-0.5, -0.5),
            Vector2::new(0.5, -0.5),
            Vector2::new(0.5, 0.5),
            Vector2::new(-0.5, 0.5),
        ])
        .unwrap();
        let mut state = BoxState::new(
            SimBox::rectangle(10.0, 10.0).unwrap(),
            vec![Species::new("square", AnyShape::from(square), 1.0)],
        )
        .unwrap();
        state
            .insert(Particle::new(
                0,
                Vector3::new(5.0, 5.0, 0.0),
                UnitQuaternion::identity(),
            ))
            .unwrap();

        // side by side with a 0.1 gap; turning by 45 degrees pushes a corner into the gap
        let position = Vector3::new(6.1, 5.0, 0.0);
        let aligned = Placement::new(&state.species()[0], position, UnitQuaternion::identity());
        assert!(!overlaps_any(&state, &aligned).unwrap());

        let turned = Placement::new(
            &state.species()[0],
            position,
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_4),
        );
        assert!(overlaps_any(&state, &turned).unwrap());
    }
}
