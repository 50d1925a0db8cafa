//! Uniform cell list over fractional coordinates.
//!
//! Cells are at least `min_width` wide along every cell vector, so every
//! particle within `min_width` of a point lives in the point's cell or one of
//! its neighbours. Axes with fewer than three cells are scanned in full.
//! Only occupied cells are stored, so memory follows the particle count
//! rather than the box volume.

use std::collections::HashMap;

use nalgebra::Vector3;
use slotmap::SecondaryMap;

use crate::simbox::SimBox;
use crate::state::ParticleId;

const MAX_CELLS_PER_AXIS: usize = 256;

#[derive(Debug, Clone)]
pub struct CellList {
    dims: [usize; 3],
    cells: HashMap<usize, Vec<ParticleId>>,
    location: SecondaryMap<ParticleId, usize>,
}

impl CellList {
    pub fn new(simbox: &SimBox, min_width: f64) -> Self {
        let widths = simbox.nearest_plane_distances();
        let active = simbox.dimensions().count();
        let mut dims = [1usize; 3];
        for (k, dim) in dims.iter_mut().enumerate().take(active) {
            *dim = if min_width > 0.0 && min_width.is_finite() {
                ((widths[k] / min_width).floor() as usize).clamp(1, MAX_CELLS_PER_AXIS)
            } else {
                1
            };
        }
        Self {
            dims,
            cells: HashMap::new(),
            location: SecondaryMap::new(),
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    fn cell_coords(&self, simbox: &SimBox, position: &Vector3<f64>) -> [usize; 3] {
        let frac = simbox.fractional(position);
        let mut coords = [0usize; 3];
        for k in 0..3 {
            let f = frac[k] - frac[k].floor();
            coords[k] = ((f * self.dims[k] as f64) as usize).min(self.dims[k] - 1);
        }
        coords
    }

    fn flat(&self, c: [usize; 3]) -> usize {
        (c[2] * self.dims[1] + c[1]) * self.dims[0] + c[0]
    }

    pub fn insert(&mut self, simbox: &SimBox, id: ParticleId, position: &Vector3<f64>) {
        let cell = self.flat(self.cell_coords(simbox, position));
        self.cells.entry(cell).or_default().push(id);
        self.location.insert(id, cell);
    }

    pub fn remove(&mut self, id: ParticleId) {
        let Some(cell) = self.location.remove(id) else {
            return;
        };
        if let Some(members) = self.cells.get_mut(&cell) {
            if let Some(slot) = members.iter().position(|&m| m == id) {
                members.swap_remove(slot);
            }
            if members.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    /// Indices of the cells that may hold particles near `position`.
    pub fn neighbor_cells(&self, simbox: &SimBox, position: &Vector3<f64>) -> Vec<usize> {
        let center = self.cell_coords(simbox, position);
        let ranges: Vec<Vec<usize>> = (0..3)
            .map(|k| {
                let n = self.dims[k];
                if n < 3 {
                    (0..n).collect()
                } else {
                    [n - 1, 0, 1]
                        .iter()
                        .map(|offset| (center[k] + offset) % n)
                        .collect()
                }
            })
            .collect();

        let mut out = Vec::with_capacity(ranges.iter().map(Vec::len).product());
        for &z in &ranges[2] {
            for &y in &ranges[1] {
                for &x in &ranges[0] {
                    out.push(self.flat([x, y, z]));
                }
            }
        }
        out
    }

    pub fn cell(&self, index: usize) -> &[ParticleId] {
        self.cells.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_cell_dims_follow_width() {
        let simbox = SimBox::cubic(10.0).unwrap();
        assert_eq!(CellList::new(&simbox, 2.5).dims(), [4, 4, 4]);
        assert_eq!(CellList::new(&simbox, 20.0).dims(), [1, 1, 1]);

        let plane = SimBox::rectangle(10.0, 6.0).unwrap();
        assert_eq!(CellList::new(&plane, 2.0).dims(), [5, 3, 1]);
    }

    #[test]
    fn test_neighbors_wrap_around() {
        let simbox = SimBox::cubic(10.0).unwrap();
        let mut ids: SlotMap<ParticleId, ()> = SlotMap::with_key();
        let mut cells = CellList::new(&simbox, 2.0);

        let far_corner = ids.insert(());
        cells.insert(&simbox, far_corner, &Vector3::new(9.5, 9.5, 9.5));
        let middle = ids.insert(());
        cells.insert(&simbox, middle, &Vector3::new(5.0, 5.0, 5.0));

        let near_origin: Vec<ParticleId> = cells
            .neighbor_cells(&simbox, &Vector3::new(0.2, 0.2, 0.2))
            .into_iter()
            .flat_map(|c| cells.cell(c).to_vec())
            .collect();
        assert_eq!(near_origin, vec![far_corner]);

        cells.remove(far_corner);
        assert!(cells
            .neighbor_cells(&simbox, &Vector3::new(0.2, 0.2, 0.2))
            .into_iter()
            .all(|c| cells.cell(c).is_empty()));
        assert_eq!(cells.cells.len(), 1);
    }

    #[test]
    fn test_fine_grid_in_large_box_stays_sparse() {
        let simbox = SimBox::cubic(60.0).unwrap();
        let mut ids: SlotMap<ParticleId, ()> = SlotMap::with_key();
        let mut cells = CellList::new(&simbox, 0.2);
        assert_eq!(cells.dims(), [256, 256, 256]);
        assert_eq!(cells.cells.len(), 0);

        let a = ids.insert(());
        cells.insert(&simbox, a, &Vector3::new(1.0, 2.0, 3.0));
        let b = ids.insert(());
        cells.insert(&simbox, b, &Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(cells.cells.len(), 1);

        cells.remove(a);
        cells.remove(b);
        assert_eq!(cells.cells.len(), 0);
    }
}
