use itertools::iproduct;
use nalgebra::{Matrix3, Vector3};
use rand::Rng;
use shapes::Dimensions;

use crate::error::MuvtError;

/// Periodic simulation cell.
///
/// The columns of `lattice` are the cell vectors. A 2D box keeps the third
/// column along z and every particle at z = 0.
#[derive(Debug, Clone, PartialEq)]
pub struct SimBox {
    lattice: Matrix3<f64>,
    lattice_inv: Matrix3<f64>,
    dimensions: Dimensions,
}

impl SimBox {
    pub fn cubic(length: f64) -> Result<Self, MuvtError> {
        Self::orthorhombic(Vector3::new(length, length, length))
    }

    pub fn orthorhombic(lengths: Vector3<f64>) -> Result<Self, MuvtError> {
        Self::from_lattice(Matrix3::from_diagonal(&lengths), Dimensions::Three)
    }

    /// Rectangular 2D box in the xy plane.
    pub fn rectangle(lx: f64, ly: f64) -> Result<Self, MuvtError> {
        Self::from_lattice(
            Matrix3::from_diagonal(&Vector3::new(lx, ly, 1.0)),
            Dimensions::Two,
        )
    }

    pub fn from_lattice(lattice: Matrix3<f64>, dimensions: Dimensions) -> Result<Self, MuvtError> {
        if lattice.iter().any(|x| !x.is_finite()) {
            return Err(MuvtError::InvalidConfig(
                "Box lattice must be finite".to_string(),
            ));
        }
        if dimensions == Dimensions::Two
            && (lattice[(2, 0)] != 0.0
                || lattice[(2, 1)] != 0.0
                || lattice[(0, 2)] != 0.0
                || lattice[(1, 2)] != 0.0)
        {
            return Err(MuvtError::InvalidConfig(
                "A 2D box must keep its first two cell vectors in the xy plane".to_string(),
            ));
        }
        let lattice_inv = lattice.try_inverse().ok_or_else(|| {
            MuvtError::InvalidConfig("Box lattice is singular".to_string())
        })?;
        let simbox = Self {
            lattice,
            lattice_inv,
            dimensions,
        };
        if !(simbox.volume() > 0.0) {
            return Err(MuvtError::InvalidConfig(
                "Box cell vectors must be right-handed with positive volume".to_string(),
            ));
        }
        Ok(simbox)
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Volume of the cell (area for a 2D box).
    pub fn volume(&self) -> f64 {
        let a = self.lattice.column(0).into_owned();
        let b = self.lattice.column(1).into_owned();
        match self.dimensions {
            Dimensions::Two => a.x * b.y - a.y * b.x,
            Dimensions::Three => self.lattice.determinant(),
        }
    }

    pub fn fractional(&self, position: &Vector3<f64>) -> Vector3<f64> {
        self.lattice_inv * position
    }

    /// Distance between opposite faces along each cell vector.
    pub fn nearest_plane_distances(&self) -> Vector3<f64> {
        let a = self.lattice.column(0).into_owned();
        let b = self.lattice.column(1).into_owned();
        let c = self.lattice.column(2).into_owned();
        let volume = self.lattice.determinant().abs();
        Vector3::new(
            volume / b.cross(&c).norm(),
            volume / c.cross(&a).norm(),
            volume / a.cross(&b).norm(),
        )
    }

    /// Smallest periodic width of the box in the active dimensions.
    pub fn min_width(&self) -> f64 {
        let widths = self.nearest_plane_distances();
        match self.dimensions {
            Dimensions::Two => widths.x.min(widths.y),
            Dimensions::Three => widths.min(),
        }
    }

    /// Apply the minimum-image convention to a separation vector.
    pub fn minimum_image(&self, d: &Vector3<f64>) -> Vector3<f64> {
        let mut frac = self.lattice_inv * d;
        for k in 0..self.dimensions.count() {
            frac[k] -= frac[k].round();
        }
        if self.dimensions == Dimensions::Two {
            frac.z = 0.0;
        }
        self.lattice * frac
    }

    /// Every periodic image of the separation `d` that is no longer than
    /// `cutoff`. Only the minimum image qualifies while `cutoff` stays under
    /// half the smallest width.
    pub fn images_within(
        &self,
        d: &Vector3<f64>,
        cutoff: f64,
    ) -> impl Iterator<Item = Vector3<f64>> + '_ {
        let nearest = self.minimum_image(d);
        let widths = self.nearest_plane_distances();
        // the minimum image sits within half a width of every lattice plane
        let mut span = [0i64; 3];
        for (k, s) in span.iter_mut().enumerate().take(self.dimensions.count()) {
            *s = (cutoff / widths[k] + 0.5).floor() as i64;
        }
        let range = |k: usize| -span[k]..=span[k];
        iproduct!(range(0), range(1), range(2))
            .map(move |(i, j, k)| {
                nearest + self.lattice * Vector3::new(i as f64, j as f64, k as f64)
            })
            .filter(move |r| r.norm_squared() <= cutoff * cutoff)
    }

    /// Wrap a position into the primary cell, fractional coordinates [0, 1).
    pub fn wrap(&self, position: &Vector3<f64>) -> Vector3<f64> {
        let mut frac = self.lattice_inv * position;
        for k in 0..self.dimensions.count() {
            frac[k] -= frac[k].floor();
            // floor of a tiny negative number can land exactly on 1.0
            if frac[k] >= 1.0 {
                frac[k] = 0.0;
            }
        }
        if self.dimensions == Dimensions::Two {
            frac.z = 0.0;
        }
        self.lattice * frac
    }

    /// Uniformly distributed point inside the cell.
    pub fn random_position<R: Rng + ?Sized>(&self, rng: &mut R) -> Vector3<f64> {
        let frac = match self.dimensions {
            Dimensions::Two => Vector3::new(rng.gen::<f64>(), rng.gen::<f64>(), 0.0),
            Dimensions::Three => Vector3::new(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()),
        };
        self.lattice * frac
    }
}
