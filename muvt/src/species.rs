use shapes::{Dimensions, Shape};

use crate::error::MuvtError;

/// Temperature and thermal wavelength, in reduced units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thermal {
    pub kt: f64,
    pub thermal_wavelength: f64,
}

impl Default for Thermal {
    fn default() -> Self {
        Self {
            kt: 1.0,
            thermal_wavelength: 1.0,
        }
    }
}

impl Thermal {
    /// Fugacity `z = exp(mu / kT) / Lambda^d`.
    pub fn fugacity(&self, chemical_potential: f64, dimensions: Dimensions) -> f64 {
        (chemical_potential / self.kt).exp()
            / self.thermal_wavelength.powi(dimensions.count() as i32)
    }

}

/// A particle type: its shape and its reservoir fugacity.
#[derive(Debug, Clone)]
pub struct Species<S> {
    pub name: String,
    pub shape: S,
    pub fugacity: f64,
    /// Overlaps are not checked between two types that both set this.
    pub ignore_overlaps: bool,
    /// Moves on this type are left out of the per-type counters.
    pub ignore_statistics: bool,
}

impl<S: Shape> Species<S> {
    pub fn new(name: impl Into<String>, shape: S, fugacity: f64) -> Self {
        Self {
            name: name.into(),
            shape,
            fugacity,
            ignore_overlaps: false,
            ignore_statistics: false,
        }
    }

    pub fn from_chemical_potential(
        name: impl Into<String>,
        shape: S,
        chemical_potential: f64,
        thermal: &Thermal,
    ) -> Self {
        let fugacity = thermal.fugacity(chemical_potential, shape.dimensions());
        Self::new(name, shape, fugacity)
    }

    pub fn ignoring_overlaps(mut self, ignore: bool) -> Self {
        self.ignore_overlaps = ignore;
        self
    }

    pub fn ignoring_statistics(mut self, ignore: bool) -> Self {
        self.ignore_statistics = ignore;
        self
    }

    /// Check the shape capability contract and the box it will live in.
    pub fn validate(&self, dimensions: Dimensions, min_width: f64) -> Result<(), MuvtError> {
        let radius = self.shape.circumsphere_radius();
        let volume = self.shape.volume();
        if !(radius.is_finite() && radius > 0.0) {
            return Err(self.malformed(format!("circumsphere radius {radius}")));
        }
        if !(volume.is_finite() && volume > 0.0) {
            return Err(self.malformed(format!("volume {volume}")));
        }
        if self.shape.dimensions() != dimensions {
            return Err(MuvtError::DimensionMismatch {
                species: self.name.clone(),
                shape: self.shape.dimensions(),
                simbox: dimensions,
            });
        }
        if !(self.fugacity.is_finite() && self.fugacity >= 0.0) {
            return Err(MuvtError::InvalidConfig(format!(
                "Fugacity of species '{}' must be finite and non-negative, got {}",
                self.name, self.fugacity
            )));
        }
        if 2.0 * radius >= min_width {
            return Err(MuvtError::InvalidConfig(format!(
                "Species '{}' (diameter {}) would overlap its own periodic image in a box of width {}",
                self.name,
                2.0 * radius,
                min_width
            )));
        }
        Ok(())
    }

    fn malformed(&self, reason: String) -> MuvtError {
        MuvtError::MalformedShape {
            species: self.name.clone(),
            reason,
        }
    }
}

/// Whether overlaps are checked between two types, given their
/// `ignore_overlaps` flags. Skipped only when both types set it.
pub fn interacts(a_ignores: bool, b_ignores: bool) -> bool {
    !(a_ignores && b_ignores)
}
