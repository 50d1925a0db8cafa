//! Grand-canonical and two-box acceptance rules.
//!
//! Ratios are the unclamped Boltzmann weights of a proposal; [`metropolis`]
//! turns them into probabilities.

use rand::Rng;

/// Insertion into a box holding `count` particles of the type.
pub fn insertion_ratio(fugacity: f64, volume: f64, count: usize) -> f64 {
    fugacity * volume / (count as f64 + 1.0)
}

/// Deletion from a box holding `count` particles of the type.
pub fn deletion_ratio(fugacity: f64, volume: f64, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    count as f64 / (fugacity * volume)
}

/// One side of a transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Occupancy {
    pub count: usize,
    pub volume: f64,
    pub fugacity: f64,
}

/// Move one particle from `source` to `destination`.
pub fn transfer_ratio(source: &Occupancy, destination: &Occupancy) -> f64 {
    if source.count == 0 {
        return 0.0;
    }
    let activity = if source.fugacity == destination.fugacity {
        1.0
    } else {
        destination.fugacity / source.fugacity
    };
    activity * (source.count as f64 / (destination.count as f64 + 1.0))
        * (destination.volume / source.volume)
}

pub fn metropolis(ratio: f64) -> f64 {
    if ratio.is_nan() {
        0.0
    } else {
        ratio.clamp(0.0, 1.0)
    }
}

/// Outcome of evaluating one proposal before the accept draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Unclamped ensemble weight ratio.
    pub base: f64,
    /// Depletant survival factor, 1 or 0 for a realized set of trials.
    pub correction: f64,
    pub probability: f64,
}

impl Evaluation {
    pub fn new(base: f64, correction: f64) -> Self {
        Self {
            base,
            correction,
            probability: metropolis(base) * correction,
        }
    }

    pub fn rejected() -> Self {
        Self {
            base: 0.0,
            correction: 1.0,
            probability: 0.0,
        }
    }
}

/// Metropolis draw. Always consumes one number from the stream.
pub fn accept<R: Rng + ?Sized>(probability: f64, rng: &mut R) -> bool {
    let u: f64 = rng.gen();
    u < probability
}
