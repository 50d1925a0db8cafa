//! Parallel fugacity scans.

use rayon::prelude::*;
use shapes::Shape;
use tracing::info;

use crate::depletant::ShellBuilder;
use crate::error::MuvtError;
use crate::proposer::MoveKind;
use crate::state::TypeId;
use crate::updater::UpdaterMuVT;

/// Averages from one independent run of a scan.
#[derive(Debug, Clone)]
pub struct ScanPoint {
    pub fugacity: f64,
    pub mean_count: f64,
    pub density: f64,
    pub insertion_acceptance: f64,
    pub deletion_acceptance: f64,
    pub count_samples: Vec<f64>,
}

impl ScanPoint {
    /// Sample standard deviation of the particle count
    pub fn count_std(&self) -> f64 {
        if self.count_samples.len() < 2 {
            return 0.0;
        }
        let variance: f64 = self
            .count_samples
            .iter()
            .map(|&n| (n - self.mean_count).powi(2))
            .sum::<f64>()
            / (self.count_samples.len() - 1) as f64;
        variance.sqrt()
    }

    pub fn print_summary(&self) {
        println!("\n=== muVT scan point ===");
        println!("Fugacity:           {:.6}", self.fugacity);
        println!(
            "Avg N particles:    {:.3} ± {:.3}",
            self.mean_count,
            self.count_std()
        );
        println!("Avg density:        {:.6}", self.density);
        println!("Acceptance rates:");
        println!("  Insertion:    {:.2}%", 100.0 * self.insertion_acceptance);
        println!("  Deletion:     {:.2}%", 100.0 * self.deletion_acceptance);
    }
}

/// Run one independent copy of `base` per fugacity of `type_id`, in
/// parallel. Each copy gets its own seed derived from the base seed and
/// its position in the scan.
pub fn fugacity_scan<S, B>(
    base: &UpdaterMuVT<S, B>,
    type_id: TypeId,
    fugacities: &[f64],
    equilibration: u64,
    production: u64,
) -> Result<Vec<ScanPoint>, MuvtError>
where
    S: Shape,
    B: ShellBuilder + Clone,
{
    if production == 0 {
        return Err(MuvtError::InvalidConfig(
            "A scan needs at least one production sweep".to_string(),
        ));
    }
    base.state().species_of(type_id)?;
    info!(points = fugacities.len(), equilibration, production, "Starting fugacity scan");

    fugacities
        .par_iter()
        .enumerate()
        .map(|(index, &fugacity)| {
            let mut updater = base.clone();
            updater.reseed(base.seed().wrapping_add(index as u64 + 1));
            updater.set_fugacity(type_id, fugacity)?;

            for _ in 0..equilibration {
                updater.sweep()?;
            }
            updater.reset_counters();

            let count_samples = (0..production)
                .map(|_| updater.sweep().map(|r| r.counts[type_id] as f64))
                .collect::<Result<Vec<_>, _>>()?;
            let mean_count = count_samples.iter().sum::<f64>() / count_samples.len() as f64;
            let counters = updater.counters();

            Ok(ScanPoint {
                fugacity,
                mean_count,
                density: mean_count / updater.state().volume(),
                insertion_acceptance: counters.acceptance_rate(MoveKind::Insertion),
                deletion_acceptance: counters.acceptance_rate(MoveKind::Deletion),
                count_samples,
            })
        })
        .collect()
}
