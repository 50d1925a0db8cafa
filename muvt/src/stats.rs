use crate::depletant::DepletantOutcome;
use crate::proposer::MoveKind;
use crate::state::TypeId;

/// Attempted and accepted counts for one kind of move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub attempted: u64,
    pub accepted: u64,
}

impl Tally {
    pub fn acceptance_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.accepted as f64 / self.attempted as f64
        }
    }

    fn record(&mut self, accepted: bool) {
        self.attempted += 1;
        if accepted {
            self.accepted += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindTally {
    pub insertion: Tally,
    pub deletion: Tally,
    pub transfer: Tally,
}

impl KindTally {
    pub fn get(&self, kind: MoveKind) -> &Tally {
        match kind {
            MoveKind::Insertion => &self.insertion,
            MoveKind::Deletion => &self.deletion,
            MoveKind::Transfer => &self.transfer,
        }
    }

    fn get_mut(&mut self, kind: MoveKind) -> &mut Tally {
        match kind {
            MoveKind::Insertion => &mut self.insertion,
            MoveKind::Deletion => &mut self.deletion,
            MoveKind::Transfer => &mut self.transfer,
        }
    }
}

/// Particle counts and move statistics at the end of one sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub sweep: u64,
    pub counts: Vec<usize>,
    pub counters: MoveCounters,
}

/// Move statistics, per kind and per type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoveCounters {
    pub total: KindTally,
    pub per_type: Vec<KindTally>,
    /// Deletions (or transfers) drawn against an empty population.
    pub empty_deletions: u64,
    /// Insertions rejected on a hard overlap.
    pub overlap_rejections: u64,
    pub depletant_trials: u64,
    /// Insertions rejected by depletant trials.
    pub depletant_rejections: u64,
    pub shell_fallbacks: u64,
}

impl MoveCounters {
    pub fn new(n_types: usize) -> Self {
        Self {
            per_type: vec![KindTally::default(); n_types],
            ..Self::default()
        }
    }

    /// Count one decided move. Types flagged `ignore_statistics` pass
    /// `counted = false` and only reach the totals.
    pub fn record(&mut self, kind: MoveKind, type_id: TypeId, counted: bool, accepted: bool) {
        self.total.get_mut(kind).record(accepted);
        if counted {
            if type_id >= self.per_type.len() {
                self.per_type.resize(type_id + 1, KindTally::default());
            }
            self.per_type[type_id].get_mut(kind).record(accepted);
        }
    }

    pub fn record_depletants(&mut self, outcome: &DepletantOutcome) {
        self.depletant_trials += outcome.trials;
        self.shell_fallbacks += outcome.fallbacks;
        if !outcome.survives() {
            self.depletant_rejections += 1;
        }
    }

    pub fn acceptance_rate(&self, kind: MoveKind) -> f64 {
        self.total.get(kind).acceptance_rate()
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.per_type.len());
    }

    pub fn print_summary(&self, type_names: &[&str]) {
        println!("\n=== muVT Statistics ===");
        for kind in MoveKind::ALL {
            let tally = self.total.get(kind);
            if tally.attempted == 0 {
                continue;
            }
            println!(
                "{:<10} moves: {} / {} ({:.2}% accepted)",
                kind.to_string(),
                tally.accepted,
                tally.attempted,
                100.0 * tally.acceptance_rate()
            );
        }
        for (type_id, tally) in self.per_type.iter().enumerate() {
            let name = type_names.get(type_id).copied().unwrap_or("?");
            println!(
                "  {name:<12} ins {:.2}%  del {:.2}%  xfer {:.2}%",
                100.0 * tally.insertion.acceptance_rate(),
                100.0 * tally.deletion.acceptance_rate(),
                100.0 * tally.transfer.acceptance_rate()
            );
        }
        println!("Empty-population deletions: {}", self.empty_deletions);
        println!("Overlap rejections:         {}", self.overlap_rejections);
        if self.depletant_trials > 0 || self.shell_fallbacks > 0 {
            println!("Depletant trials:           {}", self.depletant_trials);
            println!("Depletant rejections:       {}", self.depletant_rejections);
            println!("Depletant shell fallbacks:  {}", self.shell_fallbacks);
        }
    }
}
