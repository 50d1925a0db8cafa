//! Grand-canonical particle insertion and removal for hard shapes.
//!
//! [`UpdaterMuVT`] runs insertion/deletion moves in one periodic box, with
//! optional implicit depletants folded into the acceptance. [`GibbsDriver`]
//! couples two boxes through the [`Partner`] message protocol and adds
//! particle transfers between them.

pub mod acceptance;
mod cell_list;
pub mod config;
pub mod depletant;
pub mod error;
pub mod gibbs;
pub mod overlap;
pub mod proposer;
mod rng;
pub mod scan;
pub mod simbox;
pub mod species;
pub mod state;
pub mod stats;
pub mod updater;

pub use config::RunConfig;
pub use depletant::{BoundingShell, DepletantSpecies, FreeVolumeEstimator};
pub use error::MuvtError;
pub use gibbs::{ChannelPartner, GibbsDriver, GibbsReport, Partner};
pub use proposer::{MoveKind, MoveWeights, TypeSelection};
pub use rng::{ProposalKey, RngStream};
pub use scan::{fugacity_scan, ScanPoint};
pub use simbox::SimBox;
pub use species::{Species, Thermal};
pub use state::{BoxState, Particle, ParticleId, TypeId};
pub use stats::{MoveCounters, SweepReport};
pub use updater::UpdaterMuVT;
