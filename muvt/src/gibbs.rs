//! Two-box coupling by request/response messages.
//!
//! Each box is owned by exactly one party: an [`UpdaterMuVT`] answers
//! requests for its own box, possibly from its own thread behind a
//! [`ChannelPartner`]. The [`GibbsDriver`] is the only client of both boxes
//! and performs every transfer as draw, test, decide, commit. No other
//! request reaches a box between the two commits of a transfer.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};

use nalgebra::UnitQuaternion;
use rand::Rng;
use shapes::Shape;
use tracing::{debug, info, warn};

use crate::acceptance::{accept, transfer_ratio, Evaluation, Occupancy};
use crate::depletant::ShellBuilder;
use crate::error::MuvtError;
use crate::overlap::find_overlap;
use crate::proposer::{MoveKind, MoveWeights, TypeSelection};
use crate::rng::{ProposalKey, RngStream, LANE_ACCEPT};
use crate::state::{Particle, ParticleId, TypeId};
use crate::stats::{MoveCounters, SweepReport};
use crate::updater::{InsertionTrial, TypeSummary, UpdaterMuVT};

#[derive(Debug, Clone)]
pub enum Commit {
    Insert(Particle),
    Remove(ParticleId),
}

#[derive(Debug, Clone)]
pub enum BoxRequest {
    Describe,
    Status { type_id: TypeId },
    DrawRemoval { type_id: TypeId, key: ProposalKey },
    TryInsertion {
        type_id: TypeId,
        orientation: Option<UnitQuaternion<f64>>,
        key: ProposalKey,
    },
    Commit(Commit),
    GrandCanonical {
        kind: MoveKind,
        type_id: TypeId,
        bias: f64,
        key: ProposalKey,
    },
    FinishSweep,
    Counters,
    Verify,
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum BoxResponse {
    Types(Vec<TypeSummary>),
    Status(Occupancy),
    Removal(Option<(ParticleId, Particle)>),
    Insertion(InsertionTrial),
    Inserted(ParticleId),
    Removed(Particle),
    Decided(bool),
    Swept(SweepReport),
    Counters(MoveCounters),
    Verified(Option<(ParticleId, ParticleId)>),
    Closed,
}

/// One side of a coupled pair of boxes.
pub trait Partner {
    fn request(&mut self, request: BoxRequest) -> Result<BoxResponse, MuvtError>;
}

impl<S: Shape, B: ShellBuilder> Partner for UpdaterMuVT<S, B> {
    fn request(&mut self, request: BoxRequest) -> Result<BoxResponse, MuvtError> {
        let response = match request {
            BoxRequest::Describe => BoxResponse::Types(self.type_summaries()),
            BoxRequest::Status { type_id } => BoxResponse::Status(self.occupancy(type_id)?),
            BoxRequest::DrawRemoval { type_id, key } => {
                BoxResponse::Removal(self.draw_removal(type_id, key)?)
            }
            BoxRequest::TryInsertion {
                type_id,
                orientation,
                key,
            } => BoxResponse::Insertion(self.try_insertion(type_id, orientation, key)?),
            BoxRequest::Commit(Commit::Insert(particle)) => {
                BoxResponse::Inserted(self.commit_insertion(particle)?)
            }
            BoxRequest::Commit(Commit::Remove(id)) => BoxResponse::Removed(self.commit_removal(id)?),
            BoxRequest::GrandCanonical {
                kind,
                type_id,
                bias,
                key,
            } => BoxResponse::Decided(self.attempt_kind(kind, type_id, bias, key)?),
            BoxRequest::FinishSweep => BoxResponse::Swept(self.finish_sweep()),
            BoxRequest::Counters => BoxResponse::Counters(self.counters().clone()),
            BoxRequest::Verify => BoxResponse::Verified(find_overlap(self.state())),
            BoxRequest::Shutdown => BoxResponse::Closed,
        };
        Ok(response)
    }
}

impl<P: Partner + ?Sized> Partner for Box<P> {
    fn request(&mut self, request: BoxRequest) -> Result<BoxResponse, MuvtError> {
        (**self).request(request)
    }
}

type Reply = Result<BoxResponse, MuvtError>;

/// A partner box served from another thread.
pub struct ChannelPartner {
    requests: Sender<BoxRequest>,
    replies: Receiver<Reply>,
    worker: Option<JoinHandle<()>>,
}

impl ChannelPartner {
    /// Move `partner` onto a dedicated thread and talk to it over channels.
    pub fn spawn<P>(partner: P) -> Result<Self, MuvtError>
    where
        P: Partner + Send + 'static,
    {
        let (request_tx, request_rx) = channel();
        let (reply_tx, reply_rx) = channel();
        let worker = thread::Builder::new()
            .name("muvt-partner".to_string())
            .spawn(move || serve(partner, request_rx, reply_tx))
            .map_err(|e| MuvtError::PartnerUnreachable(format!("could not start thread: {e}")))?;
        Ok(Self {
            requests: request_tx,
            replies: reply_rx,
            worker: Some(worker),
        })
    }

    /// Wrap channels to a partner served by someone else.
    pub fn connect(requests: Sender<BoxRequest>, replies: Receiver<Reply>) -> Self {
        Self {
            requests,
            replies,
            worker: None,
        }
    }
}

/// Answer requests until `Shutdown` arrives or either channel closes.
pub fn serve<P: Partner>(mut partner: P, requests: Receiver<BoxRequest>, replies: Sender<Reply>) {
    for request in requests {
        let shutdown = matches!(request, BoxRequest::Shutdown);
        if replies.send(partner.request(request)).is_err() || shutdown {
            break;
        }
    }
}

impl Partner for ChannelPartner {
    fn request(&mut self, request: BoxRequest) -> Result<BoxResponse, MuvtError> {
        self.requests
            .send(request)
            .map_err(|_| MuvtError::PartnerUnreachable("request channel closed".to_string()))?;
        self.replies
            .recv()
            .map_err(|_| MuvtError::PartnerUnreachable("reply channel closed".to_string()))?
    }
}

impl Drop for ChannelPartner {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if self.requests.send(BoxRequest::Shutdown).is_ok() {
                let _ = self.replies.recv();
            }
            if worker.join().is_err() {
                warn!("Partner thread panicked");
            }
        }
    }
}

macro_rules! expect_reply {
    ($reply:expr, $variant:ident) => {
        match $reply {
            BoxResponse::$variant(value) => value,
            other => {
                return Err(MuvtError::PartnerDesync(format!(
                    "expected {} reply, got {:?}",
                    stringify!($variant),
                    other
                )))
            }
        }
    };
}

/// End-of-sweep report for a coupled pair.
#[derive(Debug, Clone, PartialEq)]
pub struct GibbsReport {
    pub sweep: u64,
    pub boxes: [SweepReport; 2],
    /// Transfer statistics, kept by the driver.
    pub transfers: MoveCounters,
}

/// Drives grand-canonical and transfer moves over two boxes.
pub struct GibbsDriver {
    boxes: [Box<dyn Partner + Send>; 2],
    types: Vec<TypeSummary>,
    movable: Vec<TypeId>,
    weights: MoveWeights,
    type_selection: TypeSelection,
    attempts_per_sweep: u64,
    stream: RngStream,
    sweep: u64,
    transfers: MoveCounters,
    sweep_transfers: MoveCounters,
}

impl GibbsDriver {
    /// Couple two boxes. Both must carry the same species table.
    pub fn new(
        mut first: Box<dyn Partner + Send>,
        mut second: Box<dyn Partner + Send>,
        seed: u64,
    ) -> Result<Self, MuvtError> {
        let types = expect_reply!(first.request(BoxRequest::Describe)?, Types);
        let other = expect_reply!(second.request(BoxRequest::Describe)?, Types);
        if types.len() != other.len() || types.iter().zip(&other).any(|(a, b)| a.name != b.name) {
            return Err(MuvtError::PartnerDesync(
                "the two boxes disagree on the species table".to_string(),
            ));
        }
        let movable = types
            .iter()
            .zip(&other)
            .enumerate()
            .filter(|(_, (a, b))| a.movable && b.movable)
            .map(|(type_id, _)| type_id)
            .collect();
        let n_types = types.len();

        Ok(Self {
            boxes: [first, second],
            types,
            movable,
            weights: MoveWeights::transfer_only(),
            type_selection: TypeSelection::default(),
            attempts_per_sweep: 1,
            stream: RngStream::new(seed),
            sweep: 0,
            transfers: MoveCounters::new(n_types),
            sweep_transfers: MoveCounters::new(n_types),
        })
    }

    pub fn with_weights(mut self, weights: MoveWeights) -> Result<Self, MuvtError> {
        weights.validate(true)?;
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

    pub fn types(&self) -> &[TypeSummary] {
        &self.types
    }

    pub fn transfer_counters(&self) -> &MoveCounters {
        &self.transfers
    }

    fn record(&mut self, type_id: TypeId, accepted: bool) {
        let counted = self.types.get(type_id).map_or(false, |t| t.counted);
        self.transfers
            .record(MoveKind::Transfer, type_id, counted, accepted);
        self.sweep_transfers
            .record(MoveKind::Transfer, type_id, counted, accepted);
    }

    fn record_with(&mut self, update: impl Fn(&mut MoveCounters)) {
        update(&mut self.transfers);
        update(&mut self.sweep_transfers);
    }

    /// Move one particle of `type_id` out of box `source` into the other.
    pub fn transfer(&mut self, type_id: TypeId, source: usize, key: ProposalKey) -> Result<bool, MuvtError> {
        if source > 1 {
            return Err(MuvtError::InvalidConfig(format!("No box with index {source}")));
        }
        let destination = 1 - source;
        let mut accept_rng = key.child(LANE_ACCEPT, 0).rng();

        let from = expect_reply!(self.boxes[source].request(BoxRequest::Status { type_id })?, Status);
        let to = expect_reply!(
            self.boxes[destination].request(BoxRequest::Status { type_id })?,
            Status
        );
        let removal = expect_reply!(
            self.boxes[source].request(BoxRequest::DrawRemoval { type_id, key })?,
            Removal
        );
        let Some((id, removed)) = removal else {
            if from.count != 0 {
                return Err(MuvtError::PartnerDesync(format!(
                    "box {source} reported {} particles but drew none",
                    from.count
                )));
            }
            accept(0.0, &mut accept_rng);
            self.record_with(|c| c.empty_deletions += 1);
            self.record(type_id, false);
            return Ok(false);
        };

        // the particle keeps its orientation across boxes
        let trial = expect_reply!(
            self.boxes[destination].request(BoxRequest::TryInsertion {
                type_id,
                orientation: Some(removed.orientation),
                key,
            })?,
            Insertion
        );
        if trial.particle.type_id != type_id {
            return Err(MuvtError::PartnerDesync(format!(
                "asked box {destination} for type {type_id}, got type {}",
                trial.particle.type_id
            )));
        }
        let evaluation = if trial.overlap {
            self.record_with(|c| c.overlap_rejections += 1);
            Evaluation::rejected()
        } else {
            self.record_with(|c| c.record_depletants(&trial.depletants));
            Evaluation::new(transfer_ratio(&from, &to), trial.depletants.correction())
        };

        let accepted = accept(evaluation.probability, &mut accept_rng);
        if accepted {
            self.commit_transfer(source, id, trial.particle)?;
        }
        self.record(type_id, accepted);
        Ok(accepted)
    }

    /// Insert into the destination first; if the source removal then fails
    /// the insertion is undone before the error is returned.
    fn commit_transfer(&mut self, source: usize, id: ParticleId, particle: Particle) -> Result<(), MuvtError> {
        let destination = 1 - source;
        let inserted = expect_reply!(
            self.boxes[destination].request(BoxRequest::Commit(Commit::Insert(particle)))?,
            Inserted
        );
        let removed = self.boxes[source].request(BoxRequest::Commit(Commit::Remove(id)));
        match removed {
            Ok(BoxResponse::Removed(_)) => Ok(()),
            failure => {
                let undo = self.boxes[destination].request(BoxRequest::Commit(Commit::Remove(inserted)));
                if undo.is_err() {
                    warn!(destination, "Could not undo half-committed transfer");
                }
                match failure {
                    Err(e) => Err(e),
                    Ok(other) => Err(MuvtError::PartnerDesync(format!(
                        "expected Removed reply, got {other:?}"
                    ))),
                }
            }
        }
    }

    pub fn attempt(&mut self, key: ProposalKey) -> Result<bool, MuvtError> {
        let mut rng = key.rng();
        let kind = self.weights.select(&mut rng);
        let target = rng.gen_range(0..2usize);
        let types = &self.types;
        let Some(type_id) =
            self.type_selection
                .select(&self.movable, |t| types[t].fugacity, &mut rng)
        else {
            return Ok(false);
        };

        match kind {
            MoveKind::Transfer => self.transfer(type_id, target, key),
            kind => {
                let request = BoxRequest::GrandCanonical {
                    kind,
                    type_id,
                    bias: self.weights.insertion_bias(),
                    key,
                };
                Ok(expect_reply!(self.boxes[target].request(request)?, Decided))
            }
        }
    }

    pub fn sweep(&mut self) -> Result<GibbsReport, MuvtError> {
        for index in 0..self.attempts_per_sweep {
            let key = self.stream.proposal(self.sweep, index);
            self.attempt(key)?;
        }
        let first = expect_reply!(self.boxes[0].request(BoxRequest::FinishSweep)?, Swept);
        let second = expect_reply!(self.boxes[1].request(BoxRequest::FinishSweep)?, Swept);
        let transfers = std::mem::replace(&mut self.sweep_transfers, MoveCounters::new(self.types.len()));
        let report = GibbsReport {
            sweep: self.sweep,
            boxes: [first, second],
            transfers,
        };
        debug!(
            sweep = report.sweep,
            first = ?report.boxes[0].counts,
            second = ?report.boxes[1].counts,
            "Gibbs sweep complete"
        );
        self.sweep += 1;
        Ok(report)
    }

    pub fn run(&mut self, sweeps: u64) -> Result<Vec<GibbsReport>, MuvtError> {
        info!(sweeps, attempts = self.attempts_per_sweep, "Starting two-box run");
        let reports = (0..sweeps)
            .map(|_| self.sweep())
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            transfer = self.transfers.acceptance_rate(MoveKind::Transfer),
            "Two-box run finished"
        );
        Ok(reports)
    }

    /// Cumulative grand-canonical counters of each box.
    pub fn box_counters(&mut self) -> Result<[MoveCounters; 2], MuvtError> {
        let first = expect_reply!(self.boxes[0].request(BoxRequest::Counters)?, Counters);
        let second = expect_reply!(self.boxes[1].request(BoxRequest::Counters)?, Counters);
        Ok([first, second])
    }

    /// Exhaustive overlap check of both boxes.
    pub fn verify(&mut self) -> Result<[Option<(ParticleId, ParticleId)>; 2], MuvtError> {
        let first = expect_reply!(self.boxes[0].request(BoxRequest::Verify)?, Verified);
        let second = expect_reply!(self.boxes[1].request(BoxRequest::Verify)?, Verified);
        Ok([first, second])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depletant::FreeVolumeEstimator;
    use crate::simbox::SimBox;
    use crate::species::Species;
    use crate::state::BoxState;
    use nalgebra::Vector3;
    use shapes::Sphere;

    fn updater(seed: u64, particles: usize) -> UpdaterMuVT<Sphere> {
        let state = BoxState::new(
            SimBox::cubic(10.0).unwrap(),
            vec![Species::new("A", Sphere::new(0.1).unwrap(), 1.0)],
        )
        .unwrap();
        let mut updater = UpdaterMuVT::new(state, FreeVolumeEstimator::new(Vec::new()), seed);
        let initial = (0..particles)
            .map(|i| {
                Particle::new(
                    0,
                    Vector3::new(1.0 + i as f64, 1.0, 1.0),
                    UnitQuaternion::identity(),
                )
            })
            .collect();
        updater.insert_initial(initial).unwrap();
        updater
    }

    /// Replies to everything with the wrong variant.
    struct Liar;

    impl Partner for Liar {
        fn request(&mut self, request: BoxRequest) -> Result<BoxResponse, MuvtError> {
            match request {
                BoxRequest::Describe => Ok(BoxResponse::Types(vec![TypeSummary {
                    name: "A".to_string(),
                    fugacity: 1.0,
                    movable: true,
                    counted: true,
                }])),
                _ => Ok(BoxResponse::Closed),
            }
        }
    }

    #[test]
    fn test_transfer_conserves_particles() {
        let mut driver = GibbsDriver::new(Box::new(updater(1, 6)), Box::new(updater(2, 0)), 3)
            .unwrap()
            .with_attempts_per_sweep(10)
            .unwrap();
        for report in driver.run(20).unwrap() {
            let total = report.boxes[0].counts[0] + report.boxes[1].counts[0];
            assert_eq!(total, 6);
        }
        assert!(driver.transfer_counters().total.transfer.accepted > 0);
        assert_eq!(driver.verify().unwrap(), [None, None]);
    }

    #[test]
    fn test_empty_source_is_rejected() {
        let mut driver = GibbsDriver::new(Box::new(updater(1, 0)), Box::new(updater(2, 0)), 3).unwrap();
        let key = RngStream::new(0).proposal(0, 0);
        assert!(!driver.transfer(0, 0, key).unwrap());
        assert_eq!(driver.transfer_counters().empty_deletions, 1);
        assert!(driver.transfer(0, 2, key).is_err());
    }

    #[test]
    fn test_channel_partner_round_trip() {
        let remote = ChannelPartner::spawn(updater(5, 3)).unwrap();
        let mut driver = GibbsDriver::new(Box::new(updater(4, 3)), Box::new(remote), 11)
            .unwrap()
            .with_attempts_per_sweep(20)
            .unwrap();
        let reports = driver.run(5).unwrap();
        let last = reports.last().unwrap();
        assert_eq!(last.boxes[0].counts[0] + last.boxes[1].counts[0], 6);
    }

    #[test]
    fn test_wrong_reply_is_desync() {
        let mut driver = GibbsDriver::new(Box::new(updater(1, 2)), Box::new(Liar), 3).unwrap();
        let result = driver.transfer(0, 0, RngStream::new(0).proposal(0, 0));
        assert!(matches!(result, Err(MuvtError::PartnerDesync(_))));
    }

    #[test]
    fn test_mismatched_species_is_desync() {
        let state = BoxState::new(
            SimBox::cubic(10.0).unwrap(),
            vec![Species::new("B", Sphere::new(0.1).unwrap(), 1.0)],
        )
        .unwrap();
        let other = UpdaterMuVT::new(state, FreeVolumeEstimator::new(Vec::new()), 0);
        assert!(matches!(
            GibbsDriver::new(Box::new(updater(1, 0)), Box::new(other), 0),
            Err(MuvtError::PartnerDesync(_))
        ));
    }

    #[test]
    fn test_closed_channel_is_unreachable() {
        let (request_tx, request_rx) = channel::<BoxRequest>();
        let (reply_tx, reply_rx) = channel::<Reply>();
        drop(request_rx);
        drop(reply_tx);
        let mut partner = ChannelPartner::connect(request_tx, reply_rx);
        assert!(matches!(
            partner.request(BoxRequest::Describe),
            Err(MuvtError::PartnerUnreachable(_))
        ));
    }
}
