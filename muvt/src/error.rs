use shapes::{Dimensions, ShapeError};
use thiserror::Error;

use crate::state::TypeId;

#[derive(Debug, Error)]
pub enum MuvtError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Shape for species '{species}' is malformed: {reason}")]
    MalformedShape { species: String, reason: String },

    #[error("Shape construction failed: {source}")]
    Shape {
        #[from]
        source: ShapeError,
    },

    #[error("Species '{species}' is {shape:?} but the box is {simbox:?}")]
    DimensionMismatch {
        species: String,
        shape: Dimensions,
        simbox: Dimensions,
    },

    #[error("Non-finite {quantity} reached the overlap evaluator")]
    NonFinite { quantity: &'static str },

    #[error("Unknown particle type {type_id}")]
    UnknownType { type_id: TypeId },

    #[error("Particle is not present in the box")]
    UnknownParticle,

    #[error("Particle {index} overlaps an existing particle")]
    InitialOverlap { index: usize },

    #[error("Partner box unreachable: {0}")]
    PartnerUnreachable(String),

    #[error("Partner box state is inconsistent: {0}")]
    PartnerDesync(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yml::Error),
}
