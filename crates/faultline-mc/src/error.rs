//! Exploration errors.

use faultline_model::{CodecError, ConstructionError};
use std::fmt;
use thiserror::Error;

/// Where in the exploration an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The initial transitions from the construction state.
    Initial,
    /// Successors of the state with this index.
    State(usize),
    /// Building the matrix after exploration.
    Matrix,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Initial => write!(f, "initial transitions"),
            Origin::State(index) => write!(f, "state {index}"),
            Origin::Matrix => write!(f, "matrix construction"),
        }
    }
}

/// A preallocated resource of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    States,
    /// Candidate transitions of a single source state.
    Successors,
    /// Continuation nodes of a single source state.
    StepGraphElements,
    TransitionTargets,
    ContinuationElements,
    Distributions,
    MatrixEntries,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::States => "state",
            Resource::Successors => "successor",
            Resource::StepGraphElements => "step graph",
            Resource::TransitionTargets => "transition target",
            Resource::ContinuationElements => "continuation graph",
            Resource::Distributions => "distribution",
            Resource::MatrixEntries => "matrix entry",
        };
        f.write_str(name)
    }
}

/// Exploration error. Every variant aborts the run.
#[derive(Debug, Error)]
pub enum ExploreError {
    #[error("invalid model: {0}")]
    Construction(#[from] ConstructionError),

    #[error("state codec failed in {origin}, path {path}: {source}")]
    Codec {
        origin: Origin,
        path: usize,
        #[source]
        source: CodecError,
    },

    #[error(
        "{resource} capacity of {capacity} exceeded in {origin}, path {path}; \
         rerun with a larger capacity"
    )]
    CapacityExceeded {
        resource: Resource,
        capacity: usize,
        origin: Origin,
        path: usize,
    },

    #[error("model logic is not deterministic in {origin}, path {path}: {detail}")]
    NondeterminismConsistency {
        origin: Origin,
        path: usize,
        detail: String,
    },

    #[error("counterexample replay diverged at step {step}: {detail}")]
    ReplayMismatch { step: usize, detail: String },

    #[error("unknown label '{0}'")]
    UnknownLabel(String),

    #[error("the state space has not been explored yet")]
    NotExplored,

    #[error("state {0} has not been discovered")]
    UnknownState(usize),

    #[error("state {0} was discovered but its successors were never computed")]
    Unexpanded(usize),

    #[error("the continuation graph of {0} was stored twice")]
    DuplicateRoot(Origin),

    #[error("counterexamples need predecessor tracking")]
    PredecessorsNotTracked,

    #[error("failed to read counterexample: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed counterexample: {0}")]
    MalformedCounterExample(String),

    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}

impl ExploreError {
    pub(crate) fn capacity(resource: Resource, capacity: usize, origin: Origin) -> Self {
        ExploreError::CapacityExceeded {
            resource,
            capacity,
            origin,
            path: 0,
        }
    }

    /// Whether a rerun with larger capacities could succeed.
    pub fn is_capacity(&self) -> bool {
        matches!(self, ExploreError::CapacityExceeded { .. })
    }
}

pub type ExploreResult<T> = Result<T, ExploreError>;
