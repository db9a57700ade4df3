//! Construction and codec error types.

use crate::graph::ObjectId;
use thiserror::Error;

/// The model's shape cannot be reduced to a fixed-width state vector.
///
/// Raised while the object table and layout are computed, before any
/// exploration starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructionError {
    #[error("field '{field}' of {object} declares an empty integer range {min}..={max}")]
    EmptyRange {
        object: &'static str,
        field: &'static str,
        min: i64,
        max: i64,
    },

    #[error("field '{field}' of {object} needs {bits} bits; at most 63 are supported")]
    UnboundedField {
        object: &'static str,
        field: &'static str,
        bits: u32,
    },

    #[error("field '{field}' of {object} declares a variant with zero alternatives")]
    EmptyVariant {
        object: &'static str,
        field: &'static str,
    },

    #[error("field '{field}' of {object} references {target:?}, which is not part of the graph")]
    DanglingReference {
        object: &'static str,
        field: &'static str,
        target: ObjectId,
    },

    #[error("field '{field}' of {object} references hidden object {target:?}; mark the field unserializable")]
    HiddenReference {
        object: &'static str,
        field: &'static str,
        target: ObjectId,
    },

    #[error("model has no root objects")]
    NoRoots,

    #[error("model declares {count} faults; at most {max} are supported")]
    TooManyFaults { count: usize, max: usize },

    #[error("model declares {count} labels; at most {max} are supported")]
    TooManyLabels { count: usize, max: usize },

    #[error("fault '{name}' has probability {probability}, expected a value in [0, 1]")]
    InvalidFaultProbability { name: String, probability: f64 },
}

/// A live graph could not be written to or read from a state vector.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("value {value} of field '{field}' in {object} is outside {min}..={max}")]
    RangeViolation {
        object: &'static str,
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{object} visited field '{found}' where the layout expects '{expected}'")]
    LayoutMismatch {
        object: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("field '{field}' of {object} references {target:?}, which has no object table slot")]
    UnknownReference {
        object: &'static str,
        field: &'static str,
        target: ObjectId,
    },

    #[error("object table slot {slot} has no object in this graph")]
    MissingObject { slot: usize },

    #[error("state vector has {found} bytes, layout requires {expected}")]
    SizeMismatch { expected: usize, found: usize },

    #[error("state vector decodes field '{field}' of {object} to invalid raw value {raw}")]
    CorruptState {
        object: &'static str,
        field: &'static str,
        raw: u64,
    },
}

pub type ConstructionResult<T> = Result<T, ConstructionError>;
pub type CodecResult<T> = Result<T, CodecError>;
