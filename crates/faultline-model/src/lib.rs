//! Modeling surface for faultline: component graphs, faults, labels and the
//! fixed-width state vector codec.

pub mod codec;
pub mod error;
pub mod fault;
pub mod graph;
pub mod label;
pub mod layout;
pub mod model;
pub mod shape;
pub mod step;

pub use codec::{FieldDump, ObjectDump, StateCodec};
pub use error::{CodecError, CodecResult, ConstructionError, ConstructionResult};
pub use fault::{
    Activation, Fault, FaultEffects, FaultHeader, FaultId, FaultSet, Persistence, MAX_FAULTS,
};
pub use graph::{ComponentGraph, GraphObject, Handle, ObjectId, Stateful};
pub use label::{Label, LabelSet, Reward, MAX_LABELS};
pub use layout::{FieldLayout, ObjectTable, StateVectorLayout};
pub use model::{validate_model, Model};
pub use shape::{
    FieldFlags, FieldKind, IntRange, OverflowBehavior, SerializationMode, StateVisitor, Variant,
};
pub use step::{ChoiceSource, StepContext, StepOutcome};
