//! State-space exploration for faultline models: choice resolution,
//! continuation graphs, Markov chain / MDP construction and reachability.

mod arena;
pub mod config;
pub mod continuation;
pub mod convert;
pub mod counterexample;
pub mod error;
pub mod executed;
pub mod explorer;
pub mod labeling;
pub mod matrix;
pub mod reachability;
pub mod resolver;
pub mod store;
pub mod transition;

#[cfg(test)]
mod test_models;

pub use config::{Convergence, ExplorationConfig, ModelCapacity};
pub use continuation::{
    for_each_element, for_each_element_recursive, ContinuationElement, ContinuationKind,
    ContinuationSource, LabeledTransitionMdp, StepGraph, TransitionTarget, STUTTERING_TARGET,
};
pub use counterexample::CounterExample;
pub use error::{ExploreError, ExploreResult, Origin, Resource};
pub use executed::{state_codec, ExecutedModel};
pub use explorer::{ExplorationStats, Explorer, ProgressCounters};
pub use labeling::StateLabeling;
pub use matrix::{MarkovDecisionProcess, MatrixEntry, ProbabilityWarning};
pub use reachability::{reachability, Optimum, Proposition, ReachabilityResult};
pub use resolver::{ChoiceKind, ChoicePath, ChoiceResolver, ResolverError};
pub use store::{Inserted, StateInfo, StateStore};
pub use transition::{
    CandidateTransition, TerminateAtLabel, TransitionModifier, TransitionSet, TransitionsView,
};
