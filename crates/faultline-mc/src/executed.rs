//! Per-worker driver that runs model logic once per choice path and
//! collects the resulting candidate transitions.

use crate::config::ExplorationConfig;
use crate::continuation::StepGraph;
use crate::error::{ExploreError, ExploreResult, Origin, Resource};
use crate::resolver::{ChoicePath, ChoiceResolver, ResolverError};
use crate::transition::{CandidateTransition, TransitionModifier, TransitionSet, TransitionsView};
use faultline_model::{
    validate_model, ComponentGraph, FaultHeader, FaultSet, LabelSet, Model, ObjectDump,
    SerializationMode, StateCodec, StepContext,
};
use std::sync::Arc;
use tracing::trace;

/// Build the codec of `model`'s state vectors, after validating the model.
pub fn state_codec(model: &dyn Model) -> ExploreResult<StateCodec> {
    validate_model(model)?;
    let mut graph = model.graph().clone();
    let header = FaultHeader::new(model.faults());
    let codec = StateCodec::new(&mut graph, header.width(), SerializationMode::Optimized)?;
    Ok(codec)
}

fn resolver_error(error: ResolverError, origin: Origin, path: usize) -> ExploreError {
    match error {
        ResolverError::StepGraphFull { capacity } => ExploreError::CapacityExceeded {
            resource: Resource::StepGraphElements,
            capacity,
            origin,
            path,
        },
        other => ExploreError::NondeterminismConsistency {
            origin,
            path,
            detail: other.to_string(),
        },
    }
}

/// Executes a model on a private graph. One instance per worker thread.
pub struct ExecutedModel {
    model: Arc<dyn Model>,
    graph: ComponentGraph,
    codec: Arc<StateCodec>,
    header: FaultHeader,
    resolver: ChoiceResolver,
    transitions: TransitionSet,
    rewards: Vec<f64>,
    source_labels: LabelSet,
    modifiers: Vec<Arc<dyn TransitionModifier>>,
    max_successors: usize,
    forward_optimization: bool,
    record_choices: bool,
}

impl ExecutedModel {
    pub fn new(model: Arc<dyn Model>, codec: Arc<StateCodec>, config: &ExplorationConfig) -> Self {
        let graph = model.graph().clone();
        let transitions = TransitionSet::new(codec.size(), model.rewards().len());
        Self {
            graph,
            header: FaultHeader::new(model.faults()),
            resolver: ChoiceResolver::new(config.capacity.step_graph_elements()),
            transitions,
            rewards: Vec::with_capacity(model.rewards().len()),
            source_labels: LabelSet::EMPTY,
            modifiers: Vec::new(),
            max_successors: config.capacity.max_successors,
            forward_optimization: config.forward_optimization,
            record_choices: config.track_predecessors,
            model,
            codec,
        }
    }

    pub fn with_modifiers(mut self, modifiers: Vec<Arc<dyn TransitionModifier>>) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn codec(&self) -> &StateCodec {
        &self.codec
    }

    pub fn model(&self) -> &dyn Model {
        &*self.model
    }

    /// Transitions from the construction state into the initial states.
    pub fn compute_initial_transitions(&mut self) -> ExploreResult<&TransitionSet> {
        self.enumerate(Origin::Initial, None)?;
        Ok(&self.transitions)
    }

    /// Transitions of the state `index` with vector `state`.
    pub fn compute_successor_transitions(
        &mut self,
        index: usize,
        state: &[u8],
    ) -> ExploreResult<&TransitionSet> {
        self.enumerate(Origin::State(index), Some(state))?;
        Ok(&self.transitions)
    }

    /// Candidate transitions of the last computed state.
    pub fn transitions(&self) -> &TransitionSet {
        &self.transitions
    }

    /// Continuation graph of the last computed state.
    pub fn step_graph(&self) -> &StepGraph {
        self.resolver.step_graph()
    }

    /// Labels of the last source state; empty for the initial transitions.
    pub fn source_labels(&self) -> LabelSet {
        self.source_labels
    }

    fn enumerate(&mut self, origin: Origin, source: Option<&[u8]>) -> ExploreResult<()> {
        self.resolver.prepare_next_state();
        self.transitions.clear();
        self.source_labels = LabelSet::EMPTY;

        let mut path = 0usize;
        loop {
            match self.resolver.prepare_next_path() {
                Ok(true) => {}
                Ok(false) => break,
                Err(error) => return Err(resolver_error(error, origin, path.saturating_sub(1))),
            }
            self.run_path(origin, path, source)?;
            path += 1;
        }
        trace!(%origin, paths = path, "enumerated choice paths");

        let mut view = TransitionsView::new(&mut self.transitions);
        for modifier in &self.modifiers {
            modifier.modify(origin, self.source_labels, &mut view);
        }
        Ok(())
    }

    /// Restore the source state, run one step with the current choices and
    /// record the resulting transition.
    fn run_path(&mut self, origin: Origin, path: usize, source: Option<&[u8]>) -> ExploreResult<()> {
        let codec_error = |source| ExploreError::Codec {
            origin,
            path,
            source,
        };

        let persistent = match source {
            Some(bytes) => {
                let header = self
                    .codec
                    .deserialize(&mut self.graph, bytes)
                    .map_err(codec_error)?;
                if path == 0 {
                    self.source_labels = LabelSet::evaluate(self.model.labels(), &self.graph);
                }
                self.header.unpack(header)
            }
            None => {
                self.graph = self.model.graph().clone();
                FaultSet::EMPTY
            }
        };

        let outcome = {
            let mut ctx = StepContext::new(&mut self.resolver, self.model.faults(), persistent);
            ctx.activate_faults();
            match source {
                Some(_) => self.model.step(&mut self.graph, &mut ctx),
                None => self.model.initialize(&mut self.graph, &mut ctx),
            }
            ctx.finish()
        };

        if self.forward_optimization {
            // Later choices must be collapsed first, so walk backwards.
            let faults = self.model.faults();
            for &(fault, index) in outcome.fault_choices.iter().rev() {
                let transient = !faults[fault.index()].is_permanent();
                if transient && !outcome.used.contains(fault) && self.resolver.can_forward(index) {
                    self.resolver.forward_untaken_choices_at_index(index);
                }
            }
        }

        if let Some(error) = self.resolver.error() {
            return Err(resolver_error(error.clone(), origin, path));
        }

        if self.transitions.len() >= self.max_successors {
            return Err(ExploreError::CapacityExceeded {
                resource: Resource::Successors,
                capacity: self.max_successors,
                origin,
                path,
            });
        }

        let target = self.transitions.push_target();
        if let Err(error) = self
            .codec
            .serialize(&mut self.graph, self.header.pack(outcome.persistent), target)
        {
            self.transitions.pop_target();
            return Err(codec_error(error));
        }

        let labels = LabelSet::evaluate(self.model.labels(), &self.graph);
        self.rewards.clear();
        self.rewards
            .extend(self.model.rewards().iter().map(|r| r.evaluate(&self.graph)));
        let choices = if self.record_choices {
            self.resolver.choices()
        } else {
            ChoicePath::new()
        };
        let index = self.transitions.push(
            CandidateTransition {
                faults: outcome.active,
                labels,
                probability: self.resolver.path_probability(),
                valid: true,
                choices,
            },
            &self.rewards,
        );
        self.resolver.set_target_of_leaf(index);
        Ok(())
    }

    /// Rerun a single path with fixed choices from `source` (or from the
    /// construction state) and return the reached state vector.
    ///
    /// The private graph is not reset in between, so hidden fields carry over
    /// from one replayed step to the next.
    pub fn replay(
        &mut self,
        step: usize,
        source: Option<&[u8]>,
        choices: &[u32],
    ) -> ExploreResult<Box<[u8]>> {
        let origin = match source {
            Some(_) => Origin::State(step),
            None => Origin::Initial,
        };
        let mismatch = |error: ExploreError| ExploreError::ReplayMismatch {
            step,
            detail: error.to_string(),
        };

        self.resolver.set_choices(choices);
        self.transitions.clear();
        if let Err(error) = self.resolver.prepare_next_path() {
            return Err(mismatch(resolver_error(error, origin, 0)));
        }
        self.run_path(origin, 0, source).map_err(mismatch)?;
        if let Err(error) = self.resolver.prepare_next_path() {
            return Err(mismatch(resolver_error(error, origin, 0)));
        }
        Ok(self.transitions.target(0).into())
    }

    /// Human-readable values of the private graph, as left by the last path.
    pub fn dump(&mut self) -> ExploreResult<Vec<ObjectDump>> {
        self.codec
            .dump(&mut self.graph)
            .map_err(|source| ExploreError::Codec {
                origin: Origin::Matrix,
                path: 0,
                source,
            })
    }
}
