//! Breadth-first state space explorer.

use crate::config::ExplorationConfig;
use crate::continuation::{LabeledTransitionMdp, TransitionTarget, STUTTERING_TARGET};
use crate::convert::build_matrix;
use crate::counterexample::CounterExample;
use crate::error::{ExploreError, ExploreResult, Origin, Resource};
use crate::executed::{state_codec, ExecutedModel};
use crate::labeling::StateLabeling;
use crate::matrix::MarkovDecisionProcess;
use crate::reachability::{reachability, Optimum, Proposition, ReachabilityResult};
use crate::store::{StateInfo, StateStore};
use crate::transition::{TransitionModifier, TransitionSet};
use faultline_model::{LabelSet, Model, StateCodec};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Lock-free progress counters shared between the explorer and the CLI.
pub struct ProgressCounters {
    pub states: AtomicUsize,
    pub transitions: AtomicUsize,
    /// States whose successors have been computed.
    pub explored: AtomicUsize,
    pub queue_len: AtomicUsize,
    pub depth: AtomicUsize,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self {
            states: AtomicUsize::new(0),
            transitions: AtomicUsize::new(0),
            explored: AtomicUsize::new(0),
            queue_len: AtomicUsize::new(0),
            depth: AtomicUsize::new(0),
        }
    }
}

/// Summary of a finished exploration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplorationStats {
    pub states: usize,
    pub transition_targets: usize,
    pub continuation_elements: usize,
    /// Depth of the deepest state; initial states have depth 0.
    pub max_depth: usize,
    pub distributions: usize,
    pub matrix_entries: usize,
    /// Whether the stuttering state was added to the matrix.
    pub stuttering: bool,
    pub elapsed: Duration,
}

/// Explores the state space of a model and builds its matrix.
pub struct Explorer {
    model: Arc<dyn Model>,
    config: ExplorationConfig,
    codec: Arc<StateCodec>,
    store: StateStore,
    labeling: StateLabeling,
    ltmdp: LabeledTransitionMdp,
    modifiers: Vec<Arc<dyn TransitionModifier>>,
    /// Private pool; `None` runs on rayon's global pool.
    pool: Option<rayon::ThreadPool>,
    facade: Option<ExecutedModel>,
    matrix: Option<MarkovDecisionProcess>,
    stats: Option<ExplorationStats>,
    /// The last run failed and left partial data behind.
    aborted: bool,
}

impl Explorer {
    pub fn new(model: Arc<dyn Model>, config: ExplorationConfig) -> ExploreResult<Self> {
        let codec = Arc::new(state_codec(&*model)?);
        let pool = if config.parallel && config.num_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.num_threads)
                .build()
                .map_err(|e| ExploreError::ThreadPool(e.to_string()))?;
            Some(pool)
        } else {
            None
        };
        debug!(
            ?config,
            vector_bytes = codec.size(),
            faults = model.faults().len(),
            labels = model.labels().len(),
            "explorer configured"
        );

        let capacity = config.capacity;
        Ok(Self {
            store: StateStore::new(capacity.max_states, config.track_predecessors),
            labeling: StateLabeling::new(capacity.max_states),
            ltmdp: LabeledTransitionMdp::new(&capacity),
            modifiers: Vec::new(),
            pool,
            facade: None,
            matrix: None,
            stats: None,
            aborted: false,
            model,
            config,
            codec,
        })
    }

    /// Add a transition modifier. Must be called before exploring.
    pub fn with_modifier<M>(mut self, modifier: M) -> Self
    where
        M: TransitionModifier + 'static,
    {
        self.modifiers.push(Arc::new(modifier));
        self.facade = None;
        self
    }

    fn new_worker(&self) -> ExecutedModel {
        ExecutedModel::new(self.model.clone(), self.codec.clone(), &self.config)
            .with_modifiers(self.modifiers.clone())
    }

    fn facade(&mut self) -> &mut ExecutedModel {
        if self.facade.is_none() {
            self.facade = Some(self.new_worker());
        }
        self.facade.as_mut().expect("facade worker was just created")
    }

    pub fn model(&self) -> &dyn Model {
        &*self.model
    }

    pub fn codec(&self) -> &StateCodec {
        &self.codec
    }

    pub fn config(&self) -> &ExplorationConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn continuation_graph(&self) -> &LabeledTransitionMdp {
        &self.ltmdp
    }

    /// Candidate transitions into the initial states, without storing them.
    pub fn compute_initial_transitions(&mut self) -> ExploreResult<&TransitionSet> {
        self.facade().compute_initial_transitions()
    }

    /// Candidate transitions of a discovered state, without storing them.
    pub fn compute_successor_transitions(&mut self, index: usize) -> ExploreResult<&TransitionSet> {
        let vector: Box<[u8]> = self
            .store
            .vector(index)
            .ok_or(ExploreError::UnknownState(index))?
            .into();
        self.facade().compute_successor_transitions(index, &vector)
    }

    /// Insert the targets of the worker's last batch into the store and copy
    /// its step graph into the global continuation graph. Returns the states
    /// seen for the first time.
    fn commit(&self, origin: Origin, worker: &ExecutedModel, depth: u32) -> ExploreResult<Vec<u32>> {
        let transitions = worker.transitions();
        let predecessor = match origin {
            Origin::State(index) => Some(index as u32),
            _ => None,
        };
        let mut targets = Vec::with_capacity(transitions.len());
        let mut new_states = Vec::new();

        for (i, (transition, vector)) in transitions.iter().enumerate() {
            let state = if transition.valid {
                let inserted = self
                    .store
                    .insert(vector, || StateInfo {
                        predecessor,
                        choices: transition.choices.clone(),
                        faults: transition.faults,
                        depth,
                    })
                    .ok_or_else(|| ExploreError::CapacityExceeded {
                        resource: Resource::States,
                        capacity: self.store.capacity(),
                        origin,
                        path: i,
                    })?;
                if inserted.is_new {
                    self.labeling.set(
                        inserted.index as usize,
                        transition.labels,
                        transitions.rewards(i),
                    );
                    new_states.push(inserted.index);
                }
                inserted.index
            } else {
                STUTTERING_TARGET
            };
            targets.push(TransitionTarget {
                state,
                labels: transition.labels,
                faults: transition.faults,
                probability: transition.probability,
            });
        }

        self.ltmdp
            .add_step_graph(origin, worker.step_graph(), &targets)?;

        if let Some(ref p) = self.config.progress {
            p.states.store(self.store.len(), Ordering::Relaxed);
            p.transitions.fetch_add(targets.len(), Ordering::Relaxed);
        }
        Ok(new_states)
    }

    fn expand(&self, worker: &mut ExecutedModel, index: u32, depth: u32) -> ExploreResult<Vec<u32>> {
        let vector = self
            .store
            .vector(index as usize)
            .ok_or(ExploreError::UnknownState(index as usize))?;
        let origin = Origin::State(index as usize);
        let count = worker
            .compute_successor_transitions(index as usize, vector)?
            .len();
        let new_states = self.commit(origin, worker, depth)?;
        trace!(state = index, successors = count, new = new_states.len(), "explored state");
        if let Some(ref p) = self.config.progress {
            p.explored.fetch_add(1, Ordering::Relaxed);
        }
        Ok(new_states)
    }

    /// Successors of one breadth-first level.
    fn explore_level(&self, frontier: &[u32], depth: u32) -> ExploreResult<Vec<u32>> {
        let mut next = Vec::new();
        if !self.config.parallel {
            let mut worker = self.new_worker();
            for &index in frontier {
                next.extend(self.expand(&mut worker, index, depth)?);
                if let Some(ref p) = self.config.progress {
                    p.queue_len.fetch_sub(1, Ordering::Relaxed);
                }
            }
            return Ok(next);
        }

        let threads = match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        };
        let batch_size = threads * 256;
        for batch in frontier.chunks(batch_size) {
            let run = || {
                batch
                    .par_iter()
                    .map_init(
                        || self.new_worker(),
                        |worker, &index| self.expand(worker, index, depth),
                    )
                    .collect::<ExploreResult<Vec<Vec<u32>>>>()
            };
            let results = match &self.pool {
                Some(pool) => pool.install(run)?,
                None => run()?,
            };
            next.extend(results.into_iter().flatten());

            if let Some(ref p) = self.config.progress {
                p.queue_len.fetch_sub(batch.len(), Ordering::Relaxed);
            }
        }
        Ok(next)
    }

    fn run(&self) -> ExploreResult<usize> {
        let mut worker = self.new_worker();
        worker.compute_initial_transitions()?;
        let mut frontier = self.commit(Origin::Initial, &worker, 0)?;
        info!(count = frontier.len(), "computed initial states");

        let mut depth = 0usize;
        while !frontier.is_empty() {
            if let Some(ref p) = self.config.progress {
                p.queue_len.store(frontier.len(), Ordering::Relaxed);
                p.depth.store(depth, Ordering::Relaxed);
            }
            let next = self.explore_level(&frontier, depth as u32 + 1)?;
            debug!(
                depth,
                frontier = frontier.len(),
                discovered = next.len(),
                states = self.store.len(),
                "level explored"
            );
            if next.is_empty() {
                break;
            }
            frontier = next;
            depth += 1;
        }
        Ok(depth)
    }

    /// Drop everything an aborted run left behind.
    fn reset(&mut self) {
        let capacity = self.config.capacity;
        self.store = StateStore::new(capacity.max_states, self.config.track_predecessors);
        self.labeling = StateLabeling::new(capacity.max_states);
        self.ltmdp = LabeledTransitionMdp::new(&capacity);
        self.matrix = None;
    }

    /// Explore the whole state space and build the matrix. Exploring again
    /// returns the cached statistics; after a failed run it starts over.
    pub fn explore(&mut self) -> ExploreResult<ExplorationStats> {
        if let Some(stats) = &self.stats {
            return Ok(stats.clone());
        }
        if self.aborted {
            debug!(states = self.store.len(), "discarding partial exploration");
            self.reset();
            self.aborted = false;
        }
        let result = self.explore_once();
        self.aborted = result.is_err();
        result
    }

    fn explore_once(&mut self) -> ExploreResult<ExplorationStats> {
        let start = Instant::now();
        info!(
            max_states = self.config.capacity.max_states,
            max_transitions = self.config.capacity.max_transitions,
            parallel = self.config.parallel,
            "starting exploration"
        );

        let max_depth = match self.run() {
            Ok(depth) => depth,
            Err(e) => {
                error!(error = %e, states = self.store.len(), "exploration aborted");
                return Err(e);
            }
        };
        info!(
            states = self.store.len(),
            transitions = self.ltmdp.transition_targets(),
            max_depth,
            "exploration complete"
        );

        let matrix = build_matrix(
            &self.ltmdp,
            &self.labeling,
            self.store.len(),
            &self.config.capacity,
        )?;
        if cfg!(debug_assertions) {
            for warning in matrix.validate() {
                warn!(%warning, "probability invariant violated");
            }
        }

        let stats = ExplorationStats {
            states: self.store.len(),
            transition_targets: self.ltmdp.transition_targets(),
            continuation_elements: self.ltmdp.continuation_elements(),
            max_depth,
            distributions: matrix.distribution_count(),
            matrix_entries: matrix.entry_count(),
            stuttering: matrix.state_count() > self.store.len(),
            elapsed: start.elapsed(),
        };
        self.matrix = Some(matrix);
        self.stats = Some(stats.clone());
        Ok(stats)
    }

    pub fn sealed_matrix(&self) -> ExploreResult<&MarkovDecisionProcess> {
        self.matrix.as_ref().ok_or(ExploreError::NotExplored)
    }

    /// Labels of a discovered state; empty for unknown indices.
    pub fn state_label(&self, index: usize) -> LabelSet {
        self.labeling.labels(index)
    }

    pub fn state_rewards(&self, index: usize) -> &[f64] {
        self.labeling.rewards(index)
    }

    /// Proposition that holds in states carrying the named label.
    pub fn label(&self, name: &str) -> ExploreResult<Proposition> {
        self.model
            .label_index(name)
            .map(Proposition::label)
            .ok_or_else(|| ExploreError::UnknownLabel(name.to_string()))
    }

    pub fn reachability(
        &self,
        target: &Proposition,
        bound: Option<usize>,
        optimum: Optimum,
    ) -> ExploreResult<ReachabilityResult> {
        let matrix = self.sealed_matrix()?;
        Ok(reachability(
            matrix,
            target,
            bound,
            optimum,
            &self.config.convergence,
        ))
    }

    /// Maximal probability of reaching `target`, within `bound` steps after
    /// the initial states when given.
    pub fn reachability_probability(
        &self,
        target: &Proposition,
        bound: Option<usize>,
    ) -> ExploreResult<f64> {
        Ok(self.reachability(target, bound, Optimum::Max)?.probability)
    }

    /// Shortest discovered path to a state satisfying `target`, replayed to
    /// attach state dumps. `None` if no discovered state satisfies it.
    pub fn counterexample(&self, target: &Proposition) -> ExploreResult<Option<CounterExample>> {
        if self.stats.is_none() {
            return Err(ExploreError::NotExplored);
        }
        if !self.store.has_predecessors() {
            return Err(ExploreError::PredecessorsNotTracked);
        }

        // Indices grow with depth, so the first match is a shallowest one.
        let Some(found) = (0..self.store.len()).find(|&s| target.evaluate(self.labeling.labels(s)))
        else {
            return Ok(None);
        };

        let mut counterexample = CounterExample {
            states: Vec::new(),
            choices: Vec::new(),
            fault_activations: Vec::new(),
            dumps: Vec::new(),
        };
        for index in self.store.trace_to(found as u32) {
            let index = index as usize;
            let vector = self
                .store
                .vector(index)
                .ok_or(ExploreError::UnknownState(index))?;
            let info = self
                .store
                .info(index)
                .ok_or(ExploreError::UnknownState(index))?;
            counterexample.states.push(vector.into());
            counterexample.choices.push(info.choices.to_vec());
            counterexample.fault_activations.push(info.faults);
        }

        let mut worker = self.new_worker();
        counterexample.dumps = counterexample.replay(&mut worker)?;
        info!(state = found, length = counterexample.len(), "counterexample found");
        Ok(Some(counterexample))
    }

    /// Fresh driver for replaying counterexamples against this model.
    pub fn replay_worker(&self) -> ExecutedModel {
        self.new_worker()
    }
}
