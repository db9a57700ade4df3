//! Exploration configuration.

use crate::explorer::ProgressCounters;
use std::sync::Arc;

/// Average continuation graph elements per transition target.
pub const AVG_ELEMENTS_PER_TARGET: usize = 7;

/// Preallocated capacities. Nothing grows past these limits; exceeding one
/// aborts the run with [`crate::ExploreError::CapacityExceeded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCapacity {
    /// Maximum number of distinct states.
    pub max_states: usize,
    /// Transition budget, split between transition targets and continuation
    /// graph elements.
    pub max_transitions: usize,
    /// Maximum candidate transitions of a single source state.
    pub max_successors: usize,
}

impl ModelCapacity {
    pub const fn new(max_states: usize, max_transitions: usize) -> Self {
        Self {
            max_states,
            max_transitions,
            max_successors: 1 << 16,
        }
    }

    pub const fn small() -> Self {
        Self {
            max_states: 1 << 14,
            max_transitions: 1 << 20,
            max_successors: 1 << 12,
        }
    }

    pub const fn medium() -> Self {
        Self {
            max_states: 1 << 20,
            max_transitions: 1 << 25,
            max_successors: 1 << 16,
        }
    }

    pub const fn large() -> Self {
        Self {
            max_states: 1 << 24,
            max_transitions: 1 << 28,
            max_successors: 1 << 20,
        }
    }

    pub const fn with_max_successors(mut self, max_successors: usize) -> Self {
        self.max_successors = max_successors;
        self
    }

    /// Capacity of the global transition target arena.
    pub fn transition_targets(&self) -> usize {
        self.max_transitions / (AVG_ELEMENTS_PER_TARGET + 1)
    }

    /// Capacity of the global continuation graph arena.
    pub fn continuation_elements(&self) -> usize {
        self.transition_targets() * AVG_ELEMENTS_PER_TARGET
    }

    /// Capacity of the continuation graph of a single source state.
    pub fn step_graph_elements(&self) -> usize {
        self.max_successors * AVG_ELEMENTS_PER_TARGET + 1
    }
}

impl Default for ModelCapacity {
    fn default() -> Self {
        Self::medium()
    }
}

/// Termination criteria of value iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Convergence {
    /// Stop once no value changes by more than this.
    pub epsilon: f64,
    /// Give up after this many iterations.
    pub max_iterations: usize,
}

impl Default for Convergence {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            max_iterations: 100_000,
        }
    }
}

/// Configuration for the explorer.
#[derive(Clone)]
pub struct ExplorationConfig {
    /// Preallocated capacities.
    pub capacity: ModelCapacity,
    /// Whether to use parallel exploration.
    pub parallel: bool,
    /// Number of threads for parallel exploration (0 = rayon's global pool).
    /// A non-zero value builds a private pool owned by the explorer.
    pub num_threads: usize,
    /// Collapse fault activation choices that had no observable effect.
    pub forward_optimization: bool,
    /// Record predecessor and choices of every state, needed for
    /// counterexamples.
    pub track_predecessors: bool,
    /// Value iteration settings for unbounded queries.
    pub convergence: Convergence,
    /// Shared progress counters, written by the explorer and read by the CLI.
    pub progress: Option<Arc<ProgressCounters>>,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            capacity: ModelCapacity::default(),
            parallel: true,
            num_threads: 0,
            forward_optimization: true,
            track_predecessors: false,
            convergence: Convergence::default(),
            progress: None,
        }
    }
}

impl std::fmt::Debug for ExplorationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplorationConfig")
            .field("capacity", &self.capacity)
            .field("parallel", &self.parallel)
            .field("num_threads", &self.num_threads)
            .field("forward_optimization", &self.forward_optimization)
            .field("track_predecessors", &self.track_predecessors)
            .field("convergence", &self.convergence)
            .field("progress", &self.progress.as_ref().map(|_| "..."))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_sizing() {
        let capacity = ModelCapacity::new(1024, 8 * 1024);
        assert_eq!(capacity.transition_targets(), 1024);
        assert_eq!(capacity.continuation_elements(), 7 * 1024);
        assert!(ModelCapacity::small().max_states < ModelCapacity::large().max_states);
    }
}
