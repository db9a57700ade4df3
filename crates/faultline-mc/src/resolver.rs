//! Exhaustive enumeration of choice paths by stack backtracking.
//!
//! For each source state the resolver is reset with
//! [`prepare_next_state`](ChoiceResolver::prepare_next_state); afterwards
//! every call to [`prepare_next_path`](ChoiceResolver::prepare_next_path)
//! configures the stack for the next unexplored combination of choices until
//! it returns `false`. The model logic is replayed once per path; choices it
//! reaches for the first time push a new frame, choices it reaches again
//! return the option recorded in the frame.

use crate::continuation::{ContinuationKind, StepGraph};
use faultline_model::ChoiceSource;
use smallvec::SmallVec;
use thiserror::Error;

/// Option indices of one path.
pub type ChoicePath = SmallVec<[u32; 8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceKind {
    Nondeterministic,
    Probabilistic,
}

/// The model made different choices while replaying the same path.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolverError {
    #[error("choice {index} offered {found} options, previously {expected}")]
    OptionCountMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("choice {index} changed between nondeterministic and probabilistic")]
    KindMismatch { index: usize },

    #[error("path made {found} choices, previously {expected}")]
    ChoiceCountMismatch { expected: usize, found: usize },

    #[error("choice {index} has {count} options but option {option} is fixed")]
    OptionOutOfRange {
        index: usize,
        option: usize,
        count: usize,
    },

    #[error("step graph capacity of {capacity} elements exceeded")]
    StepGraphFull { capacity: usize },
}

#[derive(Debug, Clone, Copy)]
struct ChoiceFrame {
    kind: ChoiceKind,
    /// Zero for choices collapsed by forwarding and for fixed replays.
    option_count: usize,
    option_index: usize,
    continuation_id: usize,
    /// Probability of the path prefix up to and including this choice.
    probability: f64,
}

pub struct ChoiceResolver {
    frames: Vec<ChoiceFrame>,
    /// Choices handled on the current path.
    cursor: usize,
    first_path: bool,
    next_continuation_id: usize,
    replay: bool,
    error: Option<ResolverError>,
    graph: StepGraph,
}

impl ChoiceResolver {
    pub fn new(step_graph_capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(64),
            cursor: 0,
            first_path: true,
            next_continuation_id: 1,
            replay: false,
            error: None,
            graph: StepGraph::new(step_graph_capacity),
        }
    }

    /// Reset all stacks for a new source state.
    pub fn prepare_next_state(&mut self) {
        self.frames.clear();
        self.cursor = 0;
        self.first_path = true;
        self.next_continuation_id = 1;
        self.replay = false;
        self.error = None;
        self.graph.reset();
    }

    /// Configure the stack for the next path. Returns `false` once all paths
    /// of the state have been enumerated.
    pub fn prepare_next_path(&mut self) -> Result<bool, ResolverError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        if !self.first_path && self.cursor != self.frames.len() {
            return Err(ResolverError::ChoiceCountMismatch {
                expected: self.frames.len(),
                found: self.cursor,
            });
        }
        self.cursor = 0;

        if self.first_path {
            self.first_path = false;
            return Ok(true);
        }
        if self.replay {
            return Ok(false);
        }

        while let Some(frame) = self.frames.pop() {
            if frame.option_index + 1 < frame.option_count {
                let probability = self.frames.last().map_or(1.0, |f| f.probability);
                self.frames.push(ChoiceFrame {
                    option_index: frame.option_index + 1,
                    continuation_id: frame.continuation_id + 1,
                    probability,
                    ..frame
                });
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn handle(&mut self, kind: ChoiceKind, count: usize) -> usize {
        let index = self.cursor;
        self.cursor += 1;
        if self.error.is_some() {
            return 0;
        }

        if let Some(frame) = self.frames.get(index) {
            if frame.option_count != 0 && frame.option_count != count {
                self.error = Some(ResolverError::OptionCountMismatch {
                    index,
                    expected: frame.option_count,
                    found: count,
                });
                return 0;
            }
            if !self.replay && frame.kind != kind {
                self.error = Some(ResolverError::KindMismatch { index });
                return 0;
            }
            if frame.option_index >= count {
                self.error = Some(ResolverError::OptionOutOfRange {
                    index,
                    option: frame.option_index,
                    count,
                });
                return 0;
            }
            return frame.option_index;
        }

        if self.replay {
            self.error = Some(ResolverError::ChoiceCountMismatch {
                expected: self.frames.len(),
                found: self.cursor,
            });
            return 0;
        }

        let parent = self.current_continuation_id();
        let from = self.next_continuation_id;
        self.next_continuation_id += count;
        let split_kind = match kind {
            ChoiceKind::Nondeterministic => ContinuationKind::Nondeterministic,
            ChoiceKind::Probabilistic => ContinuationKind::Probabilistic,
        };
        if let Err(full) = self.graph.split(split_kind, parent, from, from + count) {
            self.error = Some(ResolverError::StepGraphFull {
                capacity: full.capacity,
            });
            return 0;
        }

        let probability = self.prefix_probability(index);
        self.frames.push(ChoiceFrame {
            kind,
            option_count: count,
            option_index: 0,
            continuation_id: from,
            probability,
        });
        0
    }

    #[inline]
    fn prefix_probability(&self, index: usize) -> f64 {
        if index == 0 {
            1.0
        } else {
            self.frames[index - 1].probability
        }
    }

    /// Collapse the choice at `index` to its first option, which must be the
    /// one taken. The mass of the other options is folded into this path:
    /// every probability from `index` on is rescaled as if the choice had not
    /// been made.
    pub fn forward_untaken_choices_at_index(&mut self, index: usize) {
        let Some(frame) = self.frames.get(index) else {
            return;
        };
        if frame.option_count == 0 {
            return;
        }
        debug_assert_eq!(frame.option_index, 0, "only the first option can be forwarded");
        if frame.option_index != 0 {
            return;
        }

        let before = self.prefix_probability(index);
        let at = frame.probability;
        if at > 0.0 && at != before {
            let factor = before / at;
            for frame in &mut self.frames[index..] {
                frame.probability *= factor;
            }
        }

        let parent = if index == 0 {
            0
        } else {
            self.frames[index - 1].continuation_id
        };
        self.graph.forward(parent);
        self.frames[index].option_count = 0;
    }

    /// Whether the choice at `index` took its first option and every later
    /// choice of the path has been collapsed already.
    pub fn can_forward(&self, index: usize) -> bool {
        !self.replay
            && self
                .frames
                .get(index)
                .is_some_and(|frame| frame.option_index == 0)
            && self.frames[index + 1..].iter().all(|f| f.option_count == 0)
    }

    /// Replay exactly one path with the given option indices. The step graph
    /// is not split; the path's transition attaches to the root.
    pub fn set_choices(&mut self, choices: &[u32]) {
        self.prepare_next_state();
        self.replay = true;
        self.frames.extend(choices.iter().map(|&choice| ChoiceFrame {
            kind: ChoiceKind::Nondeterministic,
            option_count: 0,
            option_index: choice as usize,
            continuation_id: 0,
            probability: 1.0,
        }));
    }

    /// Continuation id of the current path: the leaf its transition attaches to.
    #[inline]
    pub fn current_continuation_id(&self) -> usize {
        self.frames.last().map_or(0, |f| f.continuation_id)
    }

    /// Probability of the current, completed path.
    #[inline]
    pub fn path_probability(&self) -> f64 {
        self.frames.last().map_or(1.0, |f| f.probability)
    }

    /// Attach the transition `target` to the leaf of the current path.
    pub fn set_target_of_leaf(&mut self, target: usize) {
        let leaf = self.current_continuation_id();
        self.graph.set_target_of_leaf(leaf, target);
    }

    pub fn choices(&self) -> ChoicePath {
        self.frames.iter().map(|f| f.option_index as u32).collect()
    }

    /// Sticky error of the current path, if any.
    pub fn error(&self) -> Option<&ResolverError> {
        self.error.as_ref()
    }

    pub fn step_graph(&self) -> &StepGraph {
        &self.graph
    }
}

impl ChoiceSource for ChoiceResolver {
    fn handle_choice(&mut self, count: usize) -> usize {
        self.handle(ChoiceKind::Nondeterministic, count)
    }

    fn handle_probabilistic_choice(&mut self, count: usize) -> usize {
        self.handle(ChoiceKind::Probabilistic, count)
    }

    fn set_probability_of_last_choice(&mut self, probability: f64) {
        // Only a frame that was pushed or advanced for this path is stamped;
        // replayed frames keep the probability of their prefix.
        if self.cursor == 0 || self.cursor != self.frames.len() || self.replay {
            return;
        }
        let index = self.cursor - 1;
        self.frames[index].probability = self.prefix_probability(index) * probability;
    }

    fn choice_count(&self) -> usize {
        self.cursor
    }
}
