//! Labels and rewards of explored states.

use crate::arena::AppendArena;
use faultline_model::LabelSet;

/// Label set and reward values of every state, fixed when the state is first
/// stored. Later writes for the same state are ignored.
pub struct StateLabeling {
    entries: AppendArena<(LabelSet, Box<[f64]>)>,
}

impl StateLabeling {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: AppendArena::new(capacity),
        }
    }

    /// Returns false if `state` was labeled before.
    pub fn set(&self, state: usize, labels: LabelSet, rewards: &[f64]) -> bool {
        self.entries.set(state, (labels, rewards.into()))
    }

    pub fn labels(&self, state: usize) -> LabelSet {
        self.entries
            .get(state)
            .map_or(LabelSet::EMPTY, |(labels, _)| *labels)
    }

    pub fn rewards(&self, state: usize) -> &[f64] {
        self.entries.get(state).map_or(&[], |(_, rewards)| &**rewards)
    }
}
