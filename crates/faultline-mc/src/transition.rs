//! Candidate transitions of one source state and the modifiers that may
//! invalidate them.

use crate::error::Origin;
use crate::reachability::Proposition;
use crate::resolver::ChoicePath;
use faultline_model::{FaultSet, LabelSet};

/// Outcome of one fully resolved path.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateTransition {
    pub faults: FaultSet,
    pub labels: LabelSet,
    pub probability: f64,
    pub valid: bool,
    /// Options taken on the path; only recorded when predecessors are tracked.
    pub choices: ChoicePath,
}

/// Candidate transitions of one source state, with their target vectors
/// stored back to back.
#[derive(Debug, Clone)]
pub struct TransitionSet {
    vector_size: usize,
    reward_count: usize,
    targets: Vec<u8>,
    rewards: Vec<f64>,
    transitions: Vec<CandidateTransition>,
}

impl TransitionSet {
    pub fn new(vector_size: usize, reward_count: usize) -> Self {
        Self {
            vector_size,
            reward_count,
            targets: Vec::new(),
            rewards: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.targets.clear();
        self.rewards.clear();
        self.transitions.clear();
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Append a zeroed target vector and return it for serialization.
    pub(crate) fn push_target(&mut self) -> &mut [u8] {
        let start = self.targets.len();
        self.targets.resize(start + self.vector_size, 0);
        &mut self.targets[start..]
    }

    /// Drop the target vector pushed last, after a failed serialization.
    pub(crate) fn pop_target(&mut self) {
        let len = self.targets.len().saturating_sub(self.vector_size);
        self.targets.truncate(len);
    }

    /// Complete the transition whose target was pushed last.
    pub(crate) fn push(&mut self, transition: CandidateTransition, rewards: &[f64]) -> usize {
        debug_assert_eq!(rewards.len(), self.reward_count);
        debug_assert_eq!(self.targets.len(), (self.transitions.len() + 1) * self.vector_size);
        self.rewards.extend_from_slice(rewards);
        self.transitions.push(transition);
        self.transitions.len() - 1
    }

    pub fn get(&self, index: usize) -> &CandidateTransition {
        &self.transitions[index]
    }

    pub fn target(&self, index: usize) -> &[u8] {
        &self.targets[index * self.vector_size..(index + 1) * self.vector_size]
    }

    pub fn rewards(&self, index: usize) -> &[f64] {
        &self.rewards[index * self.reward_count..(index + 1) * self.reward_count]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CandidateTransition, &[u8])> {
        self.transitions
            .iter()
            .enumerate()
            .map(|(i, t)| (t, self.target(i)))
    }

    /// Sum of the path probabilities of all transitions.
    pub fn total_probability(&self) -> f64 {
        self.transitions.iter().map(|t| t.probability).sum()
    }
}

/// Narrowing-only view handed to transition modifiers: transitions can be
/// inspected and invalidated, never added or revived.
pub struct TransitionsView<'a> {
    set: &'a mut TransitionSet,
}

impl<'a> TransitionsView<'a> {
    pub(crate) fn new(set: &'a mut TransitionSet) -> Self {
        Self { set }
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn get(&self, index: usize) -> &CandidateTransition {
        self.set.get(index)
    }

    pub fn target(&self, index: usize) -> &[u8] {
        self.set.target(index)
    }

    pub fn invalidate(&mut self, index: usize) {
        self.set.transitions[index].valid = false;
    }

    pub fn invalidate_all(&mut self) {
        for transition in &mut self.set.transitions {
            transition.valid = false;
        }
    }
}

/// Hook that runs once per source state after all of its paths have been
/// enumerated.
pub trait TransitionModifier: Send + Sync {
    /// `source_labels` are the labels of the source state; empty for the
    /// initial transitions.
    fn modify(&self, origin: Origin, source_labels: LabelSet, transitions: &mut TransitionsView<'_>);
}

/// Stops exploration at states satisfying a proposition: their successors
/// are invalidated and thus never explored.
#[derive(Debug, Clone)]
pub struct TerminateAtLabel {
    proposition: Proposition,
}

impl TerminateAtLabel {
    pub fn new(proposition: Proposition) -> Self {
        Self { proposition }
    }
}

impl TransitionModifier for TerminateAtLabel {
    fn modify(&self, origin: Origin, source_labels: LabelSet, transitions: &mut TransitionsView<'_>) {
        if matches!(origin, Origin::State(_)) && self.proposition.evaluate(source_labels) {
            transitions.invalidate_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(probability: f64) -> CandidateTransition {
        CandidateTransition {
            faults: FaultSet::EMPTY,
            labels: LabelSet::from_bits(1),
            probability,
            valid: true,
            choices: ChoicePath::new(),
        }
    }

    fn sample() -> TransitionSet {
        let mut set = TransitionSet::new(2, 1);
        set.push_target().copy_from_slice(&[1, 2]);
        set.push(candidate(0.25), &[1.0]);
        set.push_target().copy_from_slice(&[3, 4]);
        set.push(candidate(0.75), &[2.0]);
        set
    }

    #[test]
    fn test_targets_are_packed() {
        let set = sample();
        assert_eq!(set.len(), 2);
        assert_eq!(set.target(1), &[3, 4]);
        assert_eq!(set.rewards(1), &[2.0]);
        assert!((set.total_probability() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_terminate_at_label() {
        let modifier = TerminateAtLabel::new(Proposition::label(0));
        let mut set = sample();

        modifier.modify(Origin::Initial, LabelSet::from_bits(1), &mut TransitionsView::new(&mut set));
        assert!(set.iter().all(|(t, _)| t.valid));

        modifier.modify(Origin::State(4), LabelSet::EMPTY, &mut TransitionsView::new(&mut set));
        assert!(set.iter().all(|(t, _)| t.valid));

        modifier.modify(Origin::State(4), LabelSet::from_bits(1), &mut TransitionsView::new(&mut set));
        assert!(set.iter().all(|(t, _)| !t.valid));
    }
}
