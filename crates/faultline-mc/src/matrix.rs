//! Sparse Markov chain / MDP matrix with an append-only construction API.
//!
//! Rows are grouped per state: every state owns a contiguous range of
//! distributions, every distribution a contiguous range of entries. Row group
//! 0 holds the initial distributions; state `i` is stored in group `i + 1`.

use crate::error::{ExploreError, ExploreResult, Origin, Resource};
use faultline_model::LabelSet;
use std::fmt;

/// Tolerance of the per-distribution probability check.
pub const PROBABILITY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixEntry {
    pub column: u32,
    pub probability: f64,
}

/// A distribution whose probabilities do not sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilityWarning {
    /// None for an initial distribution.
    pub state: Option<usize>,
    pub distribution: usize,
    pub sum: f64,
}

impl fmt::Display for ProbabilityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            Some(state) => write!(f, "state {state}")?,
            None => write!(f, "initial state")?,
        }
        write!(
            f,
            ", distribution {}: probabilities sum to {}",
            self.distribution, self.sum
        )
    }
}

pub struct MarkovDecisionProcess {
    /// Distribution range of each row group; one more element than groups.
    group_offsets: Vec<u32>,
    /// Entry range of each distribution; one more element than distributions.
    distribution_offsets: Vec<u32>,
    entries: Vec<MatrixEntry>,
    labels: Vec<LabelSet>,
    max_distributions: usize,
    max_entries: usize,
    open_group: bool,
    open_distribution: bool,
    sealed: bool,
}

impl MarkovDecisionProcess {
    pub fn new(max_distributions: usize, max_entries: usize) -> Self {
        Self {
            group_offsets: vec![0],
            distribution_offsets: vec![0],
            entries: Vec::new(),
            labels: Vec::new(),
            max_distributions,
            max_entries,
            open_group: false,
            open_distribution: false,
            sealed: false,
        }
    }

    #[inline]
    fn groups(&self) -> usize {
        self.group_offsets.len() - 1
    }

    fn start_group(&mut self, group: usize) {
        assert!(!self.sealed, "matrix is sealed");
        assert!(!self.open_group, "previous state is not finished");
        assert_eq!(group, self.groups(), "states must be added in order");
        self.open_group = true;
    }

    pub fn start_initial_distributions(&mut self) {
        self.start_group(0);
    }

    pub fn start_new_initial_distribution(&mut self) -> ExploreResult<()> {
        self.start_new_distribution()
    }

    pub fn add_transition_to_initial_distribution(
        &mut self,
        column: u32,
        probability: f64,
    ) -> ExploreResult<()> {
        self.add_transition(column, probability)
    }

    pub fn finish_initial_distribution(&mut self) {
        self.finish_distribution();
    }

    pub fn finish_initial_distributions(&mut self) {
        self.finish_state();
    }

    /// Start the row group of `state`. States are added in index order after
    /// the initial distributions.
    pub fn start_new_state(&mut self, state: usize) {
        self.start_group(state + 1);
    }

    pub fn start_new_distribution(&mut self) -> ExploreResult<()> {
        assert!(self.open_group, "no state is open");
        assert!(!self.open_distribution, "previous distribution is not finished");
        if self.distribution_offsets.len() > self.max_distributions {
            return Err(ExploreError::capacity(
                Resource::Distributions,
                self.max_distributions,
                Origin::Matrix,
            ));
        }
        self.open_distribution = true;
        Ok(())
    }

    pub fn add_transition(&mut self, column: u32, probability: f64) -> ExploreResult<()> {
        assert!(self.open_distribution, "no distribution is open");
        if self.entries.len() >= self.max_entries {
            return Err(ExploreError::capacity(
                Resource::MatrixEntries,
                self.max_entries,
                Origin::Matrix,
            ));
        }
        self.entries.push(MatrixEntry {
            column,
            probability,
        });
        Ok(())
    }

    /// Close the open distribution. Entries are sorted by column and entries
    /// with equal columns are merged.
    pub fn finish_distribution(&mut self) {
        assert!(self.open_distribution, "no distribution is open");
        let start = *self.distribution_offsets.last().unwrap_or(&0) as usize;
        let row = &mut self.entries[start..];
        row.sort_unstable_by_key(|e| e.column);

        let mut write = start;
        for read in start..self.entries.len() {
            let entry = self.entries[read];
            if write > start && self.entries[write - 1].column == entry.column {
                self.entries[write - 1].probability += entry.probability;
            } else {
                self.entries[write] = entry;
                write += 1;
            }
        }
        self.entries.truncate(write);

        self.distribution_offsets.push(self.entries.len() as u32);
        self.open_distribution = false;
    }

    pub fn finish_state(&mut self) {
        assert!(self.open_group, "no state is open");
        assert!(!self.open_distribution, "distribution is not finished");
        self.group_offsets
            .push((self.distribution_offsets.len() - 1) as u32);
        self.open_group = false;
    }

    /// Attach state labels, indexed by state.
    pub fn set_labels(&mut self, labels: Vec<LabelSet>) {
        self.labels = labels;
    }

    /// Freeze the matrix. All construction calls panic afterwards.
    pub fn seal(&mut self) {
        assert!(!self.open_group, "state is not finished");
        self.group_offsets.shrink_to_fit();
        self.distribution_offsets.shrink_to_fit();
        self.entries.shrink_to_fit();
        self.labels.resize(self.state_count(), LabelSet::EMPTY);
        self.sealed = true;
    }

    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Number of states, without the initial pseudo-state.
    #[inline]
    pub fn state_count(&self) -> usize {
        self.groups().saturating_sub(1)
    }

    pub fn distribution_count(&self) -> usize {
        self.distribution_offsets.len() - 1
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn distribution(&self, index: usize) -> &[MatrixEntry] {
        let start = self.distribution_offsets[index] as usize;
        let end = self.distribution_offsets[index + 1] as usize;
        &self.entries[start..end]
    }

    fn group(&self, group: usize) -> impl Iterator<Item = &[MatrixEntry]> + '_ {
        let range = match self.group_offsets.get(group..group + 2) {
            Some(&[start, end]) => start as usize..end as usize,
            _ => 0..0,
        };
        range.map(move |d| self.distribution(d))
    }

    pub fn initial_distributions(&self) -> impl Iterator<Item = &[MatrixEntry]> + '_ {
        self.group(0)
    }

    pub fn distributions_of(&self, state: usize) -> impl Iterator<Item = &[MatrixEntry]> + '_ {
        self.group(state + 1)
    }

    pub fn labels(&self, state: usize) -> LabelSet {
        self.labels.get(state).copied().unwrap_or(LabelSet::EMPTY)
    }

    /// Whether every state, and the initial pseudo-state, has exactly one
    /// distribution; the matrix is then a DTMC.
    pub fn is_deterministic(&self) -> bool {
        self.group_offsets.windows(2).all(|w| w[1] - w[0] == 1)
    }

    /// Distributions whose probabilities do not sum to 1 within
    /// [`PROBABILITY_TOLERANCE`].
    pub fn validate(&self) -> Vec<ProbabilityWarning> {
        let mut warnings = Vec::new();
        for group in 0..self.groups() {
            let state = group.checked_sub(1);
            let start = self.group_offsets[group] as usize;
            let end = self.group_offsets[group + 1] as usize;
            for distribution in start..end {
                let sum: f64 = self
                    .distribution(distribution)
                    .iter()
                    .map(|e| e.probability)
                    .sum();
                if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                    warnings.push(ProbabilityWarning {
                        state,
                        distribution,
                        sum,
                    });
                }
            }
        }
        warnings
    }
}

impl fmt::Debug for MarkovDecisionProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkovDecisionProcess")
            .field("states", &self.state_count())
            .field("distributions", &self.distribution_count())
            .field("entries", &self.entry_count())
            .field("sealed", &self.sealed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distribution(matrix: &mut MarkovDecisionProcess, entries: &[(u32, f64)]) {
        matrix.start_new_distribution().unwrap();
        for &(column, probability) in entries {
            matrix.add_transition(column, probability).unwrap();
        }
        matrix.finish_distribution();
    }

    fn sample() -> MarkovDecisionProcess {
        let mut matrix = MarkovDecisionProcess::new(16, 64);
        matrix.start_initial_distributions();
        matrix.start_new_initial_distribution().unwrap();
        matrix.add_transition_to_initial_distribution(0, 1.0).unwrap();
        matrix.finish_initial_distribution();
        matrix.finish_initial_distributions();

        matrix.start_new_state(0);
        distribution(&mut matrix, &[(1, 0.25), (0, 0.5), (1, 0.25)]);
        distribution(&mut matrix, &[(0, 1.0)]);
        matrix.finish_state();

        matrix.start_new_state(1);
        distribution(&mut matrix, &[(1, 1.0)]);
        matrix.finish_state();
        matrix.seal();
        matrix
    }

    #[test]
    fn test_entries_are_sorted_and_merged() {
        let matrix = sample();
        assert_eq!(matrix.state_count(), 2);
        let first: Vec<&[MatrixEntry]> = matrix.distributions_of(0).collect();
        assert_eq!(first.len(), 2);
        assert_eq!(
            first[0],
            &[
                MatrixEntry {
                    column: 0,
                    probability: 0.5
                },
                MatrixEntry {
                    column: 1,
                    probability: 0.5
                }
            ]
        );
        assert_eq!(matrix.initial_distributions().count(), 1);
        assert!(!matrix.is_deterministic());
        assert!(matrix.validate().is_empty());
    }

    #[test]
    fn test_validate_reports_bad_sums() {
        let mut matrix = MarkovDecisionProcess::new(16, 64);
        matrix.start_initial_distributions();
        matrix.finish_initial_distributions();
        matrix.start_new_state(0);
        distribution(&mut matrix, &[(0, 0.4)]);
        matrix.finish_state();
        matrix.seal();

        let warnings = matrix.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].state, Some(0));
        assert!((warnings[0].sum - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_capacity_limits() {
        let mut matrix = MarkovDecisionProcess::new(1, 1);
        matrix.start_initial_distributions();
        matrix.start_new_distribution().unwrap();
        matrix.add_transition(0, 0.5).unwrap();
        assert!(matches!(
            matrix.add_transition(1, 0.5),
            Err(ExploreError::CapacityExceeded {
                resource: Resource::MatrixEntries,
                ..
            })
        ));
        matrix.finish_distribution();
        assert!(matches!(
            matrix.start_new_distribution(),
            Err(ExploreError::CapacityExceeded {
                resource: Resource::Distributions,
                ..
            })
        ));
    }

    #[test]
    #[should_panic(expected = "states must be added in order")]
    fn test_states_are_appended_in_order() {
        let mut matrix = MarkovDecisionProcess::new(16, 64);
        matrix.start_initial_distributions();
        matrix.finish_initial_distributions();
        matrix.start_new_state(3);
    }
}
