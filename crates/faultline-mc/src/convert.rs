//! Builds the sparse matrix from the continuation graphs of all states.

use crate::config::ModelCapacity;
use crate::continuation::{
    for_each_element, ContinuationElement, ContinuationKind, ContinuationSource,
    LabeledTransitionMdp,
};
use crate::error::{ExploreError, ExploreResult, Origin, Resource};
use crate::labeling::StateLabeling;
use crate::matrix::MarkovDecisionProcess;
use faultline_model::LabelSet;
use tracing::{debug, info};

type Distribution = Vec<(u32, f64)>;

/// Resolves leaves to matrix columns.
struct Columns<'a> {
    ltmdp: &'a LabeledTransitionMdp,
    stuttering: u32,
}

impl Columns<'_> {
    fn leaf(&self, element: &ContinuationElement) -> Option<(u32, f64)> {
        let target = self.ltmdp.target(element.target()?)?;
        let column = if target.is_valid() {
            target.state
        } else {
            self.stuttering
        };
        Some((column, target.probability))
    }
}

struct Pending {
    element: ContinuationElement,
    next_child: u64,
    distributions: Option<Vec<Distribution>>,
}

fn combine(
    kind: ContinuationKind,
    acc: Option<Vec<Distribution>>,
    child: Vec<Distribution>,
    max_distributions: usize,
) -> ExploreResult<Vec<Distribution>> {
    let Some(mut acc) = acc else {
        return Ok(child);
    };
    match kind {
        ContinuationKind::Probabilistic => {
            // Every resolution of the left part pairs with every resolution
            // of the right part.
            if acc.len().saturating_mul(child.len()) > max_distributions {
                return Err(ExploreError::capacity(
                    Resource::Distributions,
                    max_distributions,
                    Origin::Matrix,
                ));
            }
            let mut merged = Vec::with_capacity(acc.len() * child.len());
            for left in &acc {
                for right in &child {
                    let mut distribution = Vec::with_capacity(left.len() + right.len());
                    distribution.extend_from_slice(left);
                    distribution.extend_from_slice(right);
                    merged.push(distribution);
                }
            }
            Ok(merged)
        }
        _ => {
            acc.extend(child);
            Ok(acc)
        }
    }
}

/// Distributions of the subtree at `root`, by explicit-stack post-order
/// evaluation.
fn distributions_of_tree(
    columns: &Columns<'_>,
    root: u64,
    max_distributions: usize,
) -> ExploreResult<Vec<Distribution>> {
    let mut stack = vec![Pending {
        element: columns.ltmdp.element(root),
        next_child: 0,
        distributions: None,
    }];
    stack[0].next_child = stack[0].element.from;

    loop {
        let Some(top) = stack.last_mut() else {
            return Ok(Vec::new());
        };

        let done = if top.element.is_leaf() {
            Some(match columns.leaf(&top.element) {
                Some(entry) => vec![vec![entry]],
                None => Vec::new(),
            })
        } else if top.next_child < top.element.to {
            let child = columns.ltmdp.element(top.next_child);
            top.next_child += 1;
            stack.push(Pending {
                element: child,
                next_child: child.from,
                distributions: None,
            });
            None
        } else {
            Some(top.distributions.take().unwrap_or_default())
        };

        if let Some(result) = done {
            stack.pop();
            match stack.last_mut() {
                Some(parent) => {
                    let acc = parent.distributions.take();
                    parent.distributions =
                        Some(combine(parent.element.kind, acc, result, max_distributions)?);
                }
                None => return Ok(result),
            }
        }
    }
}

/// Distributions of one state. Trees without nondeterministic nodes collapse
/// into a single distribution with one entry per leaf.
fn state_distributions(
    columns: &Columns<'_>,
    root: u64,
    max_distributions: usize,
) -> ExploreResult<Vec<Distribution>> {
    let mut leaves = Vec::new();
    let mut nondeterministic = false;
    for_each_element(columns.ltmdp, root, |_, element| match element.kind {
        ContinuationKind::Nondeterministic => nondeterministic = true,
        ContinuationKind::UnsplitOrFinal => leaves.extend(columns.leaf(element)),
        _ => {}
    });
    if !nondeterministic {
        return Ok(vec![leaves]);
    }
    distributions_of_tree(columns, root, max_distributions)
}

fn append_group(
    matrix: &mut MarkovDecisionProcess,
    distributions: Vec<Distribution>,
    initial: bool,
) -> ExploreResult<()> {
    for distribution in distributions {
        if initial {
            matrix.start_new_initial_distribution()?;
            for (column, probability) in distribution {
                matrix.add_transition_to_initial_distribution(column, probability)?;
            }
            matrix.finish_initial_distribution();
        } else {
            matrix.start_new_distribution()?;
            for (column, probability) in distribution {
                matrix.add_transition(column, probability)?;
            }
            matrix.finish_distribution();
        }
    }
    Ok(())
}

/// Build the sealed matrix of `states` explored states. When any transition
/// was invalidated, an absorbing stuttering state is appended at index
/// `states`.
pub fn build_matrix(
    ltmdp: &LabeledTransitionMdp,
    labeling: &StateLabeling,
    states: usize,
    capacity: &ModelCapacity,
) -> ExploreResult<MarkovDecisionProcess> {
    let stuttering = ltmdp.has_invalid_targets();
    let columns = Columns {
        ltmdp,
        stuttering: states as u32,
    };
    let max_distributions = capacity.transition_targets() + capacity.max_states + 1;
    let mut matrix = MarkovDecisionProcess::new(max_distributions, capacity.max_transitions);
    debug!(states, stuttering, "building matrix");

    matrix.start_initial_distributions();
    if let Some(root) = ltmdp.initial_root() {
        let distributions = state_distributions(&columns, root, max_distributions)?;
        append_group(&mut matrix, distributions, true)?;
    }
    matrix.finish_initial_distributions();

    for state in 0..states {
        matrix.start_new_state(state);
        let root = ltmdp
            .root_of_state(state)
            .ok_or(ExploreError::Unexpanded(state))?;
        let distributions = state_distributions(&columns, root, max_distributions)?;
        append_group(&mut matrix, distributions, false)?;
        matrix.finish_state();
    }

    if stuttering {
        matrix.start_new_state(states);
        append_group(&mut matrix, vec![vec![(states as u32, 1.0)]], false)?;
        matrix.finish_state();
    }

    let mut labels: Vec<LabelSet> = (0..states).map(|s| labeling.labels(s)).collect();
    if stuttering {
        labels.push(LabelSet::EMPTY);
    }
    matrix.set_labels(labels);
    matrix.seal();

    info!(
        states = matrix.state_count(),
        distributions = matrix.distribution_count(),
        entries = matrix.entry_count(),
        deterministic = matrix.is_deterministic(),
        "matrix sealed"
    );
    Ok(matrix)
}
