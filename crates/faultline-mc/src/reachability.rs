//! Reachability probabilities on a sealed matrix.

use crate::config::Convergence;
use crate::matrix::MarkovDecisionProcess;
use faultline_model::LabelSet;
use std::collections::VecDeque;
use tracing::debug;

/// Boolean formula over state labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposition {
    True,
    Label(usize),
    Not(Box<Proposition>),
    And(Box<Proposition>, Box<Proposition>),
    Or(Box<Proposition>, Box<Proposition>),
}

impl Proposition {
    pub fn label(index: usize) -> Self {
        Proposition::Label(index)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Proposition::Not(Box::new(self))
    }

    pub fn and(self, other: Proposition) -> Self {
        Proposition::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Proposition) -> Self {
        Proposition::Or(Box::new(self), Box::new(other))
    }

    pub fn evaluate(&self, labels: LabelSet) -> bool {
        match self {
            Proposition::True => true,
            Proposition::Label(index) => labels.contains(*index),
            Proposition::Not(inner) => !inner.evaluate(labels),
            Proposition::And(a, b) => a.evaluate(labels) && b.evaluate(labels),
            Proposition::Or(a, b) => a.evaluate(labels) || b.evaluate(labels),
        }
    }
}

/// How nondeterminism is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Optimum {
    Min,
    #[default]
    Max,
}

impl Optimum {
    #[inline]
    fn pick(self, a: f64, b: f64) -> f64 {
        match self {
            Optimum::Min => a.min(b),
            Optimum::Max => a.max(b),
        }
    }

    #[inline]
    fn start(self) -> f64 {
        match self {
            Optimum::Min => f64::INFINITY,
            Optimum::Max => f64::NEG_INFINITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReachabilityResult {
    /// Probability from the initial distributions.
    pub probability: f64,
    /// Probability per state.
    pub values: Vec<f64>,
    pub iterations: usize,
    /// Always true for bounded queries.
    pub converged: bool,
}

/// Optimal expected value of `values` over a group of distributions. Groups
/// without distributions are worth 0.
fn best<'a, I>(distributions: I, values: &[f64], optimum: Optimum) -> f64
where
    I: Iterator<Item = &'a [crate::matrix::MatrixEntry]>,
{
    let mut result = optimum.start();
    let mut any = false;
    for distribution in distributions {
        let value: f64 = distribution
            .iter()
            .map(|e| e.probability * values[e.column as usize])
            .sum();
        result = optimum.pick(result, value);
        any = true;
    }
    if any {
        result
    } else {
        0.0
    }
}

/// States from which the target is reached with probability 0 under the
/// optimum. Max: states that cannot reach the target at all. Min: states
/// where some choice avoids the target forever.
fn probability_zero(matrix: &MarkovDecisionProcess, target: &[bool], optimum: Optimum) -> Vec<bool> {
    let n = matrix.state_count();
    match optimum {
        Optimum::Max => {
            let mut predecessors: Vec<Vec<u32>> = vec![Vec::new(); n];
            for state in 0..n {
                for distribution in matrix.distributions_of(state) {
                    for entry in distribution.iter().filter(|e| e.probability > 0.0) {
                        predecessors[entry.column as usize].push(state as u32);
                    }
                }
            }
            let mut reaches = target.to_vec();
            let mut queue: VecDeque<usize> = (0..n).filter(|&s| target[s]).collect();
            while let Some(state) = queue.pop_front() {
                for &p in &predecessors[state] {
                    if !reaches[p as usize] {
                        reaches[p as usize] = true;
                        queue.push_back(p as usize);
                    }
                }
            }
            reaches.iter().map(|r| !r).collect()
        }
        Optimum::Min => {
            // Greatest fixpoint: keep non-target states that have a
            // distribution staying inside the set.
            let mut zero: Vec<bool> = target.iter().map(|t| !t).collect();
            let mut changed = true;
            while changed {
                changed = false;
                for state in 0..n {
                    if !zero[state] {
                        continue;
                    }
                    let stays = matrix.distributions_of(state).any(|d| {
                        d.iter()
                            .filter(|e| e.probability > 0.0)
                            .all(|e| zero[e.column as usize])
                    });
                    if !stays {
                        zero[state] = false;
                        changed = true;
                    }
                }
            }
            zero
        }
    }
}

/// Probability of reaching a state satisfying `target`, within `bound` steps
/// after the initial states when given.
pub fn reachability(
    matrix: &MarkovDecisionProcess,
    target: &Proposition,
    bound: Option<usize>,
    optimum: Optimum,
    convergence: &Convergence,
) -> ReachabilityResult {
    let n = matrix.state_count();
    let is_target: Vec<bool> = (0..n).map(|s| target.evaluate(matrix.labels(s))).collect();
    let mut values: Vec<f64> = is_target.iter().map(|&t| if t { 1.0 } else { 0.0 }).collect();
    let mut next = values.clone();

    let (iterations, converged) = match bound {
        Some(bound) => {
            for _ in 0..bound {
                for state in 0..n {
                    if !is_target[state] {
                        next[state] = best(matrix.distributions_of(state), &values, optimum);
                    }
                }
                std::mem::swap(&mut values, &mut next);
            }
            (bound, true)
        }
        None => {
            let zero = probability_zero(matrix, &is_target, optimum);
            let undecided: Vec<usize> = (0..n).filter(|&s| !is_target[s] && !zero[s]).collect();
            let mut iterations = 0;
            let mut converged = undecided.is_empty();
            while !converged && iterations < convergence.max_iterations {
                iterations += 1;
                let mut delta = 0.0f64;
                for &state in &undecided {
                    let value = best(matrix.distributions_of(state), &values, optimum);
                    delta = delta.max((value - values[state]).abs());
                    next[state] = value;
                }
                for &state in &undecided {
                    values[state] = next[state];
                }
                converged = delta <= convergence.epsilon;
            }
            (iterations, converged)
        }
    };

    let probability = best(matrix.initial_distributions(), &values, optimum);
    debug!(
        states = n,
        ?bound,
        ?optimum,
        iterations,
        converged,
        probability,
        "reachability computed"
    );
    ReachabilityResult {
        probability,
        values,
        iterations,
        converged,
    }
}
