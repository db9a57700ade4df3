//! Continuation graphs: the tree of choices taken while exploring a state.
//!
//! Each worker records the tree of one source state in a [`StepGraph`],
//! indexed by continuation id (0 is the root). When the state is done, the
//! tree is copied into the shared [`LabeledTransitionMdp`] together with the
//! transition targets its leaves point to.

use crate::arena::AppendArena;
use crate::config::ModelCapacity;
use crate::error::{ExploreError, ExploreResult, Origin, Resource};
use faultline_model::{FaultSet, LabelSet};
use std::sync::OnceLock;

/// Marks a target of a transition that was invalidated.
pub const STUTTERING_TARGET: u32 = u32::MAX;

const UNSET: u64 = u64::MAX;

/// Node type of a continuation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationKind {
    /// Children are alternatives resolved by a scheduler.
    Nondeterministic,
    /// Children partition the node's probability mass.
    Probabilistic,
    /// Single child, left over from a collapsed choice.
    Forward,
    /// Leaf; `from` is the index of a transition target.
    UnsplitOrFinal,
}

/// A node with its children `from..to`, or a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationElement {
    pub kind: ContinuationKind,
    pub from: u64,
    pub to: u64,
}

impl ContinuationElement {
    #[inline]
    pub fn leaf(target: u64) -> Self {
        Self {
            kind: ContinuationKind::UnsplitOrFinal,
            from: target,
            to: target.wrapping_add(1),
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.kind == ContinuationKind::UnsplitOrFinal
    }

    #[inline]
    pub fn target(&self) -> Option<u64> {
        (self.is_leaf() && self.from != UNSET).then_some(self.from)
    }

    #[inline]
    pub fn children(&self) -> std::ops::Range<u64> {
        if self.is_leaf() {
            0..0
        } else {
            self.from..self.to
        }
    }
}

/// Read access to continuation elements by id.
pub trait ContinuationSource {
    fn element(&self, id: u64) -> ContinuationElement;
}

/// Continuation graph of a single source state, owned by one worker.
#[derive(Debug, Clone)]
pub struct StepGraph {
    elements: Vec<ContinuationElement>,
    capacity: usize,
}

/// The step graph ran out of elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepGraphFull {
    pub capacity: usize,
}

impl StepGraph {
    pub fn new(capacity: usize) -> Self {
        let mut graph = Self {
            elements: Vec::new(),
            capacity,
        };
        graph.reset();
        graph
    }

    /// Drop all nodes; only an unresolved root remains.
    pub fn reset(&mut self) {
        self.elements.clear();
        self.elements.push(ContinuationElement::leaf(UNSET));
    }

    pub fn nondeterministic_split(
        &mut self,
        parent: usize,
        from: usize,
        to: usize,
    ) -> Result<(), StepGraphFull> {
        self.split(ContinuationKind::Nondeterministic, parent, from, to)
    }

    pub fn probabilistic_split(
        &mut self,
        parent: usize,
        from: usize,
        to: usize,
    ) -> Result<(), StepGraphFull> {
        self.split(ContinuationKind::Probabilistic, parent, from, to)
    }

    pub(crate) fn split(
        &mut self,
        kind: ContinuationKind,
        parent: usize,
        from: usize,
        to: usize,
    ) -> Result<(), StepGraphFull> {
        if to > self.capacity {
            return Err(StepGraphFull {
                capacity: self.capacity,
            });
        }
        if self.elements.len() < to {
            self.elements.resize(to, ContinuationElement::leaf(UNSET));
        }
        self.elements[parent] = ContinuationElement {
            kind,
            from: from as u64,
            to: to as u64,
        };
        Ok(())
    }

    /// Collapse the split at `parent` to its first child.
    pub fn forward(&mut self, parent: usize) {
        let element = &mut self.elements[parent];
        debug_assert!(!element.is_leaf(), "only splits can be forwarded");
        element.kind = ContinuationKind::Forward;
        element.to = element.from + 1;
    }

    pub fn set_target_of_leaf(&mut self, continuation_id: usize, target: usize) {
        debug_assert!(self.elements[continuation_id].is_leaf());
        self.elements[continuation_id] = ContinuationElement::leaf(target as u64);
    }

    pub fn elements(&self) -> &[ContinuationElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl ContinuationSource for StepGraph {
    #[inline]
    fn element(&self, id: u64) -> ContinuationElement {
        self.elements[id as usize]
    }
}

/// Visit every element reachable from `root` in depth-first order, using
/// explicit stacks of sibling ranges instead of recursion.
pub fn for_each_element<S, F>(source: &S, root: u64, mut action: F)
where
    S: ContinuationSource + ?Sized,
    F: FnMut(u64, &ContinuationElement),
{
    let mut from_stack = vec![root];
    let mut to_stack = vec![root + 1];

    while let Some(&current) = from_stack.last() {
        // Descend to the next leaf.
        let mut id = current;
        loop {
            let element = source.element(id);
            action(id, &element);
            if element.is_leaf() {
                break;
            }
            from_stack.push(element.from);
            to_stack.push(element.to);
            id = element.from;
        }

        // Move to the next sibling, popping exhausted ranges.
        while let Some(from) = from_stack.pop() {
            let next = from + 1;
            let to = *to_stack.last().expect("stacks have equal height");
            if next < to {
                from_stack.push(next);
                break;
            }
            to_stack.pop();
        }
        debug_assert_eq!(from_stack.len(), to_stack.len());
    }
}

/// Recursive counterpart of [`for_each_element`]; visits the same elements in
/// the same order. Recursion depth equals tree depth.
pub fn for_each_element_recursive<S, F>(source: &S, root: u64, action: &mut F)
where
    S: ContinuationSource + ?Sized,
    F: FnMut(u64, &ContinuationElement),
{
    let element = source.element(root);
    action(root, &element);
    for child in element.children() {
        for_each_element_recursive(source, child, action);
    }
}

/// Resolved destination of a leaf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionTarget {
    /// State index, or [`STUTTERING_TARGET`] for invalidated transitions.
    pub state: u32,
    pub labels: LabelSet,
    pub faults: FaultSet,
    /// Probability of the whole path from the source state.
    pub probability: f64,
}

impl TransitionTarget {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.state != STUTTERING_TARGET
    }
}

/// Shared store of every explored state's continuation graph and transition
/// targets.
pub struct LabeledTransitionMdp {
    elements: AppendArena<ContinuationElement>,
    targets: AppendArena<TransitionTarget>,
    roots: AppendArena<u64>,
    initial_root: OnceLock<u64>,
}

impl LabeledTransitionMdp {
    pub fn new(capacity: &ModelCapacity) -> Self {
        Self {
            elements: AppendArena::new(capacity.continuation_elements()),
            targets: AppendArena::new(capacity.transition_targets()),
            roots: AppendArena::new(capacity.max_states),
            initial_root: OnceLock::new(),
        }
    }

    /// Copy the step graph of `origin` and its transition targets into the
    /// shared arenas and register the root.
    pub fn add_step_graph(
        &self,
        origin: Origin,
        graph: &StepGraph,
        targets: &[TransitionTarget],
    ) -> ExploreResult<()> {
        let element_range = self.elements.reserve(graph.len()).ok_or_else(|| {
            ExploreError::capacity(
                Resource::ContinuationElements,
                self.elements.capacity(),
                origin,
            )
        })?;
        let target_range = self.targets.reserve(targets.len()).ok_or_else(|| {
            ExploreError::capacity(Resource::TransitionTargets, self.targets.capacity(), origin)
        })?;
        let element_base = element_range.start as u64;
        let target_base = target_range.start as u64;

        for (offset, target) in targets.iter().enumerate() {
            self.targets.set(target_range.start + offset, *target);
        }
        for (offset, element) in graph.elements().iter().enumerate() {
            let global = match element.kind {
                ContinuationKind::UnsplitOrFinal => match element.target() {
                    Some(target) => ContinuationElement::leaf(target_base + target),
                    None => ContinuationElement::leaf(UNSET),
                },
                kind => ContinuationElement {
                    kind,
                    from: element_base + element.from,
                    to: element_base + element.to,
                },
            };
            self.elements.set(element_range.start + offset, global);
        }

        match origin {
            Origin::Initial => {
                if self.initial_root.set(element_base).is_err() {
                    return Err(ExploreError::DuplicateRoot(origin));
                }
            }
            Origin::State(index) => {
                if index >= self.roots.capacity() {
                    return Err(ExploreError::capacity(
                        Resource::States,
                        self.roots.capacity(),
                        origin,
                    ));
                }
                if !self.roots.set(index, element_base) {
                    return Err(ExploreError::DuplicateRoot(origin));
                }
            }
            Origin::Matrix => {}
        }
        Ok(())
    }

    pub fn root_of_state(&self, state: usize) -> Option<u64> {
        self.roots.get(state).copied()
    }

    pub fn initial_root(&self) -> Option<u64> {
        self.initial_root.get().copied()
    }

    pub fn target(&self, index: u64) -> Option<&TransitionTarget> {
        self.targets.get(index as usize)
    }

    /// Number of stored transition targets.
    pub fn transition_targets(&self) -> usize {
        self.targets.len()
    }

    /// Number of stored continuation elements.
    pub fn continuation_elements(&self) -> usize {
        self.elements.len()
    }

    /// Whether any stored leaf points to an invalidated transition.
    pub fn has_invalid_targets(&self) -> bool {
        (0..self.targets.len()).any(|i| self.targets.get(i).is_some_and(|t| !t.is_valid()))
    }

    /// Transition targets reachable from `root`, in traversal order.
    pub fn leaves(&self, root: u64) -> Vec<TransitionTarget> {
        let mut leaves = Vec::new();
        for_each_element(self, root, |_, element| {
            if let Some(target) = element.target().and_then(|t| self.target(t)) {
                leaves.push(*target);
            }
        });
        leaves
    }
}

impl ContinuationSource for LabeledTransitionMdp {
    #[inline]
    fn element(&self, id: u64) -> ContinuationElement {
        self.elements
            .get(id as usize)
            .copied()
            .unwrap_or(ContinuationElement::leaf(UNSET))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// root: nondeterministic {1, 2}; 1: probabilistic {3, 4, 5}; 4: forward {6, 7}.
    fn sample() -> StepGraph {
        let mut graph = StepGraph::new(64);
        graph.nondeterministic_split(0, 1, 3).unwrap();
        graph.probabilistic_split(1, 3, 6).unwrap();
        graph.nondeterministic_split(4, 6, 8).unwrap();
        graph.forward(4);
        graph.set_target_of_leaf(2, 0);
        graph.set_target_of_leaf(3, 1);
        graph.set_target_of_leaf(6, 2);
        graph.set_target_of_leaf(5, 3);
        graph
    }

    #[test]
    fn test_stack_traversal_order() {
        let graph = sample();
        let mut visited = Vec::new();
        for_each_element(&graph, 0, |id, _| visited.push(id));
        assert_eq!(visited, vec![0, 1, 3, 4, 6, 5, 2]);
    }

    #[test]
    fn test_recursive_traversal_matches() {
        let graph = sample();
        let mut stack = Vec::new();
        for_each_element(&graph, 0, |id, e| stack.push((id, *e)));
        let mut recursive = Vec::new();
        for_each_element_recursive(&graph, 0, &mut |id, e: &ContinuationElement| {
            recursive.push((id, *e))
        });
        assert_eq!(stack, recursive);
    }

    #[test]
    fn test_single_leaf_root() {
        let mut graph = StepGraph::new(4);
        graph.set_target_of_leaf(0, 0);
        let mut visited = Vec::new();
        for_each_element(&graph, 0, |id, e| visited.push((id, e.target())));
        assert_eq!(visited, vec![(0, Some(0))]);
    }

    #[test]
    fn test_step_graph_capacity() {
        let mut graph = StepGraph::new(4);
        assert!(graph.nondeterministic_split(0, 1, 3).is_ok());
        assert_eq!(
            graph.probabilistic_split(1, 3, 5),
            Err(StepGraphFull { capacity: 4 })
        );
    }

    #[test]
    fn test_global_copy_rebases_ids() {
        let capacity = ModelCapacity::new(16, 8 * 64);
        let ltmdp = LabeledTransitionMdp::new(&capacity);
        let graph = sample();
        let targets: Vec<TransitionTarget> = (0..4)
            .map(|i| TransitionTarget {
                state: i,
                labels: LabelSet::EMPTY,
                faults: FaultSet::EMPTY,
                probability: 0.25,
            })
            .collect();

        ltmdp.add_step_graph(Origin::Initial, &graph, &targets).unwrap();
        ltmdp.add_step_graph(Origin::State(3), &graph, &targets).unwrap();

        assert_eq!(ltmdp.initial_root(), Some(0));
        let root = ltmdp.root_of_state(3).unwrap();
        assert_eq!(root, graph.len() as u64);
        let states: Vec<u32> = ltmdp.leaves(root).iter().map(|t| t.state).collect();
        assert_eq!(states, vec![1, 2, 3, 0]);
        assert_eq!(ltmdp.transition_targets(), 8);
        assert!(ltmdp.root_of_state(2).is_none());
    }

    #[test]
    fn test_roots_are_written_once() {
        let capacity = ModelCapacity::new(16, 8 * 64);
        let ltmdp = LabeledTransitionMdp::new(&capacity);
        let graph = sample();
        ltmdp.add_step_graph(Origin::Initial, &graph, &[]).unwrap();
        ltmdp.add_step_graph(Origin::State(5), &graph, &[]).unwrap();

        assert!(matches!(
            ltmdp.add_step_graph(Origin::Initial, &graph, &[]),
            Err(ExploreError::DuplicateRoot(Origin::Initial))
        ));
        assert!(matches!(
            ltmdp.add_step_graph(Origin::State(5), &graph, &[]),
            Err(ExploreError::DuplicateRoot(Origin::State(5)))
        ));
        assert_eq!(ltmdp.initial_root(), Some(0));
        assert_eq!(ltmdp.root_of_state(5), Some(graph.len() as u64));
    }

    #[test]
    fn test_global_capacity_is_enforced() {
        let capacity = ModelCapacity::new(16, 8 * 2);
        let ltmdp = LabeledTransitionMdp::new(&capacity);
        let graph = sample();
        ltmdp.add_step_graph(Origin::State(0), &graph, &[]).unwrap();
        let err = ltmdp
            .add_step_graph(Origin::State(1), &graph, &[])
            .unwrap_err();
        assert!(matches!(
            err,
            ExploreError::CapacityExceeded {
                resource: Resource::ContinuationElements,
                capacity: 14,
                ..
            }
        ));
    }
}
