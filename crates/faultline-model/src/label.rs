//! State labels and reward retrievers.

use crate::graph::ComponentGraph;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Maximum number of labels a model may declare.
pub const MAX_LABELS: usize = 32;

type Predicate = Arc<dyn Fn(&ComponentGraph) -> bool + Send + Sync>;
type Retriever = Arc<dyn Fn(&ComponentGraph) -> f64 + Send + Sync>;

/// A named boolean predicate over the model state.
#[derive(Clone)]
pub struct Label {
    name: String,
    predicate: Predicate,
}

impl Label {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&ComponentGraph) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn evaluate(&self, graph: &ComponentGraph) -> bool {
        (self.predicate)(graph)
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Label").field(&self.name).finish()
    }
}

/// A named numeric quantity read from the model state.
#[derive(Clone)]
pub struct Reward {
    name: String,
    retriever: Retriever,
}

impl Reward {
    pub fn new<F>(name: impl Into<String>, retriever: F) -> Self
    where
        F: Fn(&ComponentGraph) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            retriever: Arc::new(retriever),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn evaluate(&self, graph: &ComponentGraph) -> f64 {
        (self.retriever)(graph)
    }
}

impl fmt::Debug for Reward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reward").field(&self.name).finish()
    }
}

/// The labels that hold in a state, one bit per label index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LabelSet(u32);

impl LabelSet {
    pub const EMPTY: LabelSet = LabelSet(0);

    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        LabelSet(bits)
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn contains(self, label: usize) -> bool {
        label < MAX_LABELS && self.0 & (1 << label) != 0
    }

    #[inline]
    pub fn insert(&mut self, label: usize) {
        debug_assert!(label < MAX_LABELS);
        self.0 |= 1 << label;
    }

    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..MAX_LABELS).filter(move |&i| self.0 & (1 << i) != 0)
    }

    /// Evaluate every label against `graph`.
    pub fn evaluate(labels: &[Label], graph: &ComponentGraph) -> LabelSet {
        let mut set = LabelSet::EMPTY;
        for (i, label) in labels.iter().enumerate().take(MAX_LABELS) {
            if label.evaluate(graph) {
                set.insert(i);
            }
        }
        set
    }
}

impl fmt::Debug for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LabelSet({:#b})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_set_evaluation() {
        let labels = vec![
            Label::new("always", |_| true),
            Label::new("never", |_| false),
            Label::new("empty", |g: &ComponentGraph| g.is_empty()),
        ];
        let set = LabelSet::evaluate(&labels, &ComponentGraph::new());
        assert!(set.contains(0));
        assert!(!set.contains(1));
        assert!(set.contains(2));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 2]);
        assert!(!set.contains(40));
    }
}
