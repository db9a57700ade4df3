//! The choice surface seen by model logic while a path is replayed.

use crate::fault::{Activation, Fault, FaultId, FaultSet};

/// Source of choice outcomes; implemented by the exploration engine.
///
/// The same sequence of calls with the same counts must be made every time a
/// path is replayed.
pub trait ChoiceSource {
    /// Pick one of `count` options nondeterministically.
    fn handle_choice(&mut self, count: usize) -> usize;

    /// Pick one of `count` options probabilistically. The caller follows up
    /// with [`set_probability_of_last_choice`](Self::set_probability_of_last_choice).
    fn handle_probabilistic_choice(&mut self, count: usize) -> usize;

    fn set_probability_of_last_choice(&mut self, probability: f64);

    /// Number of choices made so far on the current path.
    fn choice_count(&self) -> usize;
}

/// Per-step view onto choices and fault activations.
pub struct StepContext<'a> {
    choices: &'a mut dyn ChoiceSource,
    faults: &'a [Fault],
    persistent: FaultSet,
    active: FaultSet,
    used: FaultSet,
    fault_choices: Vec<(FaultId, usize)>,
}

impl<'a> StepContext<'a> {
    /// `persistent` holds the permanent faults already active in the source
    /// state.
    pub fn new(choices: &'a mut dyn ChoiceSource, faults: &'a [Fault], persistent: FaultSet) -> Self {
        Self {
            choices,
            faults,
            persistent,
            active: persistent,
            used: FaultSet::EMPTY,
            fault_choices: Vec::new(),
        }
    }

    /// Decide the activation of every fault for this step, in declaration
    /// order.
    pub fn activate_faults(&mut self) {
        for (i, fault) in self.faults.iter().enumerate() {
            let id = FaultId(i as u8);
            if self.persistent.contains(id) {
                continue;
            }
            let active = match fault.activation {
                Activation::Forced => true,
                Activation::Suppressed => false,
                Activation::Nondeterministic => match fault.probability {
                    Some(p) if p <= 0.0 => false,
                    Some(p) if p >= 1.0 => true,
                    Some(p) => {
                        let index = self.choices.choice_count();
                        self.fault_choices.push((id, index));
                        self.choose_with_probabilities(&[1.0 - p, p]) == 1
                    }
                    None => {
                        let index = self.choices.choice_count();
                        self.fault_choices.push((id, index));
                        self.choices.handle_choice(2) == 1
                    }
                },
            };
            if active {
                self.active.insert(id);
            }
        }
    }

    /// Pick one of `count` options nondeterministically.
    pub fn choose(&mut self, count: usize) -> usize {
        assert!(count > 0, "a choice needs at least one option");
        if count == 1 {
            return 0;
        }
        self.choices.handle_choice(count)
    }

    pub fn choose_index_of<'t, T>(&mut self, options: &'t [T]) -> &'t T {
        &options[self.choose(options.len())]
    }

    /// Pick an index with the given probabilities, which should sum to 1.
    pub fn choose_with_probabilities(&mut self, probabilities: &[f64]) -> usize {
        assert!(!probabilities.is_empty(), "a choice needs at least one option");
        if probabilities.len() == 1 {
            return 0;
        }
        let index = self.choices.handle_probabilistic_choice(probabilities.len());
        self.choices
            .set_probability_of_last_choice(probabilities[index]);
        index
    }

    pub fn choose_bernoulli(&mut self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.choose_with_probabilities(&[1.0 - probability, probability]) == 1
    }

    /// Whether `fault` is active in this step. Marks the fault as used.
    pub fn is_active(&mut self, fault: FaultId) -> bool {
        self.used.insert(fault);
        self.active.contains(fault)
    }

    pub fn active_faults(&self) -> FaultSet {
        self.active
    }

    pub fn used_faults(&self) -> FaultSet {
        self.used
    }

    /// Active permanent faults, which outlive this step.
    pub fn persistent_faults(&self) -> FaultSet {
        let mut set = self.persistent;
        for id in self.active.iter() {
            if self.faults[id.index()].is_permanent() {
                set.insert(id);
            }
        }
        set
    }

    /// Activation choices made in this step: the fault and the index of its
    /// choice on the path.
    pub fn fault_choices(&self) -> &[(FaultId, usize)] {
        &self.fault_choices
    }

    pub fn faults(&self) -> &[Fault] {
        self.faults
    }

    /// End the step and release the choice source.
    pub fn finish(self) -> StepOutcome {
        StepOutcome {
            active: self.active,
            used: self.used,
            persistent: self.persistent_faults(),
            fault_choices: self.fault_choices,
        }
    }
}

/// Fault bookkeeping of a completed step.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub active: FaultSet,
    pub used: FaultSet,
    /// Header of the successor state.
    pub persistent: FaultSet,
    pub fault_choices: Vec<(FaultId, usize)>,
}
