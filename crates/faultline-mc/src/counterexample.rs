//! Export and replay of paths to a state of interest.

use crate::error::{ExploreError, ExploreResult};
use crate::executed::ExecutedModel;
use faultline_model::{FaultSet, ObjectDump};
use serde::{Deserialize, Serialize};

/// A path from an initial state: the state vectors along it, the options
/// taken to reach each of them and the faults active on each transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterExample {
    pub states: Vec<Box<[u8]>>,
    /// `choices[0]` leads from the construction state to `states[0]`.
    pub choices: Vec<Vec<u32>>,
    pub fault_activations: Vec<FaultSet>,
    /// Field values of every object along the path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dumps: Vec<Vec<ObjectDump>>,
}

impl CounterExample {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn to_json(&self) -> ExploreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a counterexample and check that its per-step sequences line up.
    pub fn from_json(json: &str) -> ExploreResult<Self> {
        let counterexample: Self = serde_json::from_str(json)?;
        counterexample.check_lengths()?;
        Ok(counterexample)
    }

    fn check_lengths(&self) -> ExploreResult<()> {
        let states = self.states.len();
        if self.choices.len() != states || self.fault_activations.len() != states {
            return Err(ExploreError::MalformedCounterExample(format!(
                "{states} states, {} choice sequences and {} fault sets",
                self.choices.len(),
                self.fault_activations.len()
            )));
        }
        if !self.dumps.is_empty() && self.dumps.len() != states {
            return Err(ExploreError::MalformedCounterExample(format!(
                "{states} states but {} dumps",
                self.dumps.len()
            )));
        }
        Ok(())
    }

    /// Check that every recorded fault is declared by a model with
    /// `fault_count` faults.
    pub fn check_faults(&self, fault_count: usize) -> ExploreResult<()> {
        for (step, faults) in self.fault_activations.iter().enumerate() {
            if let Some(id) = faults.iter().find(|id| id.index() >= fault_count) {
                return Err(ExploreError::MalformedCounterExample(format!(
                    "step {step} activates fault {} but the model declares {fault_count}",
                    id.0
                )));
            }
        }
        Ok(())
    }

    /// Re-execute the path with fixed choices and return the dumps of the
    /// reached states. Fails at the first step that does not reproduce the
    /// recorded state vector or fault activations.
    pub fn replay(&self, worker: &mut ExecutedModel) -> ExploreResult<Vec<Vec<ObjectDump>>> {
        self.check_lengths()?;
        self.check_faults(worker.model().faults().len())?;

        let mut dumps = Vec::with_capacity(self.states.len());
        for (step, (expected, choices)) in self.states.iter().zip(&self.choices).enumerate() {
            let source = step.checked_sub(1).map(|previous| &*self.states[previous]);
            let reached = worker.replay(step, source, choices)?;
            if reached != *expected {
                return Err(ExploreError::ReplayMismatch {
                    step,
                    detail: "reached a different state vector".to_string(),
                });
            }
            let active = worker.transitions().get(0).faults;
            if active != self.fault_activations[step] {
                return Err(ExploreError::ReplayMismatch {
                    step,
                    detail: format!(
                        "active faults {active:?}, recorded {:?}",
                        self.fault_activations[step]
                    ),
                });
            }
            dumps.push(worker.dump()?);
        }
        Ok(dumps)
    }
}
