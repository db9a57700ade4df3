//! The model interface consumed by the exploration engine.

use crate::error::{ConstructionError, ConstructionResult};
use crate::fault::{validate_faults, Fault, FaultId};
use crate::graph::ComponentGraph;
use crate::label::{Label, Reward, MAX_LABELS};
use crate::step::StepContext;

/// A component-based reactive model.
///
/// The engine clones [`graph`](Model::graph) once per worker and from then on
/// only overwrites its serialized fields, so `initialize` and `step` must be
/// pure functions of the graph state and the choices they receive.
pub trait Model: Send + Sync {
    /// The prototype graph in its construction state.
    fn graph(&self) -> &ComponentGraph;

    fn faults(&self) -> &[Fault] {
        &[]
    }

    fn labels(&self) -> &[Label] {
        &[]
    }

    fn rewards(&self) -> &[Reward] {
        &[]
    }

    /// Logic of the initial transitions, run on the construction state.
    fn initialize(&self, _graph: &mut ComponentGraph, _ctx: &mut StepContext<'_>) {}

    /// One discrete update step.
    fn step(&self, graph: &mut ComponentGraph, ctx: &mut StepContext<'_>);

    fn fault_id(&self, name: &str) -> Option<FaultId> {
        self.faults()
            .iter()
            .position(|fault| fault.name == name)
            .map(|i| FaultId(i as u8))
    }

    fn label_index(&self, name: &str) -> Option<usize> {
        self.labels().iter().position(|label| label.name() == name)
    }
}

/// Check the declarations of `model` that do not depend on the graph shape.
pub fn validate_model(model: &dyn Model) -> ConstructionResult<()> {
    validate_faults(model.faults())?;
    let labels = model.labels().len();
    if labels > MAX_LABELS {
        return Err(ConstructionError::TooManyLabels {
            count: labels,
            max: MAX_LABELS,
        });
    }
    if model.graph().roots().is_empty() {
        return Err(ConstructionError::NoRoots);
    }
    Ok(())
}
