#![no_main]
use faultline_mc::{state_codec, CounterExample, ExecutedModel, ExplorationConfig};
use faultline_model::{
    ComponentGraph, Fault, FaultId, Handle, IntRange, Label, Model, StateVisitor, Stateful,
    StepContext,
};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

#[derive(Clone, Debug)]
struct Tank {
    level: i64,
    overflow: bool,
}

impl Stateful for Tank {
    fn visit(&mut self, v: &mut dyn StateVisitor) {
        v.int("level", &mut self.level, IntRange::clamped(0, 7));
        v.bool("overflow", &mut self.overflow);
    }
}

struct TankModel {
    graph: ComponentGraph,
    tank: Handle<Tank>,
    faults: Vec<Fault>,
    labels: Vec<Label>,
}

impl Model for TankModel {
    fn graph(&self) -> &ComponentGraph {
        &self.graph
    }

    fn faults(&self) -> &[Fault] {
        &self.faults
    }

    fn labels(&self) -> &[Label] {
        &self.labels
    }

    fn step(&self, graph: &mut ComponentGraph, ctx: &mut StepContext<'_>) {
        let inflow = ctx.choose(3) as i64;
        let stuck = ctx.is_active(FaultId(0));
        let tank = graph.get_mut(self.tank);
        let outflow = if stuck { 0 } else { 1 };
        tank.overflow = tank.level + inflow - outflow > 7;
        tank.level = (tank.level + inflow - outflow).clamp(0, 7);
    }
}

fn model() -> Arc<dyn Model> {
    let mut graph = ComponentGraph::new();
    let tank = graph.insert_root(Tank {
        level: 0,
        overflow: false,
    });
    Arc::new(TankModel {
        graph,
        tank,
        faults: vec![Fault::permanent("valve-stuck").with_probability(0.05)],
        labels: vec![Label::new("overflow", move |g: &ComponentGraph| {
            g.get(tank).overflow
        })],
    })
}

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(counterexample) = CounterExample::from_json(json) else {
        return;
    };
    let model = model();
    let codec = Arc::new(state_codec(&*model).expect("valid fuzz model"));
    let mut worker = ExecutedModel::new(model, codec, &ExplorationConfig::default());
    // Hostile traces must be rejected, never panic.
    let _ = counterexample.replay(&mut worker);
});
