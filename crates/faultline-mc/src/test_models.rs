//! Small models shared by the unit tests, the integration tests and the
//! benchmarks. Integration targets include this file through `#[path]`.

#![allow(dead_code)]

use faultline_model::{
    ComponentGraph, Fault, FaultId, FieldFlags, Handle, IntRange, Label, Model, StateVisitor,
    Stateful, StepContext,
};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Debug)]
pub struct Timer {
    pub timestep: i64,
    pub hazard: bool,
}

impl Stateful for Timer {
    fn visit(&mut self, v: &mut dyn StateVisitor) {
        v.int("timestep", &mut self.timestep, IntRange::clamped(0, 11));
        v.bool("hazard", &mut self.hazard);
    }
}

/// Permanent fault F1 with probability 0.1 per step; the hazard is raised
/// at step 10 if F1 is active by then.
pub struct HazardModel {
    graph: ComponentGraph,
    pub timer: Handle<Timer>,
    faults: Vec<Fault>,
    labels: Vec<Label>,
}

impl HazardModel {
    pub const F1: FaultId = FaultId(0);

    pub fn new() -> Self {
        let mut graph = ComponentGraph::new();
        let timer = graph.insert_root(Timer {
            timestep: 0,
            hazard: false,
        });
        Self {
            graph,
            timer,
            faults: vec![Fault::permanent("F1").with_probability(0.1)],
            labels: vec![Label::new("hazard", move |g: &ComponentGraph| {
                g.get(timer).hazard
            })],
        }
    }

    /// F1 gets one chance in the initial step and ten more before step 10.
    pub fn expected_probability() -> f64 {
        1.0 - 0.9f64.powi(11)
    }
}

impl Model for HazardModel {
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
        let timer = graph.get_mut(self.timer);
        timer.timestep += 1;
        if timer.timestep == 10 {
            timer.hazard = ctx.is_active(Self::F1);
        }
    }
}

#[derive(Clone, Debug)]
pub struct Sensor {
    pub measuring: bool,
    pub reading: i64,
    pub alarm: bool,
}

impl Stateful for Sensor {
    fn visit(&mut self, v: &mut dyn StateVisitor) {
        v.bool("measuring", &mut self.measuring);
        v.int("reading", &mut self.reading, IntRange::clamped(0, 3));
        v.bool("alarm", &mut self.alarm);
    }
}

/// Sensor alternating between idle and measuring steps. Drift shifts every
/// reading by one, a glitch saturates it, and measurements carry a small
/// amount of noise.
pub struct SensorModel {
    graph: ComponentGraph,
    sensor: Handle<Sensor>,
    faults: Vec<Fault>,
    labels: Vec<Label>,
}

impl SensorModel {
    pub const DRIFT: FaultId = FaultId(0);
    pub const GLITCH: FaultId = FaultId(1);

    pub fn new(drift: f64, glitch: f64) -> Self {
        let mut graph = ComponentGraph::new();
        let sensor = graph.insert_root(Sensor {
            measuring: false,
            reading: 0,
            alarm: false,
        });
        Self {
            graph,
            sensor,
            faults: vec![
                Fault::transient("drift").with_probability(drift),
                Fault::transient("glitch").with_probability(glitch),
            ],
            labels: vec![Label::new("alarm", move |g: &ComponentGraph| {
                g.get(sensor).alarm
            })],
        }
    }
}

impl Model for SensorModel {
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
        let offset = i64::from(ctx.is_active(Self::DRIFT));
        let measuring = graph.get(self.sensor).measuring;
        let reading = if !measuring {
            None
        } else if ctx.is_active(Self::GLITCH) {
            Some(3)
        } else {
            Some(offset + i64::from(ctx.choose_bernoulli(0.1)))
        };
        let sensor = graph.get_mut(self.sensor);
        if let Some(reading) = reading {
            sensor.reading = reading;
        }
        sensor.measuring = !sensor.measuring;
        sensor.alarm = sensor.reading == 3;
    }
}

#[derive(Clone, Debug)]
pub struct Bits {
    pub values: Vec<bool>,
}

impl Stateful for Bits {
    fn visit(&mut self, v: &mut dyn StateVisitor) {
        v.visit_bool_array("values", &mut self.values, FieldFlags::NONE);
    }
}

/// Sets each of `k` bits by an independent nondeterministic choice.
pub struct ChoiceModel {
    graph: ComponentGraph,
    bits: Handle<Bits>,
    labels: Vec<Label>,
}

impl ChoiceModel {
    pub fn new(k: usize) -> Self {
        let mut graph = ComponentGraph::new();
        let bits = graph.insert_root(Bits {
            values: vec![false; k],
        });
        Self {
            graph,
            bits,
            labels: vec![Label::new("all_set", move |g: &ComponentGraph| {
                g.get(bits).values.iter().all(|&b| b)
            })],
        }
    }
}

impl Model for ChoiceModel {
    fn graph(&self) -> &ComponentGraph {
        &self.graph
    }

    fn labels(&self) -> &[Label] {
        &self.labels
    }

    fn step(&self, graph: &mut ComponentGraph, ctx: &mut StepContext<'_>) {
        let count = graph.get(self.bits).values.len();
        let chosen: Vec<bool> = (0..count).map(|_| ctx.choose(2) == 1).collect();
        graph.get_mut(self.bits).values = chosen;
    }
}

#[derive(Clone, Debug)]
pub struct Counter {
    pub value: i64,
}

impl Stateful for Counter {
    fn visit(&mut self, v: &mut dyn StateVisitor) {
        v.int("value", &mut self.value, IntRange::wrapping(0, 4));
    }
}

/// Counts modulo 5 without faults or choices.
pub struct CounterModel {
    graph: ComponentGraph,
    counter: Handle<Counter>,
}

impl CounterModel {
    pub fn new() -> Self {
        let mut graph = ComponentGraph::new();
        let counter = graph.insert_root(Counter { value: 0 });
        Self { graph, counter }
    }
}

impl Model for CounterModel {
    fn graph(&self) -> &ComponentGraph {
        &self.graph
    }

    fn step(&self, graph: &mut ComponentGraph, _ctx: &mut StepContext<'_>) {
        graph.get_mut(self.counter).value += 1;
    }
}

/// Offers a different number of options on the second call of `step`.
pub struct ImpureModel {
    graph: ComponentGraph,
    counter: Handle<Counter>,
    calls: AtomicUsize,
}

impl ImpureModel {
    pub fn new() -> Self {
        let mut graph = ComponentGraph::new();
        let counter = graph.insert_root(Counter { value: 0 });
        Self {
            graph,
            counter,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Model for ImpureModel {
    fn graph(&self) -> &ComponentGraph {
        &self.graph
    }

    fn step(&self, graph: &mut ComponentGraph, ctx: &mut StepContext<'_>) {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let first = ctx.choose(2) as i64;
        let second = ctx.choose(if call == 0 { 2 } else { 3 }) as i64;
        graph.get_mut(self.counter).value += first + second;
    }
}
