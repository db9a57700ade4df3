//! Bundled demonstration models.

use faultline_model::{
    ComponentGraph, Fault, FaultEffects, FaultId, FieldFlags, Handle, IntRange, Label, Model,
    ObjectId, Reward, StateVisitor, Stateful, StepContext, Variant,
};
use std::sync::Arc;

/// Names accepted by `--model`.
pub const DEMOS: &[(&str, &str)] = &[
    (
        "hazard-step",
        "permanent fault that causes a hazard if active at a fixed step",
    ),
    (
        "redundant-sensor",
        "two voting sensors with stuck-high faults and a noisy bus",
    ),
];

pub fn by_name(name: &str) -> Option<Arc<dyn Model>> {
    match name {
        "hazard-step" => Some(Arc::new(HazardStep::new(10, 0.1))),
        "redundant-sensor" => Some(Arc::new(RedundantSensor::new())),
        _ => None,
    }
}

#[derive(Clone, Debug)]
struct Timer {
    timestep: i64,
    limit: i64,
    hazard: bool,
}

impl Stateful for Timer {
    fn visit(&mut self, v: &mut dyn StateVisitor) {
        v.int("timestep", &mut self.timestep, IntRange::clamped(0, self.limit + 1));
        v.visit_int(
            "limit",
            &mut self.limit,
            IntRange::new(0, i64::from(u16::MAX)),
            FieldFlags::READ_ONLY,
        );
        v.bool("hazard", &mut self.hazard);
    }
}

/// A hazard is raised at step `limit` if the permanent fault is active by
/// then.
pub struct HazardStep {
    graph: ComponentGraph,
    timer: Handle<Timer>,
    faults: Vec<Fault>,
    labels: Vec<Label>,
}

impl HazardStep {
    const F1: FaultId = FaultId(0);

    pub fn new(limit: i64, probability: f64) -> Self {
        let mut graph = ComponentGraph::new();
        let timer = graph.insert_root(Timer {
            timestep: 0,
            limit,
            hazard: false,
        });
        Self {
            graph,
            timer,
            faults: vec![Fault::permanent("F1").with_probability(probability)],
            labels: vec![Label::new("hazard", move |g: &ComponentGraph| {
                g.get(timer).hazard
            })],
        }
    }
}

impl Model for HazardStep {
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
        if timer.timestep == timer.limit {
            timer.hazard = ctx.is_active(Self::F1);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Mode {
    Healthy,
    StuckHigh,
}

impl Variant for Mode {
    const COUNT: u32 = 2;

    fn index(self) -> u32 {
        self as u32
    }

    fn from_index(index: u32) -> Self {
        match index {
            0 => Mode::Healthy,
            _ => Mode::StuckHigh,
        }
    }
}

const MAX_LEVEL: i64 = 3;

#[derive(Clone, Debug)]
struct Plant {
    level: i64,
}

impl Stateful for Plant {
    fn visit(&mut self, v: &mut dyn StateVisitor) {
        v.int("level", &mut self.level, IntRange::clamped(0, MAX_LEVEL));
    }
}

#[derive(Clone, Debug)]
struct Sensor {
    mode: Mode,
    reading: i64,
}

impl Stateful for Sensor {
    fn visit(&mut self, v: &mut dyn StateVisitor) {
        v.variant("mode", &mut self.mode, FieldFlags::NONE);
        v.int("reading", &mut self.reading, IntRange::clamped(0, MAX_LEVEL));
    }
}

#[derive(Clone, Debug)]
struct Voter {
    left: Option<ObjectId>,
    right: Option<ObjectId>,
    output: i64,
    degraded: bool,
}

impl Stateful for Voter {
    fn visit(&mut self, v: &mut dyn StateVisitor) {
        v.visit_ref("left", &mut self.left, FieldFlags::READ_ONLY);
        v.visit_ref("right", &mut self.right, FieldFlags::READ_ONLY);
        v.int("output", &mut self.output, IntRange::clamped(0, MAX_LEVEL));
        v.bool("degraded", &mut self.degraded);
    }
}

/// The environment moves the plant level nondeterministically; two sensors
/// measure it and a voter keeps the lower reading when they disagree. Bus
/// noise only matters while the readings disagree.
pub struct RedundantSensor {
    graph: ComponentGraph,
    plant: Handle<Plant>,
    sensors: [Handle<Sensor>; 2],
    voter: Handle<Voter>,
    effects: [FaultEffects<Mode>; 2],
    faults: Vec<Fault>,
    labels: Vec<Label>,
    rewards: Vec<Reward>,
}

impl RedundantSensor {
    const LEFT_STUCK: FaultId = FaultId(0);
    const RIGHT_STUCK: FaultId = FaultId(1);
    const BUS_NOISE: FaultId = FaultId(2);

    pub fn new() -> Self {
        let mut graph = ComponentGraph::new();
        let plant = graph.insert_root(Plant { level: 0 });
        let sensor = Sensor {
            mode: Mode::Healthy,
            reading: 0,
        };
        let left = graph.insert(sensor.clone());
        let right = graph.insert(sensor);
        let voter = graph.insert_root(Voter {
            left: Some(left.id()),
            right: Some(right.id()),
            output: 0,
            degraded: false,
        });

        let effects = [
            FaultEffects::new(Mode::Healthy).effect(Self::LEFT_STUCK, 1, Mode::StuckHigh),
            FaultEffects::new(Mode::Healthy).effect(Self::RIGHT_STUCK, 1, Mode::StuckHigh),
        ];
        Self {
            graph,
            plant,
            sensors: [left, right],
            voter,
            effects,
            faults: vec![
                Fault::permanent("left-stuck").with_probability(0.01),
                Fault::permanent("right-stuck").with_probability(0.02),
                Fault::transient("bus-noise").with_probability(0.05),
            ],
            labels: vec![
                Label::new("hazard", move |g: &ComponentGraph| {
                    g.get(voter).output != g.get(plant).level
                }),
                Label::new("degraded", move |g: &ComponentGraph| g.get(voter).degraded),
            ],
            rewards: vec![Reward::new("level", move |g: &ComponentGraph| {
                g.get(plant).level as f64
            })],
        }
    }
}

impl Model for RedundantSensor {
    fn graph(&self) -> &ComponentGraph {
        &self.graph
    }

    fn faults(&self) -> &[Fault] {
        &self.faults
    }

    fn labels(&self) -> &[Label] {
        &self.labels
    }

    fn rewards(&self) -> &[Reward] {
        &self.rewards
    }

    fn step(&self, graph: &mut ComponentGraph, ctx: &mut StepContext<'_>) {
        let delta = *ctx.choose_index_of(&[-1, 0, 1]);
        let plant = graph.get_mut(self.plant);
        plant.level = (plant.level + delta).clamp(0, MAX_LEVEL);
        let level = plant.level;

        let mut readings = [0; 2];
        let sensors = self.sensors.iter().zip(&self.effects);
        for ((handle, effects), reading) in sensors.zip(&mut readings) {
            let sensor = graph.get_mut(*handle);
            sensor.mode = effects.select(ctx);
            sensor.reading = match sensor.mode {
                Mode::Healthy => level,
                Mode::StuckHigh => MAX_LEVEL,
            };
            *reading = sensor.reading;
        }

        let voter = graph.get_mut(self.voter);
        voter.degraded = readings[0] != readings[1];
        if !voter.degraded {
            voter.output = readings[0];
        } else if !ctx.is_active(Self::BUS_NOISE) {
            voter.output = readings[0].min(readings[1]);
        }
    }
}
