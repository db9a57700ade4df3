//! Criterion benchmarks for exploration and matrix queries.
//!
//! Run with: cargo bench -p faultline-mc

use criterion::{criterion_group, criterion_main, Criterion};
use faultline_mc::{ExplorationConfig, Explorer, ModelCapacity};
use faultline_model::Model;
use std::sync::Arc;

#[path = "../tests/common/mod.rs"]
mod common;

use common::{ChoiceModel, HazardModel, SensorModel};

fn bench_explore<M, F>(c: &mut Criterion, name: &str, model: F, config: ExplorationConfig)
where
    M: Model + 'static,
    F: Fn() -> M,
{
    c.bench_function(name, |b| {
        b.iter(|| {
            let mut explorer = Explorer::new(Arc::new(model()), config.clone()).unwrap();
            explorer.explore().unwrap();
        })
    });
}

fn benchmarks(c: &mut Criterion) {
    let no_parallel = ExplorationConfig {
        capacity: ModelCapacity::small(),
        parallel: false,
        ..Default::default()
    };

    let default = ExplorationConfig {
        capacity: ModelCapacity::small(),
        ..Default::default()
    };

    let unforwarded = ExplorationConfig {
        forward_optimization: false,
        ..no_parallel.clone()
    };

    // Small models: fast iteration, regression detection
    bench_explore(c, "hazard", HazardModel::new, no_parallel.clone());
    bench_explore(c, "sensor", || SensorModel::new(0.3, 0.2), no_parallel.clone());
    bench_explore(c, "sensor_unforwarded", || SensorModel::new(0.3, 0.2), unforwarded);

    // Wide nondeterminism: 2^8 successors per state
    bench_explore(c, "choices_k8", || ChoiceModel::new(8), no_parallel);
    bench_explore(c, "choices_k8_parallel", || ChoiceModel::new(8), default.clone());

    // Queries on an already built matrix
    let mut explorer = Explorer::new(Arc::new(HazardModel::new()), default).unwrap();
    explorer.explore().unwrap();
    let hazard = explorer.label("hazard").unwrap();
    c.bench_function("hazard_reachability", |b| {
        b.iter(|| explorer.reachability_probability(&hazard, None).unwrap())
    });
    c.bench_function("hazard_reachability_bounded", |b| {
        b.iter(|| explorer.reachability_probability(&hazard, Some(10)).unwrap())
    });
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
