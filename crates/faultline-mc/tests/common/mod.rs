//! Exploration settings and models shared by the integration tests.

#![allow(dead_code)]

use faultline_mc::{ExplorationConfig, ModelCapacity};

#[path = "../../src/test_models.rs"]
mod models;

pub use models::*;

pub fn sequential() -> ExplorationConfig {
    ExplorationConfig {
        capacity: ModelCapacity::small(),
        parallel: false,
        ..Default::default()
    }
}

pub fn parallel(num_threads: usize) -> ExplorationConfig {
    ExplorationConfig {
        capacity: ModelCapacity::small(),
        parallel: true,
        num_threads,
        ..Default::default()
    }
}
