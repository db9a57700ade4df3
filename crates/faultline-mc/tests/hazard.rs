//! The hazard scenario end to end: a permanent fault that must be active
//! by step 10 for the hazard to be raised.

mod common;

use common::{parallel, sequential, HazardModel};
use faultline_mc::{
    CounterExample, ExplorationConfig, ExploreError, Explorer, Optimum, Proposition,
    TerminateAtLabel,
};
use faultline_model::{FaultId, FaultSet};
use std::sync::Arc;

const TOLERANCE: f64 = 1e-5;

fn explored(config: ExplorationConfig) -> Explorer {
    let mut explorer = Explorer::new(Arc::new(HazardModel::new()), config).unwrap();
    explorer.explore().unwrap();
    explorer
}

fn tracked() -> ExplorationConfig {
    ExplorationConfig {
        track_predecessors: true,
        ..parallel(2)
    }
}

#[test]
fn test_unbounded_probability() {
    let explorer = explored(parallel(0));
    let hazard = explorer.label("hazard").unwrap();
    let max = explorer.reachability(&hazard, None, Optimum::Max).unwrap();
    let min = explorer.reachability(&hazard, None, Optimum::Min).unwrap();
    assert!(max.converged);
    assert!((max.probability - HazardModel::expected_probability()).abs() < TOLERANCE);
    assert!((max.probability - min.probability).abs() < 1e-12);
}

#[test]
fn test_bounded_probability() {
    let explorer = explored(sequential());
    let hazard = explorer.label("hazard").unwrap();
    let expected = HazardModel::expected_probability();

    for bound in [10, 11, 50] {
        let p = explorer.reachability_probability(&hazard, Some(bound)).unwrap();
        assert!((p - expected).abs() < TOLERANCE, "bound {bound}: {p}");
    }
    assert_eq!(explorer.reachability_probability(&hazard, Some(9)).unwrap(), 0.0);
    assert_eq!(explorer.reachability_probability(&hazard, Some(0)).unwrap(), 0.0);
}

#[test]
fn test_terminating_at_the_hazard() {
    let hazard = Proposition::label(0);
    let mut explorer = Explorer::new(Arc::new(HazardModel::new()), sequential())
        .unwrap()
        .with_modifier(TerminateAtLabel::new(hazard.clone()));
    let stats = explorer.explore().unwrap();

    // The hazard state at step 11 is cut off and replaced by the stuttering
    // state.
    assert_eq!(stats.states, 24);
    assert!(stats.stuttering);
    assert_eq!(explorer.sealed_matrix().unwrap().state_count(), 25);

    let p = explorer.reachability_probability(&hazard, None).unwrap();
    assert!((p - HazardModel::expected_probability()).abs() < TOLERANCE);
    let never = explorer
        .reachability_probability(&hazard.not(), Some(0))
        .unwrap();
    assert!((never - 1.0).abs() < 1e-12);
}

#[test]
fn test_counterexample_reaches_the_hazard() {
    let explorer = explored(tracked());
    let hazard = explorer.label("hazard").unwrap();
    let counterexample = explorer.counterexample(&hazard).unwrap().unwrap();

    // Initial state plus ten steps.
    assert_eq!(counterexample.len(), 11);
    assert_eq!(counterexample.choices.len(), 11);
    assert_eq!(counterexample.dumps.len(), 11);
    assert!(counterexample
        .fault_activations
        .last()
        .unwrap()
        .contains(HazardModel::F1));

    let last = &counterexample.dumps[10][0];
    let field = |name: &str| {
        last.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.clone())
    };
    assert_eq!(field("timestep").as_deref(), Some("10"));
    assert_eq!(field("hazard").as_deref(), Some("true"));
}

#[test]
fn test_counterexample_json_and_replay() {
    let explorer = explored(tracked());
    let hazard = explorer.label("hazard").unwrap();
    let counterexample = explorer.counterexample(&hazard).unwrap().unwrap();

    let json = counterexample.to_json().unwrap();
    let parsed = CounterExample::from_json(&json).unwrap();
    assert_eq!(parsed, counterexample);

    let mut worker = explorer.replay_worker();
    let dumps = parsed.replay(&mut worker).unwrap();
    assert_eq!(dumps, counterexample.dumps);

    let mut tampered = parsed.clone();
    let last = tampered.states[3].len() - 1;
    tampered.states[3][last] ^= 0x01;
    let err = tampered.replay(&mut explorer.replay_worker()).unwrap_err();
    assert!(matches!(err, ExploreError::ReplayMismatch { step: 3, .. }), "{err}");

    assert!(matches!(
        CounterExample::from_json("{\"states\": 3}"),
        Err(ExploreError::Json(_))
    ));
}

#[test]
fn test_counterexample_with_undeclared_or_wrong_faults() {
    let explorer = explored(tracked());
    let hazard = explorer.label("hazard").unwrap();
    let counterexample = explorer.counterexample(&hazard).unwrap().unwrap();

    let mut undeclared = counterexample.clone();
    undeclared.fault_activations[2].insert(FaultId(5));
    let err = undeclared.replay(&mut explorer.replay_worker()).unwrap_err();
    assert!(matches!(err, ExploreError::MalformedCounterExample(_)), "{err}");

    let mut dropped = counterexample.clone();
    dropped.fault_activations[10] = FaultSet::EMPTY;
    let err = dropped.replay(&mut explorer.replay_worker()).unwrap_err();
    assert!(matches!(err, ExploreError::ReplayMismatch { step: 10, .. }), "{err}");

    let mut short = counterexample;
    short.fault_activations.pop();
    let json = short.to_json().unwrap();
    assert!(matches!(
        CounterExample::from_json(&json),
        Err(ExploreError::MalformedCounterExample(_))
    ));
}

#[test]
fn test_counterexample_preconditions() {
    let explorer = Explorer::new(Arc::new(HazardModel::new()), tracked()).unwrap();
    let hazard = Proposition::label(0);
    assert!(matches!(
        explorer.counterexample(&hazard),
        Err(ExploreError::NotExplored)
    ));

    let explorer = explored(sequential());
    assert!(matches!(
        explorer.counterexample(&hazard),
        Err(ExploreError::PredecessorsNotTracked)
    ));

    let explorer = explored(tracked());
    let unsatisfiable = hazard.clone().and(hazard.not());
    assert!(explorer.counterexample(&unsatisfiable).unwrap().is_none());
}

#[test]
fn test_parallel_and_sequential_agree() {
    let a = explored(sequential());
    let b = explored(parallel(4));
    let hazard = Proposition::label(0);
    let pa = a.reachability_probability(&hazard, None).unwrap();
    let pb = b.reachability_probability(&hazard, None).unwrap();
    assert!((pa - pb).abs() < 1e-12);
    assert_eq!(a.store().len(), 25);
    assert_eq!(b.store().len(), 25);
}
