//! Integration tests for scheduling within one thread
//!
//! These tests validate:
//! - Dependency order within a trigger's fan-out
//! - Reactive propagation to triggered-mode steps
//! - Fault and panic containment per step
//! - Feedback loops through stale-tolerant inputs
//! - Downstream trigger propagation

mod common;

use common::builders::{constant, constant_gain, gain, recorder, ParamsBuilder};
use common::probes::{probe_log, CountingProbe, Counters, FailingProbe, PanickingProbe, RecordingProbe};
use proptest::prelude::*;
use std::sync::Arc;
use stepflow::graph::steps::RecorderStep;
use stepflow::{DataValue, Group, StepState};

#[test]
fn test_listener_chain_sees_same_tick_values() {
    let group = Group::new("chain");
    let log = probe_log();
    // consumer registered before its producer
    let sink = group.add_step("sink", RecordingProbe::new("sink", &log)).unwrap();
    let (source, g) = constant_gain(&group, 1.5, 2.0);
    group.connect(g, "out", sink, "in").unwrap();

    let t = group.create_trigger("tick").unwrap();
    group.attach(t, source).unwrap();

    let report = group.fire(t).unwrap();
    assert_eq!(report.computed, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(group.plan_of(t).unwrap().step_ids(), vec![source, g, sink]);

    let records = log.lock().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].input, Some(3.0));
}

#[test]
fn test_diamond_runs_join_once() {
    let group = Group::new("diamond");
    let a = constant(&group, "a", 1.0);
    let b = gain(&group, "b", 2.0);
    let c = gain(&group, "c", 10.0);
    let join = group.create_step("join", "sum", &ParamsBuilder::new().build()).unwrap();
    group.connect(a, "out", b, "in").unwrap();
    group.connect(a, "out", c, "in").unwrap();
    group.connect(b, "out", join, "a").unwrap();
    group.connect(c, "out", join, "b").unwrap();

    let t = group.create_trigger("tick").unwrap();
    group.attach(t, a).unwrap();
    let report = group.fire(t).unwrap();

    assert_eq!(report.computed, 4);
    assert_eq!(group.step_status(join).unwrap().computations, 1);
    assert_eq!(
        group.output_value(join, "out").unwrap().as_deref(),
        Some(&DataValue::Float(12.0))
    );
}

#[test]
fn test_failing_step_does_not_stop_its_siblings() {
    common::init_test_logging();
    let group = Group::new("faults");
    let counters = Arc::new(Counters::default());
    let bad = group.add_step("bad", FailingProbe::new(1)).unwrap();
    let good = group.add_step("good", CountingProbe::new(&counters)).unwrap();
    let t = group.create_trigger("tick").unwrap();
    group.attach(t, bad).unwrap();
    group.attach(t, good).unwrap();

    let first = group.fire(t).unwrap();
    assert_eq!((first.computed, first.failed), (2, 0));

    let second = group.fire(t).unwrap();
    assert_eq!((second.computed, second.failed), (1, 1));
    let status = group.step_status(bad).unwrap();
    assert_eq!(status.state, StepState::Exception);
    assert!(status.last_error.unwrap().contains("probe failure #2"));

    // a faulted step is skipped until reset
    let third = group.fire(t).unwrap();
    assert_eq!((third.computed, third.skipped), (1, 1));
    assert_eq!(counters.computes(), 3);
    assert_eq!(group.step_status(bad).unwrap().skipped, 1);

    assert!(group.reset_step(bad).unwrap());
    assert!(!group.reset_step(bad).unwrap());
    assert_eq!(group.step_status(bad).unwrap().state, StepState::Stopped);
}

#[test]
fn test_panicking_step_is_contained() {
    common::init_test_logging();
    let group = Group::new("panics");
    let boom = group.add_step("boom", PanickingProbe).unwrap();
    let log = probe_log();
    let after = group.add_step("after", RecordingProbe::new("after", &log)).unwrap();
    let t = group.create_trigger("tick").unwrap();
    group.attach(t, boom).unwrap();
    group.attach(t, after).unwrap();

    let events = group.events();
    let report = group.fire(t).unwrap();
    assert_eq!((report.computed, report.failed), (1, 1));
    assert_eq!(log.lock().len(), 1);

    let status = group.step_status(boom).unwrap();
    assert_eq!(status.state, StepState::Exception);
    assert!(status.last_error.unwrap().contains("probe exploded"));
    assert!(events
        .try_iter()
        .any(|e| matches!(e, stepflow::GraphEvent::StepFaulted { step, .. } if step == boom)));
}

#[test]
fn test_feedback_loop_accumulates_previous_tick() {
    let group = Group::new("accumulator");
    let one = constant(&group, "one", 1.0);
    let sum = group.create_step("sum", "sum", &ParamsBuilder::new().build()).unwrap();
    let delay = group
        .create_step("delay", "unit_delay", &ParamsBuilder::new().float("initial", 0.0).build())
        .unwrap();
    group.connect(one, "out", sum, "a").unwrap();
    group.connect(delay, "out", sum, "b").unwrap();
    group.connect(sum, "out", delay, "in").unwrap();

    let report = group.check();
    assert!(report.is_clean(), "{:?}", report.findings);
    assert_eq!(report.feedback_edges.len(), 1);

    for _ in 0..5 {
        let fired = group.compute(0.1);
        assert_eq!(fired.failed, 0);
    }
    assert_eq!(
        group.output_value(sum, "out").unwrap().as_deref(),
        Some(&DataValue::Float(5.0))
    );
}

#[test]
fn test_downstream_triggers_fire_once_even_in_a_cycle() {
    let group = Group::new("cascade");
    let a = Arc::new(Counters::default());
    let b = Arc::new(Counters::default());
    let sa = group.add_step("a", CountingProbe::new(&a)).unwrap();
    let sb = group.add_step("b", CountingProbe::new(&b)).unwrap();
    let t1 = group.create_trigger("t1").unwrap();
    let t2 = group.create_trigger("t2").unwrap();
    group.attach(t1, sa).unwrap();
    group.attach(t2, sb).unwrap();
    group.connect_triggers(t1, t2).unwrap();
    group.connect_triggers(t2, t1).unwrap();

    let report = group.fire(t1).unwrap();
    assert_eq!(report.triggers_fired, 2);
    assert_eq!((a.computes(), b.computes()), (1, 1));

    assert!(group.disconnect_triggers(t2, t1).unwrap());
    assert!(!group.disconnect_triggers(t2, t1).unwrap());
    group.fire(t2).unwrap();
    assert_eq!((a.computes(), b.computes()), (1, 2));
}

#[test]
fn test_recorder_keeps_simulated_time() {
    let group = Group::new("recording");
    let c = constant(&group, "c", 4.0);
    let rec = recorder(&group, "rec", 3);
    group.connect(c, "out", rec, "in").unwrap();

    for _ in 0..5 {
        group.compute(0.5);
    }
    let (len, total, last_time) = group
        .inspect_step(rec, |step| {
            let rec = step.downcast_ref::<RecorderStep>().unwrap();
            (rec.len(), rec.total(), rec.last().map(|s| s.time))
        })
        .unwrap();
    assert_eq!((len, total), (3, 5));
    assert_eq!(last_time, Some(2.0));
}

#[test]
fn test_removed_step_leaves_no_dangling_edges() {
    let group = Group::new("removal");
    let (source, g) = constant_gain(&group, 1.0, 2.0);
    let counters = Arc::new(Counters::default());
    let sink = group.add_step("sink", CountingProbe::new(&counters)).unwrap();
    group.connect(g, "out", sink, "in").unwrap();
    let t = group.create_trigger("tick").unwrap();
    group.attach(t, source).unwrap();
    group.fire(t).unwrap();

    group.remove_step(g).unwrap();
    assert!(!group.contains_step(g));
    assert_eq!(counters.disconnects.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(group.input_value(sink, "in").unwrap().is_none());
    assert_eq!(group.snapshot().connections().count(), 0);
    assert!(group.remove_step(g).is_err());

    // the stale plan is recompiled; the sink is no longer reachable
    let report = group.fire(t).unwrap();
    assert_eq!(report.computed, 1);
}

/// Random forests of `sum` steps over constant roots, registered in a
/// random order.
fn dag_strategy() -> impl Strategy<Value = (Vec<(Option<usize>, Option<usize>)>, Vec<usize>)> {
    (2usize..16).prop_flat_map(|n| {
        let parents = proptest::collection::vec(
            (
                any::<prop::sample::Index>(),
                any::<prop::sample::Index>(),
                any::<bool>(),
                any::<bool>(),
            ),
            n,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(j, (a, b, has_a, has_b))| {
                    if j == 0 || !has_a {
                        (None, None)
                    } else {
                        let pa = a.index(j);
                        let pb = (has_b).then(|| b.index(j));
                        (Some(pa), pb)
                    }
                })
                .collect::<Vec<_>>()
        });
        let order = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
        (parents, order)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_plan_respects_every_connection((parents, order) in dag_strategy()) {
        let group = Group::new("random");
        let n = parents.len();
        let mut ids = vec![None; n];
        for &node in &order {
            let id = match parents[node] {
                (None, _) => constant(&group, &format!("n{}", node), node as f64),
                _ => group
                    .create_step(format!("n{}", node), "sum", &ParamsBuilder::new().build())
                    .unwrap(),
            };
            ids[node] = Some(id);
        }
        let ids: Vec<_> = ids.into_iter().map(|id| id.unwrap()).collect();
        for (node, &(pa, pb)) in parents.iter().enumerate() {
            if let Some(pa) = pa {
                group.connect(ids[pa], "out", ids[node], "a").unwrap();
            }
            if let Some(pb) = pb {
                group.connect(ids[pb], "out", ids[node], "b").unwrap();
            }
        }

        let position: std::collections::HashMap<_, _> = group
            .execution_order()
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();
        prop_assert_eq!(position.len(), n);
        for conn in group.snapshot().connections() {
            prop_assert!(position[&conn.source_step()] < position[&conn.target_step()]);
        }

        // every value settles in a single pass
        let report = group.compute(0.01);
        prop_assert_eq!(report.failed, 0);
        let mut expected = vec![0.0; n];
        for node in 0..n {
            expected[node] = match parents[node] {
                (None, _) => node as f64,
                (Some(pa), pb) => expected[pa] + pb.map_or(0.0, |pb| expected[pb]),
            };
        }
        for node in 0..n {
            let value = group.output_value(ids[node], "out").unwrap();
            prop_assert_eq!(value.and_then(|v| v.as_f64()), Some(expected[node]));
        }
    }
}
