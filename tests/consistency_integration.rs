//! Integration tests for the consistency checker
//!
//! Each test builds a graph with one kind of problem and checks that the
//! report names it, and that checking leaves the graph untouched.

mod common;

use common::builders::{constant, gain, ParamsBuilder};
use common::probes::{CountingProbe, Counters};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use stepflow::{Finding, Group, LoopSettings, StepId, StepState, TimingMode, ValueType};

fn looped_settings() -> LoopSettings {
    LoopSettings::new(Duration::from_millis(5), TimingMode::RealTime)
}

#[test]
fn test_clean_graph_has_no_findings() {
    let group = Group::new("clean");
    let c = constant(&group, "c", 1.0);
    let g = gain(&group, "g", 2.0);
    group.connect(c, "out", g, "in").unwrap();
    let t = group.create_looped_trigger("loop").unwrap();
    group.attach(t, c).unwrap();

    let report = group.check();
    assert!(report.is_clean());
    assert!(report.feedback_edges.is_empty());
    assert!(group.validate().is_empty());
}

#[test]
fn test_unbroken_cycle_is_reported_but_still_runs() {
    let group = Group::new("cycle");
    let a = gain(&group, "a", 1.0);
    let b = gain(&group, "b", 1.0);
    group.connect(a, "out", b, "in").unwrap();
    group.connect(b, "out", a, "in").unwrap();

    let findings = group.validate();
    assert_eq!(findings, vec![Finding::Cycle { steps: vec![a, b] }]);

    // no values yet, so both steps fail their required input; each runs once
    let report = group.compute(0.1);
    assert_eq!(report.computed + report.failed, 2);
    assert_eq!(group.execution_order(), vec![a, b]);
}

#[test]
fn test_feedback_through_delay_is_not_a_cycle() {
    let group = Group::new("feedback");
    let g = gain(&group, "g", 0.5);
    let delay = group
        .create_step("delay", "unit_delay", &ParamsBuilder::new().float("initial", 1.0).build())
        .unwrap();
    group.connect(delay, "out", g, "in").unwrap();
    group.connect(g, "out", delay, "in").unwrap();

    let report = group.check();
    assert!(report.is_clean(), "{:?}", report.findings);
    assert_eq!(report.feedback_edges.len(), 1);
}

#[test]
fn test_runtime_value_mismatch_through_any_output() {
    let group = Group::new("mismatch");
    let text = group
        .create_step("text", "constant", &ParamsBuilder::new().text("value", "hello").build())
        .unwrap();
    let delay = group
        .create_step("delay", "unit_delay", &ParamsBuilder::new().build())
        .unwrap();
    let g = gain(&group, "g", 2.0);
    group.connect(text, "out", delay, "in").unwrap();
    group.connect(delay, "out", g, "in").unwrap();
    let (incoming, outgoing) = group.connections_of(delay).unwrap();
    assert_eq!((incoming.len(), outgoing.len()), (1, 1));
    assert!(group.check().is_clean());

    // the delay holds its initial float first, then forwards the text
    group.compute(0.1);
    assert!(group.check().is_clean());
    group.compute(0.1);
    assert_eq!(group.step_status(g).unwrap().state, StepState::Exception);

    let findings = group.validate();
    assert_eq!(findings.len(), 1);
    match &findings[0] {
        Finding::TypeMismatch {
            expected, found, ..
        } => {
            assert_eq!(*expected, ValueType::Numeric);
            assert_eq!(*found, ValueType::Text);
        }
        other => panic!("unexpected finding {}", other),
    }
}

#[test]
fn test_trigger_wiring_findings() {
    let group = Group::new("triggers");
    let counters = Arc::new(Counters::default());
    let orphan = group.add_step("orphan", CountingProbe::looped(&counters)).unwrap();
    let shared = group.add_step("shared", CountingProbe::new(&counters)).unwrap();

    let plain = group.create_trigger("plain").unwrap();
    group.attach(plain, orphan).unwrap();

    let fast = group.create_looped_trigger_with("fast", looped_settings()).unwrap();
    let slow = group.create_looped_trigger_with("slow", looped_settings()).unwrap();
    group.attach(fast, shared).unwrap();
    group.attach(slow, shared).unwrap();

    let t1 = group.create_trigger("t1").unwrap();
    let t2 = group.create_trigger("t2").unwrap();
    group.connect_triggers(t1, t2).unwrap();
    group.connect_triggers(t2, t1).unwrap();

    let generation = group.generation();
    let findings = group.validate();
    assert_eq!(group.generation(), generation);
    assert_eq!(findings.len(), 3, "{:?}", findings);

    assert!(findings.contains(&Finding::LoopedStepNotTriggered { step: orphan }));
    let mut both = vec![fast, slow];
    both.sort();
    assert!(findings.contains(&Finding::DuplicateTriggerSubscription {
        step: shared,
        triggers: both,
    }));
    let mut cycle = vec![t1, t2];
    cycle.sort();
    assert!(findings.contains(&Finding::TriggerCycle { triggers: cycle }));

    // the orphan is driven once the plain trigger hangs off a loop
    group.connect_triggers(fast, plain).unwrap();
    assert!(!group
        .validate()
        .iter()
        .any(|f| matches!(f, Finding::LoopedStepNotTriggered { .. })));
}

#[test]
fn test_downstream_subscription_counts_as_duplicate() {
    let group = Group::new("nested_subscription");
    let counters = Arc::new(Counters::default());
    let s = group.add_step("s", CountingProbe::new(&counters)).unwrap();
    let outer = group.create_trigger("outer").unwrap();
    let inner = group.create_trigger("inner").unwrap();
    group.connect_triggers(outer, inner).unwrap();
    group.attach(outer, s).unwrap();
    group.attach(inner, s).unwrap();

    let findings = group.validate();
    assert!(matches!(
        findings.as_slice(),
        [Finding::DuplicateTriggerSubscription { step, .. }] if *step == s
    ));

    // the overlap the finding warns about: one fire computes the step twice
    let report = group.fire(outer).unwrap();
    assert_eq!(report.triggers_fired, 2);
    assert_eq!(counters.computes(), 2);
}

#[test]
fn test_findings_inside_embedded_group_are_nested() {
    let child = Group::new("child");
    let g = gain(&child, "inner_gain", 1.0);
    let c = constant(&child, "c", 1.0);
    let out = gain(&child, "out", 1.0);
    child.connect(c, "out", out, "in").unwrap();
    child.expose_output("y", out, "out").unwrap();

    let parent = Group::new("parent");
    let gs = parent.add_group("child", child).unwrap();

    let findings = parent.validate();
    assert_eq!(findings.len(), 1);
    match &findings[0] {
        Finding::Nested { group, finding } => {
            assert_eq!(*group, gs);
            assert_eq!(
                **finding,
                Finding::UnconnectedRequiredInput {
                    step: g,
                    slot: "in".to_string(),
                }
            );
        }
        other => panic!("unexpected finding {}", other),
    }
    assert!(findings[0].to_string().starts_with(&format!("in group {}", gs)));
}

#[test]
fn test_consumer_pulled_in_by_two_loops_is_reported() {
    let group = Group::new("shared_consumer");
    let a = constant(&group, "a", 1.0);
    let b = constant(&group, "b", 2.0);
    let sum = group
        .create_step("sum", "sum", &ParamsBuilder::new().build())
        .unwrap();
    group.connect(a, "out", sum, "a").unwrap();
    group.connect(b, "out", sum, "b").unwrap();
    let t1 = group.create_looped_trigger_with("t1", looped_settings()).unwrap();
    let t2 = group.create_looped_trigger_with("t2", looped_settings()).unwrap();
    group.attach(t1, a).unwrap();
    group.attach(t2, b).unwrap();

    assert_eq!(
        group.validate(),
        vec![Finding::DuplicateTriggerSubscription {
            step: sum,
            triggers: vec![t1, t2],
        }]
    );

    // subscribing the consumer to one loop settles which worker runs it
    group.attach(t1, sum).unwrap();
    assert!(group.validate().is_empty());
    assert_eq!(group.plan_of(t1).unwrap().step_ids(), vec![a, sum]);
    assert_eq!(group.plan_of(t2).unwrap().step_ids(), vec![b]);
}

/// Ring size, registration order, and the ring edge (if any) routed
/// through a unit delay.
fn ring_strategy() -> impl Strategy<Value = (Vec<usize>, Option<prop::sample::Index>)> {
    (1usize..8).prop_flat_map(|n| {
        (
            Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
            proptest::option::of(any::<prop::sample::Index>()),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_ring_is_one_cycle_unless_a_delay_breaks_it((order, delay_at) in ring_strategy()) {
        let group = Group::new("ring");
        let n = order.len();
        let mut slots = vec![None; n];
        for &node in &order {
            slots[node] = Some(gain(&group, &format!("g{}", node), 0.5));
        }
        let ring: Vec<StepId> = slots.into_iter().flatten().collect();

        // a tail hanging off the ring is never part of the cycle
        let tail = gain(&group, "tail", 1.0);
        group.connect(ring[0], "out", tail, "in").unwrap();

        let broken_at = delay_at.map(|i| i.index(n));
        let mut members = ring.clone();
        for k in 0..n {
            let next = ring[(k + 1) % n];
            if Some(k) == broken_at {
                let delay = group
                    .create_step(
                        format!("d{}", k),
                        "unit_delay",
                        &ParamsBuilder::new().float("initial", 0.0).build(),
                    )
                    .unwrap();
                group.connect(ring[k], "out", delay, "in").unwrap();
                group.connect(delay, "out", next, "in").unwrap();
                members.push(delay);
            } else {
                group.connect(ring[k], "out", next, "in").unwrap();
            }
        }

        let report = group.check();
        let cycles: Vec<Finding> = report
            .findings
            .iter()
            .filter(|f| matches!(f, Finding::Cycle { .. }))
            .cloned()
            .collect();
        match broken_at {
            Some(_) => {
                prop_assert!(cycles.is_empty(), "{:?}", cycles);
                prop_assert_eq!(report.feedback_edges.len(), 1);
            }
            None => {
                members.sort();
                prop_assert_eq!(cycles, vec![Finding::Cycle { steps: members }]);
                prop_assert!(report.feedback_edges.is_empty());
            }
        }
    }
}
