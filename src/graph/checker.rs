//! Consistency checker.
//!
//! Validation is read-only and works from a [`GroupSnapshot`], so it can run
//! while loops are live. The only per-step locking is a bounded
//! `try_inspect` to reach the child of an embedded group; a group step that
//! stays busy past the timeout is skipped for that run.
//!
//! Cycles are searched with Tarjan's algorithm over the non-feedback
//! connections. A connection into a stale-tolerant input is a feedback edge:
//! a cycle through one is a legitimate loop, is not reported, and the edge
//! is listed in [`ConsistencyReport::feedback_edges`] for the scheduler.

use crate::graph::group::Group;
use crate::graph::id::{ConnectionId, StepId, TriggerId};
use crate::graph::snapshot::{GroupSnapshot, TriggerInfo};
use crate::graph::value::ValueType;
use crate::types::StepMode;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

/// One problem found by the checker.
#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
    /// A required input has neither a connection nor an exposure binding
    UnconnectedRequiredInput { step: StepId, slot: String },
    /// Steps forming a cycle with no stale-tolerant input on it, sorted
    Cycle { steps: Vec<StepId> },
    /// The value currently travelling over a connection is not admitted by
    /// the target input (possible when an `Any` output feeds a typed input)
    TypeMismatch {
        connection: ConnectionId,
        expected: ValueType,
        found: ValueType,
    },
    /// A `Looped`-mode step that no looped trigger drives
    LoopedStepNotTriggered { step: StepId },
    /// A step subscribed, or pulled in downstream of listeners, so that it
    /// would run more than once per tick or from more than one worker thread
    DuplicateTriggerSubscription {
        step: StepId,
        triggers: Vec<TriggerId>,
    },
    /// Triggers that fire each other downstream, sorted
    TriggerCycle { triggers: Vec<TriggerId> },
    /// A finding inside an embedded group
    Nested { group: StepId, finding: Box<Finding> },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::UnconnectedRequiredInput { step, slot } => {
                write!(f, "required input {}.{} is not connected", step, slot)
            }
            Finding::Cycle { steps } => write!(f, "cycle without feedback input: {:?}", steps),
            Finding::TypeMismatch {
                connection,
                expected,
                found,
            } => write!(
                f,
                "{} carries {:?} into an input expecting {:?}",
                connection, found, expected
            ),
            Finding::LoopedStepNotTriggered { step } => {
                write!(f, "looped step {} is not driven by any looped trigger", step)
            }
            Finding::DuplicateTriggerSubscription { step, triggers } => {
                write!(f, "step {} is driven by overlapping triggers {:?}", step, triggers)
            }
            Finding::TriggerCycle { triggers } => {
                write!(f, "downstream trigger cycle: {:?}", triggers)
            }
            Finding::Nested { group, finding } => write!(f, "in group {}: {}", group, finding),
        }
    }
}

/// Findings plus the feedback annotation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsistencyReport {
    pub findings: Vec<Finding>,
    /// Connections the scheduler treats as previous-tick reads
    pub feedback_edges: Vec<ConnectionId>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

pub struct ConsistencyChecker {
    lock_timeout: Duration,
}

impl ConsistencyChecker {
    pub fn new(lock_timeout: Duration) -> Self {
        Self { lock_timeout }
    }

    pub fn check(&self, group: &Group) -> ConsistencyReport {
        let report = self.check_group(group, false);
        if !report.is_clean() {
            tracing::debug!(
                "Group '{}': {} finding(s)",
                group.name(),
                report.findings.len()
            );
        }
        report
    }

    /// `embedded` groups are driven by their parent's group step, so their
    /// looped steps need no trigger of their own.
    fn check_group(&self, group: &Group, embedded: bool) -> ConsistencyReport {
        let snapshot = group.snapshot();
        let mut findings = Vec::new();

        unconnected_inputs(&snapshot, &mut findings);
        step_cycles(&snapshot, &mut findings);
        value_mismatches(group, &snapshot, &mut findings);
        if !embedded {
            undriven_looped_steps(&snapshot, &mut findings);
        }
        duplicate_subscriptions(&snapshot, &mut findings);
        trigger_cycles(&snapshot, &mut findings);

        for step in snapshot.steps().filter(|s| s.kind == "group") {
            let Some(cell) = group.cell(step.id).ok() else {
                continue;
            };
            let child = cell.try_inspect(self.lock_timeout, |s| {
                s.as_group().map(|g| g.group().clone())
            });
            match child {
                Some(Some(child)) => {
                    for finding in self.check_group(&child, true).findings {
                        findings.push(Finding::Nested {
                            group: step.id,
                            finding: Box::new(finding),
                        });
                    }
                }
                Some(None) => {}
                None => tracing::debug!(
                    "Skipping nested check of '{}': step busy",
                    step.name
                ),
            }
        }

        ConsistencyReport {
            findings,
            feedback_edges: snapshot
                .connections()
                .filter(|c| c.feedback)
                .map(|c| c.id)
                .collect(),
        }
    }
}

fn unconnected_inputs(snapshot: &GroupSnapshot, findings: &mut Vec<Finding>) {
    let bound: HashSet<(StepId, &str)> = snapshot
        .exposed_inputs()
        .map(|e| (e.step, e.slot.as_str()))
        .collect();
    for step in snapshot.steps() {
        for (index, input) in step.inputs.iter().enumerate() {
            if !input.required || bound.contains(&(step.id, input.name.as_str())) {
                continue;
            }
            let connected = snapshot
                .incoming(step.id)
                .any(|c| c.target.slot_index() as usize == index);
            if !connected {
                findings.push(Finding::UnconnectedRequiredInput {
                    step: step.id,
                    slot: input.name.clone(),
                });
            }
        }
    }
}

fn step_cycles(snapshot: &GroupSnapshot, findings: &mut Vec<Finding>) {
    let ids: Vec<StepId> = snapshot.steps().map(|s| s.id).collect();
    let index: HashMap<StepId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut adj = vec![Vec::new(); ids.len()];
    for conn in snapshot.connections().filter(|c| !c.feedback) {
        if let (Some(&from), Some(&to)) = (
            index.get(&conn.source_step()),
            index.get(&conn.target_step()),
        ) {
            adj[from].push(to);
        }
    }
    for component in cyclic_components(&adj) {
        let mut steps: Vec<StepId> = component.into_iter().map(|i| ids[i]).collect();
        steps.sort();
        findings.push(Finding::Cycle { steps });
    }
}

fn value_mismatches(group: &Group, snapshot: &GroupSnapshot, findings: &mut Vec<Finding>) {
    for conn in snapshot.connections() {
        let Some(target) = snapshot.step(conn.target_step()) else {
            continue;
        };
        let Some(input) = target.inputs.get(conn.target.slot_index() as usize) else {
            continue;
        };
        let Some(output) = snapshot.source_slot_name(conn) else {
            continue;
        };
        if let Ok(Some(value)) = group.output_value(conn.source_step(), output) {
            if !input.value_type.admits(&value) {
                findings.push(Finding::TypeMismatch {
                    connection: conn.id,
                    expected: input.value_type,
                    found: value.value_type(),
                });
            }
        }
    }
}

/// Triggers reachable downstream from `start`, `start` included.
fn downstream_closure(snapshot: &GroupSnapshot, start: TriggerId) -> HashSet<TriggerId> {
    let mut seen = HashSet::from([start]);
    let mut pending = vec![start];
    while let Some(id) = pending.pop() {
        if let Some(trigger) = snapshot.trigger(id) {
            for &down in &trigger.downstream {
                if seen.insert(down) {
                    pending.push(down);
                }
            }
        }
    }
    seen
}

fn undriven_looped_steps(snapshot: &GroupSnapshot, findings: &mut Vec<Finding>) {
    let mut driven_triggers = HashSet::new();
    for trigger in snapshot.triggers().filter(|t| t.is_looped()) {
        driven_triggers.extend(downstream_closure(snapshot, trigger.id));
    }
    for step in snapshot.steps().filter(|s| s.mode == StepMode::Looped) {
        if !step.triggers.iter().any(|t| driven_triggers.contains(t)) {
            findings.push(Finding::LoopedStepNotTriggered { step: step.id });
        }
    }
}

fn duplicate_subscriptions(snapshot: &GroupSnapshot, findings: &mut Vec<Finding>) {
    let closures: HashMap<TriggerId, HashSet<TriggerId>> = snapshot
        .triggers()
        .map(|t| (t.id, downstream_closure(snapshot, t.id)))
        .collect();

    // explicit subscriptions plus the triggers that pull a step in reactively
    let mut drivers: HashMap<StepId, Vec<TriggerId>> = snapshot
        .steps()
        .map(|s| (s.id, s.triggers.clone()))
        .collect();
    for trigger in snapshot.triggers() {
        for step in reactive_pull(snapshot, trigger) {
            if let Some(list) = drivers.get_mut(&step) {
                if !list.contains(&trigger.id) {
                    list.push(trigger.id);
                }
            }
        }
    }

    for step in snapshot.steps() {
        let Some(triggers) = drivers.get(&step.id).filter(|t| t.len() > 1) else {
            continue;
        };
        let looped = triggers
            .iter()
            .filter(|t| snapshot.trigger(**t).is_some_and(|info| info.is_looped()))
            .count();
        let nested = triggers.iter().any(|t| {
            triggers
                .iter()
                .any(|u| u != t && closures.get(t).is_some_and(|c| c.contains(u)))
        });
        if looped > 1 || nested {
            let mut triggers = triggers.clone();
            triggers.sort();
            findings.push(Finding::DuplicateTriggerSubscription {
                step: step.id,
                triggers,
            });
        }
    }
}

/// Steps a fire of `trigger` runs without them listening to it: unattached
/// `Triggered`-mode steps downstream of its listeners. Steps listening to
/// another trigger run only there and stop the walk.
fn reactive_pull(snapshot: &GroupSnapshot, trigger: &TriggerInfo) -> Vec<StepId> {
    let mut seen: HashSet<StepId> = trigger.listeners.iter().copied().collect();
    let mut pending = trigger.listeners.clone();
    let mut pulled = Vec::new();
    while let Some(id) = pending.pop() {
        for conn in snapshot.outgoing(id) {
            let next = conn.target_step();
            if !seen.insert(next) {
                continue;
            }
            let pullable = snapshot
                .step(next)
                .is_some_and(|s| s.mode == StepMode::Triggered && s.triggers.is_empty());
            if pullable {
                pulled.push(next);
                pending.push(next);
            }
        }
    }
    pulled
}

fn trigger_cycles(snapshot: &GroupSnapshot, findings: &mut Vec<Finding>) {
    let ids: Vec<TriggerId> = snapshot.triggers().map(|t| t.id).collect();
    let index: HashMap<TriggerId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let adj: Vec<Vec<usize>> = snapshot
        .triggers()
        .map(|t| t.downstream.iter().filter_map(|d| index.get(d).copied()).collect())
        .collect();
    for component in cyclic_components(&adj) {
        let mut triggers: Vec<TriggerId> = component.into_iter().map(|i| ids[i]).collect();
        triggers.sort();
        findings.push(Finding::TriggerCycle { triggers });
    }
}

/// Strongly connected components that contain a cycle: more than one node,
/// or a single node with an edge to itself.
fn cyclic_components(adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    strongly_connected(adj)
        .into_iter()
        .filter(|c| c.len() > 1 || adj[c[0]].contains(&c[0]))
        .collect()
}

/// Iterative Tarjan.
fn strongly_connected(adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;
    let n = adj.len();
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut components = Vec::new();
    let mut next = 0;

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next;
        low[root] = next;
        next += 1;
        stack.push(root);
        on_stack[root] = true;
        let mut work = vec![(root, 0usize)];

        while let Some(frame) = work.last_mut() {
            let v = frame.0;
            if let Some(&w) = adj[v].get(frame.1) {
                frame.1 += 1;
                if index[w] == UNVISITED {
                    index[w] = next;
                    low[w] = next;
                    next += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    work.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
                continue;
            }

            work.pop();
            if let Some(&(parent, _)) = work.last() {
                low[parent] = low[parent].min(low[v]);
            }
            if low[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }
    components
}
