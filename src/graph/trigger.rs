//! Triggers and the firing protocol.
//!
//! Firing a trigger:
//! 1. Resolve its execution plan (cached per structure generation) and its
//!    downstream triggers under a brief read lock.
//! 2. Compute every planned step in order, without any structural lock.
//!    Faults are contained per step; the trigger carries on.
//! 3. Fire each downstream trigger once. A downstream looped trigger that
//!    is running on another thread is handed a kick over its queue instead
//!    of being run here.

use crate::graph::group::{GroupShared, Structure};
use crate::graph::events::GraphEvent;
use crate::graph::id::{StepId, TriggerId};
use crate::graph::looped::LoopedTrigger;
use crate::graph::plan::{ExecutionPlan, PlanCompiler};
use crate::graph::step::{ComputeOutcome, TickTime};
use parking_lot::Mutex;
use std::sync::Arc;

/// A trigger as stored in a group.
pub(crate) struct TriggerNode {
    pub id: TriggerId,
    pub name: String,
    /// Ordered set of listening steps
    pub listeners: Vec<StepId>,
    pub downstream: Vec<TriggerId>,
    pub upstream: Vec<TriggerId>,
    /// Present for looped triggers
    pub looped: Option<Arc<LoopedTrigger>>,
    plan: Mutex<Option<Arc<ExecutionPlan>>>,
}

impl TriggerNode {
    pub fn new(id: TriggerId, name: String, looped: Option<Arc<LoopedTrigger>>) -> Self {
        Self {
            id,
            name,
            listeners: Vec::new(),
            downstream: Vec::new(),
            upstream: Vec::new(),
            looped,
            plan: Mutex::new(None),
        }
    }

    pub fn is_looped(&self) -> bool {
        self.looped.is_some()
    }

    /// Cached plan, recompiled when the structure generation moved on.
    pub fn plan(&self, structure: &Structure) -> Arc<ExecutionPlan> {
        let mut cached = self.plan.lock();
        if let Some(plan) = cached.as_ref() {
            if plan.generation == structure.generation {
                return plan.clone();
            }
        }

        let claimed: Vec<StepId> = structure
            .live_triggers()
            .filter(|t| t.id != self.id)
            .flat_map(|t| t.listeners.iter().copied())
            .filter(|s| !self.listeners.contains(s))
            .collect();
        let plan = Arc::new(PlanCompiler::compile(
            &structure.steps,
            &structure.connections,
            Some(&self.listeners),
            &claimed,
            structure.generation,
        ));
        tracing::info!(
            "Trigger '{}' plan recompiled: {} step(s), {} reactive (gen {}, {}us)",
            self.name,
            plan.len(),
            plan.stats.reactive_steps,
            plan.generation,
            plan.stats.compile_time_us,
        );
        *cached = Some(plan.clone());
        plan
    }
}

/// Counters from one fire, including everything it propagated to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FireReport {
    /// Steps that computed successfully
    pub computed: usize,
    /// Steps skipped because they were already faulted
    pub skipped: usize,
    /// Steps that faulted during this fire
    pub failed: usize,
    /// Triggers run on this thread (the fired one included)
    pub triggers_fired: usize,
    /// Kicks handed to looped triggers on other threads
    pub handoffs: usize,
    /// A step asked its driving loop to stop
    pub stop_requested: bool,
}

impl FireReport {
    pub fn merge(&mut self, other: FireReport) {
        self.computed += other.computed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.triggers_fired += other.triggers_fired;
        self.handoffs += other.handoffs;
        self.stop_requested |= other.stop_requested;
    }
}

/// Everything needed to fire a trigger without holding the structure lock.
pub(crate) struct FireTarget {
    pub plan: Arc<ExecutionPlan>,
    pub downstream: Vec<(TriggerId, Option<Arc<LoopedTrigger>>)>,
}

/// Resolve the plan and downstream set of `id`, or `None` if it is gone.
pub(crate) fn resolve(group: &GroupShared, id: TriggerId) -> Option<FireTarget> {
    let structure = group.structure.read();
    let node = structure.trigger(id)?;
    let plan = node.plan(&structure);
    let downstream = node
        .downstream
        .iter()
        .filter_map(|d| structure.trigger(*d).map(|n| (n.id, n.looped.clone())))
        .collect();
    Some(FireTarget { plan, downstream })
}

/// Fire `id` on the calling thread. `visited` holds the triggers already
/// fired in this propagation; each trigger runs at most once per propagation.
pub(crate) fn fire(
    group: &GroupShared,
    id: TriggerId,
    time: &TickTime,
    visited: &mut Vec<TriggerId>,
) -> FireReport {
    match resolve(group, id) {
        Some(target) => run(group, id, &target, time, visited),
        None => FireReport::default(),
    }
}

/// Fire an already-resolved trigger.
pub(crate) fn run(
    group: &GroupShared,
    id: TriggerId,
    target: &FireTarget,
    time: &TickTime,
    visited: &mut Vec<TriggerId>,
) -> FireReport {
    visited.push(id);
    let mut report = run_plan(group, &target.plan, time);
    report.triggers_fired += 1;

    for (down, looped) in &target.downstream {
        if visited.contains(down) {
            tracing::trace!("Trigger {} already fired in this propagation", down);
            continue;
        }
        if let Some(looped) = looped {
            if looped.is_running() && !looped.is_worker_thread() {
                visited.push(*down);
                if looped.kick() {
                    report.handoffs += 1;
                }
                continue;
            }
        }
        report.merge(fire(group, *down, time, visited));
    }
    report
}

/// Compute every step of `plan` once, in order.
pub(crate) fn run_plan(group: &GroupShared, plan: &ExecutionPlan, time: &TickTime) -> FireReport {
    let mut report = FireReport::default();
    for cell in &plan.steps {
        match cell.compute(time) {
            ComputeOutcome::Computed { stop_requested } => {
                report.computed += 1;
                report.stop_requested |= stop_requested;
            }
            ComputeOutcome::Skipped => report.skipped += 1,
            ComputeOutcome::Removed => {}
            ComputeOutcome::Failed(message) => {
                report.failed += 1;
                tracing::warn!(
                    "Step '{}' ({}) faulted at t={:.6}: {}",
                    cell.name(),
                    cell.id(),
                    time.time,
                    message
                );
                group.events.emit(GraphEvent::StepFaulted {
                    step: cell.id(),
                    name: cell.name().to_string(),
                    message,
                });
            }
        }
    }
    report
}
