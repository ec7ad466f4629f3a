//! Looped triggers - triggers that fire themselves on a dedicated thread.
//!
//! State machine: `Stopped -> Starting -> Running -> Stopping -> Stopped`.
//!
//! Each tick the worker:
//! 1. Waits for the next deadline (or a handoff kick) on its signal queue.
//! 2. Resolves the trigger's plan and starts/stops steps that entered or
//!    left it since the previous tick.
//! 3. Runs one or more sub-steps depending on the timing mode.
//! 4. Records timing statistics readable without pausing the loop.
//!
//! The worker holds only a `Weak` reference to its group. If the group is
//! dropped, the next tick fails to upgrade it and the worker exits.

use crate::config::{LoopSettings, TimingMode};
use crate::error::{GraphError, Result};
use crate::graph::events::{EventBus, GraphEvent};
use crate::graph::group::GroupShared;
use crate::graph::id::TriggerId;
use crate::graph::plan::ExecutionPlan;
use crate::graph::step::{StepCell, TickTime};
use crate::graph::trigger::{self, FireReport};
use crate::types::{LoopStats, TriggerState};
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Pending kicks beyond this are dropped.
const SIGNAL_CAPACITY: usize = 16;

/// Messages to a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopSignal {
    /// Run one tick now (handoff from an upstream trigger).
    Fire,
    /// Re-check the stop flag.
    Wake,
}

/// What `stop` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    NotRunning,
    /// The worker finished its tick and was joined.
    Stopped,
    /// Called on the worker's own thread; it stops after the current tick.
    Deferred,
}

/// Limits applied to every loop of a group.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopLimits {
    pub overrun_warn_every: u64,
    pub spin_threshold: Duration,
}

struct LoopShared {
    trigger: TriggerId,
    name: String,
    settings: RwLock<LoopSettings>,
    state: AtomicU8,
    stop: AtomicBool,
    stats: RwLock<LoopStats>,
    tx: Sender<LoopSignal>,
    rx: Receiver<LoopSignal>,
    worker: RwLock<Option<ThreadId>>,
    events: Arc<EventBus>,
    limits: LoopLimits,
}

impl LoopShared {
    fn state(&self) -> TriggerState {
        TriggerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: TriggerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn transition(&self, from: TriggerState, to: TriggerState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move a starting or running loop to `Stopping`. Returns the state
    /// seen before the move.
    fn begin_stopping(&self) -> TriggerState {
        loop {
            let current = self.state();
            match current {
                TriggerState::Starting | TriggerState::Running => {
                    if self.transition(current, TriggerState::Stopping) {
                        return current;
                    }
                }
                other => return other,
            }
        }
    }

    /// `Stopping` is authoritative; the flag only saves the worker a load
    /// of the state on the spin path.
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.state() == TriggerState::Stopping
    }
}

/// A trigger owned by a dedicated worker thread that fires it periodically.
pub struct LoopedTrigger {
    shared: Arc<LoopShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LoopedTrigger {
    pub(crate) fn new(
        trigger: TriggerId,
        name: impl Into<String>,
        settings: LoopSettings,
        events: Arc<EventBus>,
        limits: LoopLimits,
    ) -> Self {
        let (tx, rx) = bounded(SIGNAL_CAPACITY);
        Self {
            shared: Arc::new(LoopShared {
                trigger,
                name: name.into(),
                settings: RwLock::new(settings),
                state: AtomicU8::new(TriggerState::Stopped.as_u8()),
                stop: AtomicBool::new(false),
                stats: RwLock::new(LoopStats::default()),
                tx,
                rx,
                worker: RwLock::new(None),
                events,
                limits,
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn id(&self) -> TriggerId {
        self.shared.trigger
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> TriggerState {
        self.shared.state()
    }

    /// Starting or running.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            TriggerState::Starting | TriggerState::Running
        )
    }

    /// Whether the caller is this loop's worker thread.
    pub fn is_worker_thread(&self) -> bool {
        *self.shared.worker.read() == Some(thread::current().id())
    }

    pub fn settings(&self) -> LoopSettings {
        *self.shared.settings.read()
    }

    /// Takes effect on the next tick.
    pub fn set_settings(&self, settings: LoopSettings) {
        *self.shared.settings.write() = settings;
        // wake so a shorter period is honoured immediately
        let _ = self.shared.tx.try_send(LoopSignal::Wake);
    }

    pub fn stats(&self) -> LoopStats {
        self.shared.stats.read().clone()
    }

    /// Ask the worker to run one tick now. Never blocks; returns false if
    /// the kick was dropped because the queue is full.
    pub fn kick(&self) -> bool {
        self.shared.tx.try_send(LoopSignal::Fire).is_ok()
    }

    /// Spawn the worker. Fails with `AlreadyRunning` unless stopped, and
    /// with `ThreadSpawn` (leaving the trigger stopped) if the OS refuses.
    pub(crate) fn start(&self, group: Weak<GroupShared>) -> Result<()> {
        let shared = &self.shared;
        if shared.state() != TriggerState::Stopped {
            return Err(GraphError::AlreadyRunning(shared.trigger));
        }
        // a stop can only move the loop out of `Starting`, so clearing the
        // flag here never hides one from the new worker
        shared.stop.store(false, Ordering::SeqCst);
        if !shared.transition(TriggerState::Stopped, TriggerState::Starting) {
            return Err(GraphError::AlreadyRunning(shared.trigger));
        }

        let mut handle = self.handle.lock();
        if let Some(old) = handle.take() {
            // previous worker already set Stopped; this only reaps it
            if old.join().is_err() {
                tracing::error!("Previous worker of '{}' panicked", shared.name);
            }
        }
        while shared.rx.try_recv().is_ok() {}
        *shared.stats.write() = LoopStats {
            started_at: Some(Utc::now()),
            ..LoopStats::default()
        };

        let worker = Worker::new(shared.clone(), group);
        let spawned = thread::Builder::new()
            .name(format!("stepflow-{}", shared.name))
            .spawn(move || worker.run());

        match spawned {
            Ok(h) => {
                *handle = Some(h);
                Ok(())
            }
            Err(e) => {
                shared.set_state(TriggerState::Stopped);
                tracing::error!("Failed to spawn worker for '{}': {}", shared.name, e);
                Err(GraphError::ThreadSpawn {
                    trigger: shared.trigger,
                    source: e,
                })
            }
        }
    }

    /// Request a stop and wait for the worker to finish its current tick.
    ///
    /// Safe from any thread. On the worker's own thread (a step asking to
    /// stop its loop) the stop is deferred to the end of the tick.
    pub fn stop(&self) -> StopOutcome {
        let shared = &self.shared;
        if shared.begin_stopping() == TriggerState::Stopped {
            // a start that has not reached `Starting` yet is left alone
            return StopOutcome::NotRunning;
        }
        shared.stop.store(true, Ordering::SeqCst);
        let _ = shared.tx.try_send(LoopSignal::Wake);

        if self.is_worker_thread() {
            return StopOutcome::Deferred;
        }

        let handle = self.handle.lock().take();
        match handle {
            Some(h) => {
                if h.join().is_err() {
                    tracing::error!("Worker of '{}' panicked", shared.name);
                    shared.set_state(TriggerState::Stopped);
                }
                StopOutcome::Stopped
            }
            None => StopOutcome::NotRunning,
        }
    }
}

impl std::fmt::Debug for LoopedTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopedTrigger")
            .field("id", &self.shared.trigger)
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

enum Wake {
    Deadline,
    Kick,
    Stop,
}

/// Wall-clock and simulated-time bookkeeping of one run.
struct LoopClock {
    last_tick: Instant,
    next_deadline: Instant,
    /// Period `next_deadline` was computed with
    period: Duration,
    /// Wall time not yet converted into simulated sub-steps
    debt: Duration,
    sim_time: f64,
    tick: u64,
    first: bool,
}

impl LoopClock {
    fn new(now: Instant, period: Duration) -> Self {
        Self {
            last_tick: now,
            next_deadline: now,
            period,
            debt: Duration::ZERO,
            sim_time: 0.0,
            tick: 0,
            first: true,
        }
    }

    /// Number of sub-steps, their `dt`, and sub-steps dropped by the cap.
    fn plan_substeps(&mut self, settings: &LoopSettings, now: Instant, forced: bool) -> (u32, f64, u64) {
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        let first = std::mem::replace(&mut self.first, false);
        let period = settings.period;

        match settings.mode {
            TimingMode::RealTime => {
                let dt = if first { period } else { elapsed };
                (1, dt.as_secs_f64(), 0)
            }
            TimingMode::FixedStep => (1, period.as_secs_f64(), 0),
            TimingMode::Simulated => {
                if period.is_zero() {
                    return (1, 0.0, 0);
                }
                self.debt += elapsed;
                let owed = (self.debt.as_nanos() / period.as_nanos()) as u64;
                let mut n = owed;
                if forced || first {
                    n = n.max(1);
                }
                self.debt = self.debt.saturating_sub(period.saturating_mul(n.min(u32::MAX as u64) as u32));
                let cap = settings.max_catch_up.max(1) as u64;
                let dropped = n.saturating_sub(cap);
                (n.min(cap) as u32, period.as_secs_f64(), dropped)
            }
        }
    }

    /// Next deadline one period after the previous one; if that is already
    /// past, tick again as soon as possible instead of catching up.
    fn advance_deadline(&mut self, period: Duration, now: Instant) {
        self.period = period;
        self.next_deadline += period;
        if self.next_deadline < now {
            self.next_deadline = now;
        }
    }

    /// Move the pending deadline when the period changed while waiting, so
    /// it stays one (new) period after the previous tick.
    fn retune(&mut self, period: Duration) {
        if period == self.period {
            return;
        }
        if let Some(previous) = self.next_deadline.checked_sub(self.period) {
            self.next_deadline = previous + period;
        }
        self.period = period;
    }
}

struct Worker {
    shared: Arc<LoopShared>,
    group: Weak<GroupShared>,
    /// Steps this loop has called `start` on
    driven: Vec<Arc<StepCell>>,
    last_plan: Option<Arc<ExecutionPlan>>,
}

impl Worker {
    fn new(shared: Arc<LoopShared>, group: Weak<GroupShared>) -> Self {
        Self {
            shared,
            group,
            driven: Vec::new(),
            last_plan: None,
        }
    }

    fn run(mut self) {
        let shared = self.shared.clone();
        *shared.worker.write() = Some(thread::current().id());

        let mut clock = LoopClock::new(Instant::now(), shared.settings.read().period);
        if !shared.transition(TriggerState::Starting, TriggerState::Running) {
            tracing::debug!("Looped trigger '{}' stopped before its first tick", shared.name);
            self.shutdown();
            return;
        }
        {
            let settings = *shared.settings.read();
            tracing::info!(
                "Looped trigger '{}' running (period {:?}, {})",
                shared.name,
                settings.period,
                settings.mode.display_name()
            );
            shared.events.emit(GraphEvent::TriggerStarted {
                trigger: shared.trigger,
                name: shared.name.clone(),
            });
        }

        let mut visited = Vec::new();
        loop {
            if shared.stop_requested() {
                break;
            }

            let wait_start = Instant::now();
            let kicked = match self.wait_until(&mut clock) {
                Wake::Stop => break,
                Wake::Deadline => false,
                Wake::Kick => true,
            };
            let idle = wait_start.elapsed();

            let Some(group) = self.group.upgrade() else {
                tracing::debug!("Group of '{}' dropped; worker exiting", shared.name);
                break;
            };
            let Some(target) = trigger::resolve(&group, shared.trigger) else {
                tracing::debug!("Trigger '{}' removed; worker exiting", shared.name);
                break;
            };
            self.sync_driven(&group, &target.plan);

            let settings = *shared.settings.read();
            let (substeps, dt, dropped) = clock.plan_substeps(&settings, Instant::now(), kicked);

            let compute_start = Instant::now();
            let mut report = FireReport::default();
            for _ in 0..substeps {
                clock.tick += 1;
                let time = TickTime::new(clock.sim_time, dt, clock.tick);
                visited.clear();
                report.merge(trigger::run(&group, shared.trigger, &target, &time, &mut visited));
                clock.sim_time += dt;
                if report.stop_requested {
                    break;
                }
            }
            drop(target);
            drop(group);
            let compute = compute_start.elapsed();

            if substeps > 0 {
                self.record(&settings, &report, &clock, compute, idle, dropped, kicked);
            }

            if report.stop_requested {
                tracing::info!("Looped trigger '{}' stop requested by a step", shared.name);
                shared.stop.store(true, Ordering::SeqCst);
                shared.begin_stopping();
                break;
            }

            if !kicked {
                clock.advance_deadline(settings.period, Instant::now());
            }
        }

        self.shutdown();
    }

    /// Sleep until the clock's next deadline on the signal queue. In
    /// fixed-step mode the last stretch is busy-waited.
    fn wait_until(&self, clock: &mut LoopClock) -> Wake {
        let shared = &self.shared;
        loop {
            if shared.stop_requested() {
                return Wake::Stop;
            }
            let settings = *shared.settings.read();
            clock.retune(settings.period);
            let deadline = clock.next_deadline;
            let now = Instant::now();
            if now >= deadline {
                return Wake::Deadline;
            }
            let remaining = deadline - now;
            let fixed = settings.mode == TimingMode::FixedStep;
            let spin = shared.limits.spin_threshold;

            if fixed && remaining <= spin {
                while Instant::now() < deadline {
                    if shared.stop.load(Ordering::Relaxed) {
                        return Wake::Stop;
                    }
                    if let Ok(LoopSignal::Fire) = shared.rx.try_recv() {
                        return Wake::Kick;
                    }
                    std::hint::spin_loop();
                }
                return Wake::Deadline;
            }

            let timeout = if fixed { remaining - spin } else { remaining };
            match shared.rx.recv_timeout(timeout) {
                Ok(LoopSignal::Fire) => return Wake::Kick,
                Ok(LoopSignal::Wake) | Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Wake::Stop,
            }
        }
    }

    /// Start steps that entered the plan and stop those that left it.
    fn sync_driven(&mut self, group: &GroupShared, plan: &Arc<ExecutionPlan>) {
        if self
            .last_plan
            .as_ref()
            .is_some_and(|last| Arc::ptr_eq(last, plan))
        {
            return;
        }
        self.last_plan = Some(plan.clone());

        let (kept, left): (Vec<_>, Vec<_>) = self
            .driven
            .drain(..)
            .partition(|cell| plan.contains(cell.id()));
        for cell in left {
            cell.stop();
        }
        self.driven = kept;

        for cell in &plan.steps {
            if self.driven.iter().any(|d| d.id() == cell.id()) {
                continue;
            }
            if let Err(message) = cell.start() {
                tracing::warn!(
                    "Step '{}' failed to start under '{}': {}",
                    cell.name(),
                    self.shared.name,
                    message
                );
                group.events.emit(GraphEvent::StepFaulted {
                    step: cell.id(),
                    name: cell.name().to_string(),
                    message,
                });
            }
            self.driven.push(cell.clone());
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        settings: &LoopSettings,
        report: &FireReport,
        clock: &LoopClock,
        compute: Duration,
        idle: Duration,
        dropped: u64,
        kicked: bool,
    ) {
        let shared = &self.shared;
        let overruns = {
            let mut stats = shared.stats.write();
            stats.record_tick(compute, idle);
            if kicked {
                stats.kicks += 1;
            }
            stats.computed += report.computed as u64;
            stats.skipped += report.skipped as u64;
            stats.failed += report.failed as u64;
            stats.dropped_steps += dropped;
            stats.sim_time = clock.sim_time;
            if compute > settings.period {
                stats.overruns += 1;
                Some(stats.overruns)
            } else {
                None
            }
        };

        if dropped > 0 {
            tracing::debug!(
                "Looped trigger '{}' dropped {} sub-step(s) after a stall",
                shared.name,
                dropped
            );
        }

        if let Some(count) = overruns {
            if count == 1 || count % shared.limits.overrun_warn_every.max(1) == 0 {
                tracing::warn!(
                    "Looped trigger '{}' overrun #{}: tick took {:?}, period {:?}",
                    shared.name,
                    count,
                    compute,
                    settings.period
                );
                shared.events.emit(GraphEvent::Overrun {
                    trigger: shared.trigger,
                    tick: clock.tick,
                    compute,
                    period: settings.period,
                });
            } else {
                tracing::debug!(
                    "Looped trigger '{}' overrun #{} ({:?})",
                    shared.name,
                    count,
                    compute
                );
            }
        }
    }

    fn shutdown(&mut self) {
        let shared = &self.shared;
        for cell in self.driven.drain(..) {
            cell.stop();
        }
        self.last_plan = None;

        let ticks = {
            let mut stats = shared.stats.write();
            stats.stopped_at = Some(Utc::now());
            stats.ticks
        };
        while let Ok(signal) = shared.rx.try_recv() {
            tracing::trace!("Discarding {:?} for stopped '{}'", signal, shared.name);
        }
        *shared.worker.write() = None;
        shared.set_state(TriggerState::Stopped);

        tracing::info!("Looped trigger '{}' stopped after {} tick(s)", shared.name, ticks);
        shared.events.emit(GraphEvent::TriggerStopped {
            trigger: shared.trigger,
            name: shared.name.clone(),
        });
    }
}
