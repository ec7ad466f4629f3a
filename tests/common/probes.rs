//! Probe steps for observing the engine from tests

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use stepflow::graph::looped::StopOutcome;
use stepflow::graph::{SlotDescriptor, StepContext, StepPlugin};
use stepflow::{Group, StepError, StepMode, TriggerId, ValueType};

/// One compute as seen by a [`RecordingProbe`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRecord {
    pub name: String,
    pub tick: u64,
    pub time: f64,
    pub input: Option<f64>,
    pub thread: ThreadId,
}

pub type ProbeLog = Arc<Mutex<Vec<ProbeRecord>>>;

pub fn probe_log() -> ProbeLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Appends every compute to a shared log and publishes `in + 1` (or the
/// tick count when unconnected) on `out`.
pub struct RecordingProbe {
    name: String,
    mode: StepMode,
    log: ProbeLog,
}

impl RecordingProbe {
    pub fn new(name: &str, log: &ProbeLog) -> Self {
        Self {
            name: name.to_string(),
            mode: StepMode::Triggered,
            log: log.clone(),
        }
    }

    pub fn looped(mut self) -> Self {
        self.mode = StepMode::Looped;
        self
    }
}

impl StepPlugin for RecordingProbe {
    fn kind(&self) -> &str {
        "recording_probe"
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        vec![
            SlotDescriptor::input("in", ValueType::Numeric).optional(),
            SlotDescriptor::output("out", ValueType::Float),
        ]
    }

    fn mode(&self) -> StepMode {
        self.mode
    }

    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let input = ctx.input("in").and_then(|v| v.as_f64());
        self.log.lock().push(ProbeRecord {
            name: self.name.clone(),
            tick: ctx.tick,
            time: ctx.time,
            input,
            thread: std::thread::current().id(),
        });
        let out = input.map_or(ctx.tick as f64, |x| x + 1.0);
        ctx.set_output("out", out)
    }
}

/// Lifecycle counters shared with a [`CountingProbe`].
#[derive(Debug, Default)]
pub struct Counters {
    pub computes: AtomicU64,
    pub starts: AtomicU64,
    pub stops: AtomicU64,
    pub connects: AtomicU64,
    pub disconnects: AtomicU64,
}

impl Counters {
    pub fn computes(&self) -> u64 {
        self.computes.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }
}

/// Counts computes and lifecycle hooks. Has an optional stale-tolerant
/// input `fb` for feedback wiring and an output `out` carrying the count.
pub struct CountingProbe {
    mode: StepMode,
    counters: Arc<Counters>,
}

impl CountingProbe {
    pub fn new(counters: &Arc<Counters>) -> Self {
        Self {
            mode: StepMode::Triggered,
            counters: counters.clone(),
        }
    }

    pub fn looped(counters: &Arc<Counters>) -> Self {
        Self {
            mode: StepMode::Looped,
            counters: counters.clone(),
        }
    }
}

impl StepPlugin for CountingProbe {
    fn kind(&self) -> &str {
        "counting_probe"
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        vec![
            SlotDescriptor::input("in", ValueType::Any).optional(),
            SlotDescriptor::input("fb", ValueType::Any)
                .optional()
                .stale_tolerant(),
            SlotDescriptor::output("out", ValueType::Float),
        ]
    }

    fn mode(&self) -> StepMode {
        self.mode
    }

    fn on_start(&mut self) -> Result<(), StepError> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let n = self.counters.computes.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.set_output("out", n as f64)
    }

    fn on_stop(&mut self) {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn on_input_connected(&mut self, _slot: &str, _source: ValueType) {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_input_disconnected(&mut self, _slot: &str) {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fails every compute after the first `ok_computes`.
pub struct FailingProbe {
    ok_computes: u64,
    seen: u64,
}

impl FailingProbe {
    pub fn new(ok_computes: u64) -> Self {
        Self {
            ok_computes,
            seen: 0,
        }
    }
}

impl StepPlugin for FailingProbe {
    fn kind(&self) -> &str {
        "failing_probe"
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        vec![
            SlotDescriptor::input("in", ValueType::Any).optional(),
            SlotDescriptor::output("out", ValueType::Float),
        ]
    }

    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        self.seen += 1;
        if self.seen > self.ok_computes {
            return Err(StepError::failed(format!("probe failure #{}", self.seen)));
        }
        ctx.set_output("out", self.seen as f64)
    }
}

/// Panics on every compute.
pub struct PanickingProbe;

impl StepPlugin for PanickingProbe {
    fn kind(&self) -> &str {
        "panicking_probe"
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        vec![SlotDescriptor::output("out", ValueType::Float)]
    }

    fn compute(&mut self, _ctx: &mut StepContext) -> Result<(), StepError> {
        panic!("probe exploded");
    }
}

/// Stops its own driving loop from inside `compute` once `after` computes
/// have run, and remembers what `stop_trigger` answered.
pub struct SelfStoppingProbe {
    group: Group,
    trigger: TriggerId,
    after: u64,
    seen: u64,
    outcome: Arc<Mutex<Option<StopOutcome>>>,
}

impl SelfStoppingProbe {
    pub fn new(
        group: &Group,
        trigger: TriggerId,
        after: u64,
        outcome: &Arc<Mutex<Option<StopOutcome>>>,
    ) -> Self {
        Self {
            group: group.clone(),
            trigger,
            after,
            seen: 0,
            outcome: outcome.clone(),
        }
    }
}

impl StepPlugin for SelfStoppingProbe {
    fn kind(&self) -> &str {
        "self_stopping_probe"
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        vec![SlotDescriptor::output("out", ValueType::Float)]
    }

    fn mode(&self) -> StepMode {
        StepMode::Looped
    }

    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        self.seen += 1;
        if self.seen == self.after {
            let outcome = self
                .group
                .stop_trigger(self.trigger)
                .map_err(|e| StepError::failed(e.to_string()))?;
            *self.outcome.lock() = Some(outcome);
        }
        ctx.set_output("out", self.seen as f64)
    }
}

/// Requests a stop of its driving loop through the step context.
pub struct StopRequestingProbe {
    after: u64,
    seen: Arc<AtomicU64>,
}

impl StopRequestingProbe {
    pub fn new(after: u64, seen: &Arc<AtomicU64>) -> Self {
        Self {
            after,
            seen: seen.clone(),
        }
    }
}

impl StepPlugin for StopRequestingProbe {
    fn kind(&self) -> &str {
        "stop_requesting_probe"
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        vec![SlotDescriptor::output("out", ValueType::Float)]
    }

    fn mode(&self) -> StepMode {
        StepMode::Looped
    }

    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let n = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.after {
            ctx.request_stop();
        }
        ctx.set_output("out", n as f64)
    }
}
