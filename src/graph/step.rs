//! Step abstraction for the graph.
//!
//! Two-layer design:
//! - **`StepPlugin` trait** - the open set. Host code implements it to add
//!   new computation kinds without touching the scheduler.
//! - **`BuiltinStep` enum** - the built-in kinds. Dispatch is a plain match,
//!   so the hot path pays no vtable cost for them.
//!
//! `AnyStep` wraps either variant so the group can handle both uniformly.
//! `StepCell` is what the group actually stores: the step behind its own
//! mutex plus the slots and status that other threads read without it.

use crate::error::StepError;
use crate::graph::id::StepId;
use crate::graph::slot::{InputSlot, OutputSlot, SlotDescriptor};
use crate::graph::steps::{
    ConstantStep, ExpressionStep, GainStep, GroupStep, IntegratorStep, RecorderStep, SumStep,
    UnitDelayStep,
};
use crate::graph::value::{ConfigValue, DataValue, StepParams, ValueType};
use crate::types::{StepMode, StepState, StepStatus};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Simulated time handed to a step for one compute.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TickTime {
    /// Simulated time in seconds at the start of this step
    pub time: f64,
    /// Step size in seconds
    pub dt: f64,
    /// Tick counter of whoever is driving the compute
    pub tick: u64,
}

impl TickTime {
    pub fn new(time: f64, dt: f64, tick: u64) -> Self {
        Self { time, dt, tick }
    }
}

/// Context passed to `compute`.
///
/// Input values are sampled once, before `compute` runs, so a step sees a
/// consistent set even if a producer on another thread publishes meanwhile.
pub struct StepContext<'a> {
    inputs: &'a [InputSlot],
    values: Vec<Option<Arc<DataValue>>>,
    outputs: &'a [OutputSlot],
    /// Simulated time in seconds.
    pub time: f64,
    /// Time since last compute in seconds.
    pub dt: f64,
    /// Monotonic tick counter.
    pub tick: u64,
    stop_requested: bool,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(inputs: &'a [InputSlot], outputs: &'a [OutputSlot], time: &TickTime) -> Self {
        Self {
            inputs,
            values: inputs.iter().map(InputSlot::value).collect(),
            outputs,
            time: time.time,
            dt: time.dt,
            tick: time.tick,
            stop_requested: false,
        }
    }

    fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|s| s.name() == name)
    }

    /// Value of the named input, or `None` if unknown, unconnected or unset.
    pub fn input(&self, name: &str) -> Option<&DataValue> {
        self.input_index(name).and_then(|i| self.input_at(i))
    }

    pub fn input_at(&self, index: usize) -> Option<&DataValue> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    pub(crate) fn input_shared_at(&self, index: usize) -> Option<Arc<DataValue>> {
        self.values.get(index).cloned().flatten()
    }

    pub fn require_input(&self, name: &str) -> Result<&DataValue, StepError> {
        let index = self
            .input_index(name)
            .ok_or_else(|| StepError::UnknownSlot(name.to_string()))?;
        self.input_at(index)
            .ok_or_else(|| StepError::MissingInput(name.to_string()))
    }

    pub fn require_f64(&self, name: &str) -> Result<f64, StepError> {
        let value = self.require_input(name)?;
        value.as_f64().ok_or_else(|| StepError::TypeMismatch {
            slot: name.to_string(),
            expected: ValueType::Float,
            found: value.value_type(),
        })
    }

    /// Publish a value on the named output.
    ///
    /// The value must fit the declared type; `Any` outputs take anything.
    pub fn set_output(&mut self, name: &str, value: impl Into<DataValue>) -> Result<(), StepError> {
        self.set_output_shared(name, Arc::new(value.into()))
    }

    pub fn set_output_shared(&mut self, name: &str, value: Arc<DataValue>) -> Result<(), StepError> {
        let slot = self
            .outputs
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| StepError::UnknownSlot(name.to_string()))?;
        let declared = slot.descriptor.value_type;
        if !declared.admits(&value) {
            return Err(StepError::TypeMismatch {
                slot: name.to_string(),
                expected: declared,
                found: value.value_type(),
            });
        }
        slot.handle.publish_shared(value);
        Ok(())
    }

    /// Ask the driving looped trigger to stop after this tick.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }
}

/// Trait for pluggable/user-defined steps.
pub trait StepPlugin: Send {
    /// Registry kind this step was created from.
    fn kind(&self) -> &str;

    /// Slot declarations. Read once, when the step is added to a group.
    fn slots(&self) -> Vec<SlotDescriptor>;

    fn mode(&self) -> StepMode {
        StepMode::Triggered
    }

    /// Current parameters, for descriptions.
    fn params(&self) -> StepParams {
        StepParams::new()
    }

    /// Called when a looped trigger starts driving this step.
    fn on_start(&mut self) -> Result<(), StepError> {
        Ok(())
    }

    /// Read inputs, compute, publish outputs. Must not block on anything
    /// but locks scoped to this step.
    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError>;

    /// Called when the last looped trigger driving this step stops.
    fn on_stop(&mut self) {}

    fn on_input_connected(&mut self, _slot: &str, _source: ValueType) {}

    fn on_input_disconnected(&mut self, _slot: &str) {}

    fn on_output_connected(&mut self, _slot: &str) {}

    fn on_output_disconnected(&mut self, _slot: &str) {}

    fn on_param_change(&mut self, key: &str, _value: &ConfigValue) -> Result<(), StepError> {
        Err(StepError::InvalidParam {
            key: key.to_string(),
            message: format!("{} has no parameter '{}'", self.kind(), key),
        })
    }

    /// Downcasting hook for tests and host tooling.
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
}

/// Enum dispatch for built-in steps.
pub enum BuiltinStep {
    Constant(ConstantStep),
    Gain(GainStep),
    Sum(SumStep),
    Integrator(IntegratorStep),
    UnitDelay(UnitDelayStep),
    Recorder(RecorderStep),
    Expression(ExpressionStep),
    Group(GroupStep),
}

macro_rules! dispatch_builtin {
    ($self:expr, $step:ident => $body:expr) => {
        match $self {
            BuiltinStep::Constant($step) => $body,
            BuiltinStep::Gain($step) => $body,
            BuiltinStep::Sum($step) => $body,
            BuiltinStep::Integrator($step) => $body,
            BuiltinStep::UnitDelay($step) => $body,
            BuiltinStep::Recorder($step) => $body,
            BuiltinStep::Expression($step) => $body,
            BuiltinStep::Group($step) => $body,
        }
    };
}

impl StepPlugin for BuiltinStep {
    fn kind(&self) -> &str {
        dispatch_builtin!(self, s => s.kind())
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        dispatch_builtin!(self, s => s.slots())
    }

    fn mode(&self) -> StepMode {
        dispatch_builtin!(self, s => s.mode())
    }

    fn params(&self) -> StepParams {
        dispatch_builtin!(self, s => s.params())
    }

    fn on_start(&mut self) -> Result<(), StepError> {
        dispatch_builtin!(self, s => s.on_start())
    }

    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        dispatch_builtin!(self, s => s.compute(ctx))
    }

    fn on_stop(&mut self) {
        dispatch_builtin!(self, s => s.on_stop())
    }

    fn on_input_connected(&mut self, slot: &str, source: ValueType) {
        dispatch_builtin!(self, s => s.on_input_connected(slot, source))
    }

    fn on_input_disconnected(&mut self, slot: &str) {
        dispatch_builtin!(self, s => s.on_input_disconnected(slot))
    }

    fn on_output_connected(&mut self, slot: &str) {
        dispatch_builtin!(self, s => s.on_output_connected(slot))
    }

    fn on_output_disconnected(&mut self, slot: &str) {
        dispatch_builtin!(self, s => s.on_output_disconnected(slot))
    }

    fn on_param_change(&mut self, key: &str, value: &ConfigValue) -> Result<(), StepError> {
        dispatch_builtin!(self, s => s.on_param_change(key, value))
    }

    fn as_any(&self) -> Option<&dyn Any> {
        dispatch_builtin!(self, s => s.as_any())
    }
}

/// Wrapper that holds either a built-in step (enum dispatch) or a plugin (trait object).
pub enum AnyStep {
    Builtin(BuiltinStep),
    Plugin(Box<dyn StepPlugin>),
}

impl AnyStep {
    pub fn plugin(step: impl StepPlugin + 'static) -> Self {
        AnyStep::Plugin(Box::new(step))
    }

    fn get(&self) -> &dyn StepPlugin {
        match self {
            AnyStep::Builtin(s) => s,
            AnyStep::Plugin(s) => s.as_ref(),
        }
    }

    fn get_mut(&mut self) -> &mut dyn StepPlugin {
        match self {
            AnyStep::Builtin(s) => s,
            AnyStep::Plugin(s) => s.as_mut(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            AnyStep::Builtin(s) => s.kind(),
            AnyStep::Plugin(s) => s.kind(),
        }
    }

    pub fn slots(&self) -> Vec<SlotDescriptor> {
        self.get().slots()
    }

    pub fn mode(&self) -> StepMode {
        self.get().mode()
    }

    pub fn params(&self) -> StepParams {
        self.get().params()
    }

    pub fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        match self {
            AnyStep::Builtin(s) => s.compute(ctx),
            AnyStep::Plugin(s) => s.compute(ctx),
        }
    }

    /// The embedded group, if this is a group step.
    pub fn as_group(&self) -> Option<&GroupStep> {
        match self {
            AnyStep::Builtin(BuiltinStep::Group(g)) => Some(g),
            _ => None,
        }
    }

    /// Downcast a plugin or built-in to its concrete type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.get().as_any().and_then(|a| a.downcast_ref::<T>())
    }
}

impl From<BuiltinStep> for AnyStep {
    fn from(step: BuiltinStep) -> Self {
        AnyStep::Builtin(step)
    }
}

/// Result of asking a cell to compute.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputeOutcome {
    Computed { stop_requested: bool },
    /// Faulted earlier; not run.
    Skipped,
    /// Removed from its group while a stale plan still referenced it.
    Removed,
    /// This compute faulted the step.
    Failed(String),
}

/// A step as stored in a group.
///
/// The step itself sits behind a per-step mutex, so its `compute` and its
/// structural hooks never overlap. Slots and status are readable without
/// that lock.
pub struct StepCell {
    id: StepId,
    name: String,
    kind: String,
    mode: StepMode,
    pub(crate) inputs: Vec<InputSlot>,
    pub(crate) outputs: Vec<OutputSlot>,
    step: Mutex<AnyStep>,
    status: RwLock<StepStatus>,
    /// Number of running looped triggers whose plan contains this step.
    /// Only changed with `step` locked.
    drivers: AtomicU32,
    removed: AtomicBool,
}

impl StepCell {
    pub(crate) fn new(id: StepId, name: impl Into<String>, step: AnyStep) -> Self {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for descriptor in step.slots() {
            if descriptor.is_input() {
                inputs.push(InputSlot::new(descriptor));
            } else {
                outputs.push(OutputSlot::new(descriptor));
            }
        }
        Self {
            id,
            name: name.into(),
            kind: step.kind().to_string(),
            mode: step.mode(),
            inputs,
            outputs,
            step: Mutex::new(step),
            status: RwLock::new(StepStatus::default()),
            drivers: AtomicU32::new(0),
            removed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> StepId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn mode(&self) -> StepMode {
        self.mode
    }

    pub fn inputs(&self) -> &[InputSlot] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputSlot] {
        &self.outputs
    }

    pub fn input_index(&self, name: &str) -> Option<u16> {
        self.inputs
            .iter()
            .position(|s| s.name() == name)
            .map(|i| i as u16)
    }

    pub fn output_index(&self, name: &str) -> Option<u16> {
        self.outputs
            .iter()
            .position(|s| s.name() == name)
            .map(|i| i as u16)
    }

    pub fn status(&self) -> StepStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> StepState {
        self.status.read().state
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Mark removed, then wait for any in-flight compute to finish.
    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
        let _step = self.step.lock();
    }

    /// Run one compute. Errors and panics are contained here and turn the
    /// step into `Exception`; they never reach the caller.
    pub fn compute(&self, time: &TickTime) -> ComputeOutcome {
        if self.state().is_faulted() {
            self.status.write().skipped += 1;
            return ComputeOutcome::Skipped;
        }

        let mut step = self.step.lock();
        if self.is_removed() {
            return ComputeOutcome::Removed;
        }

        let mut ctx = StepContext::new(&self.inputs, &self.outputs, time);
        let result = match catch_unwind(AssertUnwindSafe(|| step.compute(&mut ctx))) {
            Ok(result) => result,
            Err(payload) => Err(StepError::Panicked(panic_message(payload.as_ref()))),
        };
        let stop_requested = ctx.stop_requested;
        drop(ctx);
        drop(step);

        match result {
            Ok(()) => {
                self.status.write().computations += 1;
                ComputeOutcome::Computed { stop_requested }
            }
            Err(err) => ComputeOutcome::Failed(self.fault(&err)),
        }
    }

    fn fault(&self, err: &StepError) -> String {
        let message = err.to_string();
        let mut status = self.status.write();
        status.state = StepState::Exception;
        status.last_error = Some(message.clone());
        status.failures += 1;
        message
    }

    /// Clear an exception. Returns true if the step was faulted.
    pub(crate) fn reset(&self) -> bool {
        let mut status = self.status.write();
        if !status.state.is_faulted() {
            return false;
        }
        status.state = if self.drivers.load(Ordering::Acquire) > 0 {
            StepState::Running
        } else {
            StepState::Stopped
        };
        status.last_error = None;
        true
    }

    /// A looped trigger began driving this step. The first driver calls
    /// `on_start`; a failing `on_start` faults the step.
    pub(crate) fn start(&self) -> Result<(), String> {
        let mut step = self.step.lock();
        if self.drivers.fetch_add(1, Ordering::AcqRel) > 0 {
            return Ok(());
        }
        match catch_unwind(AssertUnwindSafe(|| step.get_mut().on_start())) {
            Ok(Ok(())) => {
                let mut status = self.status.write();
                status.state = StepState::Running;
                status.last_error = None;
                Ok(())
            }
            Ok(Err(err)) => Err(self.fault(&err)),
            Err(payload) => Err(self.fault(&StepError::Panicked(panic_message(payload.as_ref())))),
        }
    }

    /// A looped trigger stopped driving this step. The last driver calls
    /// `on_stop`.
    pub(crate) fn stop(&self) {
        let mut step = self.step.lock();
        let previous = self
            .drivers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1))
            .unwrap_or(0);
        if previous != 1 {
            return;
        }
        if catch_unwind(AssertUnwindSafe(|| step.get_mut().on_stop())).is_err() {
            tracing::warn!("Step '{}' panicked in on_stop", self.name);
        }
        let mut status = self.status.write();
        if !status.state.is_faulted() {
            status.state = StepState::Stopped;
        }
    }

    pub(crate) fn set_param(&self, key: &str, value: &ConfigValue) -> Result<(), StepError> {
        let mut step = self.step.lock();
        match catch_unwind(AssertUnwindSafe(|| step.get_mut().on_param_change(key, value))) {
            Ok(result) => result,
            Err(payload) => Err(StepError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    pub(crate) fn notify_input_connected(&self, index: u16, source: ValueType) {
        self.with_hook(|step, cell| {
            if let Some(slot) = cell.inputs.get(index as usize) {
                step.on_input_connected(slot.name(), source);
            }
        });
    }

    pub(crate) fn notify_input_disconnected(&self, index: u16) {
        self.with_hook(|step, cell| {
            if let Some(slot) = cell.inputs.get(index as usize) {
                step.on_input_disconnected(slot.name());
            }
        });
    }

    pub(crate) fn notify_output_connected(&self, index: u16) {
        self.with_hook(|step, cell| {
            if let Some(slot) = cell.outputs.get(index as usize) {
                step.on_output_connected(slot.name());
            }
        });
    }

    pub(crate) fn notify_output_disconnected(&self, index: u16) {
        self.with_hook(|step, cell| {
            if let Some(slot) = cell.outputs.get(index as usize) {
                step.on_output_disconnected(slot.name());
            }
        });
    }

    fn with_hook(&self, f: impl FnOnce(&mut dyn StepPlugin, &StepCell)) {
        let mut step = self.step.lock();
        if catch_unwind(AssertUnwindSafe(|| f(step.get_mut(), self))).is_err() {
            drop(step);
            self.fault(&StepError::Panicked("connection hook panicked".to_string()));
        }
    }

    /// Run `f` against the step under its lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&AnyStep) -> R) -> R {
        let step = self.step.lock();
        f(&step)
    }

    /// Like [`inspect`](Self::inspect) but gives up after `timeout`.
    pub fn try_inspect<R>(&self, timeout: Duration, f: impl FnOnce(&AnyStep) -> R) -> Option<R> {
        let step = self.step.try_lock_for(timeout)?;
        Some(f(&step))
    }
}

impl std::fmt::Debug for StepCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepCell")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
