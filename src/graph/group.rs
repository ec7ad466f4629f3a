//! Groups - the containers that own steps, connections and triggers.
//!
//! A [`Group`] is a cheap, cloneable handle. All editing goes through it.
//!
//! Locking:
//! - One narrow structural `RwLock` per group guards the arenas. It is held
//!   only for the bookkeeping of an edit or for resolving a plan, never
//!   while a step computes and never while a worker is joined.
//! - Each step has its own mutex (see [`StepCell`]). Connection hooks run
//!   after the structural lock is released.
//!
//! Storage is arena-style: steps, connections and triggers live in vectors
//! indexed by their IDs. A removed entry leaves a hole, so IDs are never
//! reused and stale IDs fail to resolve.

use crate::config::{EngineConfig, LoopSettings, TimingMode};
use crate::error::{GraphError, Result, ResultExt};
use crate::graph::checker::{ConsistencyChecker, ConsistencyReport, Finding};
use crate::graph::connection::Connection;
use crate::graph::events::{EventBus, GraphEvent};
use crate::graph::id::{ConnectionId, SlotId, StepId, TriggerId};
use crate::graph::looped::{LoopLimits, LoopedTrigger, StopOutcome};
use crate::graph::plan::{ExecutionPlan, PlanCompiler};
use crate::graph::registry::StepRegistry;
use crate::graph::slot::{SlotDescriptor, SlotHandle};
use crate::graph::snapshot::{ExposureInfo, GroupSnapshot, StepInfo, TriggerInfo};
use crate::graph::step::{AnyStep, BuiltinStep, StepCell, StepPlugin, TickTime};
use crate::graph::steps::GroupStep;
use crate::graph::trigger::{self, FireReport, TriggerNode};
use crate::graph::value::{ConfigValue, DataValue, StepParams};
use crate::types::{LoopStats, StepStatus, TriggerState};
use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Steps and slots per direction that fit in a [`SlotId`].
const MAX_STEPS: usize = 1 << 20;
const MAX_SLOTS: usize = 1 << 12;

/// A published internal slot.
#[derive(Debug, Clone)]
pub(crate) struct Exposure {
    pub name: String,
    pub slot: SlotId,
    /// Inputs only: the handle writes from outside go into.
    pub proxy: Option<SlotHandle>,
}

/// Arenas guarded by the structural lock.
#[derive(Default)]
pub(crate) struct Structure {
    pub steps: Vec<Option<Arc<StepCell>>>,
    pub step_names: HashMap<String, StepId>,
    pub connections: Vec<Option<Connection>>,
    pub triggers: Vec<Option<TriggerNode>>,
    pub trigger_names: HashMap<String, TriggerId>,
    pub exposed_inputs: Vec<Exposure>,
    pub exposed_outputs: Vec<Exposure>,
    /// Bumped on every edit; cached plans compare against it
    pub generation: u64,
}

impl Structure {
    pub fn step(&self, id: StepId) -> Result<&Arc<StepCell>> {
        self.steps
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(GraphError::UnknownStep(id))
    }

    pub fn trigger(&self, id: TriggerId) -> Option<&TriggerNode> {
        self.triggers.get(id.index()).and_then(Option::as_ref)
    }

    fn trigger_mut(&mut self, id: TriggerId) -> Result<&mut TriggerNode> {
        self.triggers
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(GraphError::UnknownTrigger(id))
    }

    fn require_trigger(&self, id: TriggerId) -> Result<&TriggerNode> {
        self.trigger(id).ok_or(GraphError::UnknownTrigger(id))
    }

    pub fn live_steps(&self) -> impl Iterator<Item = &Arc<StepCell>> {
        self.steps.iter().flatten()
    }

    pub fn live_connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().flatten()
    }

    pub fn live_triggers(&self) -> impl Iterator<Item = &TriggerNode> {
        self.triggers.iter().flatten()
    }

    /// The connection feeding `slot` (an input), if any.
    pub fn connection_into(&self, slot: SlotId) -> Option<&Connection> {
        self.live_connections().find(|c| c.target == slot)
    }

    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

/// Simulated clock for fires that are not driven by a loop.
#[derive(Debug, Default)]
struct ManualClock {
    time: f64,
    tick: u64,
}

pub(crate) struct GroupShared {
    pub name: String,
    pub structure: RwLock<Structure>,
    pub registry: Arc<StepRegistry>,
    pub config: EngineConfig,
    pub events: Arc<EventBus>,
    full_plan: Mutex<Option<Arc<ExecutionPlan>>>,
    clock: Mutex<ManualClock>,
}

impl GroupShared {
    fn loop_limits(&self) -> LoopLimits {
        LoopLimits {
            overrun_warn_every: self.config.overrun_warn_every.max(1),
            spin_threshold: self.config.spin_threshold(),
        }
    }

    /// Plan over every step of the group, cached per generation.
    fn full_plan(&self) -> Arc<ExecutionPlan> {
        let structure = self.structure.read();
        let mut cached = self.full_plan.lock();
        if let Some(plan) = cached.as_ref() {
            if plan.generation == structure.generation {
                return plan.clone();
            }
        }
        let plan = Arc::new(PlanCompiler::compile(
            &structure.steps,
            &structure.connections,
            None,
            &[],
            structure.generation,
        ));
        tracing::debug!(
            "Group '{}' plan recompiled: {} step(s) (gen {})",
            self.name,
            plan.len(),
            plan.generation
        );
        *cached = Some(plan.clone());
        plan
    }
}

impl Drop for GroupShared {
    fn drop(&mut self) {
        let loops: Vec<Arc<LoopedTrigger>> = self
            .structure
            .get_mut()
            .live_triggers()
            .filter_map(|t| t.looped.clone())
            .collect();
        for looped in loops {
            looped.stop();
        }
    }
}

/// Builder for [`Group`].
pub struct GroupBuilder {
    name: String,
    registry: Option<Arc<StepRegistry>>,
    config: EngineConfig,
}

impl GroupBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: None,
            config: EngineConfig::default(),
        }
    }

    /// Step factories for `create_step`. Defaults to the built-in kinds.
    pub fn registry(mut self, registry: Arc<StepRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Group> {
        self.config.validate()?;
        Ok(self.assemble())
    }

    fn assemble(self) -> Group {
        let events = Arc::new(EventBus::new(self.config.event_capacity));
        Group {
            shared: Arc::new(GroupShared {
                name: self.name,
                structure: RwLock::new(Structure::default()),
                registry: self
                    .registry
                    .unwrap_or_else(|| Arc::new(StepRegistry::with_builtins())),
                config: self.config,
                events,
                full_plan: Mutex::new(None),
                clock: Mutex::new(ManualClock::default()),
            }),
        }
    }

    pub(crate) fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The registry `build` will use, created now if none was given.
    pub(crate) fn registry_or_default(&mut self) -> Arc<StepRegistry> {
        self.registry
            .get_or_insert_with(|| Arc::new(StepRegistry::with_builtins()))
            .clone()
    }

    pub(crate) fn engine_config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Handle to a group. Clones share the same group.
///
/// Dropping the last handle stops every looped trigger of the group.
#[derive(Clone)]
pub struct Group {
    pub(crate) shared: Arc<GroupShared>,
}

impl Group {
    /// A group with default config and the built-in step kinds.
    pub fn new(name: impl Into<String>) -> Self {
        GroupBuilder::new(name).assemble()
    }

    pub fn builder(name: impl Into<String>) -> GroupBuilder {
        GroupBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.shared.registry
    }

    /// Structure generation; changes on every edit.
    pub fn generation(&self) -> u64 {
        self.shared.structure.read().generation
    }

    pub fn ptr_eq(&self, other: &Group) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn topology_changed(&self, generation: u64) {
        self.shared
            .events
            .emit(GraphEvent::TopologyChanged { generation });
    }

    // ── Steps ──

    /// Add a plugin step.
    pub fn add_step(&self, name: impl Into<String>, step: impl StepPlugin + 'static) -> Result<StepId> {
        self.add_any(name, AnyStep::plugin(step))
    }

    /// Create a step from the registry.
    pub fn create_step(
        &self,
        name: impl Into<String>,
        kind: &str,
        params: &StepParams,
    ) -> Result<StepId> {
        let name = name.into();
        let step = self
            .shared
            .registry
            .create(kind, params)
            .with_context(|| format!("Failed to create step '{}'", name))?;
        self.add_any(name, step)
    }

    /// Embed `child` as a step. Its slots are the child's exposures as of now.
    pub fn add_group(&self, name: impl Into<String>, child: Group) -> Result<StepId> {
        if child.ptr_eq(self) || child.contains_group(self) {
            return Err(GraphError::DuplicateId(format!(
                "group '{}' cannot contain itself",
                self.name()
            )));
        }
        self.add_any(name, AnyStep::Builtin(BuiltinStep::Group(GroupStep::new(child))))
    }

    /// Whether `other` is embedded anywhere below this group.
    pub fn contains_group(&self, other: &Group) -> bool {
        self.child_groups()
            .iter()
            .any(|child| child.ptr_eq(other) || child.contains_group(other))
    }

    fn child_groups(&self) -> Vec<Group> {
        let cells: Vec<Arc<StepCell>> = self.shared.structure.read().live_steps().cloned().collect();
        cells
            .iter()
            .filter(|c| c.kind() == "group")
            .filter_map(|c| c.inspect(|s| s.as_group().map(|g| g.group().clone())))
            .collect()
    }

    pub fn add_any(&self, name: impl Into<String>, step: AnyStep) -> Result<StepId> {
        let name = name.into();
        let (id, generation) = {
            let mut s = self.shared.structure.write();
            if s.step_names.contains_key(&name) {
                return Err(GraphError::DuplicateId(format!("step '{}'", name)));
            }
            if s.steps.len() >= MAX_STEPS {
                return Err(GraphError::InvalidParam {
                    key: name,
                    message: format!("group already holds {} steps", MAX_STEPS),
                });
            }
            let id = StepId::from_index(s.steps.len());
            let cell = StepCell::new(id, name.clone(), step);
            if cell.inputs().len() > MAX_SLOTS || cell.outputs().len() > MAX_SLOTS {
                return Err(GraphError::InvalidParam {
                    key: name,
                    message: format!("more than {} slots in one direction", MAX_SLOTS),
                });
            }
            s.steps.push(Some(Arc::new(cell)));
            s.step_names.insert(name.clone(), id);
            (id, s.bump())
        };
        tracing::debug!("Group '{}': added step '{}' as {}", self.name(), name, id);
        self.topology_changed(generation);
        Ok(id)
    }

    /// Remove a step, its connections, subscriptions and exposures.
    ///
    /// A looped trigger whose only listener is this step is stopped first.
    /// Must not be called from inside the removed step's own `compute`.
    pub fn remove_step(&self, id: StepId) -> Result<()> {
        let sole_loops: Vec<Arc<LoopedTrigger>> = {
            let s = self.shared.structure.read();
            s.step(id)?;
            s.live_triggers()
                .filter(|t| t.listeners.as_slice() == [id])
                .filter_map(|t| t.looped.clone())
                .collect()
        };
        for looped in &sole_loops {
            tracing::info!(
                "Stopping '{}' before removing its only listener {}",
                looped.name(),
                id
            );
            looped.stop();
        }

        let (cell, removed, generation) = {
            let mut s = self.shared.structure.write();
            let cell = s
                .steps
                .get_mut(id.index())
                .and_then(Option::take)
                .ok_or(GraphError::UnknownStep(id))?;
            s.step_names.remove(cell.name());

            let mut removed = Vec::new();
            for slot in s.connections.iter_mut() {
                if slot.as_ref().is_some_and(|c| c.touches(id)) {
                    if let Some(conn) = slot.take() {
                        removed.push(conn);
                    }
                }
            }
            for conn in &removed {
                if conn.target_step() != id {
                    if let Ok(target) = s.step(conn.target_step()) {
                        if let Some(input) = target.inputs().get(conn.target.slot_index() as usize) {
                            input.detach();
                        }
                    }
                }
            }
            for node in s.triggers.iter_mut().flatten() {
                node.listeners.retain(|&l| l != id);
            }
            s.exposed_inputs.retain(|e| e.slot.step() != id);
            s.exposed_outputs.retain(|e| e.slot.step() != id);
            (cell, removed, s.bump())
        };

        cell.mark_removed();
        let cells = self.cells_of(&removed);
        for conn in &removed {
            if conn.target_step() != id {
                if let Some(target) = cells.get(&conn.target_step()) {
                    target.notify_input_disconnected(conn.target.slot_index());
                }
            }
            if conn.source_step() != id {
                if let Some(source) = cells.get(&conn.source_step()) {
                    source.notify_output_disconnected(conn.source.slot_index());
                }
            }
        }

        tracing::debug!(
            "Group '{}': removed step '{}' and {} connection(s)",
            self.name(),
            cell.name(),
            removed.len()
        );
        self.topology_changed(generation);
        Ok(())
    }

    fn cells_of(&self, conns: &[Connection]) -> HashMap<StepId, Arc<StepCell>> {
        let s = self.shared.structure.read();
        conns
            .iter()
            .flat_map(|c| [c.source_step(), c.target_step()])
            .filter_map(|id| s.step(id).ok().map(|cell| (id, cell.clone())))
            .collect()
    }

    pub fn step_id(&self, name: &str) -> Option<StepId> {
        self.shared.structure.read().step_names.get(name).copied()
    }

    pub fn contains_step(&self, id: StepId) -> bool {
        self.shared.structure.read().step(id).is_ok()
    }

    pub fn step_count(&self) -> usize {
        self.shared.structure.read().live_steps().count()
    }

    pub(crate) fn cell(&self, id: StepId) -> Result<Arc<StepCell>> {
        self.shared.structure.read().step(id).cloned()
    }

    // ── Connections ──

    /// Connect `source.output` to `target.input`.
    ///
    /// Fails with `TypeMismatch` if the output type is not accepted by the
    /// input, or `AlreadyConnected` if the input already has a source. On
    /// failure nothing changes. Connecting into a faulted step clears its
    /// exception.
    pub fn connect(
        &self,
        source: StepId,
        output: &str,
        target: StepId,
        input: &str,
    ) -> Result<ConnectionId> {
        let (conn, src, dst, source_type, generation) = {
            let mut s = self.shared.structure.write();
            let src = s.step(source)?.clone();
            let dst = s.step(target)?.clone();
            let out_idx = src.output_index(output).ok_or_else(|| GraphError::UnknownSlot {
                step: source,
                slot: output.to_string(),
            })?;
            let in_idx = dst.input_index(input).ok_or_else(|| GraphError::UnknownSlot {
                step: target,
                slot: input.to_string(),
            })?;

            let out_desc = &src.outputs()[out_idx as usize].descriptor;
            let in_slot = &dst.inputs()[in_idx as usize];
            if !in_slot.descriptor.value_type.accepts(out_desc.value_type) {
                return Err(GraphError::TypeMismatch {
                    source_step: source,
                    output: output.to_string(),
                    target_step: target,
                    input: input.to_string(),
                    expected: in_slot.descriptor.value_type,
                    found: out_desc.value_type,
                });
            }
            if in_slot.is_connected() {
                return Err(GraphError::AlreadyConnected {
                    step: target,
                    slot: input.to_string(),
                });
            }

            let conn = Connection {
                id: ConnectionId::from_index(s.connections.len()),
                source: SlotId::new(source, out_idx),
                target: SlotId::new(target, in_idx),
                feedback: in_slot.descriptor.stale_tolerant,
            };
            in_slot.attach(src.outputs()[out_idx as usize].handle());
            let source_type = out_desc.value_type;
            s.connections.push(Some(conn));
            let generation = s.bump();
            (conn, src, dst, source_type, generation)
        };

        dst.notify_input_connected(conn.target.slot_index(), source_type);
        src.notify_output_connected(conn.source.slot_index());
        if dst.reset() {
            tracing::info!("Step '{}' recovered after reconnect", dst.name());
            self.shared.events.emit(GraphEvent::StepRecovered {
                step: dst.id(),
                name: dst.name().to_string(),
            });
        }

        tracing::debug!(
            "Group '{}': connected {}.{} -> {}.{}{}",
            self.name(),
            src.name(),
            output,
            dst.name(),
            input,
            if conn.feedback { " (feedback)" } else { "" }
        );
        self.topology_changed(generation);
        Ok(conn.id)
    }

    /// Remove a connection. Returns false if it did not exist.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let (conn, generation) = {
            let mut s = self.shared.structure.write();
            let Some(conn) = s.connections.get_mut(id.index()).and_then(Option::take) else {
                return false;
            };
            if let Ok(target) = s.step(conn.target_step()) {
                if let Some(input) = target.inputs().get(conn.target.slot_index() as usize) {
                    input.detach();
                }
            }
            (conn, s.bump())
        };

        let cells = self.cells_of(&[conn]);
        if let Some(target) = cells.get(&conn.target_step()) {
            target.notify_input_disconnected(conn.target.slot_index());
        }
        if let Some(source) = cells.get(&conn.source_step()) {
            source.notify_output_disconnected(conn.source.slot_index());
        }
        tracing::debug!("Group '{}': removed {}", self.name(), id);
        self.topology_changed(generation);
        true
    }

    /// Remove whatever connection feeds `step.input`.
    pub fn disconnect_input(&self, step: StepId, input: &str) -> Result<bool> {
        let conn = {
            let s = self.shared.structure.read();
            let cell = s.step(step)?;
            let idx = cell.input_index(input).ok_or_else(|| GraphError::UnknownSlot {
                step,
                slot: input.to_string(),
            })?;
            s.connection_into(SlotId::new(step, idx)).map(|c| c.id)
        };
        Ok(conn.is_some_and(|id| self.disconnect(id)))
    }

    /// Connections feeding `step`'s inputs and fed by its outputs.
    pub fn connections_of(&self, step: StepId) -> Result<(Vec<Connection>, Vec<Connection>)> {
        let s = self.shared.structure.read();
        s.step(step)?;
        let incoming = s
            .live_connections()
            .filter(|c| c.target_step() == step)
            .copied()
            .collect();
        let outgoing = s
            .live_connections()
            .filter(|c| c.source_step() == step)
            .copied()
            .collect();
        Ok((incoming, outgoing))
    }

    // ── Triggers ──

    pub fn create_trigger(&self, name: impl Into<String>) -> Result<TriggerId> {
        self.insert_trigger(name.into(), None)
    }

    /// A looped trigger with the config's default period and timing mode.
    pub fn create_looped_trigger(&self, name: impl Into<String>) -> Result<TriggerId> {
        let settings = self.shared.config.default_loop_settings();
        self.create_looped_trigger_with(name, settings)
    }

    pub fn create_looped_trigger_with(
        &self,
        name: impl Into<String>,
        settings: LoopSettings,
    ) -> Result<TriggerId> {
        validate_period(settings.period)?;
        self.insert_trigger(name.into(), Some(settings))
    }

    fn insert_trigger(&self, name: String, looped: Option<LoopSettings>) -> Result<TriggerId> {
        let (id, generation) = {
            let mut s = self.shared.structure.write();
            if s.trigger_names.contains_key(&name) {
                return Err(GraphError::DuplicateId(format!("trigger '{}'", name)));
            }
            let id = TriggerId::from_index(s.triggers.len());
            let looped = looped.map(|settings| {
                Arc::new(LoopedTrigger::new(
                    id,
                    name.clone(),
                    settings,
                    self.shared.events.clone(),
                    self.shared.loop_limits(),
                ))
            });
            s.triggers.push(Some(TriggerNode::new(id, name.clone(), looped)));
            s.trigger_names.insert(name.clone(), id);
            (id, s.bump())
        };
        tracing::debug!("Group '{}': created trigger '{}' as {}", self.name(), name, id);
        self.topology_changed(generation);
        Ok(id)
    }

    /// Remove a trigger, stopping it first if it is a running loop.
    pub fn remove_trigger(&self, id: TriggerId) -> Result<()> {
        let looped = self.looped(id).ok();
        if let Some(looped) = &looped {
            looped.stop();
        }

        let generation = {
            let mut s = self.shared.structure.write();
            let node = s
                .triggers
                .get_mut(id.index())
                .and_then(Option::take)
                .ok_or(GraphError::UnknownTrigger(id))?;
            s.trigger_names.remove(&node.name);
            for other in s.triggers.iter_mut().flatten() {
                other.downstream.retain(|&d| d != id);
                other.upstream.retain(|&u| u != id);
            }
            s.bump()
        };
        self.topology_changed(generation);
        Ok(())
    }

    /// Subscribe `step` to `trigger`. Attaching twice is a no-op.
    pub fn attach(&self, trigger: TriggerId, step: StepId) -> Result<()> {
        let generation = {
            let mut s = self.shared.structure.write();
            s.step(step)?;
            let node = s.trigger_mut(trigger)?;
            if node.listeners.contains(&step) {
                return Ok(());
            }
            node.listeners.push(step);
            s.bump()
        };
        self.topology_changed(generation);
        Ok(())
    }

    pub fn detach(&self, trigger: TriggerId, step: StepId) -> Result<bool> {
        let generation = {
            let mut s = self.shared.structure.write();
            let node = s.trigger_mut(trigger)?;
            let before = node.listeners.len();
            node.listeners.retain(|&l| l != step);
            if node.listeners.len() == before {
                return Ok(false);
            }
            s.bump()
        };
        self.topology_changed(generation);
        Ok(true)
    }

    /// Fire `to` after `from` on every fire of `from`.
    pub fn connect_triggers(&self, from: TriggerId, to: TriggerId) -> Result<()> {
        let generation = {
            let mut s = self.shared.structure.write();
            s.require_trigger(to)?;
            let node = s.trigger_mut(from)?;
            if node.downstream.contains(&to) {
                return Ok(());
            }
            node.downstream.push(to);
            s.trigger_mut(to)?.upstream.push(from);
            s.bump()
        };
        self.topology_changed(generation);
        Ok(())
    }

    pub fn disconnect_triggers(&self, from: TriggerId, to: TriggerId) -> Result<bool> {
        let generation = {
            let mut s = self.shared.structure.write();
            s.require_trigger(to)?;
            let node = s.trigger_mut(from)?;
            let before = node.downstream.len();
            node.downstream.retain(|&d| d != to);
            if node.downstream.len() == before {
                return Ok(false);
            }
            s.trigger_mut(to)?.upstream.retain(|&u| u != from);
            s.bump()
        };
        self.topology_changed(generation);
        Ok(true)
    }

    pub fn trigger_id(&self, name: &str) -> Option<TriggerId> {
        self.shared.structure.read().trigger_names.get(name).copied()
    }

    /// Execution plan a fire of `trigger` would run now.
    pub fn plan_of(&self, trigger: TriggerId) -> Result<Arc<ExecutionPlan>> {
        trigger::resolve(&self.shared, trigger)
            .map(|t| t.plan)
            .ok_or(GraphError::UnknownTrigger(trigger))
    }

    /// Dependency order over every step of the group.
    pub fn execution_order(&self) -> Vec<StepId> {
        self.shared.full_plan().step_ids()
    }

    fn looped(&self, id: TriggerId) -> Result<Arc<LoopedTrigger>> {
        let s = self.shared.structure.read();
        s.require_trigger(id)?
            .looped
            .clone()
            .ok_or(GraphError::NotLooped(id))
    }

    // ── Running ──

    /// Start a looped trigger. With `strict_validation` set in the config,
    /// refuses to start while the checker reports findings.
    pub fn start_trigger(&self, id: TriggerId) -> Result<()> {
        if self.shared.config.strict_validation {
            return self.start_trigger_checked(id);
        }
        self.looped(id)?.start(Arc::downgrade(&self.shared))
    }

    /// Start a looped trigger only if the checker reports no findings.
    pub fn start_trigger_checked(&self, id: TriggerId) -> Result<()> {
        let looped = self.looped(id)?;
        let findings = self.validate();
        if !findings.is_empty() {
            tracing::warn!(
                "Refusing to start '{}': {} finding(s)",
                looped.name(),
                findings.len()
            );
            return Err(GraphError::Validation(findings));
        }
        looped.start(Arc::downgrade(&self.shared))
    }

    pub fn stop_trigger(&self, id: TriggerId) -> Result<StopOutcome> {
        Ok(self.looped(id)?.stop())
    }

    /// Start every stopped looped trigger. Returns the first error, after
    /// trying all of them.
    pub fn start_all(&self) -> Result<()> {
        let mut first_err = None;
        for looped in self.all_loops() {
            if looped.state() != TriggerState::Stopped {
                continue;
            }
            let result = if self.shared.config.strict_validation {
                self.start_trigger_checked(looped.id())
            } else {
                looped.start(Arc::downgrade(&self.shared))
            };
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn stop_all(&self) {
        for looped in self.all_loops() {
            looped.stop();
        }
    }

    fn all_loops(&self) -> Vec<Arc<LoopedTrigger>> {
        self.shared
            .structure
            .read()
            .live_triggers()
            .filter_map(|t| t.looped.clone())
            .collect()
    }

    pub fn set_period(&self, id: TriggerId, period: Duration) -> Result<()> {
        validate_period(period)?;
        let looped = self.looped(id)?;
        looped.set_settings(LoopSettings {
            period,
            ..looped.settings()
        });
        Ok(())
    }

    pub fn set_timing_mode(&self, id: TriggerId, mode: TimingMode) -> Result<()> {
        let looped = self.looped(id)?;
        looped.set_settings(LoopSettings {
            mode,
            ..looped.settings()
        });
        Ok(())
    }

    pub fn set_loop_settings(&self, id: TriggerId, settings: LoopSettings) -> Result<()> {
        validate_period(settings.period)?;
        self.looped(id)?.set_settings(settings);
        Ok(())
    }

    /// Fire a trigger once.
    ///
    /// A running looped trigger on another thread is handed a kick instead
    /// (the report then only counts the handoff). Otherwise the trigger runs
    /// here with `dt` equal to its loop period, or the config default for
    /// plain triggers.
    pub fn fire(&self, id: TriggerId) -> Result<FireReport> {
        let (looped, dt) = {
            let s = self.shared.structure.read();
            let node = s.require_trigger(id)?;
            let dt = match &node.looped {
                Some(l) => l.settings().dt(),
                None => self.shared.config.default_loop_settings().dt(),
            };
            (node.looped.clone(), dt)
        };
        if let Some(looped) = looped {
            if looped.is_running() && !looped.is_worker_thread() {
                return Ok(FireReport {
                    handoffs: usize::from(looped.kick()),
                    ..FireReport::default()
                });
            }
        }
        let time = self.advance_clock(dt);
        Ok(trigger::fire(&self.shared, id, &time, &mut Vec::new()))
    }

    /// Compute every step of the group once, in dependency order.
    pub fn compute(&self, dt: f64) -> FireReport {
        let time = self.advance_clock(dt);
        self.compute_at(&time)
    }

    pub(crate) fn compute_at(&self, time: &TickTime) -> FireReport {
        let plan = self.shared.full_plan();
        trigger::run_plan(&self.shared, &plan, time)
    }

    fn advance_clock(&self, dt: f64) -> TickTime {
        let mut clock = self.shared.clock.lock();
        clock.tick += 1;
        let time = TickTime::new(clock.time, dt, clock.tick);
        clock.time += dt;
        time
    }

    /// Call `start` on every step, as a looped trigger would. Used by an
    /// enclosing group step when its loop starts.
    pub(crate) fn start_steps(&self) -> Vec<Arc<StepCell>> {
        let plan = self.shared.full_plan();
        for cell in &plan.steps {
            if let Err(message) = cell.start() {
                tracing::warn!("Step '{}' failed to start: {}", cell.name(), message);
            }
        }
        plan.steps.clone()
    }

    // ── Parameters and state ──

    pub fn set_param(&self, step: StepId, key: &str, value: impl Into<ConfigValue>) -> Result<()> {
        let cell = self.cell(step)?;
        cell.set_param(key, &value.into())
            .map_err(GraphError::from)
            .with_context(|| format!("Step '{}'", cell.name()))
    }

    /// Clear a step's exception. Returns true if it was faulted.
    pub fn reset_step(&self, step: StepId) -> Result<bool> {
        let cell = self.cell(step)?;
        let recovered = cell.reset();
        if recovered {
            tracing::info!("Step '{}' reset", cell.name());
            self.shared.events.emit(GraphEvent::StepRecovered {
                step,
                name: cell.name().to_string(),
            });
        }
        Ok(recovered)
    }

    // ── Exposure ──

    /// Publish `step.input` as the group input `name`.
    pub fn expose_input(&self, name: impl Into<String>, step: StepId, input: &str) -> Result<()> {
        let name = name.into();
        let generation = {
            let mut s = self.shared.structure.write();
            if s.exposed_inputs.iter().any(|e| e.name == name) {
                return Err(GraphError::DuplicateId(format!("exposed input '{}'", name)));
            }
            let cell = s.step(step)?.clone();
            let idx = cell.input_index(input).ok_or_else(|| GraphError::UnknownSlot {
                step,
                slot: input.to_string(),
            })?;
            let slot = &cell.inputs()[idx as usize];
            if slot.is_connected() {
                return Err(GraphError::AlreadyConnected {
                    step,
                    slot: input.to_string(),
                });
            }
            let proxy = SlotHandle::new();
            slot.attach(proxy.clone());
            s.exposed_inputs.push(Exposure {
                name: name.clone(),
                slot: SlotId::new(step, idx),
                proxy: Some(proxy),
            });
            s.bump()
        };
        tracing::debug!("Group '{}': exposed input '{}'", self.name(), name);
        self.topology_changed(generation);
        Ok(())
    }

    /// Publish `step.output` as the group output `name`.
    pub fn expose_output(&self, name: impl Into<String>, step: StepId, output: &str) -> Result<()> {
        let name = name.into();
        let generation = {
            let mut s = self.shared.structure.write();
            if s.exposed_outputs.iter().any(|e| e.name == name) {
                return Err(GraphError::DuplicateId(format!("exposed output '{}'", name)));
            }
            let idx = s.step(step)?.output_index(output).ok_or_else(|| GraphError::UnknownSlot {
                step,
                slot: output.to_string(),
            })?;
            s.exposed_outputs.push(Exposure {
                name: name.clone(),
                slot: SlotId::new(step, idx),
                proxy: None,
            });
            s.bump()
        };
        self.topology_changed(generation);
        Ok(())
    }

    pub fn unexpose_input(&self, name: &str) -> bool {
        let generation = {
            let mut s = self.shared.structure.write();
            let Some(pos) = s.exposed_inputs.iter().position(|e| e.name == name) else {
                return false;
            };
            let exposure = s.exposed_inputs.remove(pos);
            if let (Ok(cell), Some(proxy)) = (s.step(exposure.slot.step()), &exposure.proxy) {
                if let Some(input) = cell.inputs().get(exposure.slot.slot_index() as usize) {
                    input.detach_if(proxy);
                }
            }
            s.bump()
        };
        self.topology_changed(generation);
        true
    }

    pub fn unexpose_output(&self, name: &str) -> bool {
        let generation = {
            let mut s = self.shared.structure.write();
            let before = s.exposed_outputs.len();
            s.exposed_outputs.retain(|e| e.name != name);
            if s.exposed_outputs.len() == before {
                return false;
            }
            s.bump()
        };
        self.topology_changed(generation);
        true
    }

    /// Write a value into an exposed input. The internal step sees it on
    /// its next compute.
    pub fn write_input(&self, name: &str, value: impl Into<DataValue>) -> Result<()> {
        self.write_input_shared(name, Some(Arc::new(value.into())))
    }

    pub(crate) fn write_input_shared(&self, name: &str, value: Option<Arc<DataValue>>) -> Result<()> {
        let proxy = {
            let s = self.shared.structure.read();
            s.exposed_inputs
                .iter()
                .find(|e| e.name == name)
                .and_then(|e| e.proxy.clone())
                .ok_or_else(|| GraphError::UnknownSlot {
                    step: StepId::INVALID,
                    slot: name.to_string(),
                })?
        };
        match value {
            Some(v) => proxy.publish_shared(v),
            None => proxy.clear(),
        }
        Ok(())
    }

    /// Current value of an exposed output.
    pub fn read_output(&self, name: &str) -> Result<Option<Arc<DataValue>>> {
        let s = self.shared.structure.read();
        let exposure = s
            .exposed_outputs
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| GraphError::UnknownSlot {
                step: StepId::INVALID,
                slot: name.to_string(),
            })?;
        let cell = s.step(exposure.slot.step())?;
        Ok(cell
            .outputs()
            .get(exposure.slot.slot_index() as usize)
            .and_then(|o| o.value()))
    }

    /// Exposed inputs as slot descriptors named by their exposure.
    pub fn exposed_input_slots(&self) -> Vec<SlotDescriptor> {
        let s = self.shared.structure.read();
        s.exposed_inputs
            .iter()
            .filter_map(|e| {
                let cell = s.step(e.slot.step()).ok()?;
                let mut d = cell.inputs().get(e.slot.slot_index() as usize)?.descriptor.clone();
                d.name = e.name.clone();
                Some(d)
            })
            .collect()
    }

    /// Exposed outputs as slot descriptors named by their exposure.
    pub fn exposed_output_slots(&self) -> Vec<SlotDescriptor> {
        let s = self.shared.structure.read();
        s.exposed_outputs
            .iter()
            .filter_map(|e| {
                let cell = s.step(e.slot.step()).ok()?;
                let mut d = cell.outputs().get(e.slot.slot_index() as usize)?.descriptor.clone();
                d.name = e.name.clone();
                Some(d)
            })
            .collect()
    }

    // ── Observation ──

    pub fn step_status(&self, step: StepId) -> Result<StepStatus> {
        Ok(self.cell(step)?.status())
    }

    pub fn output_value(&self, step: StepId, output: &str) -> Result<Option<Arc<DataValue>>> {
        let cell = self.cell(step)?;
        let idx = cell.output_index(output).ok_or_else(|| GraphError::UnknownSlot {
            step,
            slot: output.to_string(),
        })?;
        Ok(cell.outputs()[idx as usize].value())
    }

    pub fn input_value(&self, step: StepId, input: &str) -> Result<Option<Arc<DataValue>>> {
        let cell = self.cell(step)?;
        let idx = cell.input_index(input).ok_or_else(|| GraphError::UnknownSlot {
            step,
            slot: input.to_string(),
        })?;
        Ok(cell.inputs()[idx as usize].value())
    }

    /// Lifecycle state; plain triggers are always `Stopped`.
    pub fn trigger_state(&self, id: TriggerId) -> Result<TriggerState> {
        let s = self.shared.structure.read();
        Ok(s
            .require_trigger(id)?
            .looped
            .as_ref()
            .map_or(TriggerState::Stopped, |l| l.state()))
    }

    pub fn trigger_stats(&self, id: TriggerId) -> Result<LoopStats> {
        Ok(self.looped(id)?.stats())
    }

    pub fn loop_settings(&self, id: TriggerId) -> Result<LoopSettings> {
        Ok(self.looped(id)?.settings())
    }

    /// Run `f` against a step under its lock.
    pub fn inspect_step<R>(&self, step: StepId, f: impl FnOnce(&AnyStep) -> R) -> Result<R> {
        Ok(self.cell(step)?.inspect(f))
    }

    /// Point-in-time copy of the structure for traversal.
    pub fn snapshot(&self) -> GroupSnapshot {
        let s = self.shared.structure.read();
        let triggers_of = |id: StepId| -> Vec<TriggerId> {
            s.live_triggers()
                .filter(|t| t.listeners.contains(&id))
                .map(|t| t.id)
                .collect()
        };
        let steps = s
            .live_steps()
            .map(|cell| StepInfo {
                id: cell.id(),
                name: cell.name().to_string(),
                kind: cell.kind().to_string(),
                mode: cell.mode(),
                inputs: cell.inputs().iter().map(|i| i.descriptor.clone()).collect(),
                outputs: cell.outputs().iter().map(|o| o.descriptor.clone()).collect(),
                status: cell.status(),
                triggers: triggers_of(cell.id()),
            })
            .collect();
        let triggers = s
            .live_triggers()
            .map(|t| TriggerInfo {
                id: t.id,
                name: t.name.clone(),
                listeners: t.listeners.clone(),
                downstream: t.downstream.clone(),
                upstream: t.upstream.clone(),
                state: t.looped.as_ref().map_or(TriggerState::Stopped, |l| l.state()),
                settings: t.looped.as_ref().map(|l| l.settings()),
            })
            .collect();
        let exposure = |e: &Exposure, input: bool| -> ExposureInfo {
            let slot_name = s
                .step(e.slot.step())
                .ok()
                .and_then(|c| {
                    let idx = e.slot.slot_index() as usize;
                    if input {
                        c.inputs().get(idx).map(|i| i.name().to_string())
                    } else {
                        c.outputs().get(idx).map(|o| o.name().to_string())
                    }
                })
                .unwrap_or_default();
            ExposureInfo {
                name: e.name.clone(),
                step: e.slot.step(),
                slot: slot_name,
            }
        };
        GroupSnapshot {
            name: self.shared.name.clone(),
            generation: s.generation,
            steps,
            connections: s.live_connections().copied().collect(),
            triggers,
            exposed_inputs: s.exposed_inputs.iter().map(|e| exposure(e, true)).collect(),
            exposed_outputs: s.exposed_outputs.iter().map(|e| exposure(e, false)).collect(),
        }
    }

    /// Run the consistency checker.
    pub fn validate(&self) -> Vec<Finding> {
        self.check().findings
    }

    /// Findings plus the feedback edges the scheduler treats as
    /// previous-tick reads.
    pub fn check(&self) -> ConsistencyReport {
        ConsistencyChecker::new(self.shared.config.check_lock_timeout()).check(self)
    }

    /// Receiver for engine events.
    pub fn events(&self) -> Receiver<GraphEvent> {
        self.shared.events.subscribe()
    }

    pub fn dropped_events(&self) -> u64 {
        self.shared.events.dropped()
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.shared.name)
            .field("generation", &self.generation())
            .finish()
    }
}

fn validate_period(period: Duration) -> Result<()> {
    if period.is_zero() {
        return Err(GraphError::InvalidParam {
            key: "period".to_string(),
            message: "period must be greater than zero".to_string(),
        });
    }
    Ok(())
}
