//! GroupStep - an embedded group acting as a single step.
//!
//! Its slots mirror the child's exposed inputs and outputs as they were when
//! the group was embedded. Each compute forwards the input values into the
//! child's exposure proxies, runs every child step once in dependency order,
//! then republishes the child's exposed outputs.

use crate::error::StepError;
use crate::graph::group::Group;
use crate::graph::slot::SlotDescriptor;
use crate::graph::step::{StepCell, StepContext, StepPlugin, TickTime};
use std::any::Any;
use std::sync::Arc;

pub struct GroupStep {
    group: Group,
    inputs: Vec<String>,
    outputs: Vec<String>,
    slots: Vec<SlotDescriptor>,
    started: Vec<Arc<StepCell>>,
}

impl GroupStep {
    pub fn new(group: Group) -> Self {
        let mut slots = Vec::new();
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for descriptor in group.exposed_input_slots() {
            inputs.push(descriptor.name.clone());
            slots.push(descriptor);
        }
        for descriptor in group.exposed_output_slots() {
            outputs.push(descriptor.name.clone());
            slots.push(descriptor);
        }
        Self {
            group,
            inputs,
            outputs,
            slots,
            started: Vec::new(),
        }
    }

    pub fn group(&self) -> &Group {
        &self.group
    }
}

impl StepPlugin for GroupStep {
    fn kind(&self) -> &str {
        "group"
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        self.slots.clone()
    }

    fn on_start(&mut self) -> Result<(), StepError> {
        self.started = self.group.start_steps();
        Ok(())
    }

    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        for (index, name) in self.inputs.iter().enumerate() {
            self.group
                .write_input_shared(name, ctx.input_shared_at(index))
                .map_err(|e| StepError::failed(e.to_string()))?;
        }

        let report = self
            .group
            .compute_at(&TickTime::new(ctx.time, ctx.dt, ctx.tick));
        if report.failed > 0 {
            tracing::debug!(
                "Group '{}': {} inner step(s) failed this tick",
                self.group.name(),
                report.failed
            );
        }
        if report.stop_requested {
            ctx.request_stop();
        }

        for name in &self.outputs {
            let value = self
                .group
                .read_output(name)
                .map_err(|e| StepError::failed(e.to_string()))?;
            if let Some(value) = value {
                ctx.set_output_shared(name, value)?;
            }
        }
        Ok(())
    }

    fn on_stop(&mut self) {
        for cell in self.started.drain(..) {
            cell.stop();
        }
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}
