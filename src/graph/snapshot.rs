//! Point-in-time views of a group for traversal.
//!
//! A [`GroupSnapshot`] is taken under the structural read lock and owns its
//! data, so walking it never blocks an editor or a running loop. Every
//! accessor returns a fresh iterator; calling it again restarts the walk.
//! Order is insertion order.

use crate::config::LoopSettings;
use crate::graph::connection::Connection;
use crate::graph::id::{StepId, TriggerId};
use crate::graph::slot::SlotDescriptor;
use crate::types::{StepMode, StepStatus, TriggerState};

#[derive(Debug, Clone)]
pub struct StepInfo {
    pub id: StepId,
    pub name: String,
    pub kind: String,
    pub mode: StepMode,
    pub inputs: Vec<SlotDescriptor>,
    pub outputs: Vec<SlotDescriptor>,
    pub status: StepStatus,
    /// Triggers this step listens to
    pub triggers: Vec<TriggerId>,
}

#[derive(Debug, Clone)]
pub struct TriggerInfo {
    pub id: TriggerId,
    pub name: String,
    pub listeners: Vec<StepId>,
    pub downstream: Vec<TriggerId>,
    pub upstream: Vec<TriggerId>,
    pub state: TriggerState,
    /// Present for looped triggers
    pub settings: Option<LoopSettings>,
}

impl TriggerInfo {
    pub fn is_looped(&self) -> bool {
        self.settings.is_some()
    }
}

/// An internal slot published under a group-level name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureInfo {
    pub name: String,
    pub step: StepId,
    /// Name of the internal slot
    pub slot: String,
}

#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub name: String,
    pub generation: u64,
    pub(crate) steps: Vec<StepInfo>,
    pub(crate) connections: Vec<Connection>,
    pub(crate) triggers: Vec<TriggerInfo>,
    pub(crate) exposed_inputs: Vec<ExposureInfo>,
    pub(crate) exposed_outputs: Vec<ExposureInfo>,
}

impl GroupSnapshot {
    pub fn steps(&self) -> impl Iterator<Item = &StepInfo> + '_ {
        self.steps.iter()
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> + '_ {
        self.connections.iter()
    }

    pub fn triggers(&self) -> impl Iterator<Item = &TriggerInfo> + '_ {
        self.triggers.iter()
    }

    pub fn exposed_inputs(&self) -> impl Iterator<Item = &ExposureInfo> + '_ {
        self.exposed_inputs.iter()
    }

    pub fn exposed_outputs(&self) -> impl Iterator<Item = &ExposureInfo> + '_ {
        self.exposed_outputs.iter()
    }

    pub fn step(&self, id: StepId) -> Option<&StepInfo> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_by_name(&self, name: &str) -> Option<&StepInfo> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn trigger(&self, id: TriggerId) -> Option<&TriggerInfo> {
        self.triggers.iter().find(|t| t.id == id)
    }

    /// Connections feeding `step`.
    pub fn incoming(&self, step: StepId) -> impl Iterator<Item = &Connection> + '_ {
        self.connections.iter().filter(move |c| c.target_step() == step)
    }

    /// Connections fed by `step`.
    pub fn outgoing(&self, step: StepId) -> impl Iterator<Item = &Connection> + '_ {
        self.connections.iter().filter(move |c| c.source_step() == step)
    }

    /// Name of the input slot a connection ends in.
    pub fn target_slot_name(&self, conn: &Connection) -> Option<&str> {
        self.step(conn.target_step())?
            .inputs
            .get(conn.target.slot_index() as usize)
            .map(|d| d.name.as_str())
    }

    /// Name of the output slot a connection starts from.
    pub fn source_slot_name(&self, conn: &Connection) -> Option<&str> {
        self.step(conn.source_step())?
            .outputs
            .get(conn.source.slot_index() as usize)
            .map(|d| d.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.triggers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::group::Group;
    use crate::graph::value::{ConfigValue, StepParams};

    #[test]
    fn test_snapshot_iterators_restart() {
        let group = Group::new("g");
        let params = StepParams::from([("value".to_string(), ConfigValue::Float(1.0))]);
        let c = group.create_step("c", "constant", &params).unwrap();
        let g = group.create_step("gain", "gain", &StepParams::new()).unwrap();
        let conn = group.connect(c, "out", g, "in").unwrap();
        let t = group.create_trigger("t").unwrap();
        group.attach(t, c).unwrap();

        let snapshot = group.snapshot();
        let first: Vec<_> = snapshot.steps().map(|s| s.name.clone()).collect();
        let second: Vec<_> = snapshot.steps().map(|s| s.name.clone()).collect();
        assert_eq!(first, vec!["c", "gain"]);
        assert_eq!(first, second);

        let edge = snapshot.connections().next().unwrap();
        assert_eq!(edge.id, conn);
        assert_eq!(snapshot.source_slot_name(edge), Some("out"));
        assert_eq!(snapshot.target_slot_name(edge), Some("in"));
        assert_eq!(snapshot.incoming(g).count(), 1);
        assert_eq!(snapshot.step(c).unwrap().triggers, vec![t]);
        assert!(!snapshot.trigger(t).unwrap().is_looped());
    }
}
