//! Plain structural description of a group
//!
//! A [`GraphDescription`] is what a host serializer maps to and from its
//! file format. It names everything by name rather than by ID, so it
//! survives a rebuild, and nests embedded groups by value.
//!
//! The engine itself picks no format; the types only derive serde.

use crate::config::LoopSettings;
use crate::error::{GraphError, Result, ResultExt};
use crate::graph::group::{Group, GroupBuilder};
use crate::graph::id::{StepId, TriggerId};
use crate::graph::value::StepParams;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Structure of one group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDescription {
    /// Group name
    pub name: String,
    /// Steps in insertion order
    #[serde(default)]
    pub steps: Vec<StepDescription>,
    #[serde(default)]
    pub connections: Vec<ConnectionDescription>,
    #[serde(default)]
    pub triggers: Vec<TriggerDescription>,
    #[serde(default)]
    pub exposed_inputs: Vec<ExposureDescription>,
    #[serde(default)]
    pub exposed_outputs: Vec<ExposureDescription>,
}

/// One step and how to recreate it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDescription {
    pub name: String,
    /// Registry kind (`"group"` for embedded groups)
    pub kind: String,
    #[serde(default)]
    pub params: StepParams,
    /// Nested structure of an embedded group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Box<GraphDescription>>,
}

/// A connection by step and slot names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescription {
    pub from_step: String,
    pub from_slot: String,
    pub to_step: String,
    pub to_slot: String,
}

/// A trigger with its subscriptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDescription {
    pub name: String,
    /// Loop settings; absent for plain triggers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub looped: Option<LoopSettings>,
    /// Listening step names, in subscription order
    #[serde(default)]
    pub listeners: Vec<String>,
    /// Trigger names fired after this one
    #[serde(default)]
    pub downstream: Vec<String>,
}

/// An exposed slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureDescription {
    /// Group-level name
    pub name: String,
    pub step: String,
    /// Internal slot name
    pub slot: String,
}

impl GraphDescription {
    pub fn step(&self, name: &str) -> Option<&StepDescription> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn trigger(&self, name: &str) -> Option<&TriggerDescription> {
        self.triggers.iter().find(|t| t.name == name)
    }
}

impl Group {
    /// Describe the current structure, embedded groups included.
    ///
    /// Parameters are read under each step's lock, so this waits for any
    /// in-flight compute of the step being described.
    pub fn describe(&self) -> GraphDescription {
        let snapshot = self.snapshot();
        let step_name = |id: StepId| {
            snapshot
                .step(id)
                .map(|s| s.name.clone())
                .unwrap_or_default()
        };
        let trigger_name = |id: TriggerId| {
            snapshot
                .trigger(id)
                .map(|t| t.name.clone())
                .unwrap_or_default()
        };

        let steps = snapshot
            .steps()
            .filter_map(|info| {
                let (params, group) = self
                    .inspect_step(info.id, |step| {
                        (
                            step.params(),
                            step.as_group().map(|g| Box::new(g.group().describe())),
                        )
                    })
                    .ok()?;
                Some(StepDescription {
                    name: info.name.clone(),
                    kind: info.kind.clone(),
                    params,
                    group,
                })
            })
            .collect();

        let connections = snapshot
            .connections()
            .map(|c| ConnectionDescription {
                from_step: step_name(c.source_step()),
                from_slot: snapshot.source_slot_name(c).unwrap_or_default().to_string(),
                to_step: step_name(c.target_step()),
                to_slot: snapshot.target_slot_name(c).unwrap_or_default().to_string(),
            })
            .collect();

        let triggers = snapshot
            .triggers()
            .map(|t| TriggerDescription {
                name: t.name.clone(),
                looped: t.settings,
                listeners: t.listeners.iter().map(|&l| step_name(l)).collect(),
                downstream: t.downstream.iter().map(|&d| trigger_name(d)).collect(),
            })
            .collect();

        let exposure = |e: &crate::graph::snapshot::ExposureInfo| ExposureDescription {
            name: e.name.clone(),
            step: step_name(e.step),
            slot: e.slot.clone(),
        };

        GraphDescription {
            name: snapshot.name.clone(),
            steps,
            connections,
            triggers,
            exposed_inputs: snapshot.exposed_inputs().map(exposure).collect(),
            exposed_outputs: snapshot.exposed_outputs().map(exposure).collect(),
        }
    }
}

impl GroupBuilder {
    /// Build a group from a description. The group takes the description's
    /// name; embedded groups share this builder's registry and config.
    /// Looped triggers are created stopped.
    pub fn build_from(self, description: &GraphDescription) -> Result<Group> {
        let name = description.name.clone();
        self.rename(&name)
            .populate(description)
            .with_context(|| format!("Failed to build group '{}'", name))
    }

    fn populate(mut self, description: &GraphDescription) -> Result<Group> {
        let registry = self.registry_or_default();
        let config = self.engine_config().clone();
        let group = self.build()?;

        let mut steps: HashMap<&str, StepId> = HashMap::new();
        for step in &description.steps {
            let id = match &step.group {
                Some(child) => {
                    let child = GroupBuilder::new(child.name.clone())
                        .registry(registry.clone())
                        .config(config.clone())
                        .build_from(child)?;
                    group.add_group(step.name.clone(), child)?
                }
                None => group.create_step(step.name.clone(), &step.kind, &step.params)?,
            };
            steps.insert(step.name.as_str(), id);
        }
        let lookup = |name: &str| -> Result<StepId> {
            steps
                .get(name)
                .copied()
                .ok_or_else(|| GraphError::UnknownName(format!("step '{}'", name)))
        };

        for conn in &description.connections {
            group.connect(
                lookup(&conn.from_step)?,
                &conn.from_slot,
                lookup(&conn.to_step)?,
                &conn.to_slot,
            )?;
        }
        for exposure in &description.exposed_inputs {
            group.expose_input(exposure.name.clone(), lookup(&exposure.step)?, &exposure.slot)?;
        }
        for exposure in &description.exposed_outputs {
            group.expose_output(exposure.name.clone(), lookup(&exposure.step)?, &exposure.slot)?;
        }

        let mut triggers: HashMap<&str, TriggerId> = HashMap::new();
        for trigger in &description.triggers {
            let id = match trigger.looped {
                Some(settings) => group.create_looped_trigger_with(trigger.name.clone(), settings)?,
                None => group.create_trigger(trigger.name.clone())?,
            };
            for listener in &trigger.listeners {
                group.attach(id, lookup(listener)?)?;
            }
            triggers.insert(trigger.name.as_str(), id);
        }
        for trigger in &description.triggers {
            let from = triggers[trigger.name.as_str()];
            for down in &trigger.downstream {
                let to = triggers
                    .get(down.as_str())
                    .copied()
                    .ok_or_else(|| GraphError::UnknownName(format!("trigger '{}'", down)))?;
                group.connect_triggers(from, to)?;
            }
        }

        tracing::info!(
            "Built group '{}' from description: {} step(s), {} trigger(s)",
            group.name(),
            description.steps.len(),
            description.triggers.len()
        );
        Ok(group)
    }
}
