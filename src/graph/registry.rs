//! Explicit step factory registry.
//!
//! A registry is handed to a group at construction and shared by the groups
//! built from it; there is no process-wide factory table.

use crate::error::{GraphError, Result};
use crate::graph::kind::BuiltinKind;
use crate::graph::step::{AnyStep, StepPlugin};
use crate::graph::value::StepParams;
use std::collections::BTreeMap;
use std::sync::Arc;

type StepFactory = Box<dyn Fn(&StepParams) -> Result<AnyStep> + Send + Sync>;

/// Maps kind names to step factories.
pub struct StepRegistry {
    factories: BTreeMap<String, StepFactory>,
}

impl StepRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with every [`BuiltinKind`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for &kind in BuiltinKind::all() {
            registry.factories.insert(
                kind.id().to_string(),
                Box::new(move |params: &StepParams| -> Result<AnyStep> {
                    Ok(AnyStep::Builtin(kind.create(params)?))
                }),
            );
        }
        registry
    }

    /// Register a plugin kind. Fails with `DuplicateId` if the name is taken.
    pub fn register<F, S>(&mut self, kind: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&StepParams) -> Result<S> + Send + Sync + 'static,
        S: StepPlugin + 'static,
    {
        let kind = kind.into();
        if self.factories.contains_key(&kind) {
            return Err(GraphError::DuplicateId(format!("step kind '{}'", kind)));
        }
        self.factories.insert(
            kind,
            Box::new(move |params: &StepParams| -> Result<AnyStep> {
                Ok(AnyStep::plugin(factory(params)?))
            }),
        );
        Ok(())
    }

    pub fn create(&self, kind: &str, params: &StepParams) -> Result<AnyStep> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| GraphError::UnknownKind(kind.to_string()))?;
        factory(params)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn into_shared(self) -> Arc<StepRegistry> {
        Arc::new(self)
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
