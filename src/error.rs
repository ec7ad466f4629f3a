//! Error handling for stepflow
//!
//! Two error families exist:
//!
//! - [`GraphError`] is returned synchronously by structural edits (connect,
//!   add, start, ...) and by the ambient layers (config, logging). A failed
//!   edit leaves the graph unchanged.
//! - [`StepError`] is what a step's `compute` reports. It never crosses the
//!   step boundary: the executing trigger converts it into the step's
//!   exception state and carries on with the remaining listeners.

use crate::graph::checker::Finding;
use crate::graph::id::{StepId, TriggerId};
use crate::graph::value::ValueType;
use thiserror::Error;

/// Main error type for graph editing and engine setup
#[derive(Error, Debug)]
pub enum GraphError {
    /// Source output type is not accepted by the target input
    #[error("Type mismatch: {source_step}.{output} ({found:?}) cannot feed {target_step}.{input} ({expected:?})")]
    TypeMismatch {
        source_step: StepId,
        output: String,
        target_step: StepId,
        input: String,
        expected: ValueType,
        found: ValueType,
    },

    /// Inputs are single-writer
    #[error("Input {step}.{slot} already has an incoming connection")]
    AlreadyConnected { step: StepId, slot: String },

    /// Name clash inside one group (steps, triggers, exposures, registry kinds)
    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("Trigger {0} is already running")]
    AlreadyRunning(TriggerId),

    #[error("Unknown step: {0}")]
    UnknownStep(StepId),

    #[error("Unknown slot '{slot}' on step {step}")]
    UnknownSlot { step: StepId, slot: String },

    #[error("Unknown trigger: {0}")]
    UnknownTrigger(TriggerId),

    #[error("Unknown step kind: {0}")]
    UnknownKind(String),

    /// A description refers to a step or trigger name that does not exist
    #[error("Unknown name: {0}")]
    UnknownName(String),

    /// Operation needs a looped trigger (period, timing mode, stats)
    #[error("Trigger {0} is not a looped trigger")]
    NotLooped(TriggerId),

    #[error("Invalid parameter '{key}': {message}")]
    InvalidParam { key: String, message: String },

    /// Worker thread could not be created; the trigger stays stopped
    #[error("Failed to spawn worker for trigger {trigger}: {source}")]
    ThreadSpawn {
        trigger: TriggerId,
        #[source]
        source: std::io::Error,
    },

    /// Strict validation refused to start
    #[error("Graph validation failed with {} finding(s)", .0.len())]
    Validation(Vec<Finding>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<GraphError>,
    },
}

impl GraphError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        GraphError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error came from a rejected structural edit.
    pub fn is_structural(&self) -> bool {
        match self {
            GraphError::WithContext { source, .. } => source.is_structural(),
            GraphError::TypeMismatch { .. }
            | GraphError::AlreadyConnected { .. }
            | GraphError::DuplicateId(_)
            | GraphError::AlreadyRunning(_)
            | GraphError::UnknownStep(_)
            | GraphError::UnknownSlot { .. }
            | GraphError::UnknownTrigger(_)
            | GraphError::UnknownKind(_)
            | GraphError::UnknownName(_)
            | GraphError::NotLooped(_)
            | GraphError::InvalidParam { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::Serialization(err.to_string())
    }
}

/// Result type alias for stepflow operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

/// Failure reported by a single step's computation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("Required input '{0}' has no value")]
    MissingInput(String),

    #[error("No slot named '{0}'")]
    UnknownSlot(String),

    #[error("Slot '{slot}' expects {expected:?}, got {found:?}")]
    TypeMismatch {
        slot: String,
        expected: ValueType,
        found: ValueType,
    },

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Invalid parameter '{key}': {message}")]
    InvalidParam { key: String, message: String },

    #[error("Panicked: {0}")]
    Panicked(String),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }
}

impl From<StepError> for GraphError {
    fn from(err: StepError) -> Self {
        match err {
            StepError::InvalidParam { key, message } => GraphError::InvalidParam { key, message },
            other => GraphError::InvalidParam {
                key: String::new(),
                message: other.to_string(),
            },
        }
    }
}
