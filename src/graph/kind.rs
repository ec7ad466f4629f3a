//! Catalogue of built-in step kinds.
//!
//! These are the kinds a fresh [`StepRegistry`](crate::graph::registry::StepRegistry)
//! knows about. Embedded groups are not listed: they are created from a
//! `Group`, never from parameters.

use crate::error::StepError;
use crate::graph::step::BuiltinStep;
use crate::graph::steps::{
    ConstantStep, ExpressionStep, GainStep, IntegratorStep, RecorderStep, SumStep, UnitDelayStep,
};
use crate::graph::value::StepParams;
use serde::{Deserialize, Serialize};

/// Built-in step kinds that can be created by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinKind {
    // Sources
    /// Emits a fixed parameter value.
    Constant,

    // Transforms
    /// Multiplies by a constant.
    Gain,
    /// Adds two inputs.
    Sum,
    /// Integrates over simulated time.
    Integrator,
    /// Delays by one compute.
    UnitDelay,
    /// Evaluates a Rhai expression.
    Expression,

    // Sinks
    /// Keeps recent input values.
    Recorder,
}

impl BuiltinKind {
    /// Registry identifier.
    pub fn id(&self) -> &'static str {
        match self {
            BuiltinKind::Constant => "constant",
            BuiltinKind::Gain => "gain",
            BuiltinKind::Sum => "sum",
            BuiltinKind::Integrator => "integrator",
            BuiltinKind::UnitDelay => "unit_delay",
            BuiltinKind::Expression => "expression",
            BuiltinKind::Recorder => "recorder",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            BuiltinKind::Constant => "Constant",
            BuiltinKind::Gain => "Gain",
            BuiltinKind::Sum => "Sum",
            BuiltinKind::Integrator => "Integrator",
            BuiltinKind::UnitDelay => "Unit Delay",
            BuiltinKind::Expression => "Expression",
            BuiltinKind::Recorder => "Recorder",
        }
    }

    pub fn all() -> &'static [BuiltinKind] {
        &[
            BuiltinKind::Constant,
            BuiltinKind::Gain,
            BuiltinKind::Sum,
            BuiltinKind::Integrator,
            BuiltinKind::UnitDelay,
            BuiltinKind::Expression,
            BuiltinKind::Recorder,
        ]
    }

    pub fn from_id(id: &str) -> Option<BuiltinKind> {
        Self::all().iter().copied().find(|k| k.id() == id)
    }

    pub fn is_sink(&self) -> bool {
        matches!(self, BuiltinKind::Recorder)
    }

    pub fn is_source(&self) -> bool {
        matches!(self, BuiltinKind::Constant)
    }

    pub fn description(&self) -> &'static str {
        match self {
            BuiltinKind::Constant =>
                "Emits the `value` parameter on every compute.\n\
                 Output type follows the parameter type.",

            BuiltinKind::Gain =>
                "out = in * gain, elementwise.\n\
                 Works on scalars, vectors and matrices.",

            BuiltinKind::Sum =>
                "out = a + b, elementwise.\n\
                 Scalars broadcast; `b` is optional.",

            BuiltinKind::Integrator =>
                "Looped. x += in * dt every tick.\n\
                 Restarts from `initial` when its loop starts.",

            BuiltinKind::UnitDelay =>
                "Emits the previous input sample.\n\
                 Stale-tolerant input: breaks feedback cycles.",

            BuiltinKind::Expression =>
                "Evaluates the Rhai expression `expr`.\n\
                 Sees x, y, t and dt.",

            BuiltinKind::Recorder =>
                "Keeps the last `capacity` input values.\n\
                 Read back through inspect_step.",
        }
    }

    /// Instantiate this kind from parameters.
    pub fn create(&self, params: &StepParams) -> Result<BuiltinStep, StepError> {
        Ok(match self {
            BuiltinKind::Constant => BuiltinStep::Constant(ConstantStep::from_params(params)?),
            BuiltinKind::Gain => BuiltinStep::Gain(GainStep::from_params(params)?),
            BuiltinKind::Sum => BuiltinStep::Sum(SumStep::from_params(params)?),
            BuiltinKind::Integrator => {
                BuiltinStep::Integrator(IntegratorStep::from_params(params)?)
            }
            BuiltinKind::UnitDelay => BuiltinStep::UnitDelay(UnitDelayStep::from_params(params)?),
            BuiltinKind::Expression => {
                BuiltinStep::Expression(ExpressionStep::from_params(params)?)
            }
            BuiltinKind::Recorder => BuiltinStep::Recorder(RecorderStep::from_params(params)?),
        })
    }
}

impl std::fmt::Display for BuiltinKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
