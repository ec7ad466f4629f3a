//! SumStep - `out = a + b`, elementwise with scalar broadcast.
//!
//! `b` is optional; when it is unconnected or unset the step passes `a`
//! through.

use crate::error::StepError;
use crate::graph::slot::SlotDescriptor;
use crate::graph::step::{StepContext, StepPlugin};
use crate::graph::value::{StepParams, ValueType};
use std::any::Any;

#[derive(Default)]
pub struct SumStep;

impl SumStep {
    pub fn new() -> Self {
        Self
    }

    pub fn from_params(_params: &StepParams) -> Result<Self, StepError> {
        Ok(Self)
    }
}

impl StepPlugin for SumStep {
    fn kind(&self) -> &str {
        "sum"
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        vec![
            SlotDescriptor::input("a", ValueType::Numeric),
            SlotDescriptor::input("b", ValueType::Numeric).optional(),
            SlotDescriptor::output("out", ValueType::Numeric),
        ]
    }

    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let a = ctx.require_input("a")?;
        let out = match ctx.input("b") {
            Some(b) => a.zip_numeric(b, |x, y| x + y)?,
            None => a.map_numeric(|x| x)?,
        };
        ctx.set_output("out", out)
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}
