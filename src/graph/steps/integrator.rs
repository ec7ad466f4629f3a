//! IntegratorStep - forward-Euler integration of its input, `x += in * dt`.
//!
//! This is the canonical looped step: it wants to advance on every tick of
//! the trigger it is attached to, whether or not anything upstream fired.

use crate::error::StepError;
use crate::graph::slot::SlotDescriptor;
use crate::graph::step::{StepContext, StepPlugin};
use crate::graph::value::{float_param, ConfigValue, StepParams, ValueType};
use crate::types::StepMode;
use std::any::Any;

pub struct IntegratorStep {
    initial: f64,
    state: f64,
}

impl IntegratorStep {
    pub fn new(initial: f64) -> Self {
        Self {
            initial,
            state: initial,
        }
    }

    pub fn from_params(params: &StepParams) -> Result<Self, StepError> {
        Ok(Self::new(float_param(params, "initial", 0.0)?))
    }

    pub fn state(&self) -> f64 {
        self.state
    }
}

impl StepPlugin for IntegratorStep {
    fn kind(&self) -> &str {
        "integrator"
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        vec![
            SlotDescriptor::input("in", ValueType::Float),
            SlotDescriptor::output("out", ValueType::Float),
        ]
    }

    fn mode(&self) -> StepMode {
        StepMode::Looped
    }

    fn params(&self) -> StepParams {
        StepParams::from([("initial".to_string(), ConfigValue::Float(self.initial))])
    }

    fn on_start(&mut self) -> Result<(), StepError> {
        self.state = self.initial;
        Ok(())
    }

    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let input = ctx.require_f64("in")?;
        self.state += input * ctx.dt;
        ctx.set_output("out", self.state)
    }

    fn on_param_change(&mut self, key: &str, value: &ConfigValue) -> Result<(), StepError> {
        match (key, value.as_float()) {
            ("initial", Some(v)) => {
                self.initial = v;
                Ok(())
            }
            // writing the state directly is how a host resets a running integrator
            ("state", Some(v)) => {
                self.state = v;
                Ok(())
            }
            _ => Err(StepError::InvalidParam {
                key: key.to_string(),
                message: format!("unsupported value {:?}", value),
            }),
        }
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}
