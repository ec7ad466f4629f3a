//! UnitDelayStep - emits the previous sample of its input.
//!
//! Its input is stale-tolerant, so a connection into it is a feedback edge:
//! the scheduler does not order the producer before it, and a cycle through
//! it is a legitimate feedback loop rather than an error. Within one plan a
//! feedback reader runs ahead of its producer, so the value the delay
//! samples is the one published on the previous tick.

use crate::error::StepError;
use crate::graph::slot::SlotDescriptor;
use crate::graph::step::{StepContext, StepPlugin};
use crate::graph::value::{float_param, ConfigValue, DataValue, StepParams, ValueType};
use std::any::Any;

pub struct UnitDelayStep {
    initial: f64,
    held: DataValue,
}

impl UnitDelayStep {
    pub fn new(initial: f64) -> Self {
        Self {
            initial,
            held: DataValue::Float(initial),
        }
    }

    pub fn from_params(params: &StepParams) -> Result<Self, StepError> {
        Ok(Self::new(float_param(params, "initial", 0.0)?))
    }
}

impl StepPlugin for UnitDelayStep {
    fn kind(&self) -> &str {
        "unit_delay"
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        vec![
            SlotDescriptor::input("in", ValueType::Any)
                .optional()
                .stale_tolerant(),
            SlotDescriptor::output("out", ValueType::Any),
        ]
    }

    fn params(&self) -> StepParams {
        StepParams::from([("initial".to_string(), ConfigValue::Float(self.initial))])
    }

    fn on_start(&mut self) -> Result<(), StepError> {
        self.held = DataValue::Float(self.initial);
        Ok(())
    }

    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        if let Some(sample) = ctx.input("in") {
            self.held = sample.clone();
        }
        ctx.set_output("out", self.held.clone())
    }

    fn on_input_disconnected(&mut self, _slot: &str) {
        self.held = DataValue::Float(self.initial);
    }

    fn on_param_change(&mut self, key: &str, value: &ConfigValue) -> Result<(), StepError> {
        match (key, value.as_float()) {
            ("initial", Some(v)) => {
                self.initial = v;
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
