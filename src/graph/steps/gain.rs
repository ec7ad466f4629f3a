//! GainStep - multiplies its input by a constant, elementwise.

use crate::error::StepError;
use crate::graph::slot::SlotDescriptor;
use crate::graph::step::{StepContext, StepPlugin};
use crate::graph::value::{float_param, ConfigValue, StepParams, ValueType};
use std::any::Any;

pub struct GainStep {
    gain: f64,
}

impl GainStep {
    pub fn new(gain: f64) -> Self {
        Self { gain }
    }

    pub fn from_params(params: &StepParams) -> Result<Self, StepError> {
        Ok(Self::new(float_param(params, "gain", 1.0)?))
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }
}

impl StepPlugin for GainStep {
    fn kind(&self) -> &str {
        "gain"
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        vec![
            SlotDescriptor::input("in", ValueType::Numeric),
            SlotDescriptor::output("out", ValueType::Numeric),
        ]
    }

    fn params(&self) -> StepParams {
        StepParams::from([("gain".to_string(), ConfigValue::Float(self.gain))])
    }

    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let gain = self.gain;
        let out = ctx.require_input("in")?.map_numeric(|x| x * gain)?;
        ctx.set_output("out", out)
    }

    fn on_param_change(&mut self, key: &str, value: &ConfigValue) -> Result<(), StepError> {
        match key {
            "gain" => {
                self.gain = value.as_float().ok_or_else(|| StepError::InvalidParam {
                    key: key.to_string(),
                    message: format!("expected a number, got {:?}", value),
                })?;
                Ok(())
            }
            _ => Err(StepError::InvalidParam {
                key: key.to_string(),
                message: "gain only has 'gain'".to_string(),
            }),
        }
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}
