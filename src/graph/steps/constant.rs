//! ConstantStep - emits a fixed value every compute.
//!
//! The output type follows the `value` parameter at construction and stays
//! fixed afterwards; a later parameter change must keep the same type.

use crate::error::StepError;
use crate::graph::slot::SlotDescriptor;
use crate::graph::step::{StepContext, StepPlugin};
use crate::graph::value::{ConfigValue, DataValue, StepParams, ValueType};
use std::any::Any;

pub struct ConstantStep {
    value: ConfigValue,
}

impl ConstantStep {
    pub fn new(value: impl Into<ConfigValue>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn from_params(params: &StepParams) -> Result<Self, StepError> {
        Ok(Self::new(
            params
                .get("value")
                .cloned()
                .unwrap_or(ConfigValue::Float(0.0)),
        ))
    }

    fn output_type(value: &ConfigValue) -> ValueType {
        match value {
            ConfigValue::Bool(_) => ValueType::Bool,
            ConfigValue::Int(_) => ValueType::Int,
            ConfigValue::Float(_) => ValueType::Float,
            ConfigValue::String(_) => ValueType::Text,
        }
    }

    fn to_data(&self) -> DataValue {
        match &self.value {
            ConfigValue::Bool(v) => DataValue::Bool(*v),
            ConfigValue::Int(v) => DataValue::Int(*v),
            ConfigValue::Float(v) => DataValue::Float(*v),
            ConfigValue::String(v) => DataValue::Text(v.clone()),
        }
    }
}

impl StepPlugin for ConstantStep {
    fn kind(&self) -> &str {
        "constant"
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        vec![SlotDescriptor::output("out", Self::output_type(&self.value))]
    }

    fn params(&self) -> StepParams {
        StepParams::from([("value".to_string(), self.value.clone())])
    }

    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        ctx.set_output("out", self.to_data())
    }

    fn on_param_change(&mut self, key: &str, value: &ConfigValue) -> Result<(), StepError> {
        match key {
            "value" => {
                let current = Self::output_type(&self.value);
                let next = Self::output_type(value);
                if !current.accepts(next) {
                    return Err(StepError::InvalidParam {
                        key: key.to_string(),
                        message: format!("output is {:?}, cannot change to {:?}", current, next),
                    });
                }
                self.value = match (current, value) {
                    (ValueType::Float, ConfigValue::Int(v)) => ConfigValue::Float(*v as f64),
                    _ => value.clone(),
                };
                Ok(())
            }
            _ => Err(StepError::InvalidParam {
                key: key.to_string(),
                message: "constant only has 'value'".to_string(),
            }),
        }
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_type_follows_value() {
        let step = ConstantStep::new("hello");
        assert_eq!(step.slots()[0].value_type, ValueType::Text);
        let step = ConstantStep::from_params(&StepParams::new()).unwrap();
        assert_eq!(step.slots()[0].value_type, ValueType::Float);
    }

    #[test]
    fn test_param_change_keeps_type() {
        let mut step = ConstantStep::new(1.0);
        assert!(step.on_param_change("value", &ConfigValue::Int(3)).is_ok());
        assert_eq!(step.params()["value"], ConfigValue::Float(3.0));
        assert!(step
            .on_param_change("value", &ConfigValue::String("x".into()))
            .is_err());
    }
}
