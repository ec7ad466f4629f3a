//! RecorderStep - sink that keeps the most recent samples of its input.
//!
//! Hosts read the buffer through `Group::inspect_step` and a downcast.

use crate::error::StepError;
use crate::graph::slot::SlotDescriptor;
use crate::graph::step::{StepContext, StepPlugin};
use crate::graph::value::{ConfigValue, DataValue, StepParams, ValueType};
use std::any::Any;
use std::collections::VecDeque;

const DEFAULT_CAPACITY: usize = 1000;

/// One recorded value with the simulated time it was seen at.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSample {
    pub time: f64,
    pub tick: u64,
    pub value: DataValue,
}

pub struct RecorderStep {
    capacity: usize,
    samples: VecDeque<RecordedSample>,
    total: u64,
}

impl RecorderStep {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::new(),
            total: 0,
        }
    }

    pub fn from_params(params: &StepParams) -> Result<Self, StepError> {
        let capacity = match params.get("capacity") {
            None => DEFAULT_CAPACITY,
            Some(v) => Self::parse_capacity(v)?,
        };
        Ok(Self::new(capacity))
    }

    fn parse_capacity(value: &ConfigValue) -> Result<usize, StepError> {
        match value.as_int() {
            Some(n) if n > 0 => Ok(n as usize),
            _ => Err(StepError::InvalidParam {
                key: "capacity".to_string(),
                message: format!("expected a positive integer, got {:?}", value),
            }),
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &RecordedSample> {
        self.samples.iter()
    }

    pub fn last(&self) -> Option<&RecordedSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples seen since creation, including those already evicted.
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl StepPlugin for RecorderStep {
    fn kind(&self) -> &str {
        "recorder"
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        vec![SlotDescriptor::input("in", ValueType::Any)]
    }

    fn params(&self) -> StepParams {
        StepParams::from([(
            "capacity".to_string(),
            ConfigValue::Int(self.capacity as i64),
        )])
    }

    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let value = ctx.require_input("in")?.clone();
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(RecordedSample {
            time: ctx.time,
            tick: ctx.tick,
            value,
        });
        self.total += 1;
        Ok(())
    }

    fn on_param_change(&mut self, key: &str, value: &ConfigValue) -> Result<(), StepError> {
        match key {
            "capacity" => {
                self.capacity = Self::parse_capacity(value)?;
                while self.samples.len() > self.capacity {
                    self.samples.pop_front();
                }
                Ok(())
            }
            "clear" => {
                if value.as_bool() == Some(true) {
                    self.samples.clear();
                }
                Ok(())
            }
            _ => Err(StepError::InvalidParam {
                key: key.to_string(),
                message: "recorder has 'capacity' and 'clear'".to_string(),
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
    fn test_capacity_must_be_positive() {
        let params = StepParams::from([("capacity".to_string(), ConfigValue::Int(0))]);
        assert!(RecorderStep::from_params(&params).is_err());
    }

    #[test]
    fn test_shrinking_capacity_drops_oldest() {
        let mut rec = RecorderStep::new(4);
        for i in 0..4 {
            rec.samples.push_back(RecordedSample {
                time: i as f64,
                tick: i,
                value: DataValue::Int(i as i64),
            });
        }
        rec.on_param_change("capacity", &ConfigValue::Int(2)).unwrap();
        assert_eq!(rec.len(), 2);
        assert_eq!(rec.samples().next().unwrap().tick, 2);
    }
}
