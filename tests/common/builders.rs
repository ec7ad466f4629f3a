//! Test data builders for creating graphs

use stepflow::{ConfigValue, Group, StepId, StepParams};

/// Builder for step parameters
#[derive(Default)]
pub struct ParamsBuilder {
    params: StepParams,
}

impl ParamsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn float(mut self, key: &str, value: f64) -> Self {
        self.params.insert(key.to_string(), ConfigValue::Float(value));
        self
    }

    pub fn int(mut self, key: &str, value: i64) -> Self {
        self.params.insert(key.to_string(), ConfigValue::Int(value));
        self
    }

    pub fn text(mut self, key: &str, value: &str) -> Self {
        self.params
            .insert(key.to_string(), ConfigValue::String(value.to_string()));
        self
    }

    pub fn build(self) -> StepParams {
        self.params
    }
}

pub fn constant(group: &Group, name: &str, value: f64) -> StepId {
    group
        .create_step(name, "constant", &ParamsBuilder::new().float("value", value).build())
        .expect("constant step")
}

pub fn gain(group: &Group, name: &str, gain: f64) -> StepId {
    group
        .create_step(name, "gain", &ParamsBuilder::new().float("gain", gain).build())
        .expect("gain step")
}

pub fn recorder(group: &Group, name: &str, capacity: i64) -> StepId {
    group
        .create_step(name, "recorder", &ParamsBuilder::new().int("capacity", capacity).build())
        .expect("recorder step")
}

/// `constant -> gain` chain, returning both IDs.
pub fn constant_gain(group: &Group, value: f64, k: f64) -> (StepId, StepId) {
    let c = constant(group, "source", value);
    let g = gain(group, "gain", k);
    group.connect(c, "out", g, "in").expect("connect");
    (c, g)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_builder() {
        let params = ParamsBuilder::new()
            .float("gain", 2.0)
            .int("capacity", 4)
            .text("expr", "x * 2")
            .build();

        assert_eq!(params.len(), 3);
        assert_eq!(params["capacity"], ConfigValue::Int(4));
    }
}
