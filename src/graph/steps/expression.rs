//! ExpressionStep - evaluates a Rhai expression each compute.
//!
//! ## Script Interface
//!
//! The expression sees:
//! - `x` - value of input `x`
//! - `y` - value of input `y`, or `0.0` when unconnected
//! - `t` - simulated time in seconds
//! - `dt` - step size in seconds
//!
//! and must evaluate to a number or a boolean, e.g.
//! ```rhai
//! clamp(x * sin(t) + y, -1.0, 1.0)
//! ```

use crate::error::StepError;
use crate::graph::slot::SlotDescriptor;
use crate::graph::step::{StepContext, StepPlugin};
use crate::graph::value::{ConfigValue, StepParams, ValueType};
use rhai::{Dynamic, Engine, Scope, AST};
use std::any::Any;

pub struct ExpressionStep {
    source: String,
    compiled: AST,
    engine: Engine,
}

impl ExpressionStep {
    pub fn new(source: &str) -> Result<Self, StepError> {
        let engine = Self::engine();
        let compiled = Self::compile(&engine, source)?;
        Ok(Self {
            source: source.to_string(),
            compiled,
            engine,
        })
    }

    pub fn from_params(params: &StepParams) -> Result<Self, StepError> {
        match params.get("expr") {
            None => Self::new("x"),
            Some(v) => {
                let source = v.as_str().ok_or_else(|| StepError::InvalidParam {
                    key: "expr".to_string(),
                    message: "expected a string".to_string(),
                })?;
                Self::new(source).map_err(|e| StepError::InvalidParam {
                    key: "expr".to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Engine with safety limits and a few numeric helpers.
    fn engine() -> Engine {
        let mut engine = Engine::new();
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(10_000);
        engine.set_max_string_size(10_000);

        engine.register_fn("clamp", |x: f64, min: f64, max: f64| x.clamp(min, max));
        engine.register_fn("deadband", |value: f64, center: f64, width: f64| -> f64 {
            if (value - center).abs() <= width / 2.0 {
                center
            } else {
                value
            }
        });
        engine.register_fn("lerp", |a: f64, b: f64, k: f64| a + (b - a) * k);
        engine
    }

    fn compile(engine: &Engine, source: &str) -> Result<AST, StepError> {
        engine
            .compile_expression(source)
            .map_err(|e| StepError::Script(format!("Compile error: {}", e)))
    }
}

impl StepPlugin for ExpressionStep {
    fn kind(&self) -> &str {
        "expression"
    }

    fn slots(&self) -> Vec<SlotDescriptor> {
        vec![
            SlotDescriptor::input("x", ValueType::Float),
            SlotDescriptor::input("y", ValueType::Float).optional(),
            SlotDescriptor::output("out", ValueType::Float),
        ]
    }

    fn params(&self) -> StepParams {
        StepParams::from([(
            "expr".to_string(),
            ConfigValue::String(self.source.clone()),
        )])
    }

    fn compute(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let x = ctx.require_f64("x")?;
        let y = ctx.input("y").and_then(|v| v.as_f64()).unwrap_or(0.0);

        let mut scope = Scope::new();
        scope.push("x", x);
        scope.push("y", y);
        scope.push("t", ctx.time);
        scope.push("dt", ctx.dt);

        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &self.compiled)
            .map_err(|e| StepError::Script(format!("Execution error: {}", e)))?;

        let out = if let Ok(v) = result.as_float() {
            v
        } else if let Ok(v) = result.as_int() {
            v as f64
        } else if let Ok(v) = result.as_bool() {
            if v {
                1.0
            } else {
                0.0
            }
        } else {
            return Err(StepError::Script(format!(
                "expression returned {}, expected a number",
                result.type_name()
            )));
        };
        ctx.set_output("out", out)
    }

    fn on_param_change(&mut self, key: &str, value: &ConfigValue) -> Result<(), StepError> {
        match (key, value.as_str()) {
            ("expr", Some(source)) => {
                // keep the old expression if the new one does not compile
                self.compiled = Self::compile(&self.engine, source)?;
                self.source = source.to_string();
                Ok(())
            }
            _ => Err(StepError::InvalidParam {
                key: key.to_string(),
                message: "expression only has 'expr' (string)".to_string(),
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
    fn test_bad_expression_is_rejected() {
        assert!(matches!(
            ExpressionStep::new("x +"),
            Err(StepError::Script(_))
        ));
    }

    #[test]
    fn test_failed_recompile_keeps_previous() {
        let mut step = ExpressionStep::new("x * 2.0").unwrap();
        let err = step.on_param_change("expr", &ConfigValue::String("(".into()));
        assert!(err.is_err());
        assert_eq!(step.source(), "x * 2.0");
    }
}
