//! Values carried by slots, and the parameter values steps are configured with.
//!
//! `DataValue` is what flows along connections. Producers publish a whole new
//! value each compute (see [`SlotHandle`](crate::graph::slot::SlotHandle)),
//! so values are immutable once published and readers share them by `Arc`.

use crate::error::StepError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A value flowing through a slot.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
    Vector(Vec<f64>),
    /// Row-major matrix.
    Matrix {
        rows: usize,
        cols: usize,
        data: Vec<f64>,
    },
}

impl DataValue {
    pub fn matrix(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, StepError> {
        if rows * cols != data.len() {
            return Err(StepError::Shape(format!(
                "{}x{} matrix needs {} elements, got {}",
                rows,
                cols,
                rows * cols,
                data.len()
            )));
        }
        Ok(DataValue::Matrix { rows, cols, data })
    }

    /// The concrete type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            DataValue::Float(_) => ValueType::Float,
            DataValue::Int(_) => ValueType::Int,
            DataValue::Bool(_) => ValueType::Bool,
            DataValue::Text(_) => ValueType::Text,
            DataValue::Vector(_) => ValueType::Vector,
            DataValue::Matrix { .. } => ValueType::Matrix,
        }
    }

    /// Scalar view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Float(v) => Some(*v),
            DataValue::Int(v) => Some(*v as f64),
            DataValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_slice(&self) -> Option<&[f64]> {
        match self {
            DataValue::Vector(v) => Some(v),
            DataValue::Matrix { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Apply `f` to every numeric element, preserving shape.
    ///
    /// Integers are promoted to floats.
    pub fn map_numeric(&self, f: impl Fn(f64) -> f64) -> Result<DataValue, StepError> {
        match self {
            DataValue::Float(v) => Ok(DataValue::Float(f(*v))),
            DataValue::Int(v) => Ok(DataValue::Float(f(*v as f64))),
            DataValue::Vector(v) => Ok(DataValue::Vector(v.iter().map(|x| f(*x)).collect())),
            DataValue::Matrix { rows, cols, data } => Ok(DataValue::Matrix {
                rows: *rows,
                cols: *cols,
                data: data.iter().map(|x| f(*x)).collect(),
            }),
            other => Err(StepError::Shape(format!(
                "{:?} is not numeric",
                other.value_type()
            ))),
        }
    }

    /// Combine two numeric values elementwise. A scalar broadcasts over the
    /// other operand; vectors and matrices must have the same shape.
    pub fn zip_numeric(
        &self,
        other: &DataValue,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<DataValue, StepError> {
        if let (Some(a), Some(b)) = (self.as_scalar(), other.as_scalar()) {
            return Ok(DataValue::Float(f(a, b)));
        }
        if let Some(a) = self.as_scalar() {
            return other.map_numeric(|b| f(a, b));
        }
        if let Some(b) = other.as_scalar() {
            return self.map_numeric(|a| f(a, b));
        }
        match (self, other) {
            (DataValue::Vector(a), DataValue::Vector(b)) => {
                if a.len() != b.len() {
                    return Err(StepError::Shape(format!(
                        "vector lengths differ: {} vs {}",
                        a.len(),
                        b.len()
                    )));
                }
                Ok(DataValue::Vector(
                    a.iter().zip(b).map(|(x, y)| f(*x, *y)).collect(),
                ))
            }
            (
                DataValue::Matrix { rows, cols, data },
                DataValue::Matrix {
                    rows: r2,
                    cols: c2,
                    data: d2,
                },
            ) => {
                if rows != r2 || cols != c2 {
                    return Err(StepError::Shape(format!(
                        "matrix shapes differ: {}x{} vs {}x{}",
                        rows, cols, r2, c2
                    )));
                }
                Ok(DataValue::Matrix {
                    rows: *rows,
                    cols: *cols,
                    data: data.iter().zip(d2).map(|(x, y)| f(*x, *y)).collect(),
                })
            }
            (a, b) => Err(StepError::Shape(format!(
                "cannot combine {:?} with {:?}",
                a.value_type(),
                b.value_type()
            ))),
        }
    }

    fn as_scalar(&self) -> Option<f64> {
        match self {
            DataValue::Float(v) => Some(*v),
            DataValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        DataValue::Float(v)
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Int(v)
    }
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        DataValue::Bool(v)
    }
}

impl From<Vec<f64>> for DataValue {
    fn from(v: Vec<f64>) -> Self {
        DataValue::Vector(v)
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Float(v) => write!(f, "{}", v),
            DataValue::Int(v) => write!(f, "{}", v),
            DataValue::Bool(v) => write!(f, "{}", v),
            DataValue::Text(s) => write!(f, "{:?}", s),
            DataValue::Vector(v) => write!(f, "{:?}", v),
            DataValue::Matrix { rows, cols, .. } => write!(f, "<{}x{} matrix>", rows, cols),
        }
    }
}

/// Declared type of a slot.
///
/// `Numeric` and `Any` are families used by steps that adapt to whatever
/// they are fed. Compatibility is structural and checked at connect time
/// by [`ValueType::accepts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Float,
    Int,
    Bool,
    Text,
    Vector,
    Matrix,
    /// Float, Int, Vector or Matrix.
    Numeric,
    Any,
}

impl ValueType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ValueType::Float
                | ValueType::Int
                | ValueType::Vector
                | ValueType::Matrix
                | ValueType::Numeric
        )
    }

    /// Whether an input declared as `self` can be fed by an output declared
    /// as `source`.
    ///
    /// `Any` outputs connect anywhere; the values they actually publish are
    /// re-checked by the consistency checker.
    pub fn accepts(self, source: ValueType) -> bool {
        match (self, source) {
            (ValueType::Any, _) | (_, ValueType::Any) => true,
            (ValueType::Numeric, s) => s.is_numeric(),
            (ValueType::Float, ValueType::Int) => true,
            (t, s) => t == s,
        }
    }

    /// Whether a concrete value fits this declared type.
    pub fn admits(self, value: &DataValue) -> bool {
        let found = value.value_type();
        match self {
            ValueType::Any => true,
            other => other.accepts(found) && (other != ValueType::Numeric || found.is_numeric()),
        }
    }
}

/// Parameter values that configure a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float view; integers are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

/// Named parameters of a step, ordered for stable descriptions.
pub type StepParams = BTreeMap<String, ConfigValue>;

/// Read a float parameter, falling back to `default` when absent.
pub(crate) fn float_param(params: &StepParams, key: &str, default: f64) -> Result<f64, StepError> {
    match params.get(key) {
        None => Ok(default),
        Some(v) => v.as_float().ok_or_else(|| StepError::InvalidParam {
            key: key.to_string(),
            message: format!("expected a number, got {:?}", v),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_structural() {
        assert!(ValueType::Float.accepts(ValueType::Int));
        assert!(!ValueType::Int.accepts(ValueType::Float));
        assert!(ValueType::Numeric.accepts(ValueType::Vector));
        assert!(!ValueType::Numeric.accepts(ValueType::Text));
        assert!(ValueType::Any.accepts(ValueType::Text));
        assert!(ValueType::Text.accepts(ValueType::Any));
        assert!(!ValueType::Float.accepts(ValueType::Numeric));
    }

    #[test]
    fn test_admits_concrete_values() {
        assert!(ValueType::Numeric.admits(&DataValue::Float(1.0)));
        assert!(!ValueType::Numeric.admits(&DataValue::Text("x".into())));
        assert!(ValueType::Any.admits(&DataValue::Bool(true)));
        assert!(!ValueType::Float.admits(&DataValue::Vector(vec![1.0])));
    }

    #[test]
    fn test_zip_broadcasts_scalars() {
        let v = DataValue::Vector(vec![1.0, 2.0]);
        let out = v.zip_numeric(&DataValue::Float(10.0), |a, b| a + b).unwrap();
        assert_eq!(out, DataValue::Vector(vec![11.0, 12.0]));
    }

    #[test]
    fn test_zip_rejects_shape_mismatch() {
        let a = DataValue::Vector(vec![1.0, 2.0]);
        let b = DataValue::Vector(vec![1.0]);
        assert!(matches!(a.zip_numeric(&b, |x, y| x + y), Err(StepError::Shape(_))));
    }

    #[test]
    fn test_matrix_constructor_checks_len() {
        assert!(DataValue::matrix(2, 2, vec![0.0; 4]).is_ok());
        assert!(DataValue::matrix(2, 3, vec![0.0; 4]).is_err());
    }

    #[test]
    #[allow(clippy::approx_constant)] // Intentionally using 3.14 as test value, not PI
    fn test_config_value() {
        assert_eq!(ConfigValue::Bool(true).as_bool(), Some(true));
        assert_eq!(ConfigValue::Int(42).as_int(), Some(42));
        assert_eq!(ConfigValue::Int(2).as_float(), Some(2.0));
        assert_eq!(ConfigValue::Float(3.14).as_float(), Some(3.14));
        assert_eq!(ConfigValue::String("hello".into()).as_str(), Some("hello"));
    }

    #[test]
    fn test_config_value_json_is_untagged() {
        let mut params = StepParams::new();
        params.insert("gain".into(), ConfigValue::Float(2.0));
        params.insert("capacity".into(), ConfigValue::Int(8));
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"capacity":8,"gain":2.0}"#);
        let back: StepParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
