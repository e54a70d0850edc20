//! Per-axis transforms turning raw samples into plotted numbers.
//!
//! Transforms live next to the chart data rather than inside it: `ChartData` stays
//! plain serializable data and the owning task injects the transform when it creates
//! the chart. Transforms are never persisted.

use crate::error::{AppResult, LabError};
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Signature of a user formula.
pub type FormulaFn = dyn Fn(&Value) -> AppResult<f64> + Send + Sync;

/// Raw-to-processed mapping for one chart axis.
#[derive(Clone, Default)]
pub enum Transform {
    /// No transform; the producer writes processed values directly.
    #[default]
    None,
    /// `gain * v + offset` for numeric raw samples.
    Linear { gain: f64, offset: f64 },
    /// Arbitrary formula over the raw JSON sample.
    Formula(Arc<FormulaFn>),
}

impl Transform {
    /// Wrap a formula over raw JSON samples.
    pub fn formula<F>(f: F) -> Self
    where
        F: Fn(&Value) -> AppResult<f64> + Send + Sync + 'static,
    {
        Transform::Formula(Arc::new(f))
    }

    /// Wrap a formula over numeric samples. Non-numeric samples are an error.
    pub fn numeric<F>(f: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Transform::formula(move |value| as_number(value).map(&f))
    }

    /// Whether a transform is configured for the axis.
    pub fn is_set(&self) -> bool {
        !matches!(self, Transform::None)
    }

    /// Evaluate the transform for one raw sample.
    ///
    /// A panicking formula is reported as `LabError::Transform` instead of unwinding
    /// into the caller.
    pub fn apply(&self, value: &Value) -> AppResult<f64> {
        match self {
            Transform::None => Err(LabError::Transform("no transform configured".into())),
            Transform::Linear { gain, offset } => Ok(gain * as_number(value)? + offset),
            Transform::Formula(f) => catch_unwind(AssertUnwindSafe(|| f(value)))
                .unwrap_or_else(|payload| Err(LabError::Transform(panic_message(&*payload)))),
        }
    }

    /// Evaluate every value in `values`. All-or-nothing: the first failure aborts.
    pub fn apply_all(&self, values: &[Value]) -> AppResult<Vec<f64>> {
        values.iter().map(|v| self.apply(v)).collect()
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::None => write!(f, "None"),
            Transform::Linear { gain, offset } => f
                .debug_struct("Linear")
                .field("gain", gain)
                .field("offset", offset)
                .finish(),
            Transform::Formula(_) => write!(f, "Formula(..)"),
        }
    }
}

/// Extract a number from a raw sample.
pub fn as_number(value: &Value) -> AppResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| LabError::Transform(format!("expected a number, got {}", value)))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("formula panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("formula panicked: {}", s)
    } else {
        "formula panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn none_is_not_set() {
        assert!(!Transform::None.is_set());
        assert!(Transform::numeric(|v| v).is_set());
        assert!(Transform::None.apply(&json!(1.0)).is_err());
    }

    #[test]
    fn linear_scales_numbers() {
        let t = Transform::Linear {
            gain: 4.0,
            offset: -1.0,
        };
        assert_eq!(t.apply(&json!(0.5)).unwrap(), 1.0);
        assert!(t.apply(&json!("abc")).is_err());
    }

    #[test]
    fn formula_reads_composite_samples() {
        // Raw sample is a [voltage, current] pair; processed is the resistance.
        let t = Transform::formula(|v| {
            let u = as_number(&v[0])?;
            let i = as_number(&v[1])?;
            Ok(u / i)
        });
        assert_eq!(t.apply(&json!([2.0, 0.5])).unwrap(), 4.0);
    }

    #[test]
    fn panicking_formula_becomes_error() {
        let t = Transform::formula(|_| panic!("division by zero"));
        match t.apply(&json!(1)) {
            Err(LabError::Transform(msg)) => assert!(msg.contains("division by zero")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn apply_all_is_all_or_nothing() {
        let t = Transform::numeric(|v| v * 2.0);
        assert_eq!(
            t.apply_all(&[json!(1), json!(2)]).unwrap(),
            vec![2.0, 4.0]
        );
        assert!(t.apply_all(&[json!(1), json!(null)]).is_err());
    }
}
