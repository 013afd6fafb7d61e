//! JEXL evaluation for conditional edge `condition` expressions.
//!
//! Wraps `jexl_eval::Evaluator` with a small set of transforms. State values
//! are always passed as the context object, never interpolated into the
//! expression text.

use serde_json::{Value, json};
use turnflow_types::state::ExecutionState;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// ConditionEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator used to gate conditional edges.
///
/// Expressions see the execution state at the top level, e.g.
/// `signals.intent == 'consent'` or `successful_agents|length > 1`.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!truthy(&val)))
            })
            .with_transform("contains", |args: &[Value]| {
                let found = match (args.first(), args.get(1)) {
                    (Some(Value::String(s)), Some(Value::String(needle))) => s.contains(needle.as_str()),
                    (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                    _ => false,
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate `expression` against a JSON object and coerce the result to
    /// a boolean.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        Ok(truthy(&self.evaluate_value(expression, context)?))
    }

    /// Evaluate `expression` against the execution state.
    pub fn evaluate_state(&self, expression: &str, state: &ExecutionState) -> Result<bool, ExpressionError> {
        self.evaluate_bool(expression, &state.to_value())
    }

    /// Evaluate and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConditionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionEvaluator").finish_non_exhaustive()
    }
}

/// JavaScript-like truthiness.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_field_comparison() {
        let mut state = ExecutionState::from_query("query consents");
        state.insert("signals", json!({"intent": "consent"}));

        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate_state("signals.intent == 'consent'", &state).unwrap());
        assert!(!eval.evaluate_state("signals.intent == 'billing'", &state).unwrap());
    }

    #[test]
    fn test_length_transform_on_list() {
        let ctx = json!({"successful_agents": ["refiner", "critic"]});
        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate_bool("successful_agents|length > 1", &ctx).unwrap());
        assert!(!eval.evaluate_bool("successful_agents|length > 2", &ctx).unwrap());
    }

    #[test]
    fn test_contains_transform_on_string() {
        let ctx = json!({"query": "Show my consents"});
        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate_bool("query|lower|contains('consent')", &ctx).unwrap());
    }

    #[test]
    fn test_missing_field_is_falsy() {
        let ctx = json!({"query": "hi"});
        let eval = ConditionEvaluator::new();
        assert!(!eval.evaluate_bool("signals.missing", &ctx).unwrap_or(false));
    }

    #[test]
    fn test_non_object_context_rejected() {
        let eval = ConditionEvaluator::new();
        let err = eval.evaluate_bool("true", &json!([1, 2])).unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidContext(_)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!([])));
    }
}
