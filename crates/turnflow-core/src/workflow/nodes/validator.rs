//! Validator node: named pass/fail checks over the state so far.
//!
//! Known checks:
//! - `has_output`: at least one agent produced non-empty content
//! - `no_errors`: recorded errors do not exceed `threshold` (default 0)
//! - `min_length`: the longest agent output has at least `threshold` chars (default 1)
//! - `successful_agents`: at least `threshold` agents succeeded (default 1)

use serde_json::{Value, json};
use turnflow_types::state::{ExecutionState, keys};
use turnflow_types::workflow::{ValidationCriterion, ValidatorConfig};

use super::{ExecutionError, NodeContext, NodeOutput, Routing, collect_agent_results};

const KNOWN_CHECKS: &[&str] = &["has_output", "no_errors", "min_length", "successful_agents"];

#[derive(Debug)]
pub struct ValidatorNode {
    pub node_id: String,
    config: ValidatorConfig,
}

impl ValidatorNode {
    pub fn new(node_id: impl Into<String>, config: ValidatorConfig) -> Result<Self, String> {
        if config.criteria.is_empty() {
            return Err("validator needs at least one criterion".to_string());
        }
        if let Some(unknown) = config
            .criteria
            .iter()
            .find(|c| !KNOWN_CHECKS.contains(&c.name.as_str()))
        {
            return Err(format!("unknown validation criterion '{}'", unknown.name));
        }
        if !(0.0..=1.0).contains(&config.required_pass_rate) {
            return Err("required_pass_rate must be within 0.0..=1.0".to_string());
        }
        Ok(Self {
            node_id: node_id.into(),
            config,
        })
    }

    pub fn execute(&self, ctx: &NodeContext) -> Result<NodeOutput, ExecutionError> {
        let checks: Vec<(&ValidationCriterion, bool)> = self
            .config
            .criteria
            .iter()
            .map(|c| (c, check(c, &ctx.state)))
            .collect();

        let passed_count = checks.iter().filter(|(_, ok)| *ok).count();
        let pass_rate = passed_count as f64 / checks.len() as f64;
        let required_ok = checks.iter().all(|(c, ok)| *ok || !c.required);
        let passed = pass_rate >= self.config.required_pass_rate && (!self.config.strict || required_ok);

        if self.config.strict && !passed {
            return Err(ExecutionError::ValidationFailed {
                node_id: self.node_id.clone(),
                pass_rate,
            });
        }

        let details: Vec<Value> = checks
            .iter()
            .map(|(c, ok)| json!({"name": c.name, "passed": ok, "required": c.required}))
            .collect();

        Ok(NodeOutput::control(
            json!({
                "result": if passed { "pass" } else { "fail" },
                "passed": passed,
                "pass_rate": pass_rate,
                "checks": details,
            }),
            Routing::Continue,
        ))
    }
}

fn check(criterion: &ValidationCriterion, state: &ExecutionState) -> bool {
    match criterion.name.as_str() {
        "has_output" => collect_agent_results(state, &[])
            .iter()
            .any(|r| !r.content.trim().is_empty()),
        "no_errors" => {
            let errors = state.get(keys::ERRORS).and_then(Value::as_array).map_or(0, Vec::len);
            errors as f64 <= criterion.threshold.unwrap_or(0.0)
        }
        "min_length" => {
            let longest = collect_agent_results(state, &[])
                .iter()
                .map(|r| r.content.chars().count())
                .max()
                .unwrap_or(0);
            longest as f64 >= criterion.threshold.unwrap_or(1.0)
        }
        "successful_agents" => {
            state.string_list(keys::SUCCESSFUL_AGENTS).len() as f64 >= criterion.threshold.unwrap_or(1.0)
        }
        _ => false,
    }
}
