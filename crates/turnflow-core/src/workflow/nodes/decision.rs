//! Decision node: weighted score over named criteria selects an output path.
//!
//! Criterion values come from `signals.<name>` when numeric, or from the
//! built-ins `query_length`, `successful_agents`, `failed_agents` and
//! `error_count`. The selected path is the one with the highest `min_score`
//! not above the score; if none qualifies the first path is used.

use serde_json::{Value, json};
use turnflow_types::state::{ExecutionState, keys};
use turnflow_types::workflow::DecisionConfig;

use super::{NodeContext, NodeOutput, Routing};

#[derive(Debug)]
pub struct DecisionNode {
    pub node_id: String,
    config: DecisionConfig,
}

impl DecisionNode {
    /// Build from a validated config. A decision without paths cannot route.
    pub fn new(node_id: impl Into<String>, config: DecisionConfig) -> Result<Self, String> {
        if config.paths.is_empty() {
            return Err("decision node needs at least one path".to_string());
        }
        if config.criteria.iter().any(|c| c.weight < 0.0 || !c.weight.is_finite()) {
            return Err("criterion weights must be finite and non-negative".to_string());
        }
        Ok(Self {
            node_id: node_id.into(),
            config,
        })
    }

    pub fn execute(&self, ctx: &NodeContext) -> NodeOutput {
        let score = self.score(&ctx.state, &ctx.query);

        let selected = self
            .config
            .paths
            .iter()
            .filter(|p| p.min_score <= score)
            .max_by(|a, b| a.min_score.total_cmp(&b.min_score))
            .unwrap_or(&self.config.paths[0]);

        tracing::debug!(
            node_id = %self.node_id,
            score,
            path = %selected.name,
            "decision path selected"
        );

        NodeOutput::control(
            json!({
                "selected_path": selected.name,
                "score": score,
                "targets": selected.targets,
            }),
            Routing::Selected {
                path: selected.name.clone(),
                targets: selected.targets.clone(),
            },
        )
    }

    fn score(&self, state: &ExecutionState, query: &str) -> f64 {
        let total_weight: f64 = self.config.criteria.iter().map(|c| c.weight).sum();
        if total_weight <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = self
            .config
            .criteria
            .iter()
            .map(|c| c.weight * criterion_value(&c.name, state, query))
            .sum();
        weighted / total_weight
    }
}

fn criterion_value(name: &str, state: &ExecutionState, query: &str) -> f64 {
    if let Some(v) = state
        .get(keys::SIGNALS)
        .and_then(|s| s.get(name))
        .and_then(Value::as_f64)
    {
        return v;
    }
    match name {
        "query_length" => query.chars().count() as f64,
        "successful_agents" => state.string_list(keys::SUCCESSFUL_AGENTS).len() as f64,
        "failed_agents" => state.string_list(keys::FAILED_AGENTS).len() as f64,
        "error_count" => state
            .get(keys::ERRORS)
            .and_then(Value::as_array)
            .map_or(0, Vec::len) as f64,
        _ => 0.0,
    }
}
