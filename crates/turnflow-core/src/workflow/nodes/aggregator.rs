//! Aggregator node: combines the outputs of upstream agents.
//!
//! Inputs are the agent outputs of the node's base-node predecessors, or
//! every agent output in state when it has none. Fewer than `min_inputs` is
//! a node failure; inputs beyond `max_inputs` are dropped in predecessor
//! order.

use std::collections::HashMap;

use serde_json::{Value, json};
use turnflow_types::workflow::{AggregationStrategy, AggregatorConfig};

use super::{AgentResult, ExecutionError, NodeContext, NodeOutput, Routing, collect_agent_results};

const SEPARATOR: &str = "\n\n";

#[derive(Debug)]
pub struct AggregatorNode {
    pub node_id: String,
    config: AggregatorConfig,
}

impl AggregatorNode {
    pub fn new(node_id: impl Into<String>, config: AggregatorConfig) -> Result<Self, String> {
        if let Some(max) = config.max_inputs {
            if max < config.min_inputs {
                return Err(format!(
                    "max_inputs ({max}) is below min_inputs ({})",
                    config.min_inputs
                ));
            }
        }
        Ok(Self {
            node_id: node_id.into(),
            config,
        })
    }

    pub fn execute(&self, ctx: &NodeContext) -> Result<NodeOutput, ExecutionError> {
        let mut inputs = collect_agent_results(&ctx.state, &ctx.predecessor_agents);
        if inputs.len() < self.config.min_inputs {
            return Err(ExecutionError::InsufficientInputs {
                node_id: self.node_id.clone(),
                required: self.config.min_inputs,
                actual: inputs.len(),
            });
        }
        if let Some(max) = self.config.max_inputs {
            inputs.truncate(max);
        }

        let (aggregated, quality_score) = match self.config.strategy {
            AggregationStrategy::Consensus => consensus(&inputs),
            AggregationStrategy::Weighted => self.weighted(&inputs),
            AggregationStrategy::Hierarchical => self.hierarchical(&inputs),
            AggregationStrategy::FirstWins => (
                inputs.first().map(|i| i.content.clone()).unwrap_or_default(),
                non_empty_ratio(&inputs),
            ),
            AggregationStrategy::Concatenate => (join(inputs.iter()), non_empty_ratio(&inputs)),
        };
        let confidence = mean_confidence(&inputs);
        let meets_thresholds = quality_score >= self.config.quality_threshold
            && confidence >= self.config.confidence_threshold;

        Ok(NodeOutput::control(
            json!({
                "strategy": self.config.strategy,
                "input_count": inputs.len(),
                "sources": inputs.iter().map(|i| i.agent.as_str()).collect::<Vec<_>>(),
                "aggregated": aggregated,
                "quality_score": quality_score,
                "confidence": confidence,
                "meets_thresholds": meets_thresholds,
            }),
            Routing::Continue,
        ))
    }

    fn weight(&self, agent: &str) -> f64 {
        self.config
            .weights
            .get(agent)
            .and_then(Value::as_f64)
            .unwrap_or(1.0)
    }

    /// Highest weight x confidence wins; quality is its share of the total.
    fn weighted(&self, inputs: &[AgentResult]) -> (String, f64) {
        let scored: Vec<(f64, &AgentResult)> = inputs
            .iter()
            .map(|i| (self.weight(&i.agent) * i.confidence.unwrap_or(1.0), i))
            .collect();
        let total: f64 = scored.iter().map(|(s, _)| s).sum();
        let best = scored.iter().fold(None, |best: Option<&(f64, &AgentResult)>, item| match best {
            Some(b) if b.0 >= item.0 => Some(b),
            _ => Some(item),
        });
        match best {
            Some((score, input)) if total > 0.0 => (input.content.clone(), score / total),
            Some((_, input)) => (input.content.clone(), 0.0),
            None => (String::new(), 0.0),
        }
    }

    /// Inputs ordered by descending weight, then joined.
    fn hierarchical(&self, inputs: &[AgentResult]) -> (String, f64) {
        let mut ordered: Vec<&AgentResult> = inputs.iter().collect();
        ordered.sort_by(|a, b| self.weight(&b.agent).total_cmp(&self.weight(&a.agent)));
        (join(ordered.into_iter()), non_empty_ratio(inputs))
    }
}

/// Most frequent normalized content wins; quality is the agreement ratio.
fn consensus(inputs: &[AgentResult]) -> (String, f64) {
    if inputs.is_empty() {
        return (String::new(), 0.0);
    }
    let mut counts: HashMap<String, usize> = HashMap::new();
    for input in inputs {
        *counts.entry(normalize(&input.content)).or_default() += 1;
    }
    // First input with the top count keeps ties deterministic.
    let top = counts.values().copied().max().unwrap_or(0);
    let winner = inputs
        .iter()
        .find(|i| counts.get(&normalize(&i.content)).copied() == Some(top))
        .map(|i| i.content.clone())
        .unwrap_or_default();
    (winner, top as f64 / inputs.len() as f64)
}

fn normalize(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn join<'a>(inputs: impl Iterator<Item = &'a AgentResult>) -> String {
    inputs
        .filter(|i| !i.content.trim().is_empty())
        .map(|i| i.content.as_str())
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

fn non_empty_ratio(inputs: &[AgentResult]) -> f64 {
    if inputs.is_empty() {
        return 0.0;
    }
    let non_empty = inputs.iter().filter(|i| !i.content.trim().is_empty()).count();
    non_empty as f64 / inputs.len() as f64
}

/// Mean of reported confidences; inputs that report none count as 1.0.
fn mean_confidence(inputs: &[AgentResult]) -> f64 {
    if inputs.is_empty() {
        return 0.0;
    }
    inputs.iter().map(|i| i.confidence.unwrap_or(1.0)).sum::<f64>() / inputs.len() as f64
}
