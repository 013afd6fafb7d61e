//! Terminator node: stops scheduling once any named criterion fires.
//!
//! - `confidence`: some agent reported confidence >= `confidence_threshold`
//! - `quality`: some node result has `quality_score` >= `quality_threshold`
//! - `resource`: number of agent outputs reached `resource_limit`
//! - `time`: elapsed run time reached `time_limit_ms`

use serde_json::{Value, json};
use turnflow_types::state::{ExecutionState, keys};
use turnflow_types::workflow::TerminatorConfig;

use super::{NodeContext, NodeOutput, Routing, collect_agent_results};

const KNOWN_CRITERIA: &[&str] = &["confidence", "quality", "resource", "time"];

#[derive(Debug)]
pub struct TerminatorNode {
    pub node_id: String,
    config: TerminatorConfig,
}

impl TerminatorNode {
    pub fn new(node_id: impl Into<String>, config: TerminatorConfig) -> Result<Self, String> {
        if config.criteria.is_empty() {
            return Err("terminator needs at least one criterion".to_string());
        }
        if let Some(unknown) = config
            .criteria
            .iter()
            .find(|c| !KNOWN_CRITERIA.contains(&c.as_str()))
        {
            return Err(format!("unknown termination criterion '{unknown}'"));
        }
        Ok(Self {
            node_id: node_id.into(),
            config,
        })
    }

    pub fn execute(&self, ctx: &NodeContext) -> NodeOutput {
        let fired = self
            .config
            .criteria
            .iter()
            .find_map(|name| self.evaluate(name, ctx).map(|reason| (name.clone(), reason)));

        match fired {
            Some((criterion, reason)) => {
                tracing::debug!(node_id = %self.node_id, %criterion, %reason, "terminator fired");
                NodeOutput::control(
                    json!({
                        "should_terminate": true,
                        "criterion": criterion,
                        "reason": reason,
                    }),
                    Routing::Terminate { reason },
                )
            }
            None => NodeOutput::control(json!({"should_terminate": false}), Routing::Continue),
        }
    }

    /// Returns a reason when the criterion fires.
    fn evaluate(&self, name: &str, ctx: &NodeContext) -> Option<String> {
        match name {
            "confidence" => {
                let best = collect_agent_results(&ctx.state, &[])
                    .iter()
                    .filter_map(|r| r.confidence)
                    .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |a| a.max(c))))?;
                (best >= self.config.confidence_threshold).then(|| {
                    format!(
                        "confidence {best:.2} reached threshold {:.2}",
                        self.config.confidence_threshold
                    )
                })
            }
            "quality" => {
                let best = best_quality(&ctx.state)?;
                (best >= self.config.quality_threshold).then(|| {
                    format!(
                        "quality {best:.2} reached threshold {:.2}",
                        self.config.quality_threshold
                    )
                })
            }
            "resource" => {
                let limit = self.config.resource_limit?;
                let used = ctx.state.agent_outputs().map_or(0, |o| o.len()) as u64;
                (used >= limit).then(|| format!("{used} agent outputs reached limit {limit}"))
            }
            "time" => {
                let limit = self.config.time_limit_ms?;
                let elapsed = ctx.elapsed.as_millis() as u64;
                (elapsed >= limit).then(|| format!("elapsed {elapsed}ms reached limit {limit}ms"))
            }
            _ => None,
        }
    }
}

fn best_quality(state: &ExecutionState) -> Option<f64> {
    state
        .get(keys::NODE_RESULTS)
        .and_then(Value::as_object)?
        .values()
        .filter_map(|r| r.get("quality_score").and_then(Value::as_f64))
        .fold(None, |acc: Option<f64>, q| Some(acc.map_or(q, |a| a.max(q))))
}
