//! Base node: runs one registered agent.

use std::sync::Arc;

use serde_json::{Map, Value};
use turnflow_types::agent::AgentInput;

use super::{ExecutionError, NodeContext, NodeOutput, Routing};
use crate::agent::BoxAgent;

#[derive(Debug)]
pub struct AgentNode {
    pub node_id: String,
    pub agent_name: String,
    pub agent: Arc<BoxAgent>,
    pub config: Map<String, Value>,
}

impl AgentNode {
    pub fn new(node_id: impl Into<String>, agent: Arc<BoxAgent>, config: Map<String, Value>) -> Self {
        Self {
            node_id: node_id.into(),
            agent_name: agent.name().to_string(),
            agent,
            config,
        }
    }

    pub async fn execute(&self, ctx: &NodeContext) -> Result<NodeOutput, ExecutionError> {
        let input = AgentInput {
            agent_name: self.agent_name.clone(),
            node_id: self.node_id.clone(),
            query: ctx.query.clone(),
            state: ctx.state.clone(),
            config: self.config.clone(),
        };

        let output = self.agent.run(input).await?;
        tracing::debug!(
            node_id = %self.node_id,
            agent = %self.agent_name,
            content_len = output.content.len(),
            "agent node completed"
        );

        Ok(NodeOutput {
            agent: Some(self.agent_name.clone()),
            result: output.to_value(),
            state_updates: output.state_updates,
            routing: Routing::Continue,
        })
    }
}
