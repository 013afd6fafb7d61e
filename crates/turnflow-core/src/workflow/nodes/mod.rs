//! Executable workflow nodes.
//!
//! Every node declared in a `WorkflowDefinition` compiles to one
//! [`CompiledNode`]. Base nodes wrap a registered agent; advanced nodes are
//! built-in control nodes (decision, aggregator, validator, terminator).
//! Advanced nodes whose configuration cannot be built degrade to a
//! [`StubNode`] instead of failing compilation.

pub mod agent_node;
pub mod aggregator;
pub mod decision;
pub mod terminator;
pub mod validator;

use std::time::Duration;

use serde_json::{Map, Value, json};
use turnflow_types::state::ExecutionState;
use turnflow_types::workflow::NodeCategory;

use crate::agent::AgentError;

pub use agent_node::AgentNode;
pub use aggregator::AggregatorNode;
pub use decision::DecisionNode;
pub use terminator::TerminatorNode;
pub use validator::ValidatorNode;

// ---------------------------------------------------------------------------
// Node kind
// ---------------------------------------------------------------------------

/// Closed set of node kinds, one compiler arm per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Agent,
    Decision,
    Aggregator,
    Validator,
    Terminator,
}

impl NodeKind {
    /// Resolve the kind from a node's category and type. Base nodes are
    /// always agents; advanced nodes must name a known control node.
    pub fn resolve(category: NodeCategory, node_type: &str) -> Option<Self> {
        match category {
            NodeCategory::Base => Some(NodeKind::Agent),
            NodeCategory::Advanced => match node_type.trim().to_lowercase().as_str() {
                "decision" => Some(NodeKind::Decision),
                "aggregator" => Some(NodeKind::Aggregator),
                "validator" => Some(NodeKind::Validator),
                "terminator" => Some(NodeKind::Terminator),
                _ => None,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Agent => "agent",
            NodeKind::Decision => "decision",
            NodeKind::Aggregator => "aggregator",
            NodeKind::Validator => "validator",
            NodeKind::Terminator => "terminator",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Execution contract
// ---------------------------------------------------------------------------

/// Everything a node sees when it runs.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub execution_id: String,
    pub query: String,
    /// State snapshot taken at the start of the node's wave.
    pub state: ExecutionState,
    /// Agent names of base-node predecessors, in edge order.
    pub predecessor_agents: Vec<String>,
    /// Wall-clock time since the run started.
    pub elapsed: Duration,
}

/// How a finished node affects its outgoing edges.
#[derive(Debug, Clone, PartialEq)]
pub enum Routing {
    /// Sequential and parallel edges fire; conditional edges use their
    /// own `condition`.
    Continue,
    /// A decision picked `path`; conditional edges bound to it (or to one
    /// of `targets`) fire.
    Selected { path: String, targets: Vec<String> },
    /// No further waves are scheduled.
    Terminate { reason: String },
}

/// Result of a successful node run.
#[derive(Debug, Clone)]
pub struct NodeOutput {
    /// Agent name for base nodes.
    pub agent: Option<String>,
    /// Value stored under `agent_outputs.<agent>` or `node_results.<node_id>`.
    pub result: Value,
    /// Keys merged into the top level of the state after the wave.
    pub state_updates: Map<String, Value>,
    pub routing: Routing,
}

impl NodeOutput {
    pub fn control(result: Value, routing: Routing) -> Self {
        Self {
            agent: None,
            result,
            state_updates: Map::new(),
            routing,
        }
    }
}

/// A node failure. Caught per node by the executor and recorded in state.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("node '{node_id}' timed out after {secs}s")]
    Timeout { node_id: String, secs: u64 },

    #[error("node '{node_id}' needs at least {required} inputs, got {actual}")]
    InsufficientInputs {
        node_id: String,
        required: usize,
        actual: usize,
    },

    #[error("node '{node_id}' validation failed (pass rate {pass_rate:.2})")]
    ValidationFailed { node_id: String, pass_rate: f64 },

    #[error("node '{node_id}' task failed: {message}")]
    Join { node_id: String, message: String },
}

// ---------------------------------------------------------------------------
// Compiled node
// ---------------------------------------------------------------------------

/// Placeholder for an advanced node whose configuration could not be built.
#[derive(Debug, Clone)]
pub struct StubNode {
    pub node_id: String,
    pub kind: NodeKind,
    pub reason: String,
}

impl StubNode {
    fn execute(&self) -> NodeOutput {
        NodeOutput::control(
            json!({
                "stub": true,
                "node_type": self.kind.as_str(),
                "reason": self.reason,
            }),
            Routing::Continue,
        )
    }
}

#[derive(Debug)]
pub enum CompiledNode {
    Agent(AgentNode),
    Decision(DecisionNode),
    Aggregator(AggregatorNode),
    Validator(ValidatorNode),
    Terminator(TerminatorNode),
    Stub(StubNode),
}

impl CompiledNode {
    pub fn node_id(&self) -> &str {
        match self {
            CompiledNode::Agent(n) => &n.node_id,
            CompiledNode::Decision(n) => &n.node_id,
            CompiledNode::Aggregator(n) => &n.node_id,
            CompiledNode::Validator(n) => &n.node_id,
            CompiledNode::Terminator(n) => &n.node_id,
            CompiledNode::Stub(n) => &n.node_id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            CompiledNode::Agent(_) => NodeKind::Agent,
            CompiledNode::Decision(_) => NodeKind::Decision,
            CompiledNode::Aggregator(_) => NodeKind::Aggregator,
            CompiledNode::Validator(_) => NodeKind::Validator,
            CompiledNode::Terminator(_) => NodeKind::Terminator,
            CompiledNode::Stub(n) => n.kind,
        }
    }

    /// Agent name for base nodes.
    pub fn agent_name(&self) -> Option<&str> {
        match self {
            CompiledNode::Agent(n) => Some(&n.agent_name),
            _ => None,
        }
    }

    pub fn is_stub(&self) -> bool {
        matches!(self, CompiledNode::Stub(_))
    }

    pub async fn execute(&self, ctx: &NodeContext) -> Result<NodeOutput, ExecutionError> {
        match self {
            CompiledNode::Agent(n) => n.execute(ctx).await,
            CompiledNode::Decision(n) => Ok(n.execute(ctx)),
            CompiledNode::Aggregator(n) => n.execute(ctx),
            CompiledNode::Validator(n) => n.execute(ctx),
            CompiledNode::Terminator(n) => Ok(n.execute(ctx)),
            CompiledNode::Stub(n) => Ok(n.execute()),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// One agent output read back from state.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AgentResult {
    pub agent: String,
    pub content: String,
    pub confidence: Option<f64>,
}

/// Agent outputs stored in state, restricted to `agents` when non-empty.
pub(crate) fn collect_agent_results(state: &ExecutionState, agents: &[String]) -> Vec<AgentResult> {
    let Some(outputs) = state.agent_outputs() else {
        return Vec::new();
    };

    let read = |agent: &str, value: &Value| AgentResult {
        agent: agent.to_string(),
        content: value
            .get("content")
            .and_then(Value::as_str)
            .or_else(|| value.as_str())
            .unwrap_or_default()
            .to_string(),
        confidence: value
            .get("metadata")
            .and_then(|m| m.get("confidence"))
            .and_then(Value::as_f64),
    };

    if agents.is_empty() {
        outputs.iter().map(|(agent, value)| read(agent, value)).collect()
    } else {
        agents
            .iter()
            .filter_map(|agent| outputs.get(agent).map(|value| read(agent, value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnflow_types::state::keys;

    #[test]
    fn test_kind_resolution() {
        assert_eq!(NodeKind::resolve(NodeCategory::Base, "refiner"), Some(NodeKind::Agent));
        assert_eq!(
            NodeKind::resolve(NodeCategory::Advanced, "Decision"),
            Some(NodeKind::Decision)
        );
        assert_eq!(NodeKind::resolve(NodeCategory::Advanced, "router"), None);
    }

    #[tokio::test]
    async fn test_stub_output_is_tagged() {
        let node = CompiledNode::Stub(StubNode {
            node_id: "agg".to_string(),
            kind: NodeKind::Aggregator,
            reason: "bad config".to_string(),
        });
        let ctx = NodeContext {
            execution_id: "e".to_string(),
            query: "q".to_string(),
            state: ExecutionState::new(),
            predecessor_agents: Vec::new(),
            elapsed: Duration::ZERO,
        };
        let out = node.execute(&ctx).await.unwrap();
        assert_eq!(out.result["stub"], true);
        assert_eq!(out.result["node_type"], "aggregator");
        assert_eq!(out.routing, Routing::Continue);
        assert_eq!(node.kind(), NodeKind::Aggregator);
    }

    #[test]
    fn test_collect_agent_results_filters() {
        let mut state = ExecutionState::from_query("q");
        state.insert_in_object(keys::AGENT_OUTPUTS, "critic", json!({"content": "c", "metadata": {"confidence": 0.7}}));
        state.insert_in_object(keys::AGENT_OUTPUTS, "historian", json!({"content": "h"}));

        let all = collect_agent_results(&state, &[]);
        assert_eq!(all.len(), 2);

        let only = collect_agent_results(&state, &["critic".to_string()]);
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].confidence, Some(0.7));
    }
}
