//! Workflow domain types for turnflow.
//!
//! `WorkflowDefinition` is the declarative node/edge description that the
//! compiler turns into a running graph. It is pure data: validation lives in
//! the compiler, execution in the executor. This module also carries the
//! typed configuration payloads of the advanced node kinds.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// Static node/edge/entry/terminal description of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDefinition {
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
    pub entry_point: String,
    #[serde(default)]
    pub terminal_nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl WorkflowDefinition {
    /// An empty definition with the given id and entry point.
    pub fn new(workflow_id: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            name: None,
            version: default_version(),
            description: None,
            created_by: None,
            created_at: None,
            tags: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            entry_point: entry_point.into(),
            terminal_nodes: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: EdgeDef) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_terminal(mut self, node_id: impl Into<String>) -> Self {
        self.terminal_nodes.push(node_id.into());
        self
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.node_id.as_str())
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Whether a node wraps an agent or is a built-in control node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Base,
    Advanced,
}

/// A single node declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeConfig {
    /// Unique within the workflow.
    pub node_id: String,
    /// For base nodes, the agent name; for advanced nodes one of
    /// `decision`, `aggregator`, `validator`, `terminator`.
    pub node_type: String,
    pub category: NodeCategory,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl NodeConfig {
    /// A base node running the agent `agent`.
    pub fn agent(node_id: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: agent.into(),
            category: NodeCategory::Base,
            config: Map::new(),
            metadata: Map::new(),
        }
    }

    /// An advanced node of `node_type` with the given config payload.
    pub fn advanced(
        node_id: impl Into<String>,
        node_type: impl Into<String>,
        config: Map<String, Value>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            category: NodeCategory::Advanced,
            config,
            metadata: Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// How an edge gates its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    #[default]
    Sequential,
    Conditional,
    Parallel,
}

/// Metadata key naming the decision path that activates a conditional edge.
pub const EDGE_META_PATH: &str = "path";

/// Metadata key holding a JEXL condition evaluated against execution state.
pub const EDGE_META_CONDITION: &str = "condition";

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EdgeDef {
    pub from_node: String,
    pub to_node: String,
    #[serde(default)]
    pub edge_type: EdgeType,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl EdgeDef {
    pub fn new(from: impl Into<String>, to: impl Into<String>, edge_type: EdgeType) -> Self {
        Self {
            from_node: from.into(),
            to_node: to.into(),
            edge_type,
            metadata: Map::new(),
        }
    }

    pub fn sequential(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(from, to, EdgeType::Sequential)
    }

    pub fn parallel(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(from, to, EdgeType::Parallel)
    }

    pub fn conditional(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(from, to, EdgeType::Conditional)
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Decision path name this edge is bound to, if any.
    pub fn path(&self) -> Option<&str> {
        self.metadata.get(EDGE_META_PATH).and_then(Value::as_str)
    }

    /// JEXL condition gating this edge, if any.
    pub fn condition(&self) -> Option<&str> {
        self.metadata.get(EDGE_META_CONDITION).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Advanced node configuration payloads
// ---------------------------------------------------------------------------

/// A weighted named criterion feeding a decision score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecisionCriterion {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// A named output path of a decision node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecisionPath {
    pub name: String,
    #[serde(default)]
    pub min_score: f64,
    #[serde(default)]
    pub targets: Vec<String>,
}

/// Configuration of a `decision` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecisionConfig {
    #[serde(default)]
    pub criteria: Vec<DecisionCriterion>,
    pub paths: Vec<DecisionPath>,
}

/// How an aggregator combines its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    #[default]
    Consensus,
    Weighted,
    Hierarchical,
    FirstWins,
    Concatenate,
}

/// Configuration of an `aggregator` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorConfig {
    #[serde(default)]
    pub strategy: AggregationStrategy,
    #[serde(default = "default_min_inputs")]
    pub min_inputs: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_inputs: Option<usize>,
    #[serde(default)]
    pub quality_threshold: f64,
    #[serde(default)]
    pub confidence_threshold: f64,
    /// Agent priority for the `weighted` and `hierarchical` strategies.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub weights: Map<String, Value>,
}

/// A named pass/fail check of a `validator` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationCriterion {
    pub name: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

/// Configuration of a `validator` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorConfig {
    pub criteria: Vec<ValidationCriterion>,
    #[serde(default = "default_pass_rate")]
    pub required_pass_rate: f64,
    #[serde(default)]
    pub strict: bool,
}

/// Configuration of a `terminator` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminatorConfig {
    pub criteria: Vec<String>,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    /// Maximum number of agent outputs before terminating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_limit: Option<u64>,
    /// Elapsed-time budget in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_min_inputs() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_pass_rate() -> f64 {
    1.0
}

fn default_confidence_threshold() -> f64 {
    0.95
}

fn default_quality_threshold() -> f64 {
    0.9
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
