//! Workflow compiler: validates a `WorkflowDefinition` and builds the
//! executable node graph.
//!
//! Validation aggregates every problem it finds into one
//! [`ValidationError`]; no node is constructed unless validation passes.
//! Non-fatal advisories (unreachable nodes, excessive depth, style) are
//! logged and returned as `warnings` on the [`CompiledGraph`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use turnflow_types::config::CompilerSettings;
use turnflow_types::workflow::{EdgeDef, EdgeType, NodeConfig, WorkflowDefinition};

use super::dag;
use super::nodes::{
    AgentNode, AggregatorNode, CompiledNode, DecisionNode, NodeKind, StubNode, TerminatorNode,
    ValidatorNode,
};
use crate::agent::AgentRegistry;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A malformed workflow definition. Carries every message found.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("workflow '{workflow_id}' is invalid: {}", .messages.join("; "))]
pub struct ValidationError {
    pub workflow_id: String,
    pub messages: Vec<String>,
}

/// A node that could not be constructed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompositionError {
    #[error("node '{node_id}' references unregistered agent '{agent}'")]
    UnknownAgent { node_id: String, agent: String },

    #[error("node '{node_id}' has unknown node type '{node_type}'")]
    UnknownNodeType { node_id: String, node_type: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Composition(#[from] CompositionError),
}

// ---------------------------------------------------------------------------
// Compiled graph
// ---------------------------------------------------------------------------

/// Executable form of a workflow definition.
#[derive(Debug)]
pub struct CompiledGraph {
    definition: WorkflowDefinition,
    nodes: HashMap<String, Arc<CompiledNode>>,
    /// Node ids in declaration order.
    order: Vec<String>,
    /// Topological waves; `None` when cycles were allowed and present.
    waves: Option<Vec<Vec<String>>>,
    terminal_nodes: Vec<String>,
    warnings: Vec<String>,
}

impl CompiledGraph {
    pub fn workflow_id(&self) -> &str {
        &self.definition.workflow_id
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn entry_point(&self) -> &str {
        &self.definition.entry_point
    }

    pub fn node(&self, node_id: &str) -> Option<&Arc<CompiledNode>> {
        self.nodes.get(node_id)
    }

    pub fn node_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn waves(&self) -> Option<&[Vec<String>]> {
        self.waves.as_deref()
    }

    pub fn is_cyclic(&self) -> bool {
        self.waves.is_none()
    }

    /// Declared terminal nodes, or the graph's sinks when none are declared.
    pub fn terminal_nodes(&self) -> &[String] {
        &self.terminal_nodes
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn outgoing(&self, node_id: &str) -> impl Iterator<Item = &EdgeDef> {
        self.definition.edges.iter().filter(move |e| e.from_node == node_id)
    }

    /// Agent names of the base-node predecessors of `node_id`.
    pub fn predecessor_agents(&self, node_id: &str) -> Vec<String> {
        dag::predecessors(node_id, &self.definition.edges)
            .into_iter()
            .filter_map(|pred| self.nodes.get(pred)?.agent_name().map(str::to_string))
            .collect()
    }

    /// Position of each node in declaration order.
    pub fn declaration_index(&self) -> HashMap<&str, usize> {
        self.order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect()
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Compiles workflow definitions against an agent registry.
#[derive(Debug, Clone)]
pub struct WorkflowCompiler {
    registry: Arc<AgentRegistry>,
    settings: CompilerSettings,
}

impl WorkflowCompiler {
    pub fn new(registry: Arc<AgentRegistry>, settings: CompilerSettings) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Compile with the configured cycle policy.
    pub fn compile(&self, definition: &WorkflowDefinition) -> Result<CompiledGraph, CompileError> {
        self.compile_with(definition, self.settings.allow_cycles)
    }

    /// Compile, overriding whether cycles are allowed.
    pub fn compile_with(
        &self,
        definition: &WorkflowDefinition,
        allow_cycles: bool,
    ) -> Result<CompiledGraph, CompileError> {
        self.validate(definition, allow_cycles)?;
        let warnings = self.advisories(definition);
        for warning in &warnings {
            tracing::warn!(workflow_id = %definition.workflow_id, %warning, "workflow advisory");
        }

        let mut nodes = HashMap::with_capacity(definition.nodes.len());
        for config in &definition.nodes {
            let node = self.build_node(config)?;
            nodes.insert(config.node_id.clone(), Arc::new(node));
        }

        let ids: Vec<&str> = definition.node_ids().collect();
        let waves = dag::compute_waves(&ids, &definition.edges);
        let terminal_nodes = if definition.terminal_nodes.is_empty() {
            ids.iter()
                .filter(|id| !definition.edges.iter().any(|e| e.from_node == **id))
                .map(|id| id.to_string())
                .collect()
        } else {
            definition.terminal_nodes.clone()
        };

        tracing::debug!(
            workflow_id = %definition.workflow_id,
            nodes = nodes.len(),
            edges = definition.edges.len(),
            cyclic = waves.is_none(),
            "workflow compiled"
        );

        Ok(CompiledGraph {
            definition: definition.clone(),
            nodes,
            order: ids.iter().map(|id| id.to_string()).collect(),
            waves,
            terminal_nodes,
            warnings,
        })
    }

    /// Run every structural check and aggregate the failures.
    pub fn validate(&self, def: &WorkflowDefinition, allow_cycles: bool) -> Result<(), ValidationError> {
        let mut messages = Vec::new();

        // Required fields
        if def.workflow_id.trim().is_empty() {
            messages.push("workflow_id must not be empty".to_string());
        }
        if def.entry_point.trim().is_empty() {
            messages.push("entry_point must not be empty".to_string());
        }
        if def.nodes.is_empty() {
            messages.push("workflow must declare at least one node".to_string());
        }
        for (i, node) in def.nodes.iter().enumerate() {
            if node.node_id.trim().is_empty() {
                messages.push(format!("node #{i} has an empty node_id"));
            }
            if node.node_type.trim().is_empty() {
                messages.push(format!("node #{i} has an empty node_type"));
            }
        }

        let declared: HashSet<&str> = def.node_ids().collect();

        // Entry and terminal references
        if !def.entry_point.trim().is_empty() && !declared.contains(def.entry_point.as_str()) {
            messages.push(format!("entry_point '{}' is not a declared node", def.entry_point));
        }
        for terminal in &def.terminal_nodes {
            if !declared.contains(terminal.as_str()) {
                messages.push(format!("terminal node '{terminal}' is not a declared node"));
            }
        }

        // Edge endpoints
        for edge in &def.edges {
            for endpoint in [&edge.from_node, &edge.to_node] {
                if !declared.contains(endpoint.as_str()) {
                    messages.push(format!(
                        "edge {} -> {} references unknown node '{endpoint}'",
                        edge.from_node, edge.to_node
                    ));
                }
            }
        }

        // Duplicates
        let mut seen = HashSet::new();
        for id in def.node_ids() {
            if !seen.insert(id) {
                messages.push(format!("duplicate node id '{id}'"));
            }
        }

        // Size limits
        if def.nodes.len() > self.settings.max_nodes {
            messages.push(format!(
                "workflow has {} nodes, maximum is {}",
                def.nodes.len(),
                self.settings.max_nodes
            ));
        }
        if def.edges.len() > self.settings.max_edges {
            messages.push(format!(
                "workflow has {} edges, maximum is {}",
                def.edges.len(),
                self.settings.max_edges
            ));
        }

        // Node types
        for node in &def.nodes {
            if NodeKind::resolve(node.category, &node.node_type).is_none() {
                messages.push(format!(
                    "node '{}' has unknown advanced node type '{}'",
                    node.node_id, node.node_type
                ));
            }
        }

        // Cycles
        if !allow_cycles {
            let ids: Vec<&str> = def.node_ids().collect();
            if let Some(cycle) = dag::find_cycle(&ids, &def.edges) {
                messages.push(format!("cycle detected: {}", cycle.join(" -> ")));
            }
        }

        if messages.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                workflow_id: def.workflow_id.clone(),
                messages,
            })
        }
    }

    /// Non-fatal observations about a valid definition.
    fn advisories(&self, def: &WorkflowDefinition) -> Vec<String> {
        let mut warnings = Vec::new();
        let ids: Vec<&str> = def.node_ids().collect();

        let reachable = dag::reachable_from(&def.entry_point, &def.edges);
        for id in &ids {
            if !reachable.contains(id) {
                warnings.push(format!("node '{id}' is unreachable from entry '{}'", def.entry_point));
            }
        }

        if dag::find_cycle(&ids, &def.edges).is_none() {
            let depth = dag::longest_path_from(&def.entry_point, &ids, &def.edges);
            if depth > self.settings.max_depth_advisory {
                warnings.push(format!(
                    "workflow depth {depth} exceeds recommended maximum {}",
                    self.settings.max_depth_advisory
                ));
            }
        }

        let decisions: HashSet<&str> = def
            .nodes
            .iter()
            .filter(|n| NodeKind::resolve(n.category, &n.node_type) == Some(NodeKind::Decision))
            .map(|n| n.node_id.as_str())
            .collect();
        for edge in &def.edges {
            if edge.edge_type == EdgeType::Conditional
                && !decisions.contains(edge.from_node.as_str())
                && edge.condition().is_none()
            {
                warnings.push(format!(
                    "conditional edge {} -> {} has no decision source or condition and always fires",
                    edge.from_node, edge.to_node
                ));
            }
        }

        for terminal in &def.terminal_nodes {
            if def.edges.iter().any(|e| &e.from_node == terminal) {
                warnings.push(format!("terminal node '{terminal}' has outgoing edges"));
            }
        }

        warnings
    }

    fn build_node(&self, config: &NodeConfig) -> Result<CompiledNode, CompositionError> {
        let kind = NodeKind::resolve(config.category, &config.node_type).ok_or_else(|| {
            CompositionError::UnknownNodeType {
                node_id: config.node_id.clone(),
                node_type: config.node_type.clone(),
            }
        })?;
        let node_id = config.node_id.clone();

        let built = match kind {
            NodeKind::Agent => {
                let agent = self.registry.get(&config.node_type).ok_or_else(|| {
                    CompositionError::UnknownAgent {
                        node_id: config.node_id.clone(),
                        agent: config.node_type.clone(),
                    }
                })?;
                return Ok(CompiledNode::Agent(AgentNode::new(
                    node_id,
                    agent,
                    config.config.clone(),
                )));
            }
            NodeKind::Decision => parse(&config.config)
                .and_then(|c| DecisionNode::new(node_id, c))
                .map(CompiledNode::Decision),
            NodeKind::Aggregator => parse(&config.config)
                .and_then(|c| AggregatorNode::new(node_id, c))
                .map(CompiledNode::Aggregator),
            NodeKind::Validator => parse(&config.config)
                .and_then(|c| ValidatorNode::new(node_id, c))
                .map(CompiledNode::Validator),
            NodeKind::Terminator => parse(&config.config)
                .and_then(|c| TerminatorNode::new(node_id, c))
                .map(CompiledNode::Terminator),
        };

        Ok(built.unwrap_or_else(|reason| {
            tracing::warn!(
                node_id = %config.node_id,
                node_type = %kind,
                %reason,
                "advanced node degraded to stub"
            );
            stub(config, kind, reason)
        }))
    }
}

fn parse<T: DeserializeOwned>(config: &Map<String, Value>) -> Result<T, String> {
    serde_json::from_value(Value::Object(config.clone())).map_err(|e| e.to_string())
}

fn stub(config: &NodeConfig, kind: NodeKind, reason: String) -> CompiledNode {
    CompiledNode::Stub(StubNode {
        node_id: config.node_id.clone(),
        kind,
        reason,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
