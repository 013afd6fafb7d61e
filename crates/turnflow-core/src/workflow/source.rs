//! Workflow sources: where the pipeline gets the definition to run.
//!
//! `PatternWorkflowSource` assembles a definition from the finalized turn
//! config (graph pattern, agents, entry point, compile variant). Other
//! sources (files, a registry of stored workflows) plug in behind the same
//! trait.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use thiserror::Error;
use turnflow_types::plan::{CompileVariant, ExecutionConfig, GraphPattern};
use turnflow_types::workflow::{EdgeDef, NodeConfig, WorkflowDefinition};

use crate::agent::AgentRegistry;

/// Node id of the decision node inserted by the `conditional` pattern.
pub const CONDITIONAL_ROUTER_NODE: &str = "conditional_router";

/// Signal the pattern router scores on unless `extra.decision_criterion`
/// names another.
pub const DEFAULT_DECISION_CRITERION: &str = "complexity";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    #[error("no agents available to build workflow '{0}'")]
    NoAgents(String),

    #[error("no workflow named '{0}'")]
    NotFound(String),
}

/// Produces the definition executed by one turn.
pub trait WorkflowSource: Send + Sync {
    fn definition_for(&self, workflow_id: &str, config: &ExecutionConfig) -> Result<WorkflowDefinition, SourceError>;
}

// ---------------------------------------------------------------------------
// PatternWorkflowSource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PatternWorkflowSource {
    registry: Arc<AgentRegistry>,
    /// Used when the config names no agents.
    default_agents: Vec<String>,
}

impl PatternWorkflowSource {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            default_agents: Vec::new(),
        }
    }

    pub fn with_default_agents(mut self, agents: Vec<String>) -> Self {
        self.default_agents = agents;
        self
    }

    /// Agent order for this config: planned (or default, or registered)
    /// agents, entry point first, extended with every registered agent for
    /// the `superset` variant.
    pub fn resolve_agents(&self, config: &ExecutionConfig) -> Vec<String> {
        let mut agents: Vec<String> = if !config.agents.is_empty() {
            config.agents.clone()
        } else if !self.default_agents.is_empty() {
            self.default_agents.clone()
        } else {
            self.registry.names().to_vec()
        };
        dedup_in_order(&mut agents);

        if config.compile_variant == CompileVariant::Superset {
            for name in self.registry.names() {
                if !agents.contains(name) {
                    agents.push(name.clone());
                }
            }
        }

        if let Some(entry) = config.entry_point.as_deref().filter(|e| !e.is_empty()) {
            agents.retain(|a| a != entry);
            agents.insert(0, entry.to_string());
        }
        agents
    }
}

impl WorkflowSource for PatternWorkflowSource {
    fn definition_for(&self, workflow_id: &str, config: &ExecutionConfig) -> Result<WorkflowDefinition, SourceError> {
        let agents = self.resolve_agents(config);
        let pattern = config.graph_pattern.unwrap_or_default();
        let mut def = build_pattern(workflow_id, pattern, &agents, config)
            .ok_or_else(|| SourceError::NoAgents(workflow_id.to_string()))?;
        def.metadata.insert("pattern".to_string(), json!(pattern.as_str()));
        def.metadata
            .insert("compile_variant".to_string(), json!(config.compile_variant.as_str()));

        tracing::debug!(
            workflow_id,
            pattern = %pattern,
            agents = agents.len(),
            "workflow assembled from pattern"
        );
        Ok(def)
    }
}

/// Build the definition for `pattern` over `agents`. `None` when there are no
/// agents.
pub fn build_pattern(
    workflow_id: &str,
    pattern: GraphPattern,
    agents: &[String],
    config: &ExecutionConfig,
) -> Option<WorkflowDefinition> {
    let entry = agents.first()?;
    let mut def = WorkflowDefinition::new(workflow_id, entry.clone());
    for agent in agents {
        def = def.with_node(NodeConfig::agent(agent.clone(), agent.clone()));
    }

    let def = match pattern {
        GraphPattern::Standard => fan_out_fan_in(def, agents, EdgeDef::sequential),
        GraphPattern::Parallel => fan_out_fan_in(def, agents, EdgeDef::parallel),
        GraphPattern::Sequential | GraphPattern::DataQuery => chain(def, agents),
        GraphPattern::Conditional => conditional(def, agents, config),
    };
    Some(def)
}

fn chain(mut def: WorkflowDefinition, agents: &[String]) -> WorkflowDefinition {
    for pair in agents.windows(2) {
        def = def.with_edge(EdgeDef::sequential(pair[0].clone(), pair[1].clone()));
    }
    match agents.last() {
        Some(last) => def.with_terminal(last.clone()),
        None => def,
    }
}

/// Entry, then the middle agents side by side, then the last agent.
fn fan_out_fan_in(
    mut def: WorkflowDefinition,
    agents: &[String],
    edge: fn(String, String) -> EdgeDef,
) -> WorkflowDefinition {
    let [entry, middle @ .., last] = agents else {
        return chain(def, agents);
    };
    if middle.is_empty() {
        return chain(def, agents);
    }
    for agent in middle {
        def = def
            .with_edge(edge(entry.clone(), agent.clone()))
            .with_edge(edge(agent.clone(), last.clone()));
    }
    def.with_terminal(last.clone())
}

/// Entry, then a decision node with one path per remaining agent.
fn conditional(mut def: WorkflowDefinition, agents: &[String], config: &ExecutionConfig) -> WorkflowDefinition {
    let [entry, rest @ ..] = agents else {
        return def;
    };
    if rest.is_empty() {
        return chain(def, agents);
    }

    let criterion = config
        .extra
        .get("decision_criterion")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_DECISION_CRITERION);
    let paths: Vec<Value> = rest
        .iter()
        .enumerate()
        .map(|(i, agent)| {
            json!({
                "name": agent,
                "min_score": i as f64 / rest.len() as f64,
                "targets": [agent],
            })
        })
        .collect();
    let mut decision = Map::new();
    decision.insert("criteria".to_string(), json!([{"name": criterion, "weight": 1.0}]));
    decision.insert("paths".to_string(), Value::Array(paths));

    def = def
        .with_node(NodeConfig::advanced(CONDITIONAL_ROUTER_NODE, "decision", decision))
        .with_edge(EdgeDef::sequential(entry.clone(), CONDITIONAL_ROUTER_NODE));
    for agent in rest {
        def = def
            .with_edge(
                EdgeDef::conditional(CONDITIONAL_ROUTER_NODE, agent.clone()).with_metadata("path", json!(agent)),
            )
            .with_terminal(agent.clone());
    }
    def
}

fn dedup_in_order(agents: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    agents.retain(|a| seen.insert(a.clone()));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
