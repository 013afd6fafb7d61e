//! Execution plan and per-turn execution config.
//!
//! The planner produces a fresh `ExecutionPlan` every turn; the pipeline
//! applies it read-only onto an `ExecutionConfig`. `GraphPattern` is the
//! closed set of contract route names: a route is always one of these and
//! never an internal node id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// GraphPattern (contract route set)
// ---------------------------------------------------------------------------

/// Closed set of workflow shapes. Doubles as the contract route set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphPattern {
    #[default]
    Standard,
    Parallel,
    Conditional,
    Sequential,
    DataQuery,
}

impl GraphPattern {
    pub const ALL: [GraphPattern; 5] = [
        GraphPattern::Standard,
        GraphPattern::Parallel,
        GraphPattern::Conditional,
        GraphPattern::Sequential,
        GraphPattern::DataQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GraphPattern::Standard => "standard",
            GraphPattern::Parallel => "parallel",
            GraphPattern::Conditional => "conditional",
            GraphPattern::Sequential => "sequential",
            GraphPattern::DataQuery => "data_query",
        }
    }

    /// Parse a contract route name, case-insensitively. Returns `None` for
    /// anything outside the closed set (node ids, typos, empty strings).
    pub fn parse_contract(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase();
        Self::ALL.into_iter().find(|p| p.as_str() == lowered)
    }

    /// Whether `raw` names a contract route.
    pub fn is_contract_route(raw: &str) -> bool {
        Self::parse_contract(raw).is_some()
    }
}

impl fmt::Display for GraphPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GraphPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_contract(s).ok_or_else(|| format!("unknown graph pattern: '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// CompileVariant
// ---------------------------------------------------------------------------

/// Strategy for assembling a graph from a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileVariant {
    /// Only the planned agents.
    #[default]
    Minimal,
    /// Every registered agent, planned agents first.
    Superset,
}

impl CompileVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompileVariant::Minimal => "minimal",
            CompileVariant::Superset => "superset",
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionPlan
// ---------------------------------------------------------------------------

/// Planner output for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub pattern: GraphPattern,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_variant: Option<CompileVariant>,
    /// Route requested by the planner. Normally a contract pattern name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default)]
    pub route_locked: bool,
}

impl ExecutionPlan {
    /// A plan running `agents` in `pattern` with every other field defaulted.
    pub fn new(pattern: GraphPattern, agents: Vec<String>) -> Self {
        Self {
            pattern,
            agents,
            entry_point: None,
            compile_variant: None,
            route: None,
            route_locked: false,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionConfig
// ---------------------------------------------------------------------------

/// Default per-turn timeout in seconds.
pub const DEFAULT_TURN_TIMEOUT_SECS: u64 = 180;

/// Default per-node timeout in seconds.
pub const DEFAULT_NODE_TIMEOUT_SECS: u64 = 60;

/// Default superstep bound for graphs compiled with cycles allowed.
pub const DEFAULT_MAX_SUPERSTEPS: usize = 25;

/// Per-turn execution configuration.
///
/// Built from defaults, overlaid with the request's `execution_config`, then
/// finalized by applying the execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_turn_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,
    #[serde(default)]
    pub enable_retrieval: bool,
    #[serde(default = "default_true")]
    pub parallel_execution: bool,
    #[serde(default)]
    pub compile_variant: CompileVariant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_pattern: Option<GraphPattern>,
    #[serde(default = "default_route")]
    pub route: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub allow_cycles: bool,
    #[serde(default = "default_max_supersteps")]
    pub max_supersteps: usize,
    /// Collaborator-specific keys not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_turn_timeout() -> u64 {
    DEFAULT_TURN_TIMEOUT_SECS
}

fn default_node_timeout() -> u64 {
    DEFAULT_NODE_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn default_route() -> String {
    GraphPattern::Standard.as_str().to_string()
}

fn default_max_supersteps() -> usize {
    DEFAULT_MAX_SUPERSTEPS
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_turn_timeout(),
            node_timeout_secs: default_node_timeout(),
            enable_retrieval: false,
            parallel_execution: true,
            compile_variant: CompileVariant::default(),
            graph_pattern: None,
            route: default_route(),
            entry_point: None,
            agents: Vec::new(),
            allow_cycles: false,
            max_supersteps: default_max_supersteps(),
            extra: Map::new(),
        }
    }
}

impl ExecutionConfig {
    /// Layer request-supplied overrides on top of this config.
    ///
    /// Keys are matched against the serialized field names; unknown keys land
    /// in `extra`. An override that does not fit a typed field is rejected
    /// as a whole and the config is left unchanged.
    pub fn overlay(&mut self, overrides: &Map<String, Value>) -> Result<(), serde_json::Error> {
        let mut merged = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
        *self = serde_json::from_value(Value::Object(merged))?;
        Ok(())
    }

    /// Serialize to a JSON map (for collaborators that take a config map).
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
