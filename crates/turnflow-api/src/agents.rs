//! Built-in demo agents for running turns from the command line.
//!
//! Every agent echoes the query under its own name. The agent named
//! [`SYNTHESIS_AGENT`] also writes `final`, joining what its predecessors
//! produced.

use serde_json::Value;
use turnflow_core::agent::{Agent, AgentError, AgentRegistry};
use turnflow_types::agent::{AgentInput, AgentOutput};
use turnflow_types::state::keys;

pub const SYNTHESIS_AGENT: &str = "synthesis";

/// Agents registered when neither the command line nor `config.toml` names
/// any.
pub const DEFAULT_AGENTS: &[&str] = &["refiner", "critic", "historian", SYNTHESIS_AGENT];

pub struct EchoAgent {
    name: String,
}

impl EchoAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: AgentInput) -> Result<AgentOutput, AgentError> {
        let query = input.query.trim();
        if query.is_empty() {
            return Err(AgentError::failed(&self.name, "empty query"));
        }

        let output = AgentOutput::text(format!("[{}] {query}", self.name));
        if self.name != SYNTHESIS_AGENT {
            return Ok(output);
        }

        let gathered: Vec<&str> = input
            .state
            .agent_outputs()
            .map(|outputs| {
                outputs
                    .values()
                    .filter_map(|o| o.get("content").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        let summary = if gathered.is_empty() {
            query.to_string()
        } else {
            gathered.join("\n")
        };
        Ok(output.with_update(keys::FINAL, Value::String(summary)))
    }
}

/// Registry holding one [`EchoAgent`] per name; [`DEFAULT_AGENTS`] when
/// `names` is empty.
pub fn demo_registry(names: &[String]) -> AgentRegistry {
    let names: Vec<String> = if names.is_empty() {
        DEFAULT_AGENTS.iter().map(|s| s.to_string()).collect()
    } else {
        names.to_vec()
    };
    names
        .into_iter()
        .fold(AgentRegistry::builder(), |builder, name| builder.register(EchoAgent::new(name)))
        .build()
}
