//! Agent port and registry.
//!
//! Concrete agent bodies live outside the core. They implement [`Agent`] and
//! are registered by name into an immutable [`AgentRegistry`] at start-up;
//! base workflow nodes look them up there at compile time.

pub mod box_agent;
pub mod registry;

use std::future::Future;

use turnflow_types::agent::{AgentInput, AgentOutput};

pub use box_agent::BoxAgent;
pub use registry::{AgentRegistry, AgentRegistryBuilder};

/// Errors returned by an agent run.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent '{agent}' failed: {message}")]
    Failed { agent: String, message: String },

    #[error("agent '{agent}' returned invalid output: {message}")]
    InvalidOutput { agent: String, message: String },
}

impl AgentError {
    pub fn failed(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            agent: agent.into(),
            message: message.into(),
        }
    }
}

/// A named unit of work executed by a base workflow node.
///
/// Uses native async fn in traits (Rust 2024, RPITIT). For dynamic dispatch
/// use [`BoxAgent`].
pub trait Agent: Send + Sync {
    /// Name the agent is registered under.
    fn name(&self) -> &str;

    /// Run the agent against the current query and a state snapshot.
    fn run(&self, input: AgentInput) -> impl Future<Output = Result<AgentOutput, AgentError>> + Send;
}
