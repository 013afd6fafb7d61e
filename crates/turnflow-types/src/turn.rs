//! Turn pipeline request and response.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::ExecutionState;

/// One incoming turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<String>>,
    /// Overrides layered on top of the base execution config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_config: Option<Map<String, Value>>,
}

impl TurnRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_agents(mut self, agents: Vec<String>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn with_execution_config(mut self, config: Map<String, Value>) -> Self {
        self.execution_config = Some(config);
        self
    }
}

/// Result of one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    /// Best-effort user-facing text. Never carries internal diagnostics.
    pub text: String,
    pub execution_state: ExecutionState,
    pub workflow_id: String,
    pub conversation_id: String,
    pub correlation_id: String,
}
