//! Event types for the turnflow lifecycle event bus.
//!
//! `WorkflowEvent` is broadcast during turn and workflow execution. All
//! variants are Clone + Send + Sync for use with tokio broadcast channels.
//! Delivery is fire-and-forget: no subscriber can influence a run.

use serde::{Deserialize, Serialize};

/// Events emitted while executing turns and workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A workflow run has started.
    WorkflowStarted {
        workflow_id: String,
        execution_id: String,
        node_count: usize,
    },

    /// A node has started executing.
    NodeStarted {
        execution_id: String,
        node_id: String,
        node_kind: String,
    },

    /// A node completed successfully.
    NodeCompleted {
        execution_id: String,
        node_id: String,
        duration_ms: u64,
    },

    /// A node failed (error or timeout). The run continues.
    NodeFailed {
        execution_id: String,
        node_id: String,
        error: String,
    },

    /// A workflow run completed.
    WorkflowCompleted {
        workflow_id: String,
        execution_id: String,
        duration_ms: u64,
        nodes_completed: usize,
    },

    /// A workflow run was aborted (timeout, cancellation, internal failure).
    WorkflowFailed {
        workflow_id: String,
        execution_id: String,
        error: String,
    },

    /// A checkpoint was written.
    CheckpointCreated {
        thread_id: String,
        checkpoint_id: String,
        step_name: String,
    },

    /// A turn finished and its state was handed to the store.
    TurnCompleted {
        conversation_id: String,
        workflow_id: String,
        route: String,
        resume_turn: bool,
    },
}

impl WorkflowEvent {
    /// The execution id for run-scoped events, `None` for others.
    pub fn execution_id(&self) -> Option<&str> {
        match self {
            WorkflowEvent::WorkflowStarted { execution_id, .. }
            | WorkflowEvent::NodeStarted { execution_id, .. }
            | WorkflowEvent::NodeCompleted { execution_id, .. }
            | WorkflowEvent::NodeFailed { execution_id, .. }
            | WorkflowEvent::WorkflowCompleted { execution_id, .. }
            | WorkflowEvent::WorkflowFailed { execution_id, .. } => Some(execution_id),

            WorkflowEvent::CheckpointCreated { .. } | WorkflowEvent::TurnCompleted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_completed_serde_roundtrip() {
        let event = WorkflowEvent::NodeCompleted {
            execution_id: "exec-1".to_string(),
            node_id: "critic".to_string(),
            duration_ms: 1500,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"node_completed""#));
        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            parsed,
            WorkflowEvent::NodeCompleted { duration_ms: 1500, .. }
        ));
    }

    #[test]
    fn test_execution_id_accessor() {
        let event = WorkflowEvent::WorkflowFailed {
            workflow_id: "w".to_string(),
            execution_id: "e".to_string(),
            error: "timeout".to_string(),
        };
        assert_eq!(event.execution_id(), Some("e"));

        let event = WorkflowEvent::TurnCompleted {
            conversation_id: "c1".to_string(),
            workflow_id: "w".to_string(),
            route: "standard".to_string(),
            resume_turn: false,
        };
        assert_eq!(event.execution_id(), None);
    }
}
