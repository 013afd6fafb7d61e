//! Turn normalizer backed by the wizard registry.

use std::sync::Arc;

use turnflow_types::error::CollaboratorError;
use turnflow_types::state::ExecutionState;

use super::flow::{TransitionStatus, WizardRegistry};
use crate::pipeline::collaborator::{NormalizerOutcome, TurnNormalizer};

/// Advances the awaiting wizard flow, if any.
///
/// Handles a turn only when the restored pending action has
/// `awaiting == true`; historical records are left alone.
#[derive(Debug, Clone)]
pub struct PendingActionNormalizer {
    flows: Arc<WizardRegistry>,
}

impl PendingActionNormalizer {
    pub fn new(flows: Arc<WizardRegistry>) -> Self {
        Self { flows }
    }

    pub fn flows(&self) -> &WizardRegistry {
        &self.flows
    }
}

impl TurnNormalizer for PendingActionNormalizer {
    async fn normalize(
        &self,
        state: &mut ExecutionState,
        raw_text: &str,
    ) -> Result<NormalizerOutcome, CollaboratorError> {
        let Some(transition) = self.flows.advance(state, raw_text) else {
            return Ok(NormalizerOutcome::not_handled(raw_text));
        };
        let canonical = match transition.status {
            TransitionStatus::Cancelled => "cancel".to_string(),
            _ => transition.answer.unwrap_or_else(|| raw_text.trim().to_string()),
        };
        Ok(NormalizerOutcome::handled(canonical))
    }
}
