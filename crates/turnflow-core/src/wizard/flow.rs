//! Wizard flows: named steps driven by raw user text.
//!
//! A flow is identified by its type (the pending action's `type`). The
//! pending action's payload carries the step pointer and, optionally, the
//! resource the flow operates on. Every transition appends exactly one
//! output to `wizard_outputs["<flow_type>:<resource>"]` and writes
//! `pending_action_result`.

use std::collections::HashMap;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use turnflow_types::pending::PendingAction;
use turnflow_types::state::{ExecutionState, keys};

/// Texts that cancel any flow, compared case-insensitively after trimming.
pub const CANCEL_TOKENS: &[&str] = &["cancel", "stop", "never mind", "nevermind", "abort", "exit", "quit"];

/// Resource segment of the channel key when the flow names none.
pub const DEFAULT_RESOURCE: &str = "default";

pub const CANCELLED_MESSAGE: &str = "Cancelled. Nothing was changed.";

const LOST_STEP_MESSAGE: &str = "I lost track of where we were, so I cancelled that. Nothing was changed; please start again.";

/// Whether `text` is a cancel request.
pub fn is_cancel(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_end_matches(['.', '!'])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    CANCEL_TOKENS.contains(&normalized.as_str())
}

/// Channel key for a flow: `"<flow_type>:<resource>"`.
pub fn channel_key(action: &PendingAction) -> String {
    format!(
        "{}:{}",
        action.action_type,
        action.resource().unwrap_or(DEFAULT_RESOURCE)
    )
}

// ---------------------------------------------------------------------------
// Steps and flows
// ---------------------------------------------------------------------------

/// What a step accepts.
#[derive(Debug, Clone)]
pub enum Acceptance {
    /// One of the listed words, case-insensitive.
    Exact(Vec<String>),
    /// Text matching the pattern.
    Pattern(Regex),
    /// Any non-empty text.
    AnyText,
}

impl Acceptance {
    pub fn exact<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Acceptance::Exact(words.into_iter().map(|w| w.into().to_lowercase()).collect())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Acceptance::Pattern)
    }

    /// The canonical form of `text` if accepted.
    pub fn accept(&self, text: &str) -> Option<String> {
        let trimmed = text.trim();
        match self {
            Acceptance::Exact(words) => {
                let lowered = trimmed.to_lowercase();
                words.iter().find(|w| **w == lowered).cloned()
            }
            Acceptance::Pattern(re) => re.is_match(trimmed).then(|| trimmed.to_string()),
            Acceptance::AnyText => (!trimmed.is_empty()).then(|| trimmed.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WizardStep {
    pub name: String,
    pub prompt: String,
    pub acceptance: Acceptance,
    /// Step after an accepted answer; `None` completes the flow.
    pub next: Option<String>,
}

impl WizardStep {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>, acceptance: Acceptance) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            acceptance,
            next: None,
        }
    }

    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct WizardFlow {
    pub flow_type: String,
    steps: Vec<WizardStep>,
    completion_message: String,
}

impl WizardFlow {
    pub fn new(flow_type: impl Into<String>) -> Self {
        Self {
            flow_type: flow_type.into(),
            steps: Vec::new(),
            completion_message: "Done.".to_string(),
        }
    }

    pub fn step(mut self, step: WizardStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn completion_message(mut self, message: impl Into<String>) -> Self {
        self.completion_message = message.into();
        self
    }

    pub fn first_step(&self) -> Option<&WizardStep> {
        self.steps.first()
    }

    pub fn get_step(&self, name: &str) -> Option<&WizardStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// A pending action positioned at the first step.
    pub fn start(&self, resource: Option<&str>) -> Option<PendingAction> {
        let first = self.first_step()?;
        let action = PendingAction::awaiting(self.flow_type.clone(), first.name.clone());
        Some(match resource {
            Some(r) => action.with_resource(r),
            None => action,
        })
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStatus {
    Advanced,
    Completed,
    Reprompted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserRequested,
    UnknownFlow,
    UnknownStep,
}

/// Result of feeding one user message to a flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WizardTransition {
    pub flow_type: String,
    pub channel: String,
    pub status: TransitionStatus,
    /// Step the message answered.
    pub step: Option<String>,
    /// Step now awaited; `None` once the flow ended.
    pub next_step: Option<String>,
    /// Canonical form of the user's answer.
    pub answer: Option<String>,
    pub message: String,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<CancelReason>,
}

impl WizardTransition {
    fn to_output(&self) -> Value {
        let mut out = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Value::Object(obj) = &mut out {
            obj.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct WizardRegistry {
    flows: HashMap<String, WizardFlow>,
}

impl WizardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flow(mut self, flow: WizardFlow) -> Self {
        self.flows.insert(flow.flow_type.clone(), flow);
        self
    }

    pub fn get(&self, flow_type: &str) -> Option<&WizardFlow> {
        self.flows.get(flow_type)
    }

    /// Feed `raw_text` to the flow awaiting input in `state`.
    ///
    /// Returns `None` when nothing is awaiting input. Never fails: unknown
    /// flows and steps end in a cancel with an explanation.
    pub fn advance(&self, state: &mut ExecutionState, raw_text: &str) -> Option<WizardTransition> {
        let action = state.pending_action().filter(|a| a.awaiting)?;
        let channel = channel_key(&action);
        let current_step = action.step().map(str::to_string);

        let transition = if is_cancel(raw_text) {
            cancel(&action, &channel, current_step, CancelReason::UserRequested, CANCELLED_MESSAGE)
        } else {
            match self.flows.get(&action.action_type) {
                None => {
                    tracing::warn!(flow_type = %action.action_type, "no wizard flow registered; cancelling");
                    cancel(&action, &channel, current_step, CancelReason::UnknownFlow, LOST_STEP_MESSAGE)
                }
                Some(flow) => {
                    let step = match current_step.as_deref() {
                        Some(name) => flow.get_step(name),
                        None => flow.first_step(),
                    };
                    match step {
                        Some(step) => answer(flow, step, &action, &channel, raw_text),
                        None => {
                            tracing::warn!(
                                flow_type = %action.action_type,
                                step = ?current_step,
                                "unknown wizard step; cancelling"
                            );
                            cancel(&action, &channel, current_step, CancelReason::UnknownStep, LOST_STEP_MESSAGE)
                        }
                    }
                }
            }
        };

        self.record(state, action, &transition);
        Some(transition)
    }

    fn record(&self, state: &mut ExecutionState, action: PendingAction, transition: &WizardTransition) {
        let channel = transition.channel.as_str();
        match &transition.next_step {
            Some(next) => {
                let mut updated = action.with_step(next.clone());
                if let Some(answer) = &transition.answer {
                    if let Some(step) = &transition.step {
                        record_answer(&mut updated, step, answer);
                    }
                }
                state.set_pending_action(Some(&updated));
                state.insert_in_object(
                    keys::WIZARD,
                    channel,
                    json!({"flow_type": transition.flow_type, "step": next}),
                );
            }
            None => {
                state.set_pending_action(None);
                remove_wizard_channel(state, channel);
            }
        }

        let output = transition.to_output();
        push_output(state, channel, output);

        let mut result = Map::new();
        result.insert("flow_type".to_string(), json!(transition.flow_type));
        result.insert("channel".to_string(), json!(channel));
        result.insert("status".to_string(), json!(transition.status));
        result.insert("step".to_string(), json!(transition.step));
        result.insert("next_step".to_string(), json!(transition.next_step));
        result.insert("message".to_string(), json!(transition.message));
        result.insert("cancelled".to_string(), json!(transition.cancelled));
        state.insert(keys::PENDING_ACTION_RESULT, Value::Object(result));

        tracing::info!(
            flow_type = %transition.flow_type,
            channel,
            status = ?transition.status,
            "wizard transition"
        );
    }
}

fn answer(
    flow: &WizardFlow,
    step: &WizardStep,
    action: &PendingAction,
    channel: &str,
    raw_text: &str,
) -> WizardTransition {
    let base = WizardTransition {
        flow_type: action.action_type.clone(),
        channel: channel.to_string(),
        status: TransitionStatus::Reprompted,
        step: Some(step.name.clone()),
        next_step: Some(step.name.clone()),
        answer: None,
        message: step.prompt.clone(),
        cancelled: false,
        cancel_reason: None,
    };

    let Some(accepted) = step.acceptance.accept(raw_text) else {
        return base;
    };

    match &step.next {
        Some(next) => {
            let message = flow
                .get_step(next)
                .map(|s| s.prompt.clone())
                .unwrap_or_default();
            WizardTransition {
                status: TransitionStatus::Advanced,
                next_step: Some(next.clone()),
                answer: Some(accepted),
                message,
                ..base
            }
        }
        None => WizardTransition {
            status: TransitionStatus::Completed,
            next_step: None,
            answer: Some(accepted),
            message: flow.completion_message.clone(),
            ..base
        },
    }
}

fn cancel(
    action: &PendingAction,
    channel: &str,
    step: Option<String>,
    reason: CancelReason,
    message: &str,
) -> WizardTransition {
    WizardTransition {
        flow_type: action.action_type.clone(),
        channel: channel.to_string(),
        status: TransitionStatus::Cancelled,
        step,
        next_step: None,
        answer: None,
        message: message.to_string(),
        cancelled: true,
        cancel_reason: Some(reason),
    }
}

fn record_answer(action: &mut PendingAction, step: &str, answer: &str) {
    let answers = action
        .payload
        .entry("answers".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !answers.is_object() {
        *answers = Value::Object(Map::new());
    }
    if let Value::Object(obj) = answers {
        obj.insert(step.to_string(), Value::String(answer.to_string()));
    }
}

fn push_output(state: &mut ExecutionState, channel: &str, output: Value) {
    let outputs = state
        .as_map_mut()
        .entry(keys::WIZARD_OUTPUTS.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !outputs.is_object() {
        *outputs = Value::Object(Map::new());
    }
    if let Value::Object(outputs) = outputs {
        match outputs
            .entry(channel.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(items) => items.push(output),
            other => *other = Value::Array(vec![output]),
        }
    }
}

fn remove_wizard_channel(state: &mut ExecutionState, channel: &str) {
    let now_empty = match state.get_mut(keys::WIZARD) {
        Some(Value::Object(wizard)) => {
            wizard.remove(channel);
            wizard.is_empty()
        }
        _ => false,
    };
    if now_empty {
        state.remove(keys::WIZARD);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn rename_flow() -> WizardFlow {
        WizardFlow::new("rename_table")
            .step(
                WizardStep::new(
                    "ask_name",
                    "What should the new name be?",
                    Acceptance::pattern(r"^[a-z][a-z0-9_]*$").unwrap(),
                )
                .then("confirm"),
            )
            .step(WizardStep::new(
                "confirm",
                "Rename it? (yes/no)",
                Acceptance::exact(["yes", "y"]),
            ))
            .completion_message("Table renamed.")
    }

    fn registry() -> WizardRegistry {
        WizardRegistry::new().with_flow(rename_flow())
    }

    fn awaiting_state(action: PendingAction) -> ExecutionState {
        let mut state = ExecutionState::from_query("x");
        state.set_pending_action(Some(&action));
        state
    }

    fn outputs<'a>(state: &'a ExecutionState, channel: &str) -> &'a Vec<Value> {
        state.get(keys::WIZARD_OUTPUTS).unwrap()[channel].as_array().unwrap()
    }

    #[test]
    fn test_cancel_tokens() {
        for text in ["cancel", "STOP", " never  mind ", "Nevermind.", "abort", "exit", "quit!"] {
            assert!(is_cancel(text), "{text} should cancel");
        }
        assert!(!is_cancel("cancel the order for users"));
        assert!(!is_cancel("yes"));
    }

    #[test]
    fn test_cancel_clears_pending_and_flags_output() {
        let mut state = awaiting_state(PendingAction::awaiting("confirm_table", "confirm"));
        let t = WizardRegistry::new().advance(&mut state, "cancel").unwrap();

        assert_eq!(t.status, TransitionStatus::Cancelled);
        assert!(t.cancelled);
        assert_eq!(t.message, CANCELLED_MESSAGE);
        assert!(state.pending_action().is_none());
        assert!(!state.contains_key(keys::PENDING_ACTION));

        let out = outputs(&state, "confirm_table:default");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["cancelled"], true);
        assert_eq!(state.get(keys::PENDING_ACTION_RESULT).unwrap()["cancelled"], true);
    }

    #[test]
    fn test_steps_advance_then_complete() {
        let registry = registry();
        let action = rename_flow().start(Some("users")).unwrap();
        let mut state = awaiting_state(action);

        let t = registry.advance(&mut state, "customers").unwrap();
        assert_eq!(t.status, TransitionStatus::Advanced);
        assert_eq!(t.message, "Rename it? (yes/no)");
        let pending = state.pending_action().unwrap();
        assert_eq!(pending.step(), Some("confirm"));
        assert_eq!(pending.payload["answers"]["ask_name"], "customers");
        assert_eq!(state.get(keys::WIZARD).unwrap()["rename_table:users"]["step"], "confirm");

        let t = registry.advance(&mut state, "YES").unwrap();
        assert_eq!(t.status, TransitionStatus::Completed);
        assert_eq!(t.answer.as_deref(), Some("yes"));
        assert!(state.pending_action().is_none());
        assert!(!state.contains_key(keys::WIZARD));
        assert_eq!(outputs(&state, "rename_table:users").len(), 2);
    }

    #[test]
    fn test_rejected_answer_reprompts() {
        let registry = registry();
        let mut state = awaiting_state(rename_flow().start(None).unwrap());
        let t = registry.advance(&mut state, "Not A Name").unwrap();
        assert_eq!(t.status, TransitionStatus::Reprompted);
        assert_eq!(t.message, "What should the new name be?");
        assert_eq!(state.pending_action().unwrap().step(), Some("ask_name"));
        assert_eq!(outputs(&state, "rename_table:default").len(), 1);
    }

    #[test]
    fn test_unknown_step_cancels_gracefully() {
        let registry = registry();
        let mut state = awaiting_state(PendingAction::awaiting("rename_table", "vanished"));
        let t = registry.advance(&mut state, "customers").unwrap();
        assert_eq!(t.status, TransitionStatus::Cancelled);
        assert_eq!(t.cancel_reason, Some(CancelReason::UnknownStep));
        assert_ne!(t.message, CANCELLED_MESSAGE);
        assert!(state.pending_action().is_none());
    }

    #[test]
    fn test_unknown_flow_cancels_gracefully() {
        let mut state = awaiting_state(PendingAction::awaiting("mystery", "one"));
        let t = registry().advance(&mut state, "hello").unwrap();
        assert_eq!(t.cancel_reason, Some(CancelReason::UnknownFlow));
        assert!(state.pending_action().is_none());
    }

    #[test]
    fn test_not_awaiting_is_ignored() {
        let mut action = PendingAction::awaiting("confirm_table", "confirm");
        action.awaiting = false;
        let mut state = awaiting_state(action);
        assert!(registry().advance(&mut state, "cancel").is_none());
        assert!(state.pending_action().is_some());
        assert!(!state.contains_key(keys::WIZARD_OUTPUTS));
    }

    #[test]
    fn test_channels_do_not_collide_across_resources() {
        let registry = registry();
        let mut state = awaiting_state(rename_flow().start(Some("users")).unwrap());
        registry.advance(&mut state, "cancel");
        state.set_pending_action(Some(&rename_flow().start(Some("orders")).unwrap()));
        registry.advance(&mut state, "cancel");

        assert_eq!(outputs(&state, "rename_table:users").len(), 1);
        assert_eq!(outputs(&state, "rename_table:orders").len(), 1);
    }
}
