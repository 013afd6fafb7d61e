//! Collaborator ports: turn normalizer, classifier, planner.
//!
//! The pipeline talks to each collaborator through one canonical result
//! type. Older collaborators that answer with a loose JSON shape go through
//! `NormalizerOutcome::from_legacy` at the boundary and nowhere else.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use turnflow_types::error::CollaboratorError;
use turnflow_types::plan::{ExecutionConfig, ExecutionPlan};
use turnflow_types::state::{ExecutionState, keys};

// ---------------------------------------------------------------------------
// Turn normalizer
// ---------------------------------------------------------------------------

/// Canonical turn normalizer result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerOutcome {
    /// Whether the input advanced a pending action. `None` when the
    /// collaborator gave no explicit signal.
    pub handled: Option<bool>,
    /// Text the rest of the turn should act on.
    pub canonical_user_text: String,
}

impl NormalizerOutcome {
    pub fn handled(canonical_user_text: impl Into<String>) -> Self {
        Self {
            handled: Some(true),
            canonical_user_text: canonical_user_text.into(),
        }
    }

    pub fn not_handled(raw_text: impl Into<String>) -> Self {
        Self {
            handled: Some(false),
            canonical_user_text: raw_text.into(),
        }
    }

    /// Normalize a loosely shaped result.
    ///
    /// Accepted shapes:
    /// - `{"handled": bool, "canonical_user_text": str}` (`text` is accepted
    ///   for the text field; either field may be missing)
    /// - `[bool, str]`
    /// - a bare bool
    /// - a bare string (text only, no handled signal)
    ///
    /// Missing or empty text falls back to `raw_text`.
    pub fn from_legacy(value: &Value, raw_text: &str) -> Result<Self, CollaboratorError> {
        let (handled, text) = match value {
            Value::Object(obj) => {
                let handled = obj.get("handled").and_then(Value::as_bool);
                let text = obj
                    .get("canonical_user_text")
                    .or_else(|| obj.get("text"))
                    .and_then(Value::as_str);
                (handled, text)
            }
            Value::Array(items) => match items.as_slice() {
                [Value::Bool(handled), Value::String(text)] => (Some(*handled), Some(text.as_str())),
                [Value::Bool(handled), Value::Null] => (Some(*handled), None),
                _ => {
                    return Err(CollaboratorError::InvalidResult {
                        collaborator: "normalizer",
                        message: format!("expected [bool, string], got {value}"),
                    });
                }
            },
            Value::Bool(handled) => (Some(*handled), None),
            Value::String(text) => (None, Some(text.as_str())),
            other => {
                return Err(CollaboratorError::InvalidResult {
                    collaborator: "normalizer",
                    message: format!("unsupported result shape: {other}"),
                });
            }
        };

        let canonical_user_text = text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(raw_text)
            .to_string();
        Ok(Self {
            handled,
            canonical_user_text,
        })
    }
}

/// Decides whether a turn continues a pending action.
///
/// Receives a working copy of the restored state; changes are adopted only
/// when the call succeeds.
pub trait TurnNormalizer: Send + Sync {
    fn normalize(
        &self,
        state: &mut ExecutionState,
        raw_text: &str,
    ) -> impl std::future::Future<Output = Result<NormalizerOutcome, CollaboratorError>> + Send;
}

/// Normalizer that never resumes anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughNormalizer;

impl TurnNormalizer for PassthroughNormalizer {
    async fn normalize(
        &self,
        _state: &mut ExecutionState,
        raw_text: &str,
    ) -> Result<NormalizerOutcome, CollaboratorError> {
        Ok(NormalizerOutcome::not_handled(raw_text))
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Classifier verdict for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: String,
    #[serde(default)]
    pub confidence: f64,
    /// Derived signals merged into `state.signals`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub signals: Map<String, Value>,
}

impl Classification {
    pub fn new(intent: impl Into<String>, confidence: f64) -> Self {
        Self {
            intent: intent.into(),
            confidence,
            signals: Map::new(),
        }
    }

    pub fn with_signal(mut self, key: &str, value: Value) -> Self {
        self.signals.insert(key.to_string(), value);
        self
    }
}

pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        query: &str,
        state: &ExecutionState,
        config: &ExecutionConfig,
    ) -> impl std::future::Future<Output = Result<Classification, CollaboratorError>> + Send;

    /// Record the verdict in the state: `classification` holds the whole
    /// verdict, its signals are merged into `signals`.
    fn write_to_execution_state(&self, state: &mut ExecutionState, classification: &Classification) {
        if let Ok(value) = serde_json::to_value(classification) {
            state.insert(keys::CLASSIFICATION, value);
        }
        for (key, value) in &classification.signals {
            state.insert_in_object(keys::SIGNALS, key, value.clone());
        }
    }
}

/// Classifier that labels every query `general` and records its length.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughClassifier;

impl Classifier for PassthroughClassifier {
    async fn classify(
        &self,
        query: &str,
        _state: &ExecutionState,
        _config: &ExecutionConfig,
    ) -> Result<Classification, CollaboratorError> {
        Ok(Classification::new("general", 1.0)
            .with_signal("query_length", Value::from(query.chars().count())))
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

pub trait Planner: Send + Sync {
    fn plan(
        &self,
        query: &str,
        config: &ExecutionConfig,
        state: &ExecutionState,
    ) -> impl std::future::Future<Output = Result<ExecutionPlan, CollaboratorError>> + Send;
}

/// Planner that echoes the current config: its graph pattern (default
/// `standard`) and agents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigPlanner;

impl Planner for ConfigPlanner {
    async fn plan(
        &self,
        _query: &str,
        config: &ExecutionConfig,
        _state: &ExecutionState,
    ) -> Result<ExecutionPlan, CollaboratorError> {
        let mut plan = ExecutionPlan::new(config.graph_pattern.unwrap_or_default(), config.agents.clone());
        plan.entry_point = config.entry_point.clone();
        Ok(plan)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use turnflow_types::plan::GraphPattern;

    #[test]
    fn test_from_legacy_map() {
        let out = NormalizerOutcome::from_legacy(
            &json!({"handled": true, "canonical_user_text": " yes "}),
            "raw",
        )
        .unwrap();
        assert_eq!(out, NormalizerOutcome::handled("yes"));
    }

    #[test]
    fn test_from_legacy_map_without_handled() {
        let out = NormalizerOutcome::from_legacy(&json!({"text": "hello"}), "raw").unwrap();
        assert_eq!(out.handled, None);
        assert_eq!(out.canonical_user_text, "hello");
    }

    #[test]
    fn test_from_legacy_tuple() {
        let out = NormalizerOutcome::from_legacy(&json!([false, ""]), "raw text").unwrap();
        assert_eq!(out, NormalizerOutcome::not_handled("raw text"));

        let out = NormalizerOutcome::from_legacy(&json!([true, null]), "cancel").unwrap();
        assert_eq!(out, NormalizerOutcome::handled("cancel"));
    }

    #[test]
    fn test_from_legacy_bare_values() {
        assert_eq!(
            NormalizerOutcome::from_legacy(&json!(true), "ok").unwrap(),
            NormalizerOutcome::handled("ok")
        );
        let out = NormalizerOutcome::from_legacy(&json!("rewritten"), "raw").unwrap();
        assert_eq!(out.handled, None);
        assert_eq!(out.canonical_user_text, "rewritten");
    }

    #[test]
    fn test_from_legacy_rejects_other_shapes() {
        assert!(NormalizerOutcome::from_legacy(&json!(42), "raw").is_err());
        assert!(NormalizerOutcome::from_legacy(&json!([1, 2, 3]), "raw").is_err());
    }

    #[tokio::test]
    async fn test_classifier_writes_signals() {
        let classifier = PassthroughClassifier;
        let mut state = ExecutionState::from_query("query consents");
        let c = classifier
            .classify("query consents", &state, &ExecutionConfig::default())
            .await
            .unwrap();
        classifier.write_to_execution_state(&mut state, &c);
        assert_eq!(state.get(keys::CLASSIFICATION).unwrap()["intent"], "general");
        assert_eq!(state.get(keys::SIGNALS).unwrap()["query_length"], 14);
    }

    #[tokio::test]
    async fn test_config_planner_echoes_config() {
        let config = ExecutionConfig {
            graph_pattern: Some(GraphPattern::Parallel),
            agents: vec!["critic".to_string()],
            ..ExecutionConfig::default()
        };
        let plan = ConfigPlanner
            .plan("q", &config, &ExecutionState::new())
            .await
            .unwrap();
        assert_eq!(plan.pattern, GraphPattern::Parallel);
        assert_eq!(plan.agents, vec!["critic"]);
        assert!(!plan.route_locked);
    }
}
