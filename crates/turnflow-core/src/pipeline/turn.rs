//! Turn pipeline: one request in, one response out.
//!
//! # Turn flow
//!
//! 1. Mint ids and build the turn config (settings, then request overrides).
//! 2. Restore the conversation snapshot and seed the turn state from it.
//! 3. Let the turn normalizer decide whether this turn resumes a pending
//!    action.
//! 4. Classify (skipped on resume turns), then plan.
//! 5. Apply the plan, assemble and compile the workflow, run it.
//! 6. Reconcile the run's state with the pre-run state and fix up the route.
//! 7. Persist the snapshot (also when the turn failed) and respond.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use thiserror::Error;
use turnflow_types::config::PipelineSettings;
use turnflow_types::error::CollaboratorError;
use turnflow_types::event::WorkflowEvent;
use turnflow_types::plan::{ExecutionConfig, GraphPattern};
use turnflow_types::state::{ExecutionState, keys};
use turnflow_types::turn::{TurnRequest, TurnResponse};
use uuid::Uuid;

use super::collaborator::{Classifier, NormalizerOutcome, Planner, TurnNormalizer};
use super::route::{apply_plan, contract_route, fix_up_route};
use super::snapshot;
use super::store::ConversationStateStore;
use crate::workflow::compiler::{CompileError, CompiledGraph, WorkflowCompiler};
use crate::workflow::executor::{RunOptions, WorkflowResult, WorkflowRunner};
use crate::workflow::source::{PatternWorkflowSource, SourceError, WorkflowSource};

/// State key holding a summary of the turn's workflow run.
pub const EXECUTION_SUMMARY_KEY: &str = "execution";

/// Response text when the run produced no usable answer text.
pub const FALLBACK_TEXT: &str = "Your request was processed.";

/// Response text when the run failed.
pub const FAILURE_TEXT: &str = "Sorry, I couldn't complete that request. Please try again.";

const RUN_ANSWER_KEYS: &[&str] = &[keys::FINAL, keys::RESPONSE, keys::FINAL_ANSWER];

const RUN_LIST_KEYS: &[&str] = &[keys::SUCCESSFUL_AGENTS, keys::FAILED_AGENTS, keys::ERRORS];

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid execution_config: {0}")]
    InvalidConfig(String),

    #[error("classification failed: {0}")]
    Classifier(#[source] CollaboratorError),

    #[error("planning failed: {0}")]
    Planner(#[source] CollaboratorError),

    #[error("workflow unavailable: {0}")]
    Source(#[from] SourceError),

    #[error("workflow compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("internal pipeline error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Text safe to show the user; never carries diagnostics.
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::InvalidConfig(_) => "That request had invalid settings and was not run.",
            _ => FAILURE_TEXT,
        }
    }
}

// ---------------------------------------------------------------------------
// TurnPipeline
// ---------------------------------------------------------------------------

struct TurnIds {
    workflow_id: String,
    conversation_id: String,
    correlation_id: String,
}

impl TurnIds {
    fn new(request: &TurnRequest) -> Self {
        let or_new = |id: &Option<String>| {
            id.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::now_v7().to_string())
        };
        Self {
            workflow_id: Uuid::now_v7().to_string(),
            conversation_id: or_new(&request.conversation_id),
            correlation_id: or_new(&request.correlation_id),
        }
    }

    fn stamp(&self, state: &mut ExecutionState) {
        state.set_str(keys::WORKFLOW_ID, self.workflow_id.as_str());
        state.set_str(keys::CONVERSATION_ID, self.conversation_id.as_str());
        state.set_str(keys::CORRELATION_ID, self.correlation_id.as_str());
    }
}

/// Per-turn orchestration over the collaborator ports.
///
/// Generic over its collaborators so the core never depends on concrete
/// classifiers, planners or stores.
pub struct TurnPipeline<N, C, P, S>
where
    N: TurnNormalizer,
    C: Classifier,
    P: Planner,
    S: ConversationStateStore,
{
    normalizer: N,
    classifier: C,
    planner: P,
    store: S,
    source: Arc<dyn WorkflowSource>,
    compiler: WorkflowCompiler,
    runner: Arc<WorkflowRunner>,
    settings: PipelineSettings,
}

impl<N, C, P, S> TurnPipeline<N, C, P, S>
where
    N: TurnNormalizer,
    C: Classifier,
    P: Planner,
    S: ConversationStateStore,
{
    /// Workflows are assembled by a `PatternWorkflowSource` over the
    /// compiler's registry unless `with_source` replaces it.
    pub fn new(
        normalizer: N,
        classifier: C,
        planner: P,
        store: S,
        compiler: WorkflowCompiler,
        runner: Arc<WorkflowRunner>,
        settings: PipelineSettings,
    ) -> Self {
        let source = PatternWorkflowSource::new(Arc::clone(compiler.registry()))
            .with_default_agents(settings.default_agents.clone());
        Self {
            normalizer,
            classifier,
            planner,
            store,
            source: Arc::new(source),
            compiler,
            runner,
            settings,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn WorkflowSource>) -> Self {
        self.source = source;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn runner(&self) -> &Arc<WorkflowRunner> {
        &self.runner
    }

    /// Config every turn starts from.
    pub fn base_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            timeout_secs: self.settings.turn_timeout_secs,
            node_timeout_secs: self.settings.node_timeout_secs,
            enable_retrieval: self.settings.enable_retrieval,
            parallel_execution: self.settings.parallel_execution,
            agents: self.settings.default_agents.clone(),
            allow_cycles: self.compiler.settings().allow_cycles,
            ..ExecutionConfig::default()
        }
    }

    /// Run one turn.
    ///
    /// Only an invalid `execution_config` returns before state is touched;
    /// every other path persists the turn state first.
    pub async fn execute(&self, request: TurnRequest) -> Result<TurnResponse, PipelineError> {
        let started = Instant::now();
        let ids = TurnIds::new(&request);

        let mut config = self.base_config();
        if let Some(overrides) = &request.execution_config {
            config
                .overlay(overrides)
                .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        }
        if let Some(agents) = request.agents.as_ref().filter(|a| !a.is_empty()) {
            config.agents = agents.clone();
        }
        let deadline = started + Duration::from_secs(config.timeout_secs);

        tracing::info!(
            conversation_id = %ids.conversation_id,
            workflow_id = %ids.workflow_id,
            correlation_id = %ids.correlation_id,
            "turn started"
        );

        let mut fresh = ExecutionState::from_query(&request.query);
        ids.stamp(&mut fresh);
        let restored = self.restore(&ids.conversation_id, deadline).await;
        let mut state = snapshot::seed_turn_state(fresh, restored);

        let outcome = self
            .run_turn(&ids, &request.query, &mut config, &mut state, deadline)
            .await;
        if outcome.is_err() {
            let contract = contract_route(state.route(), &config);
            fix_up_route(&mut state, contract);
        }
        self.persist(&ids.conversation_id, &state).await;

        let text = match outcome {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(conversation_id = %ids.conversation_id, error = %e, "turn failed");
                return Err(e);
            }
        };

        let route = state.route().unwrap_or_default().to_string();
        let resume_turn = state.get_flag(keys::PENDING_ACTION_RESUME_TURN);
        self.runner.event_bus().publish(WorkflowEvent::TurnCompleted {
            conversation_id: ids.conversation_id.clone(),
            workflow_id: ids.workflow_id.clone(),
            route: route.clone(),
            resume_turn,
        });
        tracing::info!(
            conversation_id = %ids.conversation_id,
            %route,
            resume_turn,
            duration_ms = started.elapsed().as_millis() as u64,
            "turn completed"
        );

        Ok(TurnResponse {
            text,
            execution_state: state,
            workflow_id: ids.workflow_id,
            conversation_id: ids.conversation_id,
            correlation_id: ids.correlation_id,
        })
    }

    async fn run_turn(
        &self,
        ids: &TurnIds,
        raw_text: &str,
        config: &mut ExecutionConfig,
        state: &mut ExecutionState,
        deadline: Instant,
    ) -> Result<String, PipelineError> {
        let resume = self.normalize(state, raw_text, deadline).await;
        let effective = state.effective_query().unwrap_or(raw_text).to_string();

        if resume {
            tracing::debug!(conversation_id = %ids.conversation_id, "resume turn; classification skipped");
        } else {
            let classification = within(deadline, "classifier", self.classifier.classify(&effective, state, config))
                .await
                .map_err(PipelineError::Classifier)?;
            self.classifier.write_to_execution_state(state, &classification);
        }

        let plan = within(deadline, "planner", self.planner.plan(&effective, config, state))
            .await
            .map_err(PipelineError::Planner)?;

        // The plan lands in `state` only once the run has been reconciled.
        let pre_plan_route = state.route().map(str::to_string);
        let mut planned = state.clone();
        apply_plan(config, &mut planned, &plan);

        let definition = self.source.definition_for(&ids.workflow_id, config)?;
        let graph = Arc::new(self.compiler.compile_with(&definition, config.allow_cycles)?);

        let mut options = RunOptions::from_config(config, effective).with_thread_id(ids.conversation_id.clone());
        options.run_timeout = deadline.saturating_duration_since(Instant::now());

        let run_input = run_input(&planned);
        let pre_execution = planned;
        let result = self.runner.run(Arc::clone(&graph), run_input, options).await;
        self.runner.release_timings(&result.execution_id);

        let text = if result.success {
            response_text(&result.final_state, &graph)
        } else {
            FAILURE_TEXT.to_string()
        };

        let mut reconciled = result.final_state.clone();
        reconciled.merge_under(&pre_execution);
        ids.stamp(&mut reconciled);
        reconciled.set_str(keys::EXECUTION_ID, result.execution_id.as_str());
        reconciled.insert(EXECUTION_SUMMARY_KEY, execution_summary(&result));

        fix_up_route(&mut reconciled, contract_route(pre_plan_route.as_deref(), config));
        reconciled.set_str(keys::ENTRY_POINT, graph.entry_point());
        if !reconciled.route().is_some_and(GraphPattern::is_contract_route) {
            return Err(PipelineError::Internal(
                "route is not a contract pattern after fix-up".to_string(),
            ));
        }

        *state = reconciled;
        Ok(text)
    }

    /// Returns whether this is a resume turn. Writes the resume flag and the
    /// effective query.
    async fn normalize(&self, state: &mut ExecutionState, raw_text: &str, deadline: Instant) -> bool {
        let was_awaiting = state.is_awaiting_input();
        let prior_result = state.get(keys::PENDING_ACTION_RESULT).cloned();
        let mut working = state.clone();
        let normalized = within(deadline, "normalizer", self.normalizer.normalize(&mut working, raw_text)).await;
        let outcome = match normalized {
            Ok(outcome) => {
                *state = working;
                outcome
            }
            Err(e) => {
                tracing::warn!(error = %e, "turn normalizer failed; treating turn as a new request");
                NormalizerOutcome::not_handled(raw_text)
            }
        };

        let mut resume = match outcome.handled {
            Some(handled) => handled,
            None if state.get(keys::PENDING_ACTION_RESULT).is_some()
                && state.get(keys::PENDING_ACTION_RESULT) != prior_result.as_ref() =>
            {
                tracing::warn!(
                    "normalizer wrote pending_action_result without a handled signal; \
                     treating as resume (legacy contract)"
                );
                true
            }
            None => false,
        };
        if resume && !was_awaiting {
            tracing::warn!("normalizer reported a resume with no pending action awaiting input; ignored");
            resume = false;
        }

        state.insert(keys::PENDING_ACTION_RESUME_TURN, Value::Bool(resume));
        let effective = if resume && !outcome.canonical_user_text.trim().is_empty() {
            outcome.canonical_user_text.trim()
        } else {
            raw_text
        };
        state.set_str(keys::EFFECTIVE_QUERY, effective);
        resume
    }

    async fn restore(&self, conversation_id: &str, deadline: Instant) -> Option<ExecutionState> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, self.store.load(conversation_id)).await {
            Ok(Ok(Some(raw))) => Some(snapshot::unwrap(raw)),
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                tracing::warn!(conversation_id, error = %e, "failed to restore conversation state; starting fresh");
                None
            }
            Err(_) => {
                tracing::warn!(conversation_id, "restoring conversation state timed out; starting fresh");
                None
            }
        }
    }

    async fn persist(&self, conversation_id: &str, state: &ExecutionState) {
        if let Err(e) = self.store.save(conversation_id, &snapshot::wrap(state)).await {
            tracing::warn!(conversation_id, error = %e, "failed to persist conversation state");
        }
    }
}

async fn within<T, F>(deadline: Instant, collaborator: &'static str, call: F) -> Result<T, CollaboratorError>
where
    F: std::future::Future<Output = Result<T, CollaboratorError>>,
{
    let remaining = deadline.saturating_duration_since(Instant::now());
    tokio::time::timeout(remaining, call)
        .await
        .map_err(|_| CollaboratorError::Timeout { collaborator })?
}

fn text_of(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.as_str(),
        Value::Object(obj) => obj
            .get("content")
            .or_else(|| obj.get("text"))
            .and_then(Value::as_str)?,
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// The state handed to the runner. Answers and per-run agent bookkeeping
/// restored from earlier turns are hidden so the run only sees its own.
fn run_input(planned: &ExecutionState) -> ExecutionState {
    let mut input = planned.clone();
    for key in RUN_ANSWER_KEYS {
        input.remove(key);
    }
    for &key in RUN_LIST_KEYS {
        input.insert(key, json!([]));
    }
    input
}

/// Best-effort user-facing text for a successful run.
fn response_text(state: &ExecutionState, graph: &CompiledGraph) -> String {
    for key in [keys::FINAL, keys::RESPONSE, keys::FINAL_ANSWER] {
        if let Some(text) = text_of(state.get(key)) {
            return text;
        }
    }
    if state.get_flag(keys::PENDING_ACTION_RESUME_TURN) {
        let message = state
            .get(keys::PENDING_ACTION_RESULT)
            .and_then(|r| r.get("message"));
        if let Some(text) = text_of(message) {
            return text;
        }
    }
    if let Some(outputs) = state.agent_outputs() {
        for node_id in graph.terminal_nodes() {
            let agent = graph.node(node_id).and_then(|n| n.agent_name());
            if let Some(text) = agent.and_then(|a| text_of(outputs.get(a))) {
                return text;
            }
        }
    }
    FALLBACK_TEXT.to_string()
}

fn execution_summary(result: &WorkflowResult) -> Value {
    json!({
        "execution_id": result.execution_id,
        "success": result.success,
        "node_execution_order": result.node_execution_order,
        "execution_structure": result.execution_structure,
        "execution_time_ms": result.execution_time_ms,
        "terminated_by": result.terminated_by,
        "error": result.error,
        "successful_agents": result.final_state.string_list(keys::SUCCESSFUL_AGENTS),
        "failed_agents": result.final_state.string_list(keys::FAILED_AGENTS),
        "errors": result.final_state.get(keys::ERRORS).cloned().unwrap_or_else(|| json!([])),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::Map;
    use turnflow_types::agent::{AgentInput, AgentOutput};
    use turnflow_types::config::CompilerSettings;
    use turnflow_types::pending::PendingAction;
    use turnflow_types::plan::ExecutionPlan;
    use turnflow_types::state::TURN_LOCAL_KEYS;

    use crate::agent::{Agent, AgentError, AgentRegistry};
    use crate::event::EventBus;
    use crate::pipeline::collaborator::{ConfigPlanner, PassthroughClassifier, PassthroughNormalizer};
    use crate::pipeline::store::InMemoryConversationStore;
    use crate::wizard::{PendingActionNormalizer, WizardRegistry};
    use crate::workflow::checkpoint::CheckpointManager;

    // -- agents ----------------------------------------------------------

    struct Echo {
        name: &'static str,
        delay_ms: u64,
        updates: Map<String, Value>,
    }

    impl Echo {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                delay_ms: 0,
                updates: Map::new(),
            }
        }
    }

    impl Agent for Echo {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, input: AgentInput) -> Result<AgentOutput, AgentError> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            let mut out = AgentOutput::text(format!("{}: {}", self.name, input.query));
            for (k, v) in &self.updates {
                out = out.with_update(k, v.clone());
            }
            Ok(out)
        }
    }

    // -- collaborators ---------------------------------------------------

    #[derive(Default)]
    struct CountingClassifier {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Classifier for CountingClassifier {
        async fn classify(
            &self,
            query: &str,
            state: &ExecutionState,
            config: &ExecutionConfig,
        ) -> Result<crate::pipeline::collaborator::Classification, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CollaboratorError::failed("classifier", "model offline"));
            }
            PassthroughClassifier.classify(query, state, config).await
        }
    }

    struct FixedPlanner(ExecutionPlan);

    impl Planner for FixedPlanner {
        async fn plan(
            &self,
            _query: &str,
            _config: &ExecutionConfig,
            _state: &ExecutionState,
        ) -> Result<ExecutionPlan, CollaboratorError> {
            Ok(self.0.clone())
        }
    }

    /// Answers with a canned legacy-shaped result, optionally writing a
    /// pending_action_result.
    struct LegacyNormalizer {
        reply: Value,
        write_result: bool,
    }

    impl TurnNormalizer for LegacyNormalizer {
        async fn normalize(
            &self,
            state: &mut ExecutionState,
            raw_text: &str,
        ) -> Result<NormalizerOutcome, CollaboratorError> {
            if self.write_result {
                state.insert(keys::PENDING_ACTION_RESULT, json!({"status": "advanced"}));
            }
            NormalizerOutcome::from_legacy(&self.reply, raw_text)
        }
    }

    /// Records the state each turn starts from.
    #[derive(Default)]
    struct RecordingNormalizer {
        seen: std::sync::Mutex<Vec<ExecutionState>>,
    }

    impl TurnNormalizer for RecordingNormalizer {
        async fn normalize(
            &self,
            state: &mut ExecutionState,
            raw_text: &str,
        ) -> Result<NormalizerOutcome, CollaboratorError> {
            self.seen.lock().unwrap().push(state.clone());
            Ok(NormalizerOutcome::not_handled(raw_text))
        }
    }

    struct FailingNormalizer;

    impl TurnNormalizer for FailingNormalizer {
        async fn normalize(
            &self,
            state: &mut ExecutionState,
            _raw_text: &str,
        ) -> Result<NormalizerOutcome, CollaboratorError> {
            state.insert("scribble", json!(true));
            Err(CollaboratorError::failed("normalizer", "nlu offline"))
        }
    }

    // -- harness ---------------------------------------------------------

    fn agents() -> Vec<Echo> {
        let mut synthesis = Echo::new("synthesis");
        synthesis.updates.insert("final".to_string(), json!("the answer"));
        vec![Echo::new("refiner"), Echo::new("critic"), Echo::new("historian"), synthesis]
    }

    fn build<N, C, P>(
        normalizer: N,
        classifier: C,
        planner: P,
        agents: Vec<Echo>,
        store: Arc<InMemoryConversationStore>,
    ) -> TurnPipeline<N, C, P, Arc<InMemoryConversationStore>>
    where
        N: TurnNormalizer,
        C: Classifier,
        P: Planner,
    {
        let registry = Arc::new(
            agents
                .into_iter()
                .fold(AgentRegistry::builder(), |b, a| b.register(a))
                .build(),
        );
        let compiler = WorkflowCompiler::new(registry, CompilerSettings::default());
        let runner = Arc::new(WorkflowRunner::new(
            EventBus::default(),
            Arc::new(CheckpointManager::disabled()),
        ));
        let settings = PipelineSettings {
            default_agents: vec![
                "refiner".to_string(),
                "critic".to_string(),
                "historian".to_string(),
                "synthesis".to_string(),
            ],
            ..PipelineSettings::default()
        };
        TurnPipeline::new(normalizer, classifier, planner, store, compiler, runner, settings)
    }

    fn wizard_normalizer() -> PendingActionNormalizer {
        PendingActionNormalizer::new(Arc::new(WizardRegistry::new()))
    }

    async fn stored(store: &InMemoryConversationStore, conversation_id: &str) -> ExecutionState {
        snapshot::unwrap(store.load(conversation_id).await.unwrap().unwrap())
    }

    // -- scenarios -------------------------------------------------------

    #[tokio::test]
    async fn test_query_consents_route_is_contract() {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut plan = ExecutionPlan::new(GraphPattern::Standard, vec![]);
        plan.route = Some("consents".to_string());
        let pipeline = build(wizard_normalizer(), PassthroughClassifier, FixedPlanner(plan), agents(), store);

        let response = pipeline
            .execute(TurnRequest::new("query consents").with_conversation("c1"))
            .await
            .unwrap();

        let state = &response.execution_state;
        assert_eq!(state.route(), Some("standard"));
        assert_eq!(state.next_node(), Some("consents"));
        assert_eq!(state.entry_point(), Some("refiner"));
        assert_eq!(response.conversation_id, "c1");
        assert_eq!(response.text, "the answer");
    }

    #[tokio::test]
    async fn test_four_agent_structure_through_pipeline() {
        let store = Arc::new(InMemoryConversationStore::new());
        let pipeline = build(PassthroughNormalizer, PassthroughClassifier, ConfigPlanner, agents(), store);
        let response = pipeline.execute(TurnRequest::new("history of rome")).await.unwrap();

        let summary = response.execution_state.get(EXECUTION_SUMMARY_KEY).unwrap();
        assert_eq!(summary["success"], true);
        let structure = summary["execution_structure"].as_array().unwrap();
        assert_eq!(structure.len(), 3);
        assert_eq!(structure[0], "refiner");
        let mut group: Vec<&str> = structure[1]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        group.sort_unstable();
        assert_eq!(group, vec!["critic", "historian"]);
        assert_eq!(structure[2], "synthesis");
    }

    #[tokio::test]
    async fn test_cancel_clears_pending_action() {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut prior = ExecutionState::from_query("create a consents table");
        prior.set_route("standard");
        prior.set_pending_action(Some(&PendingAction::from_value(&json!({"type": "confirm_table", "awaiting": true})).unwrap()));
        store.save("c1", &snapshot::wrap(&prior)).await.unwrap();

        let classifier = CountingClassifier {
            fail: true,
            ..CountingClassifier::default()
        };
        let pipeline = build(wizard_normalizer(), classifier, ConfigPlanner, agents(), Arc::clone(&store));
        let response = pipeline
            .execute(TurnRequest::new("cancel").with_conversation("c1"))
            .await
            .unwrap();

        let state = &response.execution_state;
        assert!(!state.contains_key(keys::PENDING_ACTION));
        assert!(state.get_flag(keys::PENDING_ACTION_RESUME_TURN));
        let outputs = state.get(keys::WIZARD_OUTPUTS).unwrap()["confirm_table:default"]
            .as_array()
            .unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0]["cancelled"], true);
        assert_eq!(pipeline.classifier.calls.load(Ordering::SeqCst), 0);

        let persisted = stored(&store, "c1").await;
        assert!(!persisted.contains_key(keys::PENDING_ACTION));
    }

    #[tokio::test]
    async fn test_round_trip_restore() {
        let store = Arc::new(InMemoryConversationStore::new());
        let pipeline = build(PassthroughNormalizer, PassthroughClassifier, ConfigPlanner, agents(), Arc::clone(&store));
        let response = pipeline
            .execute(TurnRequest::new("first").with_conversation("c9"))
            .await
            .unwrap();

        assert_eq!(stored(&store, "c9").await, response.execution_state);

        let second = pipeline
            .execute(TurnRequest::new("second").with_conversation("c9"))
            .await
            .unwrap();
        assert_eq!(second.execution_state.get_str(keys::QUERY), Some("second"));
        assert_eq!(second.execution_state.get_str(keys::ORIGINAL_QUERY), Some("second"));
        assert_eq!(second.execution_state.string_list(keys::SUCCESSFUL_AGENTS).len(), 4);
        assert_ne!(
            second.execution_state.get_str(keys::WORKFLOW_ID),
            response.execution_state.get_str(keys::WORKFLOW_ID)
        );
    }

    #[tokio::test]
    async fn test_historical_pending_action_never_resumes() {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut prior = ExecutionState::from_query("earlier");
        let mut action = PendingAction::awaiting("confirm_table", "confirm");
        action.awaiting = false;
        prior.set_pending_action(Some(&action));
        store.save("c1", &snapshot::wrap(&prior)).await.unwrap();

        let normalizer = LegacyNormalizer {
            reply: json!({"handled": true, "canonical_user_text": "yes"}),
            write_result: false,
        };
        let pipeline = build(normalizer, CountingClassifier::default(), ConfigPlanner, agents(), store);
        let response = pipeline
            .execute(TurnRequest::new("yes").with_conversation("c1"))
            .await
            .unwrap();

        assert!(!response.execution_state.get_flag(keys::PENDING_ACTION_RESUME_TURN));
        assert_eq!(pipeline.classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(response.execution_state.effective_query(), Some("yes"));
    }

    #[tokio::test]
    async fn test_result_without_handled_signal_counts_as_resume() {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut prior = ExecutionState::from_query("earlier");
        prior.set_pending_action(Some(&PendingAction::awaiting("confirm_table", "confirm")));
        store.save("c1", &snapshot::wrap(&prior)).await.unwrap();

        let normalizer = LegacyNormalizer {
            reply: json!({"text": "confirm"}),
            write_result: true,
        };
        let pipeline = build(normalizer, CountingClassifier::default(), ConfigPlanner, agents(), store);
        let response = pipeline
            .execute(TurnRequest::new("sure").with_conversation("c1"))
            .await
            .unwrap();

        assert!(response.execution_state.get_flag(keys::PENDING_ACTION_RESUME_TURN));
        assert_eq!(response.execution_state.effective_query(), Some("confirm"));
        assert_eq!(pipeline.classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restored_result_alone_is_not_a_resume() {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut prior = ExecutionState::from_query("earlier");
        prior.set_pending_action(Some(&PendingAction::awaiting("confirm_table", "confirm")));
        prior.insert(keys::PENDING_ACTION_RESULT, json!({"status": "advanced"}));
        store.save("c1", &snapshot::wrap(&prior)).await.unwrap();

        let normalizer = LegacyNormalizer {
            reply: json!({"text": "confirm"}),
            write_result: false,
        };
        let pipeline = build(normalizer, CountingClassifier::default(), ConfigPlanner, agents(), store);
        let response = pipeline
            .execute(TurnRequest::new("something else").with_conversation("c1"))
            .await
            .unwrap();

        assert!(!response.execution_state.get_flag(keys::PENDING_ACTION_RESUME_TURN));
        assert_eq!(pipeline.classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_normalizer_failure_degrades() {
        let store = Arc::new(InMemoryConversationStore::new());
        let pipeline = build(FailingNormalizer, CountingClassifier::default(), ConfigPlanner, agents(), store);
        let response = pipeline.execute(TurnRequest::new("hello")).await.unwrap();

        let state = &response.execution_state;
        assert!(!state.get_flag(keys::PENDING_ACTION_RESUME_TURN));
        assert!(!state.contains_key("scribble"));
        assert_eq!(pipeline.classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_classifier_failure_aborts_but_persists() {
        let store = Arc::new(InMemoryConversationStore::new());
        let classifier = CountingClassifier {
            fail: true,
            ..CountingClassifier::default()
        };
        let pipeline = build(PassthroughNormalizer, classifier, ConfigPlanner, agents(), Arc::clone(&store));
        let err = pipeline
            .execute(TurnRequest::new("hello").with_conversation("c3"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Classifier(_)));
        assert_eq!(err.user_message(), FAILURE_TEXT);
        let persisted = stored(&store, "c3").await;
        assert_eq!(persisted.get_str(keys::QUERY), Some("hello"));
        assert_eq!(persisted.route(), Some("standard"));
    }

    #[tokio::test]
    async fn test_compile_failure_persists_contract_route() {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut plan = ExecutionPlan::new(GraphPattern::Standard, vec!["ghost".to_string()]);
        plan.route = Some("consents".to_string());
        let pipeline = build(
            PassthroughNormalizer,
            PassthroughClassifier,
            FixedPlanner(plan),
            agents(),
            Arc::clone(&store),
        );

        let result = pipeline
            .execute(TurnRequest::new("query consents").with_conversation("c5"))
            .await;
        assert!(result.is_err());

        let persisted = stored(&store, "c5").await;
        let route = persisted.route().unwrap();
        assert!(GraphPattern::is_contract_route(route));
        assert_eq!(route, "standard");
        assert_eq!(persisted.get_str(keys::QUERY), Some("query consents"));
    }

    #[tokio::test]
    async fn test_restored_state_matches_persisted() {
        let store = Arc::new(InMemoryConversationStore::new());
        let pipeline = build(
            RecordingNormalizer::default(),
            PassthroughClassifier,
            ConfigPlanner,
            agents(),
            Arc::clone(&store),
        );
        pipeline
            .execute(TurnRequest::new("first").with_conversation("c6"))
            .await
            .unwrap();
        let persisted = stored(&store, "c6").await;
        pipeline
            .execute(TurnRequest::new("second").with_conversation("c6"))
            .await
            .unwrap();

        let seen = pipeline.normalizer.seen.lock().unwrap();
        let restored = &seen[1];
        for (key, value) in persisted.clone().into_map() {
            if TURN_LOCAL_KEYS.contains(&key.as_str()) || key == keys::PENDING_ACTION_RESUME_TURN {
                continue;
            }
            assert_eq!(restored.get(&key), Some(&value), "persisted key '{key}' not restored");
        }
        assert_eq!(restored.get_str(keys::QUERY), Some("second"));
    }

    #[tokio::test]
    async fn test_stale_answer_not_reused() {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut prior = ExecutionState::from_query("earlier");
        prior.set_route("standard");
        prior.insert(keys::FINAL, json!("old answer"));
        prior.push_to_list(keys::FAILED_AGENTS, json!("critic"));
        store.save("c7", &snapshot::wrap(&prior)).await.unwrap();

        let agents = vec![
            Echo::new("refiner"),
            Echo::new("critic"),
            Echo::new("historian"),
            Echo::new("synthesis"),
        ];
        let pipeline = build(PassthroughNormalizer, PassthroughClassifier, ConfigPlanner, agents, Arc::clone(&store));
        let response = pipeline
            .execute(TurnRequest::new("q").with_conversation("c7"))
            .await
            .unwrap();

        assert_eq!(response.text, "synthesis: q");
        let state = &response.execution_state;
        assert!(state.string_list(keys::FAILED_AGENTS).is_empty());
        assert_eq!(state.get(EXECUTION_SUMMARY_KEY).unwrap()["successful_agents"].as_array().unwrap().len(), 4);
        assert_eq!(state.get_str(keys::FINAL), Some("old answer"));
    }

    #[tokio::test]
    async fn test_node_route_moves_to_next_node() {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut agents = agents();
        agents[2].updates.insert("route".to_string(), json!("historian"));
        let pipeline = build(PassthroughNormalizer, PassthroughClassifier, ConfigPlanner, agents, store);
        let response = pipeline.execute(TurnRequest::new("q")).await.unwrap();

        assert_eq!(response.execution_state.route(), Some("standard"));
        assert_eq!(response.execution_state.next_node(), Some("historian"));
    }

    #[tokio::test]
    async fn test_turn_timeout_still_persists() {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut agents = agents();
        agents[0].delay_ms = 5_000;
        let pipeline = build(PassthroughNormalizer, PassthroughClassifier, ConfigPlanner, agents, Arc::clone(&store));

        let mut overrides = Map::new();
        overrides.insert("timeout_secs".to_string(), json!(1));
        let response = pipeline
            .execute(
                TurnRequest::new("slow")
                    .with_conversation("c4")
                    .with_execution_config(overrides),
            )
            .await
            .unwrap();

        assert_eq!(response.text, FAILURE_TEXT);
        let summary = response.execution_state.get(EXECUTION_SUMMARY_KEY).unwrap();
        assert_eq!(summary["success"], false);
        assert!(store.load("c4").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalid_execution_config_rejected() {
        let store = Arc::new(InMemoryConversationStore::new());
        let pipeline = build(PassthroughNormalizer, PassthroughClassifier, ConfigPlanner, agents(), Arc::clone(&store));
        let mut overrides = Map::new();
        overrides.insert("timeout_secs".to_string(), json!("soon"));
        let err = pipeline
            .execute(TurnRequest::new("q").with_execution_config(overrides))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_request_agents_override_defaults() {
        let store = Arc::new(InMemoryConversationStore::new());
        let pipeline = build(PassthroughNormalizer, PassthroughClassifier, ConfigPlanner, agents(), store);
        let response = pipeline
            .execute(TurnRequest::new("q").with_agents(vec!["critic".to_string()]))
            .await
            .unwrap();

        let state = &response.execution_state;
        assert_eq!(state.entry_point(), Some("critic"));
        assert_eq!(state.agent_outputs().unwrap().len(), 1);
        assert_eq!(response.text, "critic: q");
    }
}
