//! Workflow executor: runs a compiled graph in waves.
//!
//! Acyclic graphs run in topological waves; every active node of a wave runs
//! concurrently on a `JoinSet` (or one at a time when parallel execution is
//! off). Graphs compiled with cycles allowed run in bounded supersteps whose
//! frontier is the set of targets of edges taken in the previous step.
//!
//! # Execution flow
//!
//! 1. Register a cancellation token for the execution id.
//! 2. For each wave, snapshot the state and run the active nodes under the
//!    per-node timeout.
//! 3. Merge results into the state in declaration order, then decide which
//!    outgoing edges fire.
//! 4. Checkpoint after the wave when checkpointing is enabled.
//! 5. On timeout, cancellation, or when no node succeeded, return the
//!    unmodified input state with `success = false`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use turnflow_types::event::WorkflowEvent;
use turnflow_types::plan::{DEFAULT_MAX_SUPERSTEPS, ExecutionConfig};
use turnflow_types::state::{ExecutionState, keys};
use turnflow_types::workflow::EdgeType;
use uuid::Uuid;

use super::checkpoint::CheckpointManager;
use super::compiler::CompiledGraph;
use super::expression::ConditionEvaluator;
use super::nodes::{CompiledNode, ExecutionError, NodeContext, NodeOutput, Routing};
use crate::event::EventBus;

/// Keys agents may not overwrite through `state_updates`.
const PROTECTED_KEYS: &[&str] = &[
    keys::WORKFLOW_ID,
    keys::EXECUTION_ID,
    keys::CONVERSATION_ID,
    keys::CORRELATION_ID,
];

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Generated when absent.
    pub execution_id: Option<String>,
    /// Checkpoint thread; defaults to the execution id.
    pub thread_id: Option<String>,
    pub query: String,
    pub run_timeout: Duration,
    pub node_timeout: Duration,
    pub parallel: bool,
    pub max_supersteps: usize,
}

impl RunOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self::from_config(&ExecutionConfig::default(), query)
    }

    pub fn from_config(config: &ExecutionConfig, query: impl Into<String>) -> Self {
        Self {
            execution_id: None,
            thread_id: None,
            query: query.into(),
            run_timeout: Duration::from_secs(config.timeout_secs),
            node_timeout: Duration::from_secs(config.node_timeout_secs),
            parallel: config.parallel_execution,
            max_supersteps: config.max_supersteps,
        }
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

/// Wall-clock timing of one node run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeTiming {
    pub node_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
}

/// Public result of a workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub success: bool,
    pub workflow_id: String,
    pub execution_id: String,
    /// On failure this is the unmodified input state.
    pub final_state: ExecutionState,
    /// Flat completion order.
    pub node_execution_order: Vec<String>,
    /// Sequential nodes as strings, parallel groups as nested arrays.
    pub execution_structure: Value,
    pub execution_time_ms: u64,
    pub error: Option<String>,
    /// Reason given by a terminator node that ended the run early.
    pub terminated_by: Option<String>,
}

/// Why a run was aborted.
#[derive(Debug, thiserror::Error)]
enum RunAbort {
    #[error("workflow timed out after {0}s")]
    Timeout(u64),

    #[error("workflow cancelled")]
    Cancelled,
}

struct RunProgress {
    state: ExecutionState,
    order: Vec<String>,
    groups: Vec<Vec<String>>,
    succeeded: usize,
    terminated_by: Option<String>,
}

struct NodeRun {
    node_id: String,
    result: Result<NodeOutput, ExecutionError>,
    started_at: DateTime<Utc>,
    duration_ms: u64,
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

pub struct WorkflowRunner {
    event_bus: EventBus,
    checkpoints: Arc<CheckpointManager>,
    evaluator: ConditionEvaluator,
    /// Per-node timings keyed by execution id.
    timings: DashMap<String, Vec<NodeTiming>>,
    /// Cancellation tokens keyed by execution id.
    cancellation_tokens: DashMap<String, CancellationToken>,
}

impl WorkflowRunner {
    pub fn new(event_bus: EventBus, checkpoints: Arc<CheckpointManager>) -> Self {
        Self {
            event_bus,
            checkpoints,
            evaluator: ConditionEvaluator::new(),
            timings: DashMap::new(),
            cancellation_tokens: DashMap::new(),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.checkpoints
    }

    /// Cancel an in-flight run. Returns false if no such run is active.
    pub fn cancel(&self, execution_id: &str) -> bool {
        match self.cancellation_tokens.get(execution_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Recorded node timings for `execution_id`, in completion order.
    pub fn node_timings(&self, execution_id: &str) -> Vec<NodeTiming> {
        self.timings
            .get(execution_id)
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Drop the timings recorded for `execution_id`.
    pub fn release_timings(&self, execution_id: &str) -> Vec<NodeTiming> {
        self.timings
            .remove(execution_id)
            .map(|(_, t)| t)
            .unwrap_or_default()
    }

    /// Run `graph` to completion. Never fails: aborted runs report
    /// `success = false` and hand back the input state.
    pub async fn run(
        &self,
        graph: Arc<CompiledGraph>,
        initial_state: ExecutionState,
        options: RunOptions,
    ) -> WorkflowResult {
        let execution_id = options
            .execution_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let workflow_id = graph.workflow_id().to_string();
        let token = CancellationToken::new();
        self.cancellation_tokens.insert(execution_id.clone(), token.clone());

        self.event_bus.publish(WorkflowEvent::WorkflowStarted {
            workflow_id: workflow_id.clone(),
            execution_id: execution_id.clone(),
            node_count: graph.len(),
        });
        tracing::debug!(%workflow_id, %execution_id, nodes = graph.len(), "workflow run started");

        let start = Instant::now();
        let run = self.run_graph(&graph, initial_state.clone(), &execution_id, &options, start);
        let outcome = tokio::select! {
            result = tokio::time::timeout(options.run_timeout, run) => {
                result.map_err(|_| RunAbort::Timeout(options.run_timeout.as_secs()))
            }
            _ = token.cancelled() => Err(RunAbort::Cancelled),
        };
        self.cancellation_tokens.remove(&execution_id);
        let execution_time_ms = start.elapsed().as_millis() as u64;

        let error = match &outcome {
            Err(abort) => Some(abort.to_string()),
            Ok(progress) if progress.succeeded == 0 => Some("no node completed successfully".to_string()),
            Ok(_) => None,
        };

        match (outcome, error) {
            (Ok(progress), None) => {
                self.event_bus.publish(WorkflowEvent::WorkflowCompleted {
                    workflow_id: workflow_id.clone(),
                    execution_id: execution_id.clone(),
                    duration_ms: execution_time_ms,
                    nodes_completed: progress.succeeded,
                });
                tracing::info!(
                    %workflow_id,
                    %execution_id,
                    duration_ms = execution_time_ms,
                    nodes = progress.order.len(),
                    "workflow run completed"
                );
                WorkflowResult {
                    success: true,
                    workflow_id,
                    execution_id,
                    final_state: progress.state,
                    execution_structure: execution_structure(&progress.groups),
                    node_execution_order: progress.order,
                    execution_time_ms,
                    error: None,
                    terminated_by: progress.terminated_by,
                }
            }
            (outcome, error) => {
                let error = error.unwrap_or_else(|| "workflow failed".to_string());
                self.event_bus.publish(WorkflowEvent::WorkflowFailed {
                    workflow_id: workflow_id.clone(),
                    execution_id: execution_id.clone(),
                    error: error.clone(),
                });
                tracing::warn!(%workflow_id, %execution_id, %error, "workflow run failed");
                let (order, groups) = match outcome {
                    Ok(progress) => (progress.order, progress.groups),
                    Err(_) => (Vec::new(), Vec::new()),
                };
                WorkflowResult {
                    success: false,
                    workflow_id,
                    execution_id,
                    final_state: initial_state,
                    execution_structure: execution_structure(&groups),
                    node_execution_order: order,
                    execution_time_ms,
                    error: Some(error),
                    terminated_by: None,
                }
            }
        }
    }

    async fn run_graph(
        &self,
        graph: &CompiledGraph,
        mut state: ExecutionState,
        execution_id: &str,
        options: &RunOptions,
        start: Instant,
    ) -> RunProgress {
        if !state.contains_key(keys::EXECUTION_ID) {
            state.set_str(keys::EXECUTION_ID, execution_id);
        }
        let mut progress = RunProgress {
            state,
            order: Vec::new(),
            groups: Vec::new(),
            succeeded: 0,
            terminated_by: None,
        };
        let entry = graph.entry_point().to_string();

        if let Some(waves) = graph.waves() {
            let mut activated: HashSet<String> = HashSet::from([entry]);
            for (wave_idx, wave) in waves.iter().enumerate() {
                let active: Vec<String> = wave.iter().filter(|id| activated.contains(*id)).cloned().collect();
                if active.is_empty() {
                    continue;
                }
                let fired = self
                    .step(graph, &active, wave_idx, execution_id, options, start, &mut progress)
                    .await;
                activated.extend(fired);
                if progress.terminated_by.is_some() {
                    break;
                }
            }
        } else {
            let index = graph.declaration_index();
            let max_steps = if options.max_supersteps == 0 {
                DEFAULT_MAX_SUPERSTEPS
            } else {
                options.max_supersteps
            };
            let mut frontier = vec![entry];
            for step_idx in 0..max_steps {
                if frontier.is_empty() || progress.terminated_by.is_some() {
                    break;
                }
                let fired = self
                    .step(graph, &frontier, step_idx, execution_id, options, start, &mut progress)
                    .await;
                let mut next: Vec<String> = fired.into_iter().collect();
                next.sort_by_key(|id| index.get(id.as_str()).copied().unwrap_or(usize::MAX));
                frontier = next;
            }
            if !frontier.is_empty() && progress.terminated_by.is_none() {
                tracing::warn!(execution_id, max_steps, "superstep limit reached");
                progress.state.push_to_list(
                    keys::ERRORS,
                    json!({
                        "node_id": Value::Null,
                        "agent": Value::Null,
                        "error": format!("superstep limit of {max_steps} reached"),
                    }),
                );
            }
        }

        progress
    }

    /// Run one wave or superstep, merge it, checkpoint, and return the
    /// targets of the edges it fired.
    #[allow(clippy::too_many_arguments)]
    async fn step(
        &self,
        graph: &CompiledGraph,
        active: &[String],
        step_idx: usize,
        execution_id: &str,
        options: &RunOptions,
        start: Instant,
        progress: &mut RunProgress,
    ) -> HashSet<String> {
        tracing::debug!(execution_id, wave = step_idx, nodes = active.len(), "processing wave");

        let runs = self
            .run_wave(graph, active, &progress.state, execution_id, options, start)
            .await;

        // Completion order for the flat record; declaration order for merging.
        progress.order.extend(runs.iter().map(|r| r.node_id.clone()));
        let mut by_id: HashMap<String, NodeRun> = runs.into_iter().map(|r| (r.node_id.clone(), r)).collect();
        let mut group = Vec::with_capacity(active.len());
        let mut routings: Vec<(String, Option<Routing>)> = Vec::with_capacity(active.len());

        for node_id in active {
            let Some(run) = by_id.remove(node_id) else {
                continue;
            };
            group.push(node_id.clone());
            self.timings
                .entry(execution_id.to_string())
                .or_default()
                .push(NodeTiming {
                    node_id: node_id.clone(),
                    started_at: run.started_at,
                    duration_ms: run.duration_ms,
                    success: run.result.is_ok(),
                });

            let node = graph.node(node_id);
            let agent = node.and_then(|n| n.agent_name()).map(str::to_string);
            match run.result {
                Ok(output) => {
                    progress.succeeded += 1;
                    if let Routing::Terminate { reason } = &output.routing {
                        progress.terminated_by = Some(reason.clone());
                    }
                    let routing = output.routing.clone();
                    merge_output(&mut progress.state, node_id, output);
                    routings.push((node_id.clone(), Some(routing)));
                }
                Err(err) => {
                    let failed_name = agent.clone().unwrap_or_else(|| node_id.clone());
                    progress.state.push_to_list(keys::FAILED_AGENTS, Value::String(failed_name));
                    progress.state.push_to_list(
                        keys::ERRORS,
                        json!({"node_id": node_id, "agent": agent, "error": err.to_string()}),
                    );
                    routings.push((node_id.clone(), None));
                }
            }
        }
        progress.groups.push(group);

        let mut fired = HashSet::new();
        for (node_id, routing) in &routings {
            fired.extend(self.fired_targets(graph, node_id, routing.as_ref(), &progress.state));
        }

        self.checkpoint_wave(active, step_idx, execution_id, options, &progress.state);
        fired
    }

    async fn run_wave(
        &self,
        graph: &CompiledGraph,
        active: &[String],
        state: &ExecutionState,
        execution_id: &str,
        options: &RunOptions,
        start: Instant,
    ) -> Vec<NodeRun> {
        let mut runs = Vec::with_capacity(active.len());
        let mut join_set = JoinSet::new();

        for node_id in active {
            let Some(node) = graph.node(node_id) else {
                continue;
            };
            let ctx = NodeContext {
                execution_id: execution_id.to_string(),
                query: options.query.clone(),
                state: state.clone(),
                predecessor_agents: graph.predecessor_agents(node_id),
                elapsed: start.elapsed(),
            };
            let task = run_node(Arc::clone(node), ctx, options.node_timeout, self.event_bus.clone());

            if options.parallel {
                join_set.spawn(task);
            } else {
                runs.push(task.await);
            }
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(run) => runs.push(run),
                Err(join_err) => tracing::warn!(error = %join_err, "node task failed to join"),
            }
        }

        // A task that panicked never reported back.
        for node_id in active {
            if graph.node(node_id).is_some() && !runs.iter().any(|r| &r.node_id == node_id) {
                runs.push(NodeRun {
                    node_id: node_id.clone(),
                    result: Err(ExecutionError::Join {
                        node_id: node_id.clone(),
                        message: "node task aborted".to_string(),
                    }),
                    started_at: Utc::now(),
                    duration_ms: 0,
                });
            }
        }

        runs
    }

    /// Targets of the outgoing edges of `node_id` that fire. `routing` is
    /// `None` when the node failed.
    fn fired_targets(
        &self,
        graph: &CompiledGraph,
        node_id: &str,
        routing: Option<&Routing>,
        state: &ExecutionState,
    ) -> Vec<String> {
        graph
            .outgoing(node_id)
            .filter(|edge| match edge.edge_type {
                EdgeType::Sequential | EdgeType::Parallel => true,
                EdgeType::Conditional => match routing {
                    None => false,
                    Some(Routing::Selected { path, targets }) => match (edge.path(), edge.condition()) {
                        (Some(p), _) => p == path,
                        (None, Some(condition)) => self.condition_holds(condition, state, edge.to_node.as_str()),
                        (None, None) => targets.contains(&edge.to_node),
                    },
                    Some(_) => edge
                        .condition()
                        .is_none_or(|c| self.condition_holds(c, state, edge.to_node.as_str())),
                },
            })
            .map(|edge| edge.to_node.clone())
            .collect()
    }

    fn condition_holds(&self, condition: &str, state: &ExecutionState, to_node: &str) -> bool {
        self.evaluator.evaluate_state(condition, state).unwrap_or_else(|e| {
            tracing::warn!(%to_node, %condition, error = %e, "edge condition failed, edge not taken");
            false
        })
    }

    fn checkpoint_wave(
        &self,
        active: &[String],
        step_idx: usize,
        execution_id: &str,
        options: &RunOptions,
        state: &ExecutionState,
    ) {
        if !self.checkpoints.is_enabled() {
            return;
        }
        let thread_id = options.thread_id.as_deref().unwrap_or(execution_id);
        let step_name = active.join(",");
        let mut metadata = Map::new();
        metadata.insert("execution_id".to_string(), Value::String(execution_id.to_string()));
        metadata.insert("wave".to_string(), json!(step_idx));

        match self.checkpoints.create_checkpoint(thread_id, state, &step_name, Some(metadata)) {
            Ok(Some(checkpoint_id)) => self.event_bus.publish(WorkflowEvent::CheckpointCreated {
                thread_id: thread_id.to_string(),
                checkpoint_id,
                step_name,
            }),
            Ok(None) => {}
            Err(e) => tracing::warn!(thread_id, error = %e, "checkpoint after wave failed"),
        }
    }
}

impl std::fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("active_runs", &self.cancellation_tokens.len())
            .field("checkpoints_enabled", &self.checkpoints.is_enabled())
            .finish()
    }
}

async fn run_node(node: Arc<CompiledNode>, ctx: NodeContext, timeout: Duration, bus: EventBus) -> NodeRun {
    let node_id = node.node_id().to_string();
    bus.publish(WorkflowEvent::NodeStarted {
        execution_id: ctx.execution_id.clone(),
        node_id: node_id.clone(),
        node_kind: node.kind().to_string(),
    });

    let started_at = Utc::now();
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, node.execute(&ctx)).await {
        Ok(result) => result,
        Err(_) => Err(ExecutionError::Timeout {
            node_id: node_id.clone(),
            secs: timeout.as_secs(),
        }),
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    match &result {
        Ok(_) => bus.publish(WorkflowEvent::NodeCompleted {
            execution_id: ctx.execution_id.clone(),
            node_id: node_id.clone(),
            duration_ms,
        }),
        Err(e) => {
            tracing::warn!(node_id = %node_id, error = %e, "node failed");
            bus.publish(WorkflowEvent::NodeFailed {
                execution_id: ctx.execution_id.clone(),
                node_id: node_id.clone(),
                error: e.to_string(),
            });
        }
    }

    NodeRun {
        node_id,
        result,
        started_at,
        duration_ms,
    }
}

fn merge_output(state: &mut ExecutionState, node_id: &str, output: NodeOutput) {
    match &output.agent {
        Some(agent) => {
            state.insert_in_object(keys::AGENT_OUTPUTS, agent, output.result);
            if !state.string_list(keys::SUCCESSFUL_AGENTS).contains(agent) {
                state.push_to_list(keys::SUCCESSFUL_AGENTS, Value::String(agent.clone()));
            }
        }
        None => state.insert_in_object(keys::NODE_RESULTS, node_id, output.result),
    }
    for (key, value) in output.state_updates {
        if PROTECTED_KEYS.contains(&key.as_str()) {
            tracing::warn!(node_id, %key, "ignoring update to protected state key");
            continue;
        }
        state.insert(key, value);
    }
}

/// Collapse per-wave groups: a single node stays a string, several nodes
/// become a nested array.
pub fn execution_structure(groups: &[Vec<String>]) -> Value {
    Value::Array(
        groups
            .iter()
            .filter(|g| !g.is_empty())
            .map(|g| match g.as_slice() {
                [single] => Value::String(single.clone()),
                many => json!(many),
            })
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentError, AgentRegistry};
    use crate::workflow::compiler::WorkflowCompiler;
    use turnflow_types::agent::{AgentInput, AgentOutput};
    use turnflow_types::config::{CheckpointSettings, CompilerSettings};
    use turnflow_types::workflow::{EdgeDef, NodeConfig, WorkflowDefinition};

    struct Scripted {
        name: &'static str,
        delay_ms: u64,
        fail: bool,
        confidence: Option<f64>,
    }

    impl Scripted {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                delay_ms: 0,
                fail: false,
                confidence: None,
            }
        }
    }

    impl Agent for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, input: AgentInput) -> Result<AgentOutput, AgentError> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail {
                return Err(AgentError::failed(self.name, "scripted failure"));
            }
            let mut out = AgentOutput::text(format!("{} saw {}", self.name, input.query));
            if let Some(c) = self.confidence {
                out = out.with_metadata("confidence", json!(c));
            }
            Ok(out)
        }
    }

    fn registry(agents: Vec<Scripted>) -> Arc<AgentRegistry> {
        let builder = agents
            .into_iter()
            .fold(AgentRegistry::builder(), |b, a| b.register(a));
        Arc::new(builder.build())
    }

    fn default_agents() -> Vec<Scripted> {
        vec![
            Scripted::ok("refiner"),
            Scripted::ok("critic"),
            Scripted::ok("historian"),
            Scripted::ok("synthesis"),
        ]
    }

    fn four_agent_def() -> WorkflowDefinition {
        WorkflowDefinition::new("wf-four", "refiner")
            .with_node(NodeConfig::agent("refiner", "refiner"))
            .with_node(NodeConfig::agent("critic", "critic"))
            .with_node(NodeConfig::agent("historian", "historian"))
            .with_node(NodeConfig::agent("synthesis", "synthesis"))
            .with_edge(EdgeDef::parallel("refiner", "critic"))
            .with_edge(EdgeDef::parallel("refiner", "historian"))
            .with_edge(EdgeDef::sequential("critic", "synthesis"))
            .with_edge(EdgeDef::sequential("historian", "synthesis"))
            .with_terminal("synthesis")
    }

    fn compile(agents: Vec<Scripted>, def: &WorkflowDefinition, allow_cycles: bool) -> Arc<CompiledGraph> {
        let compiler = WorkflowCompiler::new(registry(agents), CompilerSettings::default());
        Arc::new(compiler.compile_with(def, allow_cycles).unwrap())
    }

    fn runner() -> WorkflowRunner {
        WorkflowRunner::new(EventBus::new(64), Arc::new(CheckpointManager::disabled()))
    }

    #[tokio::test]
    async fn test_fan_out_fan_in_structure() {
        let graph = compile(default_agents(), &four_agent_def(), false);
        let result = runner()
            .run(graph, ExecutionState::from_query("q"), RunOptions::new("q"))
            .await;

        assert!(result.success);
        assert_eq!(result.execution_structure, json!(["refiner", ["critic", "historian"], "synthesis"]));
        assert_eq!(result.node_execution_order.len(), 4);
        assert_eq!(result.node_execution_order[0], "refiner");
        assert_eq!(result.node_execution_order[3], "synthesis");

        let outputs = result.final_state.agent_outputs().unwrap();
        assert_eq!(outputs.len(), 4);
        assert_eq!(outputs["synthesis"]["content"], "synthesis saw q");
        assert_eq!(result.final_state.string_list(keys::SUCCESSFUL_AGENTS).len(), 4);
    }

    #[tokio::test]
    async fn test_node_failure_recorded_and_run_continues() {
        let mut agents = default_agents();
        agents[1].fail = true;
        let graph = compile(agents, &four_agent_def(), false);
        let result = runner()
            .run(graph, ExecutionState::from_query("q"), RunOptions::new("q"))
            .await;

        assert!(result.success);
        let state = &result.final_state;
        assert_eq!(state.string_list(keys::FAILED_AGENTS), vec!["critic"]);
        let errors = state.get(keys::ERRORS).unwrap().as_array().unwrap();
        assert_eq!(errors[0]["node_id"], "critic");
        assert!(errors[0]["error"].as_str().unwrap().contains("scripted failure"));
        assert!(state.agent_outputs().unwrap().contains_key("synthesis"));
    }

    #[tokio::test]
    async fn test_node_timeout_is_node_failure() {
        let mut agents = default_agents();
        agents[2].delay_ms = 5_000;
        let graph = compile(agents, &four_agent_def(), false);
        let mut options = RunOptions::new("q");
        options.node_timeout = Duration::from_millis(50);
        let result = runner().run(graph, ExecutionState::from_query("q"), options).await;

        assert!(result.success);
        assert_eq!(result.final_state.string_list(keys::FAILED_AGENTS), vec!["historian"]);
    }

    #[tokio::test]
    async fn test_run_timeout_returns_input_state() {
        let mut agents = default_agents();
        agents[0].delay_ms = 5_000;
        let graph = compile(agents, &four_agent_def(), false);
        let mut options = RunOptions::new("q");
        options.run_timeout = Duration::from_millis(50);
        let input = ExecutionState::from_query("q");
        let result = runner().run(graph, input.clone(), options).await;

        assert!(!result.success);
        assert_eq!(result.final_state, input);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_all_nodes_failing_is_unsuccessful() {
        let agents = vec![Scripted {
            fail: true,
            ..Scripted::ok("refiner")
        }];
        let def = WorkflowDefinition::new("wf", "refiner").with_node(NodeConfig::agent("refiner", "refiner"));
        let graph = compile(agents, &def, false);
        let result = runner()
            .run(graph, ExecutionState::from_query("q"), RunOptions::new("q"))
            .await;
        assert!(!result.success);
        assert_eq!(result.node_execution_order, vec!["refiner"]);
    }

    #[tokio::test]
    async fn test_decision_activates_selected_path_only() {
        let mut decision = Map::new();
        decision.insert(
            "criteria".to_string(),
            json!([{"name": "complexity", "weight": 1.0}]),
        );
        decision.insert(
            "paths".to_string(),
            json!([
                {"name": "quick", "min_score": 0.0, "targets": ["synthesis"]},
                {"name": "deep", "min_score": 0.5, "targets": ["critic"]}
            ]),
        );
        let def = WorkflowDefinition::new("wf-cond", "refiner")
            .with_node(NodeConfig::agent("refiner", "refiner"))
            .with_node(NodeConfig::advanced("route", "decision", decision))
            .with_node(NodeConfig::agent("critic", "critic"))
            .with_node(NodeConfig::agent("synthesis", "synthesis"))
            .with_edge(EdgeDef::sequential("refiner", "route"))
            .with_edge(EdgeDef::conditional("route", "critic").with_metadata("path", json!("deep")))
            .with_edge(EdgeDef::conditional("route", "synthesis").with_metadata("path", json!("quick")));

        let graph = compile(default_agents(), &def, false);
        let mut state = ExecutionState::from_query("q");
        state.insert(keys::SIGNALS, json!({"complexity": 0.9}));
        let result = runner().run(graph, state, RunOptions::new("q")).await;

        assert!(result.success);
        assert_eq!(result.node_execution_order, vec!["refiner", "route", "critic"]);
        let node_results = result.final_state.get(keys::NODE_RESULTS).unwrap();
        assert_eq!(node_results["route"]["selected_path"], "deep");
    }

    #[tokio::test]
    async fn test_condition_expression_gates_edge() {
        let def = WorkflowDefinition::new("wf-expr", "refiner")
            .with_node(NodeConfig::agent("refiner", "refiner"))
            .with_node(NodeConfig::agent("critic", "critic"))
            .with_node(NodeConfig::agent("historian", "historian"))
            .with_edge(
                EdgeDef::conditional("refiner", "critic")
                    .with_metadata("condition", json!("signals.intent == 'review'")),
            )
            .with_edge(
                EdgeDef::conditional("refiner", "historian")
                    .with_metadata("condition", json!("signals.intent == 'history'")),
            );
        let graph = compile(default_agents(), &def, false);
        let mut state = ExecutionState::from_query("q");
        state.insert(keys::SIGNALS, json!({"intent": "history"}));
        let result = runner().run(graph, state, RunOptions::new("q")).await;
        assert_eq!(result.node_execution_order, vec!["refiner", "historian"]);
    }

    #[tokio::test]
    async fn test_terminator_stops_scheduling() {
        let mut terminator = Map::new();
        terminator.insert("criteria".to_string(), json!(["confidence"]));
        terminator.insert("confidence_threshold".to_string(), json!(0.8));
        let def = WorkflowDefinition::new("wf-term", "refiner")
            .with_node(NodeConfig::agent("refiner", "refiner"))
            .with_node(NodeConfig::advanced("stop", "terminator", terminator))
            .with_node(NodeConfig::agent("synthesis", "synthesis"))
            .with_edge(EdgeDef::sequential("refiner", "stop"))
            .with_edge(EdgeDef::sequential("stop", "synthesis"));
        let agents = vec![
            Scripted {
                confidence: Some(0.9),
                ..Scripted::ok("refiner")
            },
            Scripted::ok("synthesis"),
        ];
        let graph = compile(agents, &def, false);
        let result = runner()
            .run(graph, ExecutionState::from_query("q"), RunOptions::new("q"))
            .await;

        assert!(result.success);
        assert_eq!(result.node_execution_order, vec!["refiner", "stop"]);
        assert!(result.terminated_by.unwrap().contains("confidence"));
    }

    #[tokio::test]
    async fn test_cyclic_graph_bounded_by_supersteps() {
        let def = WorkflowDefinition::new("wf-loop", "refiner")
            .with_node(NodeConfig::agent("refiner", "refiner"))
            .with_node(NodeConfig::agent("critic", "critic"))
            .with_edge(EdgeDef::sequential("refiner", "critic"))
            .with_edge(EdgeDef::sequential("critic", "refiner"));
        let graph = compile(default_agents(), &def, true);
        let mut options = RunOptions::new("q");
        options.max_supersteps = 4;
        let result = runner().run(graph, ExecutionState::from_query("q"), options).await;

        assert!(result.success);
        assert_eq!(result.node_execution_order, vec!["refiner", "critic", "refiner", "critic"]);
        let errors = result.final_state.get(keys::ERRORS).unwrap().as_array().unwrap();
        assert!(errors[0]["error"].as_str().unwrap().contains("superstep limit"));
    }

    #[tokio::test]
    async fn test_checkpoints_and_events_per_wave() {
        let checkpoints = Arc::new(CheckpointManager::new(CheckpointSettings {
            enabled: true,
            ..CheckpointSettings::default()
        }));
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let runner = WorkflowRunner::new(bus, Arc::clone(&checkpoints));
        let graph = compile(default_agents(), &four_agent_def(), false);
        let options = RunOptions::new("q").with_thread_id("conv-1").with_execution_id("exec-1");
        let result = runner.run(graph, ExecutionState::from_query("q"), options).await;
        assert!(result.success);

        let listed = checkpoints.list_checkpoints("conv-1");
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[1].step_name, "critic,historian");

        let mut created = 0;
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                WorkflowEvent::CheckpointCreated { .. } => created += 1,
                WorkflowEvent::WorkflowCompleted { nodes_completed, .. } => {
                    completed = true;
                    assert_eq!(nodes_completed, 4);
                }
                _ => {}
            }
        }
        assert_eq!(created, 3);
        assert!(completed);

        assert_eq!(runner.node_timings("exec-1").len(), 4);
        assert_eq!(runner.release_timings("exec-1").len(), 4);
        assert!(runner.node_timings("exec-1").is_empty());
    }

    #[tokio::test]
    async fn test_cancel_aborts_run() {
        let mut agents = default_agents();
        agents[0].delay_ms = 5_000;
        let graph = compile(agents, &four_agent_def(), false);
        let runner = Arc::new(runner());

        let handle = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                runner
                    .run(
                        graph,
                        ExecutionState::from_query("q"),
                        RunOptions::new("q").with_execution_id("exec-cancel"),
                    )
                    .await
            })
        };

        let mut cancelled = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if runner.cancel("exec-cancel") {
                cancelled = true;
                break;
            }
        }
        assert!(cancelled);

        let result = handle.await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("workflow cancelled"));
    }

    #[tokio::test]
    async fn test_sequential_mode_runs_one_at_a_time() {
        let graph = compile(default_agents(), &four_agent_def(), false);
        let mut options = RunOptions::new("q");
        options.parallel = false;
        let result = runner().run(graph, ExecutionState::from_query("q"), options).await;
        assert_eq!(
            result.node_execution_order,
            vec!["refiner", "critic", "historian", "synthesis"]
        );
    }

    #[test]
    fn test_execution_structure_collapses_groups() {
        let groups = vec![
            vec!["a".to_string()],
            vec![],
            vec!["b".to_string(), "c".to_string()],
        ];
        assert_eq!(execution_structure(&groups), json!(["a", ["b", "c"]]));
    }
}
