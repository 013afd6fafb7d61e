//! `tflow turn`: run one conversational turn end to end.
//!
//! Wires the turn pipeline with the built-in collaborators: the
//! pending-action normalizer over the demo wizards, the passthrough
//! classifier and the config planner. Agents are echo agents.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use console::style;
use serde_json::{Map, Value};

use turnflow_core::event::EventBus;
use turnflow_core::pipeline::{ConfigPlanner, PassthroughClassifier, TurnPipeline};
use turnflow_core::wizard::PendingActionNormalizer;
use turnflow_core::workflow::{CheckpointManager, WorkflowCompiler, WorkflowRunner};
use turnflow_infra::workflow::WORKFLOW_SELECTOR_KEY;
use turnflow_types::event::WorkflowEvent;
use turnflow_types::state::keys;
use turnflow_types::turn::TurnRequest;

use crate::agents::{DEFAULT_AGENTS, demo_registry};
use crate::state::AppState;
use crate::wizards::demo_wizards;

#[derive(Args)]
pub struct TurnArgs {
    /// The user's message.
    pub query: String,

    /// Conversation to continue (a new id is minted when omitted).
    #[arg(long, short)]
    pub conversation: Option<String>,

    /// Agents to run, comma-separated.
    #[arg(long, value_delimiter = ',')]
    pub agents: Vec<String>,

    /// Graph pattern (standard, parallel, conditional, sequential, data_query).
    #[arg(long)]
    pub pattern: Option<String>,

    /// Run a stored workflow by id instead of a pattern.
    #[arg(long)]
    pub workflow: Option<String>,

    /// Extra execution config as a JSON object.
    #[arg(long)]
    pub config: Option<String>,
}

impl TurnArgs {
    /// Execution config overrides assembled from the flags.
    fn overrides(&self) -> Result<Option<Map<String, Value>>> {
        let mut overrides = match &self.config {
            Some(raw) => match serde_json::from_str::<Value>(raw).context("--config is not valid JSON")? {
                Value::Object(map) => map,
                _ => return Err(anyhow!("--config must be a JSON object")),
            },
            None => Map::new(),
        };
        if let Some(pattern) = &self.pattern {
            overrides.insert("graph_pattern".to_string(), Value::String(pattern.to_lowercase()));
        }
        if let Some(workflow) = &self.workflow {
            overrides.insert(WORKFLOW_SELECTOR_KEY.to_string(), Value::String(workflow.clone()));
        }
        Ok((!overrides.is_empty()).then_some(overrides))
    }
}

/// Agents for this run: flags, then `config.toml`, then the defaults.
fn resolve_agents(args: &TurnArgs, state: &AppState) -> Vec<String> {
    if !args.agents.is_empty() {
        return args.agents.clone();
    }
    if !state.config.pipeline.default_agents.is_empty() {
        return state.config.pipeline.default_agents.clone();
    }
    DEFAULT_AGENTS.iter().map(|s| s.to_string()).collect()
}

pub async fn handle_turn(args: TurnArgs, state: &AppState, json: bool) -> Result<()> {
    let agents = resolve_agents(&args, state);
    let registry = Arc::new(demo_registry(&agents));

    let compiler = WorkflowCompiler::new(Arc::clone(&registry), state.config.compiler.clone());
    let event_bus = EventBus::new(state.config.pipeline.event_capacity);
    let mut events = event_bus.subscribe();
    let runner = Arc::new(WorkflowRunner::new(
        event_bus,
        Arc::new(CheckpointManager::new(state.config.checkpoint.clone())),
    ));
    let mut settings = state.config.pipeline.clone();
    settings.default_agents = agents.clone();

    let library = state.workflow_library(registry, agents)?;
    let pipeline = TurnPipeline::new(
        PendingActionNormalizer::new(Arc::new(demo_wizards())),
        PassthroughClassifier,
        ConfigPlanner,
        state.store.clone(),
        compiler,
        runner,
        settings,
    )
    .with_source(Arc::new(library));

    let mut request = TurnRequest::new(args.query.clone());
    request.conversation_id = args.conversation.clone();
    request.execution_config = args.overrides()?;

    let response = match pipeline.execute(request).await {
        Ok(response) => response,
        Err(e) => {
            if !json {
                eprintln!("  {} {}", style("x").red().bold(), e.user_message());
            }
            return Err(anyhow!(e));
        }
    };

    let mut node_events = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            WorkflowEvent::NodeCompleted { node_id, duration_ms, .. } => {
                node_events.push(format!("{node_id} ok ({duration_ms} ms)"));
            }
            WorkflowEvent::NodeFailed { node_id, error, .. } => {
                node_events.push(format!("{node_id} failed: {error}"));
            }
            _ => {}
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let exec = &response.execution_state;
    println!();
    println!("{}", response.text);
    println!();
    println!(
        "  {} conversation {}  route {}{}",
        style("*").green().bold(),
        style(&response.conversation_id).cyan(),
        exec.route().unwrap_or("-"),
        exec.next_node()
            .map(|n| format!("  next {n}"))
            .unwrap_or_default()
    );
    if exec.get_flag(keys::PENDING_ACTION_RESUME_TURN) {
        println!("  {}", style("resumed a pending action").dim());
    }
    for line in &node_events {
        println!("  {}", style(line).dim());
    }
    println!();
    Ok(())
}
