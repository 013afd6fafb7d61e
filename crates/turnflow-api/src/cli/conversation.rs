//! CLI conversation state subcommands.

use anyhow::{Result, anyhow, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use turnflow_core::pipeline::ConversationStateStore;
use turnflow_core::pipeline::snapshot;
use turnflow_types::state::{ExecutionState, keys};

use crate::state::AppState;
use crate::wizards::demo_wizards;

#[derive(Subcommand)]
pub enum ConversationCommand {
    /// List recently updated conversations.
    #[command(alias = "ls")]
    List {
        /// Maximum number of conversations to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show the persisted state of a conversation.
    Show {
        conversation_id: String,
    },

    /// Delete a conversation's persisted state.
    #[command(alias = "rm")]
    Delete {
        conversation_id: String,
    },

    /// Start a wizard flow so the next turn answers its first step.
    Await {
        conversation_id: String,

        /// Wizard flow type.
        #[arg(long, default_value = crate::wizards::CONFIRM_TABLE_FLOW)]
        flow: String,

        /// Resource the flow operates on.
        #[arg(long)]
        resource: Option<String>,
    },
}

pub async fn handle_conversation_command(cmd: ConversationCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ConversationCommand::List { limit } => handle_list(limit, state, json).await,
        ConversationCommand::Show { conversation_id } => handle_show(&conversation_id, state, json).await,
        ConversationCommand::Delete { conversation_id } => handle_delete(&conversation_id, state, json).await,
        ConversationCommand::Await {
            conversation_id,
            flow,
            resource,
        } => handle_await(&conversation_id, &flow, resource.as_deref(), state, json).await,
    }
}

async fn load_state(conversation_id: &str, state: &AppState) -> Result<Option<ExecutionState>> {
    let raw = state
        .store
        .load(conversation_id)
        .await
        .map_err(|e| anyhow!("Failed to load conversation: {e}"))?;
    Ok(raw.map(snapshot::unwrap))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list(limit: u32, state: &AppState, json: bool) -> Result<()> {
    let conversations = state
        .store
        .list(limit)
        .await
        .map_err(|e| anyhow!("Failed to list conversations: {e}"))?;

    if json {
        let out: Vec<_> = conversations
            .iter()
            .map(|c| {
                serde_json::json!({
                    "conversation_id": c.conversation_id,
                    "created_at": c.created_at.to_rfc3339(),
                    "updated_at": c.updated_at.to_rfc3339(),
                    "size_bytes": c.size_bytes,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if conversations.is_empty() {
        println!();
        println!("  No conversations stored.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Conversation").fg(Color::Cyan),
            Cell::new("Updated"),
            Cell::new("Created"),
            Cell::new("Size"),
        ]);
    for c in &conversations {
        table.add_row(vec![
            Cell::new(&c.conversation_id),
            Cell::new(c.updated_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(c.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(format!("{} B", c.size_bytes)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

async fn handle_show(conversation_id: &str, state: &AppState, json: bool) -> Result<()> {
    let exec = load_state(conversation_id, state)
        .await?
        .ok_or_else(|| anyhow!("Conversation '{conversation_id}' not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&exec)?);
        return Ok(());
    }

    let field = |key: &str| exec.get_str(key).unwrap_or("-").to_string();
    println!();
    println!("  Conversation {}", style(conversation_id).cyan().bold());
    println!("  Query:        {}", field(keys::QUERY));
    println!("  Route:        {}", field(keys::ROUTE));
    println!("  Entry point:  {}", field(keys::ENTRY_POINT));
    println!("  Next node:    {}", field(keys::NEXT_NODE));
    println!("  Route locked: {}", exec.route_locked());
    match exec.pending_action() {
        Some(action) => println!(
            "  Pending:      {} (step {}, awaiting: {})",
            style(&action.action_type).yellow(),
            action.step().unwrap_or("-"),
            action.awaiting
        ),
        None => println!("  Pending:      -"),
    }
    println!("  Successful:   {}", exec.string_list(keys::SUCCESSFUL_AGENTS).join(", "));
    let failed = exec.string_list(keys::FAILED_AGENTS);
    if !failed.is_empty() {
        println!("  Failed:       {}", style(failed.join(", ")).red());
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

async fn handle_delete(conversation_id: &str, state: &AppState, json: bool) -> Result<()> {
    let deleted = state
        .store
        .delete(conversation_id)
        .await
        .map_err(|e| anyhow!("Failed to delete conversation: {e}"))?;

    if json {
        let out = serde_json::json!({"conversation_id": conversation_id, "deleted": deleted});
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if deleted {
        println!("  {} Deleted conversation '{conversation_id}'", style("*").green().bold());
    } else {
        println!("  Conversation '{conversation_id}' not found.");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Await
// ---------------------------------------------------------------------------

async fn handle_await(
    conversation_id: &str,
    flow_type: &str,
    resource: Option<&str>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let wizards = demo_wizards();
    let Some(flow) = wizards.get(flow_type) else {
        bail!("Unknown wizard flow '{flow_type}'");
    };
    let Some(action) = flow.start(resource) else {
        bail!("Wizard flow '{flow_type}' has no steps");
    };
    let prompt = flow.first_step().map(|s| s.prompt.clone()).unwrap_or_default();

    let mut exec = load_state(conversation_id, state).await?.unwrap_or_default();
    exec.set_str(keys::CONVERSATION_ID, conversation_id);
    exec.set_pending_action(Some(&action));
    state
        .store
        .save(conversation_id, &snapshot::wrap(&exec))
        .await
        .map_err(|e| anyhow!("Failed to save conversation: {e}"))?;

    if json {
        let out = serde_json::json!({
            "conversation_id": conversation_id,
            "pending_action": action.to_value(),
            "prompt": prompt,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!("  {} {prompt}", style("?").yellow().bold());
        println!(
            "  Answer with: {}",
            style(format!("tflow turn \"<answer>\" --conversation {conversation_id}")).dim()
        );
        println!();
    }
    Ok(())
}
