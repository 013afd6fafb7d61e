//! CLI workflow document subcommands.
//!
//! Provides validate, export, import, list and schema operations for
//! workflow documents. Imported workflows land in `{data_dir}/workflows` and
//! become selectable per turn with `--workflow <id>`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Subcommand, ValueEnum};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use turnflow_core::agent::AgentRegistry;
use turnflow_core::workflow::WorkflowCompiler;
use turnflow_core::workflow::definition::{
    DocumentEncoding, export_document, load_workflow_file, save_workflow_file,
};
use turnflow_infra::workflow::WorkflowLibrary;
use turnflow_types::workflow::WorkflowDefinition;

use crate::state::AppState;

/// Document encoding selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Yaml,
}

impl From<Format> for DocumentEncoding {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => DocumentEncoding::Json,
            Format::Yaml => DocumentEncoding::Yaml,
        }
    }
}

/// Workflow document subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Check a workflow file for structural errors.
    Validate {
        /// Path to a JSON or YAML workflow file.
        file: PathBuf,

        /// Accept cyclic graphs.
        #[arg(long)]
        allow_cycles: bool,
    },

    /// Re-encode a workflow file as a self-describing document.
    Export {
        /// Path to a JSON or YAML workflow file.
        file: PathBuf,

        /// Output encoding.
        #[arg(long, value_enum, default_value = "yaml")]
        format: Format,

        /// Write to this path instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Validate a workflow file and store it in the workflow library.
    Import {
        /// Path to a JSON or YAML workflow file.
        file: PathBuf,

        /// Replace a stored workflow with the same id.
        #[arg(long)]
        force: bool,
    },

    /// List stored workflows.
    #[command(alias = "ls")]
    List,

    /// Print the JSON Schema of a workflow definition.
    Schema,
}

/// Handle a workflow subcommand.
pub async fn handle_workflow_command(cmd: WorkflowCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        WorkflowCommand::Validate { file, allow_cycles } => handle_validate(&file, allow_cycles, state, json),
        WorkflowCommand::Export { file, format, output } => handle_export(&file, format, output.as_deref()),
        WorkflowCommand::Import { file, force } => handle_import(&file, force, state, json),
        WorkflowCommand::List => handle_list(state, json),
        WorkflowCommand::Schema => handle_schema(),
    }
}

fn load(file: &Path) -> Result<WorkflowDefinition> {
    load_workflow_file(file).with_context(|| format!("Failed to load workflow from {}", file.display()))
}

/// Structural validation only; agent references are resolved at turn time.
fn validation_messages(def: &WorkflowDefinition, allow_cycles: bool, state: &AppState) -> Vec<String> {
    let compiler = WorkflowCompiler::new(Arc::new(AgentRegistry::default()), state.config.compiler.clone());
    match compiler.validate(def, allow_cycles || state.config.compiler.allow_cycles) {
        Ok(()) => Vec::new(),
        Err(e) => e.messages,
    }
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

fn handle_validate(file: &Path, allow_cycles: bool, state: &AppState, json: bool) -> Result<()> {
    let def = load(file)?;
    let messages = validation_messages(&def, allow_cycles, state);

    if json {
        let out = serde_json::json!({
            "workflow_id": def.workflow_id,
            "valid": messages.is_empty(),
            "errors": messages,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if messages.is_empty() {
        println!();
        println!(
            "  {} Workflow '{}' is valid ({} nodes, {} edges)",
            style("*").green().bold(),
            style(&def.workflow_id).cyan(),
            def.nodes.len(),
            def.edges.len()
        );
        println!();
    } else {
        println!();
        println!(
            "  {} Workflow '{}' is invalid:",
            style("x").red().bold(),
            style(&def.workflow_id).cyan()
        );
        for message in &messages {
            println!("    - {message}");
        }
        println!();
    }

    if !messages.is_empty() {
        bail!("validation failed with {} error(s)", messages.len());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

fn handle_export(file: &Path, format: Format, output: Option<&Path>) -> Result<()> {
    let def = load(file)?;
    let text = export_document(&def, format.into())?;
    match output {
        Some(path) => {
            std::fs::write(path, &text).with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), workflow_id = %def.workflow_id, "workflow exported");
        }
        None => print!("{text}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

fn handle_import(file: &Path, force: bool, state: &AppState, json: bool) -> Result<()> {
    let def = load(file)?;
    let messages = validation_messages(&def, false, state);
    if !messages.is_empty() {
        bail!("Workflow '{}' is invalid: {}", def.workflow_id, messages.join("; "));
    }

    let dir = state.workflows_dir();
    std::fs::create_dir_all(&dir)?;
    let target = dir.join(format!("{}.yaml", def.workflow_id));
    let existing = WorkflowLibrary::load(&dir)?;
    if existing.get(&def.workflow_id).is_some() && !force {
        bail!(
            "A workflow with id '{}' is already stored; pass --force to replace it",
            def.workflow_id
        );
    }
    save_workflow_file(&target, &def)?;

    if json {
        let out = serde_json::json!({
            "workflow_id": def.workflow_id,
            "path": target.display().to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Imported workflow '{}'",
            style("*").green().bold(),
            style(&def.workflow_id).cyan()
        );
        println!("  Path: {}", target.display());
        println!(
            "  Run it: {}",
            style(format!("tflow turn \"<query>\" --workflow {}", def.workflow_id)).dim()
        );
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let library = WorkflowLibrary::load(&state.workflows_dir())?;
    let defs: Vec<&WorkflowDefinition> = library.ids().into_iter().filter_map(|id| library.get(id)).collect();

    if json {
        let out: Vec<_> = defs
            .iter()
            .map(|d| {
                serde_json::json!({
                    "workflow_id": d.workflow_id,
                    "name": d.name,
                    "version": d.version,
                    "nodes": d.nodes.len(),
                    "edges": d.edges.len(),
                    "entry_point": d.entry_point,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!("  No workflows stored.");
        println!("  Import one with: {}", style("tflow workflow import <file.yaml>").dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Id").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Version"),
            Cell::new("Nodes"),
            Cell::new("Edges"),
            Cell::new("Entry"),
        ]);
    for d in &defs {
        table.add_row(vec![
            Cell::new(&d.workflow_id),
            Cell::new(d.name.as_deref().unwrap_or("-")),
            Cell::new(&d.version),
            Cell::new(d.nodes.len()),
            Cell::new(d.edges.len()),
            Cell::new(&d.entry_point),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

fn handle_schema() -> Result<()> {
    let schema = schemars::schema_for!(WorkflowDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
