//! CLI command definitions for the `tflow` binary.
//!
//! Uses clap derive macros. Commands follow a noun-verb pattern
//! (e.g. `tflow workflow validate`, `tflow conversation show`).

pub mod conversation;
pub mod turn;
pub mod workflow;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use conversation::ConversationCommand;
use turn::TurnArgs;
use workflow::WorkflowCommand;

/// Run conversational workflow turns and manage workflow documents.
#[derive(Parser)]
#[command(name = "tflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans to stdout through OpenTelemetry.
    #[arg(long, global = true, env = "TURNFLOW_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one conversational turn.
    Turn(TurnArgs),

    /// Validate, convert and store workflow documents.
    #[command(alias = "wf")]
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommand,
    },

    /// Inspect persisted conversation state.
    #[command(alias = "conv")]
    Conversation {
        #[command(subcommand)]
        command: ConversationCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}
