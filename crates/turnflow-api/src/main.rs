//! turnflow command-line entry point.
//!
//! Binary name: `tflow`
//!
//! Parses CLI arguments, installs tracing, opens the conversation store and
//! dispatches to the command handlers.

mod agents;
mod cli;
mod state;
mod wizards;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;
use turnflow_observe::tracing_setup::{default_filter, init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(default_filter(cli.verbose, cli.quiet), cli.otel) {
        eprintln!("Warning: tracing setup failed: {e}");
    }

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "tflow", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;
    tracing::debug!(data_dir = %state.data_dir.display(), "application state ready");

    let result = match cli.command {
        Commands::Turn(args) => cli::turn::handle_turn(args, &state, cli.json).await,
        Commands::Workflow { command } => cli::workflow::handle_workflow_command(command, &state, cli.json).await,
        Commands::Conversation { command } => {
            cli::conversation::handle_conversation_command(command, &state, cli.json).await
        }
        Commands::Completions { .. } => Ok(()),
    };

    shutdown_tracing();
    result
}
