//! Flatsync CLI - shared household lists from the terminal
//!
//! Every command works against the local store first; `flatsync sync`
//! exchanges queued changes with the server.

mod auth;
mod cli;
mod commands;
mod config_profiles;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::CommandContext;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::delete::run_delete;
use crate::commands::expense::run_expense;
use crate::commands::household::run_household;
use crate::commands::shopping::run_shopping;
use crate::commands::sync::run_sync_command;
use crate::commands::todo::run_todo;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "flatsync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = CommandContext::load(cli.db_path, cli.profile.as_deref(), cli.household)?;

    match cli.command {
        Commands::Todo { command } => run_todo(command, &context).await?,
        Commands::Shopping { command } => run_shopping(command, &context).await?,
        Commands::Expense { command } => run_expense(command, &context).await?,
        Commands::Delete { entity_type, id } => run_delete(entity_type, &id, &context).await?,
        Commands::Household { command } => run_household(command, &context).await?,
        Commands::Sync { command, json } => run_sync_command(command, json, &context).await?,
        Commands::Config { command } => run_config(command, cli.profile.as_deref(), &context)?,
        Commands::Auth { command } => run_auth(command, &context)?,
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref())?,
    }

    Ok(())
}
