//! Command line interface

pub mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::build::BuildArgs;
use commands::cache::CacheCommands;
use commands::plan::PlanArgs;

/// Declarative content-type definitions reconciled against a remote schema service
#[derive(Parser, Debug)]
#[command(name = "typesync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to typesync.toml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synchronise every definition module with the remote service
    Build(BuildArgs),

    /// Show the build order and pending deletions without touching the remote
    Plan(PlanArgs),

    /// Inspect or reset the local sync cache
    #[command(subcommand)]
    Cache(CacheCommands),
}

/// Run the parsed command; `Ok(false)` means it finished but did not succeed
pub async fn run(cli: Cli) -> Result<bool> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Build(args) => commands::build::handle_build_command(args, config_path).await,
        Commands::Plan(args) => commands::plan::handle_plan_command(args, config_path).await,
        Commands::Cache(command) => commands::cache::handle_cache_command(command, config_path).await,
    }
}
