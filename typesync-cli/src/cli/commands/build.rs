//! Build command handler

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use dialoguer::Confirm;
use is_terminal::IsTerminal;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use super::{Project, open_cache};
use crate::api::{ConcurrencyConfig, HttpSchemaClient, RetryPolicy, RetryingRemote};
use crate::sync::{
    BuildOptions, BuildOutcome, BuildStatus, CacheMode, DeletionCandidate, DeletionOutcome,
    Orchestrator, RunReport,
};

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Never delete remote content types or fields
    #[arg(long)]
    pub skip_deletion: bool,

    /// Ignore cached fingerprints for this run (results are still cached)
    #[arg(long)]
    pub no_cache: bool,

    /// Maximum number of modules built at once
    #[arg(long, conflicts_with = "auto_concurrency")]
    pub concurrency: Option<usize>,

    /// Start every ready module at once
    #[arg(long)]
    pub auto_concurrency: bool,

    /// Delete orphaned content types and undeclared fields without asking
    #[arg(long)]
    pub skip_deletion_confirmation: bool,
}

impl BuildArgs {
    fn concurrency_config(&self, configured: ConcurrencyConfig) -> ConcurrencyConfig {
        if self.auto_concurrency {
            ConcurrencyConfig::auto()
        } else if let Some(max) = self.concurrency {
            ConcurrencyConfig::limited(max)
        } else {
            configured
        }
    }

    fn cache_mode(&self) -> CacheMode {
        if self.no_cache {
            CacheMode::WriteOnly
        } else {
            CacheMode::ReadWrite
        }
    }
}

/// How remote deletions are handled during and after a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeletionPermission {
    Suppressed,
    Permitted,
    Ask,
}

impl DeletionPermission {
    /// Fields are deleted mid-build, so there is no one to ask
    fn deletes_fields(self) -> bool {
        self == DeletionPermission::Permitted
    }
}

fn deletion_permission(args: &BuildArgs, interactive: bool) -> DeletionPermission {
    if args.skip_deletion {
        DeletionPermission::Suppressed
    } else if args.skip_deletion_confirmation {
        DeletionPermission::Permitted
    } else if interactive {
        DeletionPermission::Ask
    } else {
        DeletionPermission::Suppressed
    }
}

/// Handle the build command
pub async fn handle_build_command(args: BuildArgs, config_path: Option<&Path>) -> Result<bool> {
    let start = Instant::now();
    let project = Project::load(config_path).await?;
    let config = &project.config;

    println!(
        "Building {} module(s) in dependency order",
        project.plan.len().to_string().bold()
    );

    let client = HttpSchemaClient::new(config.base_url()?, config.api_token(|n| std::env::var(n).ok())?)
        .context("Failed to create schema client")?;
    let resilience = config.resilience();
    let remote = Arc::new(RetryingRemote::new(
        Arc::new(client),
        RetryPolicy::new(resilience.retry),
    ));
    let store = open_cache(config).await?;

    let interactive = std::io::stdin().is_terminal() && std::io::stdout().is_terminal();
    let permission = deletion_permission(&args, interactive);

    let options = BuildOptions {
        skip_field_deletion: !permission.deletes_fields(),
        cache_mode: args.cache_mode(),
        concurrency: args.concurrency_config(resilience.concurrency),
        config: project.module_config.clone(),
    };
    if args.no_cache {
        info!("Ignoring cached fingerprints for this run");
    }

    let orchestrator = Orchestrator::prepare(project.modules.clone(), remote, store, options).await?;

    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted: finishing running modules...".yellow());
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let mut report = orchestrator.run(&project.plan).await;
    print_results(&report);

    if !report.deletion_candidates.is_empty() {
        let permitted = match permission {
            DeletionPermission::Permitted => true,
            DeletionPermission::Ask => confirm_deletions(&report.deletion_candidates)?,
            DeletionPermission::Suppressed => {
                if args.skip_deletion {
                    warn!(
                        "Leaving {} orphaned content type(s) in place (--skip-deletion)",
                        report.deletion_candidates.len()
                    );
                } else {
                    warn!("Not deleting without confirmation in a non-interactive session; pass --skip-deletion-confirmation to allow it");
                }
                false
            }
        };

        if permitted {
            orchestrator.delete_candidates(&mut report).await;
        }
        print_deletions(&report);
    }

    print_summary(&report, start);
    Ok(report.is_success())
}

fn confirm_deletions(candidates: &[DeletionCandidate]) -> Result<bool> {
    println!();
    println!("{}", "These content types no longer have a definition:".yellow());
    for candidate in candidates {
        println!("  {} ({})", candidate.module, candidate.remote_id.dimmed());
    }

    let confirmed = Confirm::new()
        .with_prompt(format!("Delete {} content type(s) remotely?", candidates.len()))
        .default(false)
        .interact()?;
    Ok(confirmed)
}

fn print_results(report: &RunReport) {
    println!();
    for result in &report.results {
        let status = result.outcome.status();
        let label = format!("{:<9}", status.as_str());
        let label = match status {
            BuildStatus::Created => label.green(),
            BuildStatus::Updated => label.cyan(),
            BuildStatus::Unchanged => label.dimmed(),
            BuildStatus::Failed => label.red().bold(),
            BuildStatus::Blocked => label.yellow(),
        };

        match &result.outcome {
            BuildOutcome::Created { remote_id }
            | BuildOutcome::Updated { remote_id }
            | BuildOutcome::Unchanged { remote_id } => {
                println!("  {} {} {}", label, result.module, remote_id.dimmed());
            }
            BuildOutcome::Failed { error } => {
                println!("  {} {}: {}", label, result.module, error);
            }
            BuildOutcome::Blocked { reason } => {
                println!("  {} {} ({})", label, result.module, reason);
            }
        }
    }
}

fn print_deletions(report: &RunReport) {
    for deletion in &report.deletions {
        match &deletion.outcome {
            DeletionOutcome::Deleted => {
                println!("  {} {}", format!("{:<9}", "deleted").red(), deletion.candidate.module)
            }
            DeletionOutcome::AlreadyGone => println!(
                "  {} {} (already gone)",
                format!("{:<9}", "deleted").dimmed(),
                deletion.candidate.module
            ),
            DeletionOutcome::Failed { error } => println!(
                "  {} {}: {}",
                format!("{:<9}", "failed").red().bold(),
                deletion.candidate.module,
                error
            ),
        }
    }

    let pending = report.pending_deletions();
    if !pending.is_empty() {
        println!(
            "  {} orphaned content type(s) left in place: {}",
            pending.len().to_string().yellow(),
            pending
                .iter()
                .map(|c| c.module.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
}

fn print_summary(report: &RunReport, start: Instant) {
    let summary = report.summary();
    println!();
    println!(
        "{} created, {} updated, {} unchanged, {} failed, {} blocked, {} deleted in {:.1}s",
        summary.created.to_string().green(),
        summary.updated.to_string().cyan(),
        summary.unchanged,
        summary.failed.to_string().red(),
        summary.blocked.to_string().yellow(),
        summary.deleted,
        start.elapsed().as_secs_f64()
    );

    if report.cancelled {
        println!("{}", "Build was cancelled".yellow().bold());
    } else if report.is_success() {
        println!("{}", "Build succeeded".green().bold());
    } else {
        println!("{}", "Build finished with errors".red().bold());
    }
}
