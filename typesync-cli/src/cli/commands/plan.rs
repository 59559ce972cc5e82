//! Plan command handler: dry run without remote calls

use anyhow::Result;
use clap::Args;
use colored::*;
use std::path::Path;

use super::{Project, pending_deletions};

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Also list lookups that resolve to content types no module defines
    #[arg(long)]
    pub show_external: bool,
}

/// Handle the plan command
pub async fn handle_plan_command(args: PlanArgs, config_path: Option<&Path>) -> Result<bool> {
    let project = Project::load(config_path).await?;

    if project.plan.is_empty() {
        println!("{}", "No definition modules found".yellow());
    } else {
        println!("{}", "Build order:".bold());
        for (index, module) in project.plan.order().iter().enumerate() {
            let dependencies = project.plan.dependencies_of(module);
            let marker = if project.analysis.failed(module) {
                " (analysis failed)".red().to_string()
            } else {
                String::new()
            };

            if dependencies.is_empty() {
                println!("  {:>3}. {}{}", index + 1, module, marker);
            } else {
                let names: Vec<String> = dependencies.iter().map(|d| d.to_string()).collect();
                println!(
                    "  {:>3}. {}{} {} {}",
                    index + 1,
                    module,
                    marker,
                    "<-".dimmed(),
                    names.join(", ").dimmed()
                );
            }
        }
    }

    if args.show_external {
        let external = project.graph.external_references();
        if !external.is_empty() {
            println!();
            println!("{}", "Lookups resolved from the remote service:".bold());
            for (module, target) in external {
                println!("  {} -> {}", module, target);
            }
        }
    }

    let candidates = pending_deletions(&project.config, &project.discovered()).await?;
    if !candidates.is_empty() {
        println!();
        println!("{}", "Would be deleted on build:".yellow().bold());
        for candidate in &candidates {
            println!("  {} ({})", candidate.module, candidate.remote_id.dimmed());
        }
    }

    Ok(project.analysis.failures.is_empty())
}
