//! Cache maintenance commands

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use std::path::Path;

use super::open_cache;
use crate::config::Config;
use crate::sync::CacheStore;

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// List cached modules with their remote ids and fingerprints
    List,
    /// Remove every cache entry; the next build re-checks every module
    Clear,
}

/// Handle cache subcommands
pub async fn handle_cache_command(command: CacheCommands, config_path: Option<&Path>) -> Result<bool> {
    let (config, _) = Config::load(config_path)?;

    if !config.build.cache_path.exists() {
        println!(
            "No sync cache at {}",
            config.build.cache_path.display().to_string().cyan()
        );
        return Ok(true);
    }

    let cache = open_cache(&config).await?;

    match command {
        CacheCommands::List => {
            let entries = cache.entries().await?;
            if entries.is_empty() {
                println!("{}", "Sync cache is empty".dimmed());
                return Ok(true);
            }

            println!(
                "{:<32} {:<24} {:<14} {}",
                "MODULE".bold(),
                "REMOTE ID".bold(),
                "FINGERPRINT".bold(),
                "SYNCED AT".bold()
            );
            for (module, entry) in entries {
                println!(
                    "{:<32} {:<24} {:<14} {}",
                    module.to_string(),
                    entry.remote_id,
                    entry.fingerprint.chars().take(12).collect::<String>(),
                    entry.synced_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
                );
            }
        }
        CacheCommands::Clear => {
            let removed = cache.clear().await?;
            println!("Removed {} cache entr{}", removed, if removed == 1 { "y" } else { "ies" });
        }
    }

    Ok(true)
}
