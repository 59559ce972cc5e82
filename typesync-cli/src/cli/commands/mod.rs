//! Command handlers and the discovery/planning steps they share

pub mod build;
pub mod cache;
pub mod plan;

use anyhow::{Context, Result};
use colored::*;
use log::warn;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::config::repository::SqliteCache;
use crate::definition::{DefinitionModule, ModuleId, ModuleStore};
use crate::sync::reconcile::deletion_candidates;
use crate::sync::{
    AnalysisReport, BuildPlan, CacheMode, DeletionCandidate, DependencyAnalyzer, DependencyGraph,
    ReconciliationCache,
};

/// Discovered modules with their analysed build plan
pub struct Project {
    pub config: Config,
    pub module_config: Value,
    pub modules: Vec<Arc<dyn DefinitionModule>>,
    pub analysis: AnalysisReport,
    pub graph: DependencyGraph,
    pub plan: BuildPlan,
}

impl Project {
    /// Load configuration, discover modules and order them
    ///
    /// A bad module file or a dependency cycle fails here, before any
    /// remote call.
    pub async fn load(config_path: Option<&Path>) -> Result<Self> {
        let (config, source) = Config::load(config_path)?;
        if let Some(source) = &source {
            println!("Using config: {}", source.display().to_string().cyan());
        }

        let modules = ModuleStore::new(config.module_sources())
            .discover()
            .context("Failed to discover definition modules")?;
        let module_config = config.modules_value()?;

        let analysis = DependencyAnalyzer::new(module_config.clone())
            .analyze(&modules)
            .await;
        for (module, error) in &analysis.failures {
            warn!("{} could not be analysed: {}", module, error);
        }

        let ids: Vec<ModuleId> = modules.iter().map(|m| m.id().clone()).collect();
        let graph = DependencyGraph::build(&ids, &analysis.dependencies);
        let plan = graph.topo_sort().context("Cannot order definition modules")?;

        Ok(Self {
            config,
            module_config,
            modules,
            analysis,
            graph,
            plan,
        })
    }

    pub fn discovered(&self) -> HashSet<ModuleId> {
        self.modules.iter().map(|m| m.id().clone()).collect()
    }
}

/// Open the sqlite cache at the configured path
pub async fn open_cache(config: &Config) -> Result<Arc<SqliteCache>> {
    let cache = SqliteCache::open(&config.build.cache_path)
        .await
        .with_context(|| {
            format!(
                "Failed to open sync cache: {}",
                config.build.cache_path.display()
            )
        })?;
    Ok(Arc::new(cache))
}

/// Deletion candidates from the persisted cache, without writing anything
pub async fn pending_deletions(
    config: &Config,
    discovered: &HashSet<ModuleId>,
) -> Result<Vec<DeletionCandidate>> {
    if !config.build.cache_path.exists() {
        return Ok(Vec::new());
    }
    let store = open_cache(config).await?;
    let cache = ReconciliationCache::load(store, CacheMode::ReadOnly).await?;
    Ok(deletion_candidates(&cache, discovered))
}
