//! Dependency analysis by shadow execution
//!
//! Every module's entry point runs once with a [`ShadowContext`]. Lookups
//! are recorded as dependency edges and answered with a placeholder id, so
//! the module body completes without any remote I/O.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, warn};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::definition::{BuildContext, DefinitionModule, ModuleId};

/// Build context that records lookups instead of resolving them
pub struct ShadowContext {
    module: ModuleId,
    config: Value,
    recorded: Mutex<BTreeSet<ModuleId>>,
}

impl ShadowContext {
    pub fn new(module: ModuleId, config: Value) -> Self {
        Self {
            module,
            config,
            recorded: Mutex::new(BTreeSet::new()),
        }
    }

    /// Placeholder returned for a lookup during shadow execution
    pub fn placeholder(target: &ModuleId) -> String {
        format!("shadow-{}-{}", target.kind, target.name)
    }

    /// Lookups recorded so far
    pub fn recorded(&self) -> BTreeSet<ModuleId> {
        self.recorded
            .lock()
            .map(|set| set.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BuildContext for ShadowContext {
    fn module_id(&self) -> &ModuleId {
        &self.module
    }

    fn config(&self) -> &Value {
        &self.config
    }

    async fn resolve(&self, target: &ModuleId) -> Result<String> {
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.insert(target.clone());
        }
        Ok(Self::placeholder(target))
    }
}

/// Outcome of analysing every module
#[derive(Debug, Clone, Default)]
pub struct AnalysisReport {
    /// Lookups each module performed; failed modules map to an empty set
    pub dependencies: HashMap<ModuleId, BTreeSet<ModuleId>>,
    /// Modules whose shadow execution failed, with the error
    pub failures: Vec<(ModuleId, String)>,
}

impl AnalysisReport {
    pub fn failed(&self, module: &ModuleId) -> bool {
        self.failures.iter().any(|(id, _)| id == module)
    }
}

/// Runs shadow executions to infer the dependency graph
pub struct DependencyAnalyzer {
    config: Value,
}

impl DependencyAnalyzer {
    pub fn new(config: Value) -> Self {
        Self { config }
    }

    /// Analyse all modules concurrently
    ///
    /// A failing module is logged and given no dependencies; the same error
    /// will surface again when the module is built for real.
    pub async fn analyze(&self, modules: &[Arc<dyn DefinitionModule>]) -> AnalysisReport {
        let runs = modules.iter().map(|module| {
            let ctx = Arc::new(ShadowContext::new(module.id().clone(), self.config.clone()));
            let module = module.clone();
            async move {
                let result = module.build(ctx.clone()).await;
                (module.id().clone(), result.map(|_| ctx.recorded()))
            }
        });

        let mut report = AnalysisReport::default();
        for (id, result) in join_all(runs).await {
            match result {
                Ok(recorded) => {
                    debug!("{} looks up {} module(s)", id, recorded.len());
                    report.dependencies.insert(id, recorded);
                }
                Err(e) => {
                    warn!("Dependency analysis failed for {}: {:#}", id, e);
                    report.failures.push((id.clone(), format!("{:#}", e)));
                    report.dependencies.insert(id, BTreeSet::new());
                }
            }
        }
        report
    }
}
