//! Build orchestration
//!
//! Runs a build plan against the remote service:
//! - Modules start as soon as every planned dependency has synced
//! - At most `max_concurrent_modules` builds are in flight at once
//! - A failed or blocked module blocks everything that depends on it
//! - Each module is synchronised at most once per run, whether it was
//!   scheduled from the plan or looked up by another module first

use anyhow::{Context, Result};
use futures::FutureExt;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinSet;

use super::cache::{CacheMode, CacheStore, ReconciliationCache};
use super::context::RealContext;
use super::dependency_graph::BuildPlan;
use super::fingerprint::{DesiredState, self_synced_fingerprint};
use super::reconcile::{Decision, Reconciler, RemoteState, decide, deletion_candidates};
use super::report::RunReport;
use super::types::{BlockReason, BuildOutcome, Change, ModuleResult, SyncOutcome};
use crate::api::{ConcurrencyConfig, ConcurrencyLimiter, RemoteService};
use crate::definition::{DefinitionModule, ModuleId, ModuleOutput};

/// Options for one build run
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Leave undeclared remote fields in place instead of deleting them
    pub skip_field_deletion: bool,
    pub cache_mode: CacheMode,
    pub concurrency: ConcurrencyConfig,
    /// Project configuration exposed to modules
    pub config: Value,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            skip_field_deletion: false,
            cache_mode: CacheMode::ReadWrite,
            concurrency: ConcurrencyConfig::default(),
            config: Value::Object(Default::default()),
        }
    }
}

type Memo = OnceCell<Result<SyncOutcome, String>>;

/// Run-scoped state shared by the scheduler and every build context
pub(super) struct Shared {
    modules: HashMap<ModuleId, Arc<dyn DefinitionModule>>,
    memo: HashMap<ModuleId, Memo>,
    reconciler: Reconciler,
    cache: ReconciliationCache,
    remote_state: RwLock<RemoteState>,
    config: Value,
    /// Module whose build is blocked -> modules it is waiting on
    waits: Mutex<HashMap<ModuleId, HashSet<ModuleId>>>,
}

impl Shared {
    pub(super) fn config(&self) -> &Value {
        &self.config
    }

    pub(super) fn is_managed(&self, id: &ModuleId) -> bool {
        self.modules.contains_key(id)
    }

    pub(super) async fn resolve_unmanaged(&self, target: &ModuleId) -> Result<String> {
        let state = self.remote_state.read().await;
        match state.find_unmanaged(target) {
            Some(resource) => {
                debug!("Resolved unmanaged {} to {}", target, resource.id);
                Ok(resource.id.clone())
            }
            None => anyhow::bail!("No module or remote content type found for {}", target),
        }
    }

    /// Register that `waiter`'s build is about to wait for `target`
    ///
    /// Fails instead of waiting when `target` is (transitively) waiting for
    /// `waiter` already, which would never complete.
    pub(super) fn begin_wait(
        self: &Arc<Self>,
        waiter: &ModuleId,
        target: &ModuleId,
    ) -> Result<WaitGuard> {
        let mut waits = self
            .waits
            .lock()
            .map_err(|_| anyhow::anyhow!("Wait graph lock poisoned"))?;

        if let Some(path) = wait_path(&waits, target, waiter) {
            let mut cycle = vec![waiter.to_string()];
            cycle.extend(path.iter().map(|id| id.to_string()));
            anyhow::bail!("Circular reference detected: {}", cycle.join(" -> "));
        }

        waits
            .entry(waiter.clone())
            .or_default()
            .insert(target.clone());

        Ok(WaitGuard {
            shared: self.clone(),
            waiter: waiter.clone(),
            target: target.clone(),
        })
    }

    /// Synchronise a module, at most once per run
    pub(super) async fn ensure_synced(self: &Arc<Self>, id: &ModuleId) -> Result<SyncOutcome, String> {
        let memo = self
            .memo
            .get(id)
            .ok_or_else(|| format!("{} is not a discovered module", id))?;

        memo.get_or_init(|| async {
            let result = self.sync_module(id).await.map_err(|e| format!("{:#}", e));
            match &result {
                Ok(outcome) => debug!("{} synced ({:?})", id, outcome.change),
                Err(e) => warn!("{} failed: {}", id, e),
            }
            result
        })
        .await
        .clone()
    }

    async fn sync_module(self: &Arc<Self>, id: &ModuleId) -> Result<SyncOutcome> {
        let module = self
            .modules
            .get(id)
            .with_context(|| format!("{} is not a discovered module", id))?
            .clone();

        let ctx = Arc::new(RealContext::new(id.clone(), self.clone()));
        let output = module.build(ctx).await?;

        match output {
            ModuleOutput::Definition(definition) => {
                let desired = DesiredState::from_definition(id, &definition)?;
                let fingerprint = desired.fingerprint();

                let (decision, current) = {
                    let state = self.remote_state.read().await;
                    let decision = decide(&desired, &fingerprint, self.cache.get(id), &state);
                    let current = match &decision {
                        Decision::Update { remote_id } => state.get(remote_id).cloned(),
                        _ => None,
                    };
                    (decision, current)
                };
                debug!("{}: {:?}", id, decision);

                let applied = self
                    .reconciler
                    .apply(&desired, &decision, current.as_ref())
                    .await?;

                debug!("{}: {} remote mutation(s)", id, applied.mutations);
                if let Some(resource) = applied.resource {
                    self.remote_state.write().await.upsert(resource);
                }

                // Not settled yet: the next run has to look at the fields again
                if applied.retained_fields.is_empty() {
                    self.cache
                        .record(id, &fingerprint, &applied.outcome.remote_id)
                        .await
                        .with_context(|| format!("Failed to record cache entry for {}", id))?;
                }

                Ok(applied.outcome)
            }
            ModuleOutput::Synced(remote_id) => {
                let change = match self.cache.get(id) {
                    None => Change::Created,
                    Some(entry) if entry.remote_id == remote_id => Change::Unchanged,
                    Some(_) => Change::Updated,
                };
                self.cache
                    .record(id, &self_synced_fingerprint(&remote_id), &remote_id)
                    .await
                    .with_context(|| format!("Failed to record cache entry for {}", id))?;

                Ok(SyncOutcome { remote_id, change })
            }
        }
    }
}

/// Path of wait edges from `from` to `to`, both ends included
fn wait_path(
    waits: &HashMap<ModuleId, HashSet<ModuleId>>,
    from: &ModuleId,
    to: &ModuleId,
) -> Option<Vec<ModuleId>> {
    if from == to {
        return Some(vec![to.clone()]);
    }

    let mut stack: Vec<(ModuleId, Vec<ModuleId>)> = vec![(from.clone(), vec![from.clone()])];
    let mut seen = HashSet::new();
    while let Some((node, path)) = stack.pop() {
        if !seen.insert(node.clone()) {
            continue;
        }
        for next in waits.get(&node).into_iter().flatten() {
            let mut next_path = path.clone();
            next_path.push(next.clone());
            if next == to {
                return Some(next_path);
            }
            stack.push((next.clone(), next_path));
        }
    }
    None
}

/// Removes a wait edge when the lookup completes
pub(super) struct WaitGuard {
    shared: Arc<Shared>,
    waiter: ModuleId,
    target: ModuleId,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if let Ok(mut waits) = self.shared.waits.lock() {
            if let Some(targets) = waits.get_mut(&self.waiter) {
                targets.remove(&self.target);
                if targets.is_empty() {
                    waits.remove(&self.waiter);
                }
            }
        }
    }
}

/// Executes build plans for one run
pub struct Orchestrator {
    shared: Arc<Shared>,
    limiter: ConcurrencyLimiter,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Load the remote snapshot and the cache for a run over `modules`
    pub async fn prepare(
        modules: Vec<Arc<dyn DefinitionModule>>,
        remote: Arc<dyn RemoteService>,
        store: Arc<dyn CacheStore>,
        options: BuildOptions,
    ) -> Result<Self> {
        let resources = remote
            .list_resources()
            .await
            .context("Failed to list remote content types")?;
        info!("Remote has {} content type(s)", resources.len());

        let cache = ReconciliationCache::load(store, options.cache_mode)
            .await
            .context("Failed to load sync cache")?;

        let memo = modules
            .iter()
            .map(|m| (m.id().clone(), OnceCell::new()))
            .collect();
        let modules = modules.into_iter().map(|m| (m.id().clone(), m)).collect();

        let shared = Arc::new(Shared {
            modules,
            memo,
            reconciler: Reconciler::new(remote, options.skip_field_deletion),
            cache,
            remote_state: RwLock::new(RemoteState::new(resources)),
            config: options.config,
            waits: Mutex::new(HashMap::new()),
        });

        Ok(Self {
            shared,
            limiter: ConcurrencyLimiter::new(options.concurrency),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that stops scheduling new modules once set
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Build every module in `plan` and collect deletion candidates
    ///
    /// Nothing is deleted here; see [`Orchestrator::delete_candidates`].
    pub async fn run(&self, plan: &BuildPlan) -> RunReport {
        let mut outcomes: HashMap<ModuleId, BuildOutcome> = HashMap::new();
        let mut pending: Vec<ModuleId> = plan.order().to_vec();
        let mut running: JoinSet<(ModuleId, Result<SyncOutcome, String>)> = JoinSet::new();
        let mut cancelled = false;

        loop {
            if !cancelled && self.cancel.load(Ordering::SeqCst) {
                warn!("Build cancelled; waiting for {} running module(s)", running.len());
                cancelled = true;
            }

            let mut waiting = Vec::with_capacity(pending.len());
            for id in pending.drain(..) {
                if cancelled {
                    outcomes.insert(
                        id,
                        BuildOutcome::Blocked {
                            reason: BlockReason::Cancelled,
                        },
                    );
                    continue;
                }

                let dependencies = plan.dependencies_of(&id);
                if let Some(failed) = dependencies
                    .iter()
                    .find(|dep| outcomes.get(*dep).is_some_and(|o| !o.is_success()))
                {
                    debug!("{} blocked by {}", id, failed);
                    outcomes.insert(
                        id,
                        BuildOutcome::Blocked {
                            reason: BlockReason::Dependency((*failed).clone()),
                        },
                    );
                    continue;
                }

                let ready = dependencies
                    .iter()
                    .all(|dep| outcomes.get(dep).is_some_and(BuildOutcome::is_success));
                if ready {
                    if let Some(permit) = self.limiter.try_acquire() {
                        let shared = self.shared.clone();
                        running.spawn(async move {
                            let _permit = permit;
                            let result = AssertUnwindSafe(shared.ensure_synced(&id))
                                .catch_unwind()
                                .await
                                .unwrap_or_else(|_| Err("module build panicked".to_string()));
                            (id, result)
                        });
                        continue;
                    }
                }
                waiting.push(id);
            }
            pending = waiting;

            if running.is_empty() {
                break;
            }

            match running.join_next().await {
                Some(Ok((id, result))) => {
                    let outcome = match result {
                        Ok(outcome) => outcome.into_outcome(),
                        Err(error) => BuildOutcome::Failed { error },
                    };
                    outcomes.insert(id, outcome);
                }
                Some(Err(e)) => warn!("Build task ended abnormally: {}", e),
                None => break,
            }
        }

        for id in pending {
            outcomes.insert(
                id,
                BuildOutcome::Failed {
                    error: "module could not be scheduled".to_string(),
                },
            );
        }

        let results = plan
            .order()
            .iter()
            .map(|id| ModuleResult {
                module: id.clone(),
                outcome: outcomes.remove(id).unwrap_or(BuildOutcome::Failed {
                    error: "module build did not complete".to_string(),
                }),
            })
            .collect();

        let discovered: HashSet<ModuleId> = self.shared.modules.keys().cloned().collect();
        let candidates = deletion_candidates(&self.shared.cache, &discovered);
        if !candidates.is_empty() {
            info!("{} cached module(s) no longer exist locally", candidates.len());
        }

        RunReport {
            results,
            deletion_candidates: candidates,
            deletions: Vec::new(),
            cancelled,
        }
    }

    /// Delete the report's candidates one at a time
    ///
    /// Skipped when the build did not fully succeed, so a broken run never
    /// removes anything remotely.
    pub async fn delete_candidates(&self, report: &mut RunReport) {
        if report.cancelled || !report.all_modules_synced() {
            warn!("Skipping deletions because the build did not complete cleanly");
            return;
        }

        for candidate in report.deletion_candidates.clone() {
            let result = {
                let state = self.shared.remote_state.read().await;
                self.shared
                    .reconciler
                    .delete(&candidate, &self.shared.cache, &state)
                    .await
            };
            self.shared
                .remote_state
                .write()
                .await
                .remove(&candidate.remote_id);
            report.deletions.push(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::InMemoryRemote;
    use crate::api::{RemoteError, RetryConfig, RetryPolicy, RetryingRemote};
    use crate::definition::testing::FnModule;
    use crate::definition::lua::LuaModule;
    use crate::definition::types::FieldDefinition;
    use crate::definition::{BuildContext, ContentTypeDefinition, ModuleKind};
    use crate::sync::analysis::DependencyAnalyzer;
    use crate::sync::cache::MemoryCache;
    use crate::sync::dependency_graph::DependencyGraph;
    use crate::sync::reconcile::DeletionOutcome;
    use crate::sync::types::BuildStatus;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn author() -> FnModule {
        FnModule::definition(
            ModuleId::record("Author"),
            ContentTypeDefinition {
                fields: vec![FieldDefinition::new("name", "string")],
                ..Default::default()
            },
        )
    }

    fn article() -> FnModule {
        FnModule::new(ModuleId::record("Article"), |ctx: Arc<dyn BuildContext>| async move {
            let author = ctx.resolve_record("Author").await?;
            Ok::<_, anyhow::Error>(ModuleOutput::Definition(ContentTypeDefinition {
                fields: vec![
                    FieldDefinition::new("title", "string"),
                    FieldDefinition::new("author", "link")
                        .with_validator("item_item_type", json!({ "item_types": [author] })),
                ],
                ..Default::default()
            }))
        })
    }

    async fn plan_for(modules: &[Arc<dyn DefinitionModule>]) -> BuildPlan {
        let report = DependencyAnalyzer::new(json!({})).analyze(modules).await;
        let ids: Vec<ModuleId> = modules.iter().map(|m| m.id().clone()).collect();
        DependencyGraph::build(&ids, &report.dependencies)
            .topo_sort()
            .unwrap()
    }

    async fn run(
        modules: Vec<Arc<dyn DefinitionModule>>,
        remote: Arc<dyn RemoteService>,
        store: Arc<MemoryCache>,
        options: BuildOptions,
    ) -> (Orchestrator, RunReport) {
        let plan = plan_for(&modules).await;
        let orchestrator = Orchestrator::prepare(modules, remote, store, options)
            .await
            .unwrap();
        let report = orchestrator.run(&plan).await;
        (orchestrator, report)
    }

    fn status_of(report: &RunReport, id: &ModuleId) -> BuildStatus {
        report
            .results
            .iter()
            .find(|r| &r.module == id)
            .unwrap()
            .outcome
            .status()
    }

    #[tokio::test]
    async fn test_lookup_returns_real_remote_id() {
        let remote = Arc::new(InMemoryRemote::new());
        let store = Arc::new(MemoryCache::new());
        let modules: Vec<Arc<dyn DefinitionModule>> = vec![Arc::new(article()), Arc::new(author())];

        let (_, report) = run(modules, remote.clone(), store.clone(), BuildOptions::default()).await;

        assert!(report.is_success());
        // Author precedes Article despite discovery order
        assert_eq!(report.results[0].module, ModuleId::record("Author"));

        let author_id = remote.resource_by_key("author").unwrap().id;
        let article = remote.resource_by_key("article").unwrap();
        let link = remote
            .fields_of(&article.id)
            .into_iter()
            .find(|f| f.key == "author")
            .unwrap();
        assert_eq!(link.validators["item_item_type"], json!({ "item_types": [author_id] }));
        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_second_run_is_unchanged_without_mutations() {
        let remote = Arc::new(InMemoryRemote::new());
        let store = Arc::new(MemoryCache::new());
        let modules = || -> Vec<Arc<dyn DefinitionModule>> { vec![Arc::new(author()), Arc::new(article())] };

        let (_, first) = run(modules(), remote.clone(), store.clone(), BuildOptions::default()).await;
        assert_eq!(first.summary().created, 2);
        let mutations = remote.mutation_count();

        let (_, second) = run(modules(), remote.clone(), store.clone(), BuildOptions::default()).await;
        assert_eq!(second.summary().unchanged, 2);
        assert_eq!(remote.mutation_count(), mutations);
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents_without_running_them() {
        let remote = Arc::new(InMemoryRemote::new());
        let store = Arc::new(MemoryCache::new());
        let article = article();
        let article_calls = article.clone();

        let broken_author = FnModule::new(ModuleId::record("Author"), |ctx: Arc<dyn BuildContext>| async move {
            // Analysis succeeds; the real build fails
            if ctx.config().get("fail").is_some() {
                anyhow::bail!("author exploded");
            }
            Ok(ModuleOutput::Definition(ContentTypeDefinition::default()))
        });
        let modules: Vec<Arc<dyn DefinitionModule>> = vec![Arc::new(broken_author), Arc::new(article)];
        let plan = plan_for(&modules).await;
        let calls_after_analysis = article_calls.calls();

        let options = BuildOptions {
            config: json!({ "fail": true }),
            ..Default::default()
        };
        let orchestrator = Orchestrator::prepare(modules, remote.clone(), store, options)
            .await
            .unwrap();
        let report = orchestrator.run(&plan).await;

        assert_eq!(status_of(&report, &ModuleId::record("Author")), BuildStatus::Failed);
        assert_eq!(
            report.results[1].outcome,
            BuildOutcome::Blocked {
                reason: BlockReason::Dependency(ModuleId::record("Author")),
            }
        );
        assert_eq!(article_calls.calls(), calls_after_analysis);
        assert_eq!(remote.mutation_count(), 0);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_failure_blocks_transitive_dependents() {
        let remote = Arc::new(InMemoryRemote::new());
        let chained = |name: &'static str, dependency: &'static str| {
            FnModule::new(ModuleId::record(name), move |ctx: Arc<dyn BuildContext>| async move {
                ctx.resolve_record(dependency).await?;
                Ok::<_, anyhow::Error>(ModuleOutput::Definition(ContentTypeDefinition::default()))
            })
        };
        let leaf = FnModule::new(ModuleId::record("C"), |ctx: Arc<dyn BuildContext>| async move {
            if ctx.config().get("fail").is_some() {
                anyhow::bail!("c exploded");
            }
            Ok(ModuleOutput::Definition(ContentTypeDefinition::default()))
        });
        let middle = chained("B", "C");
        let top = chained("A", "B");
        let (middle_calls, top_calls) = (middle.clone(), top.clone());

        let modules: Vec<Arc<dyn DefinitionModule>> = vec![Arc::new(top), Arc::new(middle), Arc::new(leaf)];
        let plan = plan_for(&modules).await;
        assert_eq!(
            plan.order(),
            &[ModuleId::record("C"), ModuleId::record("B"), ModuleId::record("A")]
        );
        let analysis_calls = (middle_calls.calls(), top_calls.calls());

        let options = BuildOptions {
            config: json!({ "fail": true }),
            ..Default::default()
        };
        let orchestrator = Orchestrator::prepare(modules, remote.clone(), Arc::new(MemoryCache::new()), options)
            .await
            .unwrap();
        let report = orchestrator.run(&plan).await;

        assert_eq!(status_of(&report, &ModuleId::record("C")), BuildStatus::Failed);
        assert_eq!(status_of(&report, &ModuleId::record("B")), BuildStatus::Blocked);
        assert_eq!(
            report.results[2].outcome,
            BuildOutcome::Blocked {
                reason: BlockReason::Dependency(ModuleId::record("B")),
            }
        );
        // Neither dependent's real entry point ran
        assert_eq!((middle_calls.calls(), top_calls.calls()), analysis_calls);
        assert_eq!(remote.mutation_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lua_modules_resolve_real_ids() {
        let author = LuaModule::from_source(
            ModuleId::record("Author"),
            PathBuf::from("Author.lua"),
            r#"return function(ctx) return { fields = { { key = "name", type = "string" } } } end"#
                .to_string(),
        )
        .unwrap();
        let article = LuaModule::from_source(
            ModuleId::record("Article"),
            PathBuf::from("Article.lua"),
            r#"
            return function(ctx)
                return {
                    fields = {
                        {
                            key = "author",
                            type = "link",
                            validators = { item_item_type = { item_types = { ctx.resolve_record("Author") } } }
                        },
                    }
                }
            end
            "#
            .to_string(),
        )
        .unwrap();
        let remote = Arc::new(InMemoryRemote::new());
        let modules: Vec<Arc<dyn DefinitionModule>> = vec![Arc::new(article), Arc::new(author)];

        let (_, report) = run(modules, remote.clone(), Arc::new(MemoryCache::new()), BuildOptions::default()).await;

        assert!(report.is_success());
        let author_id = remote.resource_by_key("author").unwrap().id;
        let article = remote.resource_by_key("article").unwrap();
        let fields = remote.fields_of(&article.id);
        assert_eq!(fields[0].validators["item_item_type"], json!({ "item_types": [author_id] }));
    }

    #[tokio::test]
    async fn test_retained_fields_are_revisited_once_deletion_is_allowed() {
        let remote = Arc::new(InMemoryRemote::new());
        let store = Arc::new(MemoryCache::new());
        let with_bio = FnModule::definition(
            ModuleId::record("Author"),
            ContentTypeDefinition {
                fields: vec![FieldDefinition::new("name", "string"), FieldDefinition::new("bio", "text")],
                ..Default::default()
            },
        );
        let first: Vec<Arc<dyn DefinitionModule>> = vec![Arc::new(with_bio)];
        run(first, remote.clone(), store.clone(), BuildOptions::default()).await;
        let author_id = remote.resource_by_key("author").unwrap().id;

        let options = BuildOptions {
            skip_field_deletion: true,
            ..Default::default()
        };
        let only_name = || -> Vec<Arc<dyn DefinitionModule>> { vec![Arc::new(author())] };
        let (_, kept) = run(only_name(), remote.clone(), store.clone(), options).await;
        assert!(kept.is_success());
        assert_eq!(remote.fields_of(&author_id).len(), 2);

        let (_, cleaned) = run(only_name(), remote.clone(), store.clone(), BuildOptions::default()).await;
        assert_eq!(status_of(&cleaned, &ModuleId::record("Author")), BuildStatus::Updated);
        let keys: Vec<String> = remote.fields_of(&author_id).into_iter().map(|f| f.key).collect();
        assert_eq!(keys, vec!["name".to_string()]);
    }

    #[tokio::test]
    async fn test_unmanaged_lookup_uses_remote_snapshot() {
        let remote = Arc::new(InMemoryRemote::new());
        let author_id = remote.seed_resource(ModuleKind::Record, "Author", "author");
        let store = Arc::new(MemoryCache::new());
        let modules: Vec<Arc<dyn DefinitionModule>> = vec![Arc::new(article())];

        let (_, report) = run(modules, remote.clone(), store, BuildOptions::default()).await;

        assert!(report.is_success());
        let article = remote.resource_by_key("article").unwrap();
        let link = remote
            .fields_of(&article.id)
            .into_iter()
            .find(|f| f.key == "author")
            .unwrap();
        assert_eq!(link.validators["item_item_type"], json!({ "item_types": [author_id] }));
    }

    #[tokio::test]
    async fn test_deletions_only_when_requested() {
        let remote = Arc::new(InMemoryRemote::new());
        let store = Arc::new(MemoryCache::new());

        let both = || -> Vec<Arc<dyn DefinitionModule>> { vec![Arc::new(author()), Arc::new(article())] };
        run(both(), remote.clone(), store.clone(), BuildOptions::default()).await;

        // Article's module is gone; it still references nothing else
        let only_author: Vec<Arc<dyn DefinitionModule>> = vec![Arc::new(author())];
        let (_, report) = run(only_author, remote.clone(), store.clone(), BuildOptions::default()).await;
        assert_eq!(report.deletion_candidates.len(), 1);
        assert_eq!(report.deletion_candidates[0].module, ModuleId::record("Article"));
        assert!(report.deletions.is_empty());
        assert!(remote.resource_by_key("article").is_some());

        let only_author: Vec<Arc<dyn DefinitionModule>> = vec![Arc::new(author())];
        let (orchestrator, mut report) =
            run(only_author, remote.clone(), store.clone(), BuildOptions::default()).await;
        orchestrator.delete_candidates(&mut report).await;

        assert_eq!(report.deletions[0].outcome, DeletionOutcome::Deleted);
        assert!(remote.resource_by_key("article").is_none());
        assert!(!store.snapshot().contains_key(&ModuleId::record("Article")));
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let modules: Vec<Arc<dyn DefinitionModule>> = (0..6)
            .map(|i| {
                let active = active.clone();
                let peak = peak.clone();
                let module = FnModule::new(ModuleId::record(format!("M{}", i)), move |ctx: Arc<dyn BuildContext>| {
                    let active = active.clone();
                    let peak = peak.clone();
                    async move {
                        // Only count real builds
                        if ctx.config().get("real").is_some() {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        }
                        Ok::<_, anyhow::Error>(ModuleOutput::Definition(ContentTypeDefinition::default()))
                    }
                });
                Arc::new(module) as Arc<dyn DefinitionModule>
            })
            .collect();

        let plan = plan_for(&modules).await;
        let options = BuildOptions {
            concurrency: ConcurrencyConfig::limited(2),
            config: json!({ "real": true }),
            ..Default::default()
        };
        let orchestrator = Orchestrator::prepare(
            modules,
            Arc::new(InMemoryRemote::new()),
            Arc::new(MemoryCache::new()),
            options,
        )
        .await
        .unwrap();
        let report = orchestrator.run(&plan).await;

        assert!(report.is_success());
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let memory = Arc::new(InMemoryRemote::new());
        memory.fail_next(RemoteError::rate_limited(Some(Duration::from_millis(1)), "slow down"));
        memory.fail_next(RemoteError::server(503, "unavailable"));

        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
            ..RetryConfig::default()
        });
        let remote = Arc::new(RetryingRemote::new(memory.clone(), policy));
        let modules: Vec<Arc<dyn DefinitionModule>> = vec![Arc::new(author())];

        let (_, report) = run(modules, remote, Arc::new(MemoryCache::new()), BuildOptions::default()).await;

        assert!(report.is_success());
        assert_eq!(memory.resources().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_blocks_unscheduled_modules() {
        let modules: Vec<Arc<dyn DefinitionModule>> = vec![Arc::new(author()), Arc::new(article())];
        let plan = plan_for(&modules).await;
        let orchestrator = Orchestrator::prepare(
            modules,
            Arc::new(InMemoryRemote::new()),
            Arc::new(MemoryCache::new()),
            BuildOptions::default(),
        )
        .await
        .unwrap();

        orchestrator.cancel_flag().store(true, Ordering::SeqCst);
        let report = orchestrator.run(&plan).await;

        assert!(report.cancelled);
        assert!(report.results.iter().all(|r| r.outcome
            == BuildOutcome::Blocked {
                reason: BlockReason::Cancelled
            }));
    }

    #[tokio::test]
    async fn test_self_synced_module_status() {
        let synced = || -> Vec<Arc<dyn DefinitionModule>> {
            vec![Arc::new(FnModule::new(ModuleId::container("Hero"), |_| async {
                Ok::<_, anyhow::Error>(ModuleOutput::Synced("ext-1".to_string()))
            }))]
        };
        let remote = Arc::new(InMemoryRemote::new());
        let store = Arc::new(MemoryCache::new());

        let (_, first) = run(synced(), remote.clone(), store.clone(), BuildOptions::default()).await;
        assert_eq!(first.results[0].outcome, BuildOutcome::Created { remote_id: "ext-1".into() });

        let (_, second) = run(synced(), remote.clone(), store.clone(), BuildOptions::default()).await;
        assert_eq!(second.results[0].outcome, BuildOutcome::Unchanged { remote_id: "ext-1".into() });
        assert_eq!(remote.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_cycle_aborts_before_any_remote_call() {
        let lookup = |name: &'static str, other: &'static str| {
            FnModule::new(ModuleId::record(name), move |ctx: Arc<dyn BuildContext>| async move {
                ctx.resolve_record(other).await?;
                Ok::<_, anyhow::Error>(ModuleOutput::Definition(ContentTypeDefinition::default()))
            })
        };
        let a = lookup("A", "B");
        let b = lookup("B", "A");
        let entry_points = (a.clone(), b.clone());
        let modules: Vec<Arc<dyn DefinitionModule>> = vec![Arc::new(a), Arc::new(b)];
        let remote = InMemoryRemote::new();

        let report = DependencyAnalyzer::new(json!({})).analyze(&modules).await;
        let ids: Vec<ModuleId> = modules.iter().map(|m| m.id().clone()).collect();
        let err = DependencyGraph::build(&ids, &report.dependencies)
            .topo_sort()
            .unwrap_err();

        assert_eq!(err.to_string(), "Circular dependency detected: record:A -> record:B -> record:A");
        // Only the shadow runs happened
        assert_eq!(entry_points.0.calls(), 1);
        assert_eq!(entry_points.1.calls(), 1);
        assert_eq!(remote.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_unplanned_circular_lookup_fails_instead_of_hanging() {
        // Neither module looks anything up during analysis, so the plan has no edges
        let looping = |name: &'static str, other: &'static str| {
            FnModule::new(ModuleId::record(name), move |ctx: Arc<dyn BuildContext>| async move {
                if ctx.config().get("real").is_some() {
                    ctx.resolve_record(other).await?;
                }
                Ok::<_, anyhow::Error>(ModuleOutput::Definition(ContentTypeDefinition::default()))
            })
        };
        let modules: Vec<Arc<dyn DefinitionModule>> =
            vec![Arc::new(looping("Ping", "Pong")), Arc::new(looping("Pong", "Ping"))];
        let plan = plan_for(&modules).await;

        let options = BuildOptions {
            config: json!({ "real": true }),
            ..Default::default()
        };
        let orchestrator = Orchestrator::prepare(
            modules,
            Arc::new(InMemoryRemote::new()),
            Arc::new(MemoryCache::new()),
            options,
        )
        .await
        .unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(&plan))
            .await
            .unwrap();

        assert!(report.results.iter().any(|r| r.outcome.status() == BuildStatus::Failed));
    }
}
