//! Reconciler
//!
//! Decides create / update / no-op for a module's desired state against
//! its cache entry and the remote snapshot, applies the decision through
//! the remote service, and handles deletion candidates.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;

use super::cache::{CacheEntry, ReconciliationCache};
use super::fingerprint::DesiredState;
use super::schema_diff::compare_fields;
use super::types::{Change, SyncOutcome};
use crate::api::{RemoteError, RemoteResource, RemoteService};
use crate::definition::{ModuleId, ModuleKind, to_snake_case};

/// Remote content types as known during a run
#[derive(Debug, Clone, Default)]
pub struct RemoteState {
    resources: Vec<RemoteResource>,
}

impl RemoteState {
    pub fn new(resources: Vec<RemoteResource>) -> Self {
        Self { resources }
    }

    pub fn get(&self, id: &str) -> Option<&RemoteResource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn find_by_api_key(&self, kind: ModuleKind, api_key: &str) -> Option<&RemoteResource> {
        self.resources
            .iter()
            .find(|r| r.kind == kind && r.api_key == api_key)
    }

    /// Match a lookup target that no discovered module provides
    pub fn find_unmanaged(&self, target: &ModuleId) -> Option<&RemoteResource> {
        let api_key = to_snake_case(&target.name);
        self.find_by_api_key(target.kind, &api_key).or_else(|| {
            self.resources
                .iter()
                .find(|r| r.kind == target.kind && r.name == target.name)
        })
    }

    pub fn upsert(&mut self, resource: RemoteResource) {
        match self.resources.iter_mut().find(|r| r.id == resource.id) {
            Some(existing) => *existing = resource,
            None => self.resources.push(resource),
        }
    }

    pub fn remove(&mut self, id: &str) {
        self.resources.retain(|r| r.id != id);
    }
}

/// What the reconciler will do for one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Create,
    Update { remote_id: String },
    Unchanged { remote_id: String },
}

/// Decide how to reconcile a module
///
/// A cache entry is only trusted while its remote resource still exists.
/// Without a usable entry, a remote resource of the same kind and api key
/// is adopted rather than duplicated.
pub fn decide(
    desired: &DesiredState,
    fingerprint: &str,
    cached: Option<&CacheEntry>,
    remote: &RemoteState,
) -> Decision {
    if let Some(entry) = cached {
        if remote.contains(&entry.remote_id) {
            if entry.fingerprint == fingerprint {
                return Decision::Unchanged {
                    remote_id: entry.remote_id.clone(),
                };
            }
            return Decision::Update {
                remote_id: entry.remote_id.clone(),
            };
        }
        debug!(
            "Cached resource {} for {} no longer exists",
            entry.remote_id, desired.module
        );
    }

    match remote.find_by_api_key(desired.resource.kind, &desired.resource.api_key) {
        Some(existing) => {
            debug!(
                "Adopting existing remote resource {} for {}",
                existing.id, desired.module
            );
            Decision::Update {
                remote_id: existing.id.clone(),
            }
        }
        None => Decision::Create,
    }
}

/// Result of applying a decision
#[derive(Debug, Clone)]
pub struct Applied {
    pub outcome: SyncOutcome,
    /// The resource as last returned by the remote service, when it was touched
    pub resource: Option<RemoteResource>,
    /// Number of remote mutation calls issued
    pub mutations: usize,
    /// Undeclared remote fields left in place because field deletion is off
    pub retained_fields: Vec<String>,
}

/// A cached module that no discovered module backs anymore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionCandidate {
    pub module: ModuleId,
    pub remote_id: String,
}

/// How handling a deletion candidate ended
#[derive(Debug, Clone, PartialEq)]
pub enum DeletionOutcome {
    Deleted,
    /// The remote resource was already gone; only the cache entry was dropped
    AlreadyGone,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeletionResult {
    pub candidate: DeletionCandidate,
    pub outcome: DeletionOutcome,
}

/// Cache entries whose module was not discovered in this run
///
/// Records come before containers so that record types embedding a
/// container type are removed before it.
pub fn deletion_candidates(
    cache: &ReconciliationCache,
    discovered: &HashSet<ModuleId>,
) -> Vec<DeletionCandidate> {
    let mut candidates: Vec<DeletionCandidate> = cache
        .entries()
        .filter(|(module, _)| !discovered.contains(*module))
        .map(|(module, entry)| DeletionCandidate {
            module: module.clone(),
            remote_id: entry.remote_id.clone(),
        })
        .collect();

    candidates.sort_by(|a, b| {
        let rank = |kind: ModuleKind| match kind {
            ModuleKind::Record => 0,
            ModuleKind::Container => 1,
        };
        rank(a.module.kind)
            .cmp(&rank(b.module.kind))
            .then_with(|| a.module.name.cmp(&b.module.name))
    });
    candidates
}

/// Applies decisions against the remote service
pub struct Reconciler {
    remote: Arc<dyn RemoteService>,
    skip_field_deletion: bool,
}

impl Reconciler {
    pub fn new(remote: Arc<dyn RemoteService>, skip_field_deletion: bool) -> Self {
        Self {
            remote,
            skip_field_deletion,
        }
    }

    /// Apply `decision`; `current` is the snapshot of the resource being updated
    pub async fn apply(
        &self,
        desired: &DesiredState,
        decision: &Decision,
        current: Option<&RemoteResource>,
    ) -> Result<Applied> {
        match decision {
            Decision::Unchanged { remote_id } => Ok(Applied {
                outcome: SyncOutcome {
                    remote_id: remote_id.clone(),
                    change: Change::Unchanged,
                },
                resource: None,
                mutations: 0,
                retained_fields: Vec::new(),
            }),
            Decision::Create => self.create(desired).await,
            Decision::Update { remote_id } => self.update(desired, remote_id, current).await,
        }
    }

    async fn create(&self, desired: &DesiredState) -> Result<Applied> {
        let resource = self
            .remote
            .create_resource(&desired.resource)
            .await
            .with_context(|| format!("Failed to create content type '{}'", desired.resource.api_key))?;
        let mut mutations = 1;

        for field in &desired.fields {
            self.remote
                .create_field(&resource.id, field)
                .await
                .with_context(|| format!("Failed to create field '{}'", field.key))?;
            mutations += 1;
        }

        info!("Created {} as {}", desired.module, resource.id);
        Ok(Applied {
            outcome: SyncOutcome {
                remote_id: resource.id.clone(),
                change: Change::Created,
            },
            resource: Some(resource),
            mutations,
            retained_fields: Vec::new(),
        })
    }

    async fn update(
        &self,
        desired: &DesiredState,
        remote_id: &str,
        current: Option<&RemoteResource>,
    ) -> Result<Applied> {
        let mut mutations = 0;
        let mut resource = current.cloned();

        if current.is_none_or(|r| desired.resource.differs_from(r)) {
            let updated = self
                .remote
                .update_resource(remote_id, &desired.resource)
                .await
                .with_context(|| format!("Failed to update content type '{}'", desired.resource.api_key))?;
            resource = Some(updated);
            mutations += 1;
        }

        let mut remote_fields = self
            .remote
            .list_fields(remote_id)
            .await
            .with_context(|| format!("Failed to list fields of {}", remote_id))?;
        let mut diff = compare_fields(&remote_fields, &desired.fields);
        let mut retained_fields = Vec::new();
        debug!("{}: {} field(s) already match", desired.module, diff.unchanged.len());

        if !diff.to_delete.is_empty() {
            if self.skip_field_deletion {
                retained_fields = diff.to_delete.iter().map(|f| f.key.clone()).collect();
                warn!(
                    "{}: field deletion not permitted, leaving {} undeclared field(s) in place: {}",
                    desired.module,
                    retained_fields.len(),
                    retained_fields.join(", ")
                );
            } else {
                for field in &diff.to_delete {
                    self.remote
                        .delete_field(&field.id)
                        .await
                        .with_context(|| format!("Failed to delete field '{}'", field.key))?;
                    mutations += 1;
                }
                // Deleting may shift remote positions
                remote_fields = self
                    .remote
                    .list_fields(remote_id)
                    .await
                    .with_context(|| format!("Failed to list fields of {}", remote_id))?;
                diff = compare_fields(&remote_fields, &desired.fields);
            }
        }

        for update in &diff.to_update {
            debug!(
                "{}: patching field '{}' ({})",
                desired.module,
                update.draft.key,
                update.changes.join(", ")
            );
            self.remote
                .update_field(&update.field_id, &update.draft)
                .await
                .with_context(|| format!("Failed to update field '{}'", update.draft.key))?;
            mutations += 1;
        }

        for field in &diff.to_create {
            self.remote
                .create_field(remote_id, field)
                .await
                .with_context(|| format!("Failed to create field '{}'", field.key))?;
            mutations += 1;
        }

        let change = if mutations > 0 {
            info!("Updated {} ({} change(s))", desired.module, mutations);
            Change::Updated
        } else {
            Change::Unchanged
        };

        Ok(Applied {
            outcome: SyncOutcome {
                remote_id: remote_id.to_string(),
                change,
            },
            resource,
            mutations,
            retained_fields,
        })
    }

    /// Delete a candidate's remote resource and drop its cache entry
    pub async fn delete(
        &self,
        candidate: &DeletionCandidate,
        cache: &ReconciliationCache,
        remote_state: &RemoteState,
    ) -> DeletionResult {
        let outcome = match self.delete_remote(candidate, remote_state).await {
            Ok(outcome) => match cache.forget(&candidate.module).await {
                Ok(()) => outcome,
                Err(e) => DeletionOutcome::Failed {
                    error: format!("{:#}", e),
                },
            },
            Err(e) => DeletionOutcome::Failed {
                error: format!("{:#}", e),
            },
        };

        DeletionResult {
            candidate: candidate.clone(),
            outcome,
        }
    }

    async fn delete_remote(
        &self,
        candidate: &DeletionCandidate,
        remote_state: &RemoteState,
    ) -> Result<DeletionOutcome> {
        if !remote_state.contains(&candidate.remote_id) {
            debug!(
                "{} ({}) is already gone remotely",
                candidate.module, candidate.remote_id
            );
            return Ok(DeletionOutcome::AlreadyGone);
        }

        match self.remote.delete_resource(&candidate.remote_id).await {
            Ok(()) => {
                info!("Deleted {} ({})", candidate.module, candidate.remote_id);
                Ok(DeletionOutcome::Deleted)
            }
            Err(e) if e.downcast_ref::<RemoteError>().is_some_and(RemoteError::is_not_found) => {
                Ok(DeletionOutcome::AlreadyGone)
            }
            Err(e) => Err(e.context(format!("Failed to delete {}", candidate.module))),
        }
    }
}
