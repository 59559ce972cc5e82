//! Reconciliation cache
//!
//! Maps each module to the fingerprint of its last synchronised
//! configuration and the remote resource it produced. The persisted store
//! is read once at the start of a run; writes go through a mutex because
//! several modules may finish at the same time.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::definition::ModuleId;

/// Last known synchronised state of one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub remote_id: String,
    pub synced_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(fingerprint: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            remote_id: remote_id.into(),
            synced_at: Utc::now(),
        }
    }
}

/// Persisted key/value store behind the reconciliation cache
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn set(&self, module: &ModuleId, entry: &CacheEntry) -> Result<()>;
    async fn delete(&self, module: &ModuleId) -> Result<()>;
    /// All entries, ordered by module
    async fn entries(&self) -> Result<Vec<(ModuleId, CacheEntry)>>;
    /// Remove every entry, returning how many were removed
    async fn clear(&self) -> Result<u64>;
}

/// How a run may use the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Normal run: read the snapshot, write results
    ReadWrite,
    /// `--no-cache`: behave as if the cache were empty, still write results
    WriteOnly,
    /// Dry run: read the snapshot, never write
    ReadOnly,
}

impl CacheMode {
    pub fn reads(&self) -> bool {
        !matches!(self, Self::WriteOnly)
    }

    pub fn writes(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// Run-scoped view of the cache store
pub struct ReconciliationCache {
    store: Arc<dyn CacheStore>,
    mode: CacheMode,
    snapshot: BTreeMap<ModuleId, CacheEntry>,
    writes: Mutex<()>,
}

impl ReconciliationCache {
    /// Read the store once; later reads come from this snapshot
    pub async fn load(store: Arc<dyn CacheStore>, mode: CacheMode) -> Result<Self> {
        let snapshot: BTreeMap<ModuleId, CacheEntry> = if mode.reads() {
            store.entries().await?.into_iter().collect()
        } else {
            BTreeMap::new()
        };
        debug!("Loaded {} cache entries ({:?})", snapshot.len(), mode);

        Ok(Self {
            store,
            mode,
            snapshot,
            writes: Mutex::new(()),
        })
    }

    /// Entry recorded before this run started
    pub fn get(&self, module: &ModuleId) -> Option<&CacheEntry> {
        self.snapshot.get(module)
    }

    /// Snapshot entries, ordered by module
    pub fn entries(&self) -> impl Iterator<Item = (&ModuleId, &CacheEntry)> {
        self.snapshot.iter()
    }

    /// Record a successful synchronisation
    pub async fn record(&self, module: &ModuleId, fingerprint: &str, remote_id: &str) -> Result<()> {
        if !self.mode.writes() {
            return Ok(());
        }
        let _guard = self.writes.lock().await;
        self.store
            .set(module, &CacheEntry::new(fingerprint, remote_id))
            .await
    }

    /// Drop a module's entry after its remote resource was deleted
    pub async fn forget(&self, module: &ModuleId) -> Result<()> {
        if !self.mode.writes() {
            return Ok(());
        }
        let _guard = self.writes.lock().await;
        self.store.delete(module).await
    }
}

/// Cache store held in memory
#[cfg(test)]
#[derive(Default)]
pub struct MemoryCache {
    entries: std::sync::Mutex<BTreeMap<ModuleId, CacheEntry>>,
}

#[cfg(test)]
impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<ModuleId, CacheEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl CacheStore for MemoryCache {
    async fn set(&self, module: &ModuleId, entry: &CacheEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(module.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, module: &ModuleId) -> Result<()> {
        self.entries.lock().unwrap().remove(module);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(ModuleId, CacheEntry)>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn clear(&self) -> Result<u64> {
        let mut entries = self.entries.lock().unwrap();
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }
}
