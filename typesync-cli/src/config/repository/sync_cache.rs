//! Sync cache repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;

use crate::definition::{ModuleId, ModuleKind};
use crate::sync::cache::{CacheEntry, CacheStore};

type EntryRow = (String, String, String, String, DateTime<Utc>);

/// Create the sync cache table if it does not exist
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sync_cache (
            module_key TEXT PRIMARY KEY NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            remote_id TEXT NOT NULL,
            synced_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create sync_cache table")?;

    Ok(())
}

/// Insert or replace the cache entry for a module
pub async fn set_entry(pool: &SqlitePool, module: &ModuleId, entry: &CacheEntry) -> Result<()> {
    sqlx::query(
        "INSERT INTO sync_cache (module_key, kind, name, fingerprint, remote_id, synced_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(module_key) DO UPDATE SET
            fingerprint = excluded.fingerprint,
            remote_id = excluded.remote_id,
            synced_at = excluded.synced_at",
    )
    .bind(module.to_string())
    .bind(module.kind.as_str())
    .bind(&module.name)
    .bind(&entry.fingerprint)
    .bind(&entry.remote_id)
    .bind(entry.synced_at)
    .execute(pool)
    .await
    .context("Failed to set sync cache entry")?;

    Ok(())
}

/// Delete the cache entry for a module
pub async fn delete_entry(pool: &SqlitePool, module: &ModuleId) -> Result<()> {
    sqlx::query("DELETE FROM sync_cache WHERE module_key = ?")
        .bind(module.to_string())
        .execute(pool)
        .await
        .context("Failed to delete sync cache entry")?;

    Ok(())
}

/// List all cache entries ordered by kind and name
pub async fn list_entries(pool: &SqlitePool) -> Result<Vec<(ModuleId, CacheEntry)>> {
    let rows: Vec<EntryRow> = sqlx::query_as(
        "SELECT kind, name, fingerprint, remote_id, synced_at FROM sync_cache
         ORDER BY kind, name",
    )
    .fetch_all(pool)
    .await
    .context("Failed to list sync cache entries")?;

    rows.into_iter()
        .map(|(kind, name, fingerprint, remote_id, synced_at)| {
            let kind: ModuleKind = kind
                .parse()
                .with_context(|| format!("Corrupt sync cache row for '{}'", name))?;
            Ok((
                ModuleId::new(kind, name),
                CacheEntry {
                    fingerprint,
                    remote_id,
                    synced_at,
                },
            ))
        })
        .collect()
}

/// Delete every cache entry
pub async fn clear_entries(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sync_cache")
        .execute(pool)
        .await
        .context("Failed to clear sync cache")?;

    Ok(result.rows_affected())
}

/// SQLite-backed cache store
#[derive(Clone)]
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    /// Open (creating if needed) the cache database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cache directory: {}", parent.display())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open sync cache: {}", path.display()))?;

        ensure_schema(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn set(&self, module: &ModuleId, entry: &CacheEntry) -> Result<()> {
        set_entry(&self.pool, module, entry).await
    }

    async fn delete(&self, module: &ModuleId) -> Result<()> {
        delete_entry(&self.pool, module).await
    }

    async fn entries(&self) -> Result<Vec<(ModuleId, CacheEntry)>> {
        list_entries(&self.pool).await
    }

    async fn clear(&self) -> Result<u64> {
        clear_entries(&self.pool).await
    }
}
