//! Project configuration
//!
//! Read from `typesync.toml`. Lookup order: an explicit `--config` path,
//! `./typesync.toml`, `<config dir>/typesync/config.toml`, then defaults.
//! Relative paths are taken relative to the working directory.

pub mod repository;

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::{ConcurrencyConfig, ResilienceConfig, RetryConfig};
use crate::definition::{ModuleKind, ModuleSource};

pub const PROJECT_CONFIG_FILE: &str = "typesync.toml";
pub const API_URL_ENV: &str = "TYPESYNC_API_URL";
pub const API_TOKEN_ENV: &str = "TYPESYNC_API_TOKEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub remote: RemoteConfig,
    pub build: BuildConfig,
    pub retry: RetrySettings,
    /// Free-form table handed to every module as `ctx.config`
    pub modules: toml::Table,
}

/// Where definition modules live
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub containers: PathBuf,
    pub records: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            containers: PathBuf::from("definitions/containers"),
            records: PathBuf::from("definitions/records"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    /// Environment variable holding the API token
    pub token_env: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token_env: API_TOKEN_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub concurrency: usize,
    /// Ignore `concurrency` and start every ready module at once
    pub auto_concurrency: bool,
    pub cache_path: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            concurrency: crate::api::resilience::config::DEFAULT_MAX_CONCURRENT_MODULES,
            auto_concurrency: false,
            cache_path: PathBuf::from(".typesync/cache.db"),
        }
    }
}

/// `[retry]` section; delays are in milliseconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            backoff_multiplier: defaults.backoff_multiplier,
            jitter: defaults.jitter,
        }
    }
}

impl Config {
    /// Load configuration and apply environment overrides
    ///
    /// Returns the file the configuration came from, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }

        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file does not exist: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::find_config_file(),
        };

        let mut config = match &path {
            Some(path) => {
                debug!("Reading configuration from {}", path.display());
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Invalid config file: {}", path.display()))?
            }
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok((config, path))
    }

    fn find_config_file() -> Option<PathBuf> {
        let local = PathBuf::from(PROJECT_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }

        dirs::config_dir()
            .map(|dir| dir.join("typesync").join("config.toml"))
            .filter(|path| path.exists())
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML")
    }

    /// Apply `TYPESYNC_*` overrides using `lookup` to read variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            debug!("Using remote base URL from {}", API_URL_ENV);
            self.remote.base_url = Some(url);
        }
    }

    pub fn module_sources(&self) -> Vec<ModuleSource> {
        vec![
            ModuleSource::new(ModuleKind::Container, &self.source.containers),
            ModuleSource::new(ModuleKind::Record, &self.source.records),
        ]
    }

    /// The `[modules]` table as JSON, for module contexts
    pub fn modules_value(&self) -> Result<Value> {
        serde_json::to_value(&self.modules).context("Failed to convert [modules] table")
    }

    pub fn base_url(&self) -> Result<&str> {
        self.remote.base_url.as_deref().with_context(|| {
            format!(
                "No remote base URL configured. Set [remote].base_url in {} or {}",
                PROJECT_CONFIG_FILE, API_URL_ENV
            )
        })
    }

    /// API token from the configured variable, falling back to `TYPESYNC_API_TOKEN`
    pub fn api_token(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
        lookup(&self.remote.token_env)
            .or_else(|| lookup(API_TOKEN_ENV))
            .filter(|token| !token.trim().is_empty())
            .with_context(|| format!("No API token found. Set {}", self.remote.token_env))
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
            jitter: self.retry.jitter,
        }
    }

    pub fn concurrency_config(&self) -> ConcurrencyConfig {
        if self.build.auto_concurrency {
            ConcurrencyConfig::auto()
        } else {
            ConcurrencyConfig::limited(self.build.concurrency)
        }
    }

    pub fn resilience(&self) -> ResilienceConfig {
        ResilienceConfig::builder()
            .retry_config(self.retry_config())
            .concurrency_config(self.concurrency_config())
            .build()
    }
}
