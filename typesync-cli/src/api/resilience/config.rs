//! Resilience configuration with builder pattern
//!
//! Groups the retry policy for remote calls and the module concurrency
//! limit, built from `typesync.toml` through a builder.

use super::retry::RetryConfig;

/// Default number of modules built at once
pub const DEFAULT_MAX_CONCURRENT_MODULES: usize = 3;

/// Resilience settings for a sync run
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub concurrency: ConcurrencyConfig,
}

/// Module concurrency configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyConfig {
    /// Maximum definition modules built concurrently
    pub max_concurrent_modules: usize,
    /// When false, every ready module starts immediately
    pub enabled: bool,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_modules: DEFAULT_MAX_CONCURRENT_MODULES,
            enabled: true,
        }
    }
}

impl ConcurrencyConfig {
    pub fn limited(max_concurrent_modules: usize) -> Self {
        Self {
            max_concurrent_modules,
            enabled: true,
        }
    }

    /// Unbounded: concurrency is driven by the dependency structure alone
    pub fn auto() -> Self {
        Self {
            max_concurrent_modules: DEFAULT_MAX_CONCURRENT_MODULES,
            enabled: false,
        }
    }
}

impl ResilienceConfig {
    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::new()
    }
}

/// Builder for ResilienceConfig
#[derive(Debug)]
pub struct ResilienceConfigBuilder {
    config: ResilienceConfig,
}

impl ResilienceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
        }
    }

    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn concurrency_config(mut self, concurrency: ConcurrencyConfig) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn build(self) -> ResilienceConfig {
        self.config
    }
}

impl Default for ResilienceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ResilienceConfig::default();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.concurrency.max_concurrent_modules, 3);
        assert!(config.concurrency.enabled);
    }

    #[test]
    fn test_auto_concurrency_disables_limiting() {
        let config = ResilienceConfig::builder()
            .concurrency_config(ConcurrencyConfig::auto())
            .build();

        assert!(!config.concurrency.enabled);
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn test_builder_pattern() {
        let retry = RetryConfig {
            max_attempts: 5,
            ..RetryConfig::default()
        };
        let config = ResilienceConfig::builder()
            .retry_config(retry)
            .concurrency_config(ConcurrencyConfig::limited(8))
            .build();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.concurrency.max_concurrent_modules, 8);
        assert!(config.concurrency.enabled);
    }
}
