//! Concurrency limiter for module builds
//!
//! Bounds how many definition modules are built against the remote service
//! at the same time. Permits are owned so they can travel into spawned tasks
//! and are released when the task finishes.

use super::config::ConcurrencyConfig;
use log::debug;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Permits handed out when limiting is disabled (Tokio's max is 2^61-1)
const UNBOUNDED_PERMITS: usize = 1_000_000;

/// Semaphore-based limiter for concurrently building modules
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    config: ConcurrencyConfig,
}

impl ConcurrencyLimiter {
    pub fn new(config: ConcurrencyConfig) -> Self {
        let permits = if config.enabled {
            config.max_concurrent_modules.max(1)
        } else {
            UNBOUNDED_PERMITS
        };

        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
        }
    }

    /// Acquire a permit without waiting; `None` when at capacity
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        if self.config.enabled {
            debug!(
                "Concurrency limiter: acquired permit ({}/{} in use)",
                self.config.max_concurrent_modules.max(1) - self.semaphore.available_permits(),
                self.config.max_concurrent_modules
            );
        }
        Some(permit)
    }
}
