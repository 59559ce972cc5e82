//! Resilience features for remote schema calls
//!
//! Provides the retry policy for transient remote failures and the
//! concurrency limiter that bounds parallel module builds.

pub mod concurrency;
pub mod config;
pub mod retry;

pub use concurrency::ConcurrencyLimiter;
pub use config::{ConcurrencyConfig, ResilienceConfig};
pub use retry::{RetryConfig, RetryPolicy};
