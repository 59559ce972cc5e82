//! Remote schema service API
//!
//! The sync engine talks to the remote service only through the
//! [`RemoteService`] trait. [`HttpSchemaClient`] is the production
//! implementation and [`RetryingRemote`] layers the retry policy on top.

pub mod client;
pub mod error;
pub mod models;
pub mod resilience;
pub mod service;

#[cfg(test)]
pub mod memory;

pub use client::HttpSchemaClient;
pub use error::RemoteError;
pub use models::{FieldDraft, RemoteField, RemoteResource, ResourceDraft};
pub use resilience::{
    ConcurrencyConfig, ConcurrencyLimiter, ResilienceConfig, RetryConfig, RetryPolicy,
};
pub use service::{RemoteService, RetryingRemote};
