//! Remote schema service boundary

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::models::{FieldDraft, RemoteField, RemoteResource, ResourceDraft};
use super::resilience::RetryPolicy;

/// Operations the sync engine needs from the remote schema service
///
/// Implementations return [`RemoteError`](super::RemoteError) inside the
/// `anyhow::Error` so callers can classify failures.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn list_resources(&self) -> Result<Vec<RemoteResource>>;
    async fn create_resource(&self, draft: &ResourceDraft) -> Result<RemoteResource>;
    async fn update_resource(&self, id: &str, draft: &ResourceDraft) -> Result<RemoteResource>;
    async fn delete_resource(&self, id: &str) -> Result<()>;

    async fn list_fields(&self, resource_id: &str) -> Result<Vec<RemoteField>>;
    async fn create_field(&self, resource_id: &str, draft: &FieldDraft) -> Result<RemoteField>;
    async fn update_field(&self, field_id: &str, draft: &FieldDraft) -> Result<RemoteField>;
    async fn delete_field(&self, field_id: &str) -> Result<()>;
}

/// Wraps a remote service and retries transient failures
pub struct RetryingRemote {
    inner: Arc<dyn RemoteService>,
    policy: RetryPolicy,
}

impl RetryingRemote {
    pub fn new(inner: Arc<dyn RemoteService>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl RemoteService for RetryingRemote {
    async fn list_resources(&self) -> Result<Vec<RemoteResource>> {
        self.policy
            .execute("list content types", || self.inner.list_resources())
            .await
    }

    async fn create_resource(&self, draft: &ResourceDraft) -> Result<RemoteResource> {
        let operation = format!("create content type '{}'", draft.api_key);
        self.policy
            .execute(&operation, || self.inner.create_resource(draft))
            .await
    }

    async fn update_resource(&self, id: &str, draft: &ResourceDraft) -> Result<RemoteResource> {
        let operation = format!("update content type '{}'", draft.api_key);
        self.policy
            .execute(&operation, || self.inner.update_resource(id, draft))
            .await
    }

    async fn delete_resource(&self, id: &str) -> Result<()> {
        let operation = format!("delete content type {}", id);
        self.policy
            .execute(&operation, || self.inner.delete_resource(id))
            .await
    }

    async fn list_fields(&self, resource_id: &str) -> Result<Vec<RemoteField>> {
        let operation = format!("list fields of {}", resource_id);
        self.policy
            .execute(&operation, || self.inner.list_fields(resource_id))
            .await
    }

    async fn create_field(&self, resource_id: &str, draft: &FieldDraft) -> Result<RemoteField> {
        let operation = format!("create field '{}'", draft.key);
        self.policy
            .execute(&operation, || self.inner.create_field(resource_id, draft))
            .await
    }

    async fn update_field(&self, field_id: &str, draft: &FieldDraft) -> Result<RemoteField> {
        let operation = format!("update field '{}'", draft.key);
        self.policy
            .execute(&operation, || self.inner.update_field(field_id, draft))
            .await
    }

    async fn delete_field(&self, field_id: &str) -> Result<()> {
        let operation = format!("delete field {}", field_id);
        self.policy
            .execute(&operation, || self.inner.delete_field(field_id))
            .await
    }
}
