//! Real build context
//!
//! Lookups synchronise the referenced module (once per run) and return its
//! actual remote id. Names with no discovered module fall back to the
//! remote snapshot.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::orchestrator::Shared;
use crate::definition::{BuildContext, ModuleId};

pub struct RealContext {
    module: ModuleId,
    shared: Arc<Shared>,
}

impl RealContext {
    pub(super) fn new(module: ModuleId, shared: Arc<Shared>) -> Self {
        Self { module, shared }
    }
}

#[async_trait]
impl BuildContext for RealContext {
    fn module_id(&self) -> &ModuleId {
        &self.module
    }

    fn config(&self) -> &Value {
        self.shared.config()
    }

    async fn resolve(&self, target: &ModuleId) -> Result<String> {
        if !self.shared.is_managed(target) {
            return self.shared.resolve_unmanaged(target).await;
        }

        let _wait = self.shared.begin_wait(&self.module, target)?;
        match self.shared.ensure_synced(target).await {
            Ok(outcome) => Ok(outcome.remote_id),
            Err(error) => anyhow::bail!("{} did not sync: {}", target, error),
        }
    }
}
