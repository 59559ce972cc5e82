//! Test helpers: closure-backed definition modules

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::types::{BuildContext, ContentTypeDefinition, DefinitionModule, ModuleId, ModuleOutput};

type BuildFn = dyn Fn(Arc<dyn BuildContext>) -> BoxFuture<'static, Result<ModuleOutput>> + Send + Sync;

/// A native definition module whose entry point is a closure
///
/// Counts invocations so tests can assert whether an entry point ran.
#[derive(Clone)]
pub struct FnModule {
    id: ModuleId,
    build_fn: Arc<BuildFn>,
    calls: Arc<AtomicUsize>,
}

impl FnModule {
    pub fn new<F, Fut>(id: ModuleId, f: F) -> Self
    where
        F: Fn(Arc<dyn BuildContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ModuleOutput>> + Send + 'static,
    {
        Self {
            id,
            build_fn: Arc::new(move |ctx| f(ctx).boxed()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A module that always returns the same definition and has no dependencies
    pub fn definition(id: ModuleId, definition: ContentTypeDefinition) -> Self {
        Self::new(id, move |_| {
            let definition = definition.clone();
            async move { Ok::<_, anyhow::Error>(ModuleOutput::Definition(definition)) }
        })
    }

    /// A module whose entry point always fails
    pub fn failing(id: ModuleId, message: &'static str) -> Self {
        Self::new(id, move |_| async move { Err::<ModuleOutput, _>(anyhow::anyhow!(message)) })
    }

    /// Number of times the entry point ran
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DefinitionModule for FnModule {
    fn id(&self) -> &ModuleId {
        &self.id
    }

    async fn build(&self, ctx: Arc<dyn BuildContext>) -> Result<ModuleOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.build_fn)(ctx).await
    }
}
