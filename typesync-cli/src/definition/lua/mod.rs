//! Lua definition modules
//!
//! A definition module is a Lua script that returns exactly one function.
//! The function receives a `ctx` table and returns a content type
//! description (or, if it synchronised itself, its remote id).
//!
//! # Example Script
//!
//! ```lua
//! -- schema/records/Article.lua
//! return function(ctx)
//!     return {
//!         name = "Article",
//!         options = { sortable = true },
//!         fields = {
//!             { key = "title", type = "string", validators = { required = {} } },
//!             {
//!                 key = "author",
//!                 type = "link",
//!                 validators = {
//!                     item_item_type = { item_types = { ctx.resolve_record("Author") } }
//!                 }
//!             },
//!             {
//!                 key = "body",
//!                 type = "rich_text",
//!                 validators = {
//!                     rich_text_blocks = { item_types = { ctx.resolve_container("Quote") } }
//!                 }
//!             },
//!         }
//!     }
//! end
//! ```
//!
//! # Context
//!
//! - `ctx.config` - the `[modules]` table from typesync.toml
//! - `ctx.module` - `{ kind = "record", name = "Article" }`
//! - `ctx.resolve_container(name)` - remote id of a container type
//! - `ctx.resolve_record(name)` - remote id of a record type

mod runtime;

pub use runtime::LuaRuntime;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;

use super::types::{BuildContext, DefinitionModule, ModuleId, ModuleKind, ModuleOutput};

/// A definition module backed by a Lua script on disk
#[derive(Debug, Clone)]
pub struct LuaModule {
    id: ModuleId,
    path: PathBuf,
    source: Arc<str>,
}

impl LuaModule {
    /// Read a script and check that it exports an entry point
    ///
    /// The module name is the file stem (`Author.lua` -> `Author`).
    pub fn load(path: &Path, kind: ModuleKind) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .with_context(|| format!("Invalid definition file name: {}", path.display()))?;

        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read definition file: {}", path.display()))?;

        Self::from_source(ModuleId::new(kind, name), path.to_path_buf(), source)
    }

    /// Create a module from in-memory source
    pub fn from_source(id: ModuleId, path: PathBuf, source: String) -> Result<Self> {
        let module = Self {
            id,
            path,
            source: Arc::from(source),
        };

        // Fail fast: evaluate once to make sure the chunk returns a function
        let runtime = LuaRuntime::new()?;
        runtime.load_entry_point(&module.source, &module.chunk_name())?;

        Ok(module)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn chunk_name(&self) -> String {
        self.path.display().to_string()
    }
}

#[async_trait]
impl DefinitionModule for LuaModule {
    fn id(&self) -> &ModuleId {
        &self.id
    }

    async fn build(&self, ctx: Arc<dyn BuildContext>) -> Result<ModuleOutput> {
        let source = self.source.clone();
        let chunk_name = self.chunk_name();
        let handle = Handle::current();

        // Lua is not async; lookups inside the script block this thread on the runtime
        tokio::task::spawn_blocking(move || {
            let runtime = LuaRuntime::new()?;
            runtime.run_entry_point(&source, &chunk_name, ctx, handle)
        })
        .await
        .context("Definition module task panicked")?
    }
}
