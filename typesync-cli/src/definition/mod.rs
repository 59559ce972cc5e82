//! Definition modules
//!
//! A definition module describes one remote content type. Modules are
//! discovered from the configured source directories, and each exposes a
//! single entry point that receives a build context with forward-lookup
//! functions for other modules.

pub mod lua;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use store::{ModuleSource, ModuleStore};
pub use types::{
    BuildContext, ContentTypeDefinition, DefinitionModule, ModuleId, ModuleKind, ModuleOutput,
    humanize, to_snake_case,
};
