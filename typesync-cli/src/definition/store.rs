//! Module store: discovery and indexing of definition modules

use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::lua::LuaModule;
use super::types::{DefinitionModule, ModuleId, ModuleKind};

/// File extension of definition scripts
const SCRIPT_EXTENSION: &str = "lua";

/// A directory that holds definitions of one kind
#[derive(Debug, Clone)]
pub struct ModuleSource {
    pub kind: ModuleKind,
    pub dir: PathBuf,
}

impl ModuleSource {
    pub fn new(kind: ModuleKind, dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            dir: dir.into(),
        }
    }
}

/// Loads and indexes definition modules from configured locations
#[derive(Debug, Default)]
pub struct ModuleStore {
    sources: Vec<ModuleSource>,
}

impl ModuleStore {
    pub fn new(sources: Vec<ModuleSource>) -> Self {
        Self { sources }
    }

    /// Discover every module, in a stable order
    ///
    /// Sources are scanned in configuration order and files sorted by name,
    /// so discovery order (the plan's tie-break) is reproducible. A file
    /// without an entry point or a duplicate module id is fatal.
    pub fn discover(&self) -> Result<Vec<Arc<dyn DefinitionModule>>> {
        let mut modules: Vec<Arc<dyn DefinitionModule>> = Vec::new();

        for source in &self.sources {
            let found = scan_source(source)?;
            if found.is_empty() {
                warn!(
                    "No {} definitions found in {}",
                    source.kind,
                    source.dir.display()
                );
            }
            for module in found {
                modules.push(Arc::new(module));
            }
        }

        let mut seen: HashSet<ModuleId> = HashSet::new();
        for module in &modules {
            if !seen.insert(module.id().clone()) {
                anyhow::bail!("Duplicate definition module: {}", module.id());
            }
        }

        debug!("Discovered {} definition modules", modules.len());
        Ok(modules)
    }
}

/// Load every script in one source directory, sorted by file name
fn scan_source(source: &ModuleSource) -> Result<Vec<LuaModule>> {
    if !source.dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(&source.dir)
        .with_context(|| format!("Failed to read definition directory: {}", source.dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_script(path))
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|path| {
            LuaModule::load(path, source.kind)
                .with_context(|| format!("Invalid definition module: {}", path.display()))
        })
        .collect()
}

fn is_script(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(SCRIPT_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    fn setup() -> (TempDir, ModuleStore) {
        let tmp = TempDir::new().unwrap();
        let containers = tmp.path().join("containers");
        let records = tmp.path().join("records");
        fs::create_dir_all(&containers).unwrap();
        fs::create_dir_all(&records).unwrap();

        let store = ModuleStore::new(vec![
            ModuleSource::new(ModuleKind::Container, containers),
            ModuleSource::new(ModuleKind::Record, records),
        ]);
        (tmp, store)
    }

    #[test]
    fn test_discover_in_stable_order() {
        let (tmp, store) = setup();
        let ok = "return function(ctx) return {} end";
        write(&tmp.path().join("records"), "Author.lua", ok);
        write(&tmp.path().join("records"), "Article.lua", ok);
        write(&tmp.path().join("records"), "notes.txt", "not a module");
        write(&tmp.path().join("containers"), "Quote.lua", ok);

        let ids: Vec<ModuleId> = store.discover().unwrap().iter().map(|m| m.id().clone()).collect();

        assert_eq!(
            ids,
            vec![
                ModuleId::container("Quote"),
                ModuleId::record("Article"),
                ModuleId::record("Author"),
            ]
        );
    }

    #[test]
    fn test_empty_and_missing_directories_are_valid() {
        let store = ModuleStore::new(vec![ModuleSource::new(
            ModuleKind::Record,
            "/definitely/not/here",
        )]);
        assert!(store.discover().unwrap().is_empty());

        let (_tmp, store) = setup();
        assert!(store.discover().unwrap().is_empty());
    }

    #[test]
    fn test_file_without_entry_point_is_fatal() {
        let (tmp, store) = setup();
        write(&tmp.path().join("records"), "Broken.lua", "return { name = 'x' }");

        let err = store.discover().err().expect("script without entry point should fail");
        assert!(format!("{:#}", err).contains("Broken.lua"));
    }

    #[test]
    fn test_duplicate_module_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let shared = tmp.path().join("shared");
        let extra = tmp.path().join("extra");
        fs::create_dir_all(&shared).unwrap();
        fs::create_dir_all(&extra).unwrap();
        write(&shared, "Author.lua", "return function(ctx) return {} end");
        write(&extra, "Author.lua", "return function(ctx) return {} end");

        let store = ModuleStore::new(vec![
            ModuleSource::new(ModuleKind::Record, shared),
            ModuleSource::new(ModuleKind::Record, extra),
        ]);

        let err = store.discover().err().expect("duplicate id should fail");
        assert!(err.to_string().contains("Duplicate definition module: record:Author"));
    }
}
