//! Core types shared by definition modules and the sync engine

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The two kinds of content types a module can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// Reusable sub-structure embedded in records (blocks)
    Container,
    /// Top-level record type (models)
    Record,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Record => "record",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "container" => Ok(Self::Container),
            "record" => Ok(Self::Record),
            other => anyhow::bail!("Unknown module kind: {}", other),
        }
    }
}

/// Stable identity of a definition module: kind plus name
///
/// Also used as the dependency key recorded during shadow execution
/// (`container:<name>` / `record:<name>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId {
    pub kind: ModuleKind,
    pub name: String,
}

impl ModuleId {
    pub fn new(kind: ModuleKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn container(name: impl Into<String>) -> Self {
        Self::new(ModuleKind::Container, name)
    }

    pub fn record(name: impl Into<String>) -> Self {
        Self::new(ModuleKind::Record, name)
    }

    /// Remote api key derived from the module name (`BlogPost` -> `blog_post`)
    pub fn default_api_key(&self) -> String {
        to_snake_case(&self.name)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

impl FromStr for ModuleId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, name) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Invalid module key '{}', expected <kind>:<name>", s))?;
        if name.is_empty() {
            anyhow::bail!("Invalid module key '{}': empty name", s);
        }
        Ok(Self::new(kind.parse()?, name))
    }
}

/// Desired configuration of one content type, as returned by a module's entry point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentTypeDefinition {
    /// Display name (defaults to the module name)
    #[serde(default)]
    pub name: Option<String>,
    /// Remote api key (defaults to the snake_cased module name)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Type-level options (sortable, draft mode, ...), order-insensitive
    #[serde(default)]
    pub options: Map<String, Value>,
    /// Fields in display order
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

/// A single field of a content type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Stable key used to match remote fields (labels are mutable)
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub validators: Map<String, Value>,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub localized: bool,
}

impl FieldDefinition {
    pub fn new(key: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            field_type: field_type.into(),
            ..Default::default()
        }
    }

    #[cfg(test)]
    pub fn with_validator(mut self, name: impl Into<String>, value: Value) -> Self {
        self.validators.insert(name.into(), value);
        self
    }
}

/// What a module's entry point produced
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleOutput {
    /// A description to be reconciled against the remote service
    Definition(ContentTypeDefinition),
    /// The module synchronised itself and returned its remote identifier
    Synced(String),
}

/// Context handed to a module's entry point
///
/// Two implementations exist: the shadow context used for dependency
/// analysis (records lookups, never touches the remote service) and the
/// real context used during a build (synchronises the referenced module
/// and returns its actual remote id).
#[async_trait]
pub trait BuildContext: Send + Sync {
    /// The module being executed
    fn module_id(&self) -> &ModuleId;

    /// Free-form configuration passed to every module
    fn config(&self) -> &Value;

    /// Resolve another module to its remote identifier
    async fn resolve(&self, target: &ModuleId) -> Result<String>;

    async fn resolve_container(&self, name: &str) -> Result<String> {
        self.resolve(&ModuleId::container(name)).await
    }

    async fn resolve_record(&self, name: &str) -> Result<String> {
        self.resolve(&ModuleId::record(name)).await
    }
}

/// A discovered definition unit with a single entry point
#[async_trait]
pub trait DefinitionModule: Send + Sync {
    fn id(&self) -> &ModuleId;

    /// Run the entry point. Invoked once for shadow analysis and once per real run.
    async fn build(&self, ctx: Arc<dyn BuildContext>) -> Result<ModuleOutput>;
}

/// Convert `BlogPost` / `blog post` / `blog-post` to `blog_post`
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower_or_digit = false;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            if ch.is_uppercase() {
                if prev_lower_or_digit {
                    out.push('_');
                }
                out.extend(ch.to_lowercase());
                prev_lower_or_digit = false;
            } else {
                out.push(ch);
                prev_lower_or_digit = true;
            }
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
            prev_lower_or_digit = false;
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Convert `published_at` to `Published at`
pub fn humanize(key: &str) -> String {
    let spaced = key.replace(['_', '-'], " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
