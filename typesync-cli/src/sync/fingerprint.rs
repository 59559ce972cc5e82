//! Desired state normalisation and fingerprinting
//!
//! A definition is first normalised (defaults expanded, identifiers
//! validated) and then hashed over a canonical JSON document whose object
//! keys are sorted at every level. The fingerprint therefore ignores option
//! key order and field declaration order but includes each field's position.

use anyhow::Result;
use regex::Regex;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::api::{FieldDraft, ResourceDraft};
use crate::definition::{ContentTypeDefinition, ModuleId, humanize};

/// Bumped whenever the canonical document changes shape
pub const FINGERPRINT_VERSION: u32 = 1;

const IDENTIFIER_PATTERN: &str = r"^[a-z][a-z0-9_]*$";

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(IDENTIFIER_PATTERN).expect("identifier pattern is valid"));

/// A module's desired remote configuration with all defaults expanded
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    pub module: ModuleId,
    pub resource: ResourceDraft,
    /// Fields with their final positions, in display order
    pub fields: Vec<FieldDraft>,
}

impl DesiredState {
    /// Expand defaults and validate identifiers
    pub fn from_definition(module: &ModuleId, definition: &ContentTypeDefinition) -> Result<Self> {
        let api_key = definition
            .api_key
            .clone()
            .unwrap_or_else(|| module.default_api_key());
        if !IDENTIFIER.is_match(&api_key) {
            anyhow::bail!(
                "Invalid api_key '{}' for {}: must match {}",
                api_key,
                module,
                IDENTIFIER_PATTERN
            );
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(definition.fields.len());
        for (position, field) in definition.fields.iter().enumerate() {
            if !IDENTIFIER.is_match(&field.key) {
                anyhow::bail!(
                    "Invalid field key '{}' in {}: must match {}",
                    field.key,
                    module,
                    IDENTIFIER_PATTERN
                );
            }
            if !seen.insert(field.key.as_str()) {
                anyhow::bail!("Duplicate field key '{}' in {}", field.key, module);
            }
            if field.field_type.trim().is_empty() {
                anyhow::bail!("Field '{}' in {} has no type", field.key, module);
            }

            fields.push(FieldDraft {
                key: field.key.clone(),
                label: field.label.clone().unwrap_or_else(|| humanize(&field.key)),
                field_type: field.field_type.clone(),
                validators: field.validators.clone(),
                hint: field.hint.clone(),
                localized: field.localized,
                position,
            });
        }

        Ok(Self {
            module: module.clone(),
            resource: ResourceDraft {
                kind: module.kind,
                name: definition.name.clone().unwrap_or_else(|| module.name.clone()),
                api_key,
                options: definition.options.clone(),
            },
            fields,
        })
    }

    /// Canonical document the fingerprint is computed over
    pub fn canonical(&self) -> Value {
        let fields: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|field| {
                (
                    field.key.clone(),
                    json!({
                        "label": field.label,
                        "type": field.field_type,
                        "validators": field.validators,
                        "hint": field.hint,
                        "localized": field.localized,
                        "position": field.position,
                    }),
                )
            })
            .collect();

        sorted(&json!({
            "version": FINGERPRINT_VERSION,
            "kind": self.resource.kind,
            "name": self.resource.name,
            "api_key": self.resource.api_key,
            "options": self.resource.options,
            "fields": fields,
        }))
    }

    /// SHA-256 of the canonical document, hex encoded
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Fingerprint recorded for a module that synchronised itself
///
/// Only the reported remote id is known, so that is what gets hashed.
pub fn self_synced_fingerprint(remote_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("self-synced:{}", remote_id).as_bytes());
    hex::encode(hasher.finalize())
}

/// Rebuild objects with keys inserted in sorted order
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|key| (key.clone(), sorted(&map[key.as_str()])))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}
