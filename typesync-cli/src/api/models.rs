//! Remote schema models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::definition::ModuleKind;

/// A content type as it exists in the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResource {
    pub id: String,
    pub kind: ModuleKind,
    pub name: String,
    pub api_key: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// A field of a remote content type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteField {
    pub id: String,
    /// Stable field key (api key), used to match desired fields
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub validators: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default)]
    pub localized: bool,
    pub position: usize,
}

/// Payload for creating or updating a content type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDraft {
    pub kind: ModuleKind,
    pub name: String,
    pub api_key: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl ResourceDraft {
    /// Whether applying this draft would change the remote resource
    pub fn differs_from(&self, remote: &RemoteResource) -> bool {
        self.name != remote.name || self.api_key != remote.api_key || self.options != remote.options
    }
}

/// Payload for creating or updating a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDraft {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub validators: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default)]
    pub localized: bool,
    pub position: usize,
}

impl FieldDraft {
    /// Names of the attributes that differ from the remote field
    pub fn changes_from(&self, remote: &RemoteField) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.label != remote.label {
            changed.push("label");
        }
        if self.field_type != remote.field_type {
            changed.push("type");
        }
        if self.validators != remote.validators {
            changed.push("validators");
        }
        if self.hint != remote.hint {
            changed.push("hint");
        }
        if self.localized != remote.localized {
            changed.push("localized");
        }
        if self.position != remote.position {
            changed.push("position");
        }
        changed
    }
}

/// Envelope used by the remote JSON API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}
