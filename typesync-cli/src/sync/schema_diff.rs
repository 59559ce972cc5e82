//! Field diff between a remote content type and its desired state
//!
//! Fields are matched by their stable key, never by label. Fields present
//! on both sides are patched in place so the remote field keeps its id and
//! any content bound to it.

use std::collections::{HashMap, HashSet};

use crate::api::{FieldDraft, RemoteField};

/// An in-place patch of an existing remote field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub field_id: String,
    pub draft: FieldDraft,
    /// Attribute names that differ (`label`, `validators`, ...)
    pub changes: Vec<&'static str>,
}

/// Categorised field differences
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDiff {
    /// Desired fields with no remote counterpart, in desired order
    pub to_create: Vec<FieldDraft>,
    /// Fields on both sides whose attributes differ, in desired order
    pub to_update: Vec<FieldUpdate>,
    /// Remote fields no longer desired, by remote position
    pub to_delete: Vec<RemoteField>,
    /// Keys of fields that already match
    pub unchanged: Vec<String>,
}

/// Compare remote fields against desired fields
pub fn compare_fields(remote: &[RemoteField], desired: &[FieldDraft]) -> FieldDiff {
    let remote_map: HashMap<&str, &RemoteField> =
        remote.iter().map(|f| (f.key.as_str(), f)).collect();
    let desired_keys: HashSet<&str> = desired.iter().map(|f| f.key.as_str()).collect();

    let mut diff = FieldDiff::default();

    for draft in desired {
        match remote_map.get(draft.key.as_str()) {
            Some(existing) => {
                let changes = draft.changes_from(existing);
                if changes.is_empty() {
                    diff.unchanged.push(draft.key.clone());
                } else {
                    diff.to_update.push(FieldUpdate {
                        field_id: existing.id.clone(),
                        draft: draft.clone(),
                        changes,
                    });
                }
            }
            None => diff.to_create.push(draft.clone()),
        }
    }

    diff.to_delete = remote
        .iter()
        .filter(|f| !desired_keys.contains(f.key.as_str()))
        .cloned()
        .collect();
    diff.to_delete.sort_by_key(|f| f.position);

    diff
}
