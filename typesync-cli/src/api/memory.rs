//! In-memory remote schema service for tests

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::error::RemoteError;
use super::models::{FieldDraft, RemoteField, RemoteResource, ResourceDraft};
use super::service::RemoteService;
use crate::definition::ModuleKind;

#[derive(Default)]
struct State {
    resources: Vec<RemoteResource>,
    fields: HashMap<String, Vec<RemoteField>>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn find_field(&mut self, field_id: &str) -> Option<&mut RemoteField> {
        self.fields
            .values_mut()
            .flat_map(|fields| fields.iter_mut())
            .find(|field| field.id == field_id)
    }
}

/// Remote service backed by process memory
///
/// Counts mutating calls and can inject failures for the next calls.
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<State>,
    failures: Mutex<VecDeque<RemoteError>>,
    mutations: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a content type that exists before the run
    pub fn seed_resource(&self, kind: ModuleKind, name: &str, api_key: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("res");
        state.resources.push(RemoteResource {
            id: id.clone(),
            kind,
            name: name.to_string(),
            api_key: api_key.to_string(),
            options: Default::default(),
        });
        state.fields.insert(id.clone(), Vec::new());
        id
    }

    /// Make the next call fail with `error`; queued failures apply in order
    pub fn fail_next(&self, error: RemoteError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn resources(&self) -> Vec<RemoteResource> {
        self.state.lock().unwrap().resources.clone()
    }

    pub fn resource_by_key(&self, api_key: &str) -> Option<RemoteResource> {
        self.resources().into_iter().find(|r| r.api_key == api_key)
    }

    pub fn fields_of(&self, resource_id: &str) -> Vec<RemoteField> {
        let state = self.state.lock().unwrap();
        let mut fields = state.fields.get(resource_id).cloned().unwrap_or_default();
        fields.sort_by_key(|f| f.position);
        fields
    }

    /// Number of create, update and delete calls that succeeded
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<()> {
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn mutated(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

fn missing(what: &str, id: &str) -> anyhow::Error {
    RemoteError::not_found(format!("{} {} does not exist", what, id)).into()
}

fn field_from_draft(id: String, draft: &FieldDraft) -> RemoteField {
    RemoteField {
        id,
        key: draft.key.clone(),
        label: draft.label.clone(),
        field_type: draft.field_type.clone(),
        validators: draft.validators.clone(),
        hint: draft.hint.clone(),
        localized: draft.localized,
        position: draft.position,
    }
}

#[async_trait]
impl RemoteService for InMemoryRemote {
    async fn list_resources(&self) -> Result<Vec<RemoteResource>> {
        self.check_failure()?;
        Ok(self.resources())
    }

    async fn create_resource(&self, draft: &ResourceDraft) -> Result<RemoteResource> {
        self.check_failure()?;
        let mut state = self.state.lock().unwrap();
        if state.resources.iter().any(|r| r.api_key == draft.api_key) {
            return Err(RemoteError::rejected(422, format!("api_key '{}' is taken", draft.api_key)).into());
        }
        let resource = RemoteResource {
            id: state.next_id("res"),
            kind: draft.kind,
            name: draft.name.clone(),
            api_key: draft.api_key.clone(),
            options: draft.options.clone(),
        };
        state.fields.insert(resource.id.clone(), Vec::new());
        state.resources.push(resource.clone());
        drop(state);
        self.mutated();
        Ok(resource)
    }

    async fn update_resource(&self, id: &str, draft: &ResourceDraft) -> Result<RemoteResource> {
        self.check_failure()?;
        let mut state = self.state.lock().unwrap();
        let resource = state
            .resources
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| missing("content type", id))?;
        resource.name = draft.name.clone();
        resource.api_key = draft.api_key.clone();
        resource.options = draft.options.clone();
        let updated = resource.clone();
        drop(state);
        self.mutated();
        Ok(updated)
    }

    async fn delete_resource(&self, id: &str) -> Result<()> {
        self.check_failure()?;
        let mut state = self.state.lock().unwrap();
        let before = state.resources.len();
        state.resources.retain(|r| r.id != id);
        if state.resources.len() == before {
            return Err(missing("content type", id));
        }
        state.fields.remove(id);
        drop(state);
        self.mutated();
        Ok(())
    }

    async fn list_fields(&self, resource_id: &str) -> Result<Vec<RemoteField>> {
        self.check_failure()?;
        if !self.state.lock().unwrap().fields.contains_key(resource_id) {
            return Err(missing("content type", resource_id));
        }
        Ok(self.fields_of(resource_id))
    }

    async fn create_field(&self, resource_id: &str, draft: &FieldDraft) -> Result<RemoteField> {
        self.check_failure()?;
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("fld");
        let fields = state
            .fields
            .get_mut(resource_id)
            .ok_or_else(|| missing("content type", resource_id))?;
        if fields.iter().any(|f| f.key == draft.key) {
            return Err(RemoteError::rejected(422, format!("field '{}' already exists", draft.key)).into());
        }
        let field = field_from_draft(id, draft);
        fields.push(field.clone());
        drop(state);
        self.mutated();
        Ok(field)
    }

    async fn update_field(&self, field_id: &str, draft: &FieldDraft) -> Result<RemoteField> {
        self.check_failure()?;
        let mut state = self.state.lock().unwrap();
        let field = state
            .find_field(field_id)
            .ok_or_else(|| missing("field", field_id))?;
        *field = field_from_draft(field_id.to_string(), draft);
        let updated = field.clone();
        drop(state);
        self.mutated();
        Ok(updated)
    }

    async fn delete_field(&self, field_id: &str) -> Result<()> {
        self.check_failure()?;
        let mut state = self.state.lock().unwrap();
        let mut removed = false;
        for fields in state.fields.values_mut() {
            let before = fields.len();
            fields.retain(|f| f.id != field_id);
            removed |= fields.len() != before;
        }
        drop(state);
        if !removed {
            return Err(missing("field", field_id));
        }
        self.mutated();
        Ok(())
    }
}
