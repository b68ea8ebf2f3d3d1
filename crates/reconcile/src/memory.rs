//! In-memory remote store
//!
//! Behaves like the real store closely enough to run whole plan/apply
//! cycles offline: ids are assigned on create, colors come back without
//! their '#', and every call is recorded.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::context::RemoteApi;
use crate::error::RemoteError;
use crate::types::{EntityKind, Payload, RawRecord, RemoteId};

/// A recorded remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List(EntityKind),
    Create(EntityKind, String),
    Update(EntityKind, RemoteId),
    Delete(EntityKind, RemoteId),
    SetTags(EntityKind, RemoteId),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::List(_))
    }
}

#[derive(Debug, Default)]
struct State {
    last_id: RemoteId,
    records: BTreeMap<(EntityKind, RemoteId), RawRecord>,
    failing: HashSet<String>,
    calls: Vec<Call>,
}

#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: Mutex<State>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store; new ids continue after the highest seeded one.
    pub fn with_records(records: impl IntoIterator<Item = (EntityKind, RawRecord)>) -> Self {
        let remote = Self::new();
        {
            let mut state = remote.state();
            for (kind, record) in records {
                state.last_id = state.last_id.max(record.id);
                state.records.insert((kind, record.id), record);
            }
        }
        remote
    }

    /// Make every mutation of an entity titled `title` fail.
    pub fn fail_on(&self, title: &str) {
        self.state().failing.insert(title.to_string());
    }

    pub fn record(&self, kind: EntityKind, id: RemoteId) -> Option<RawRecord> {
        self.state().records.get(&(kind, id)).cloned()
    }

    pub fn records(&self, kind: EntityKind) -> Vec<RawRecord> {
        self.state()
            .records
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// All records, for seeding another store
    pub fn snapshot(&self) -> Vec<(EntityKind, RawRecord)> {
        self.state()
            .records
            .iter()
            .map(|((kind, _), record)| (*kind, record.clone()))
            .collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Number of calls that changed, or tried to change, the store
    pub fn mutations(&self) -> usize {
        self.state().calls.iter().filter(|c| c.is_mutation()).count()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn apply_payload(record: &mut RawRecord, payload: &Payload) {
    record.title.clone_from(&payload.title);
    record.body.clone_from(&payload.body);
    record.color = payload
        .color
        .as_deref()
        .map(|c| c.trim_start_matches('#').to_string());
    record.category_id = payload.category_id;
    record.metadata = Some(payload.metadata.clone());
}

fn injected(title: &str) -> RemoteError {
    RemoteError::with_status(500, format!("injected failure for '{title}'"))
}

fn not_found(kind: EntityKind, id: RemoteId) -> RemoteError {
    RemoteError::with_status(404, format!("{kind} {id} not found"))
}

impl RemoteApi for InMemoryRemote {
    fn list(&self, kind: EntityKind) -> Result<Vec<RawRecord>, RemoteError> {
        self.state().calls.push(Call::List(kind));
        Ok(self.records(kind))
    }

    fn create(&self, kind: EntityKind, payload: &Payload) -> Result<RemoteId, RemoteError> {
        let mut state = self.state();
        state.calls.push(Call::Create(kind, payload.title.clone()));
        if state.failing.contains(&payload.title) {
            return Err(injected(&payload.title));
        }
        state.last_id += 1;
        let id = state.last_id;
        let mut record = RawRecord {
            id,
            ..RawRecord::default()
        };
        apply_payload(&mut record, payload);
        state.records.insert((kind, id), record);
        Ok(id)
    }

    fn update(&self, kind: EntityKind, id: RemoteId, payload: &Payload) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.calls.push(Call::Update(kind, id));
        if state.failing.contains(&payload.title) {
            return Err(injected(&payload.title));
        }
        let record = state
            .records
            .get_mut(&(kind, id))
            .ok_or_else(|| not_found(kind, id))?;
        apply_payload(record, payload);
        Ok(())
    }

    fn delete(&self, kind: EntityKind, id: RemoteId) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.calls.push(Call::Delete(kind, id));
        let title = match state.records.get(&(kind, id)) {
            Some(record) => record.title.clone(),
            None => return Err(not_found(kind, id)),
        };
        if state.failing.contains(&title) {
            return Err(injected(&title));
        }
        state.records.remove(&(kind, id));
        Ok(())
    }

    fn set_tags(&self, kind: EntityKind, id: RemoteId, tags: &[String]) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.calls.push(Call::SetTags(kind, id));
        let title = match state.records.get(&(kind, id)) {
            Some(record) => record.title.clone(),
            None => return Err(not_found(kind, id)),
        };
        if state.failing.contains(&title) {
            return Err(injected(&title));
        }
        if let Some(record) = state.records.get_mut(&(kind, id)) {
            record.tags = tags.to_vec();
        }
        Ok(())
    }
}
