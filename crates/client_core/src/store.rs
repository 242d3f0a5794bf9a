//! Client-side record cache with optimistic mutations.
//!
//! Every cached record carries a [`SyncState`]. Only this module moves a
//! record between states: a mutation marks its target pending, issues the
//! remote call, then either confirms the server result or rolls back.
//! Mutations addressed to the same record are serialized in the order their
//! methods were called; different records proceed concurrently.

use std::{
    collections::HashMap,
    future::Future,
    str::FromStr,
    sync::{Arc, Mutex},
};

use futures::future::{FutureExt, Shared};
use serde_json::{Map, Value};
use shared::{
    domain::{Fields, Record, RecordId},
    schema::ResourceSchema,
};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::{
    error::{RemoteError, StoreError},
    lock,
    notification::NotificationQueue,
    remote::RemoteResource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Synced,
    PendingCreate,
    PendingUpdate,
    PendingDelete,
}

impl SyncState {
    pub fn is_pending(self) -> bool {
        self != SyncState::Synced
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    pub record: Record,
    pub sync: SyncState,
}

impl CachedRecord {
    fn synced(record: Record) -> Self {
        Self {
            record,
            sync: SyncState::Synced,
        }
    }
}

impl AsRef<Record> for CachedRecord {
    fn as_ref(&self) -> &Record {
        &self.record
    }
}

/// What a failed load does to the records already cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadFailurePolicy {
    #[default]
    KeepStale,
    Clear,
}

impl FromStr for LoadFailurePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "keep" | "keep_stale" | "keep-stale" => Ok(LoadFailurePolicy::KeepStale),
            "clear" => Ok(LoadFailurePolicy::Clear),
            other => Err(format!(
                "unknown load failure policy `{other}` (expected `keep` or `clear`)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Changed { revision: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOutcome {
    pub loaded: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Load,
    Create,
    Update,
    Remove,
}

type Tail = Shared<oneshot::Receiver<()>>;

#[derive(Default)]
struct StoreState {
    entries: Vec<CachedRecord>,
    /// Temporary id -> server id, or `None` once the create failed. Kept
    /// until the last mutation queued on the temporary id settles.
    aliases: HashMap<RecordId, Option<RecordId>>,
    /// Last mutation ticket issued per record, with the signal its successor
    /// waits on.
    tails: HashMap<RecordId, (u64, Tail)>,
    next_ticket: u64,
    epoch: u64,
    load_generation: u64,
    revision: u64,
    disposed: bool,
}

impl StoreState {
    fn position(&self, id: &RecordId) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.record.id == id)
    }

    fn live_position(&self, id: &RecordId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| &entry.record.id == id && entry.sync != SyncState::PendingDelete)
    }

    fn resolve(&self, id: &RecordId) -> Result<RecordId, StoreError> {
        match self.aliases.get(id) {
            Some(Some(server_id)) => Ok(server_id.clone()),
            Some(None) => Err(StoreError::RecordNotFound(id.to_string())),
            None => Ok(id.clone()),
        }
    }

    fn upsert(&mut self, record: Record) {
        match self.position(&record.id) {
            Some(index) => self.entries[index] = CachedRecord::synced(record),
            None => self.entries.push(CachedRecord::synced(record)),
        }
    }

    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// A place in the per-record mutation queue. Dropping it lets the next
/// mutation on the same record proceed.
struct Gate {
    ticket: u64,
    previous: Option<Tail>,
    state: Arc<Mutex<StoreState>>,
    _release: oneshot::Sender<()>,
}

impl Gate {
    fn enter(shared: &Arc<Mutex<StoreState>>, state: &mut StoreState, key: RecordId) -> Gate {
        let (release, signal) = oneshot::channel();
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        let previous = state
            .tails
            .insert(key, (ticket, signal.shared()))
            .map(|(_, tail)| tail);
        Gate {
            ticket,
            previous,
            state: Arc::clone(shared),
            _release: release,
        }
    }

    async fn wait_turn(&mut self) {
        if let Some(previous) = self.previous.take() {
            // Resolves with an error once the predecessor's sender is dropped.
            let _ = previous.await;
        }
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        let ticket = self.ticket;
        let mut state = lock(&self.state);
        let StoreState { aliases, tails, .. } = &mut *state;
        tails.retain(|_, (queued, _)| *queued != ticket);
        // A settled temporary id only needs resolving while mutations issued
        // against it are still queued.
        aliases.retain(|temp_id, _| tails.contains_key(temp_id));
    }
}

#[derive(Clone)]
pub struct RecordStore {
    schema: Arc<ResourceSchema>,
    remote: Arc<dyn RemoteResource>,
    notifications: NotificationQueue,
    policy: LoadFailurePolicy,
    state: Arc<Mutex<StoreState>>,
    events: broadcast::Sender<StoreEvent>,
}

impl RecordStore {
    pub fn new(
        schema: ResourceSchema,
        remote: Arc<dyn RemoteResource>,
        notifications: NotificationQueue,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            schema: Arc::new(schema),
            remote,
            notifications,
            policy: LoadFailurePolicy::default(),
            state: Arc::new(Mutex::new(StoreState::default())),
            events,
        }
    }

    pub fn with_load_failure_policy(mut self, policy: LoadFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn revision(&self) -> u64 {
        lock(&self.state).revision
    }

    /// Cached records in cache order. Records whose delete is in flight are
    /// hidden.
    pub fn records(&self) -> Vec<CachedRecord> {
        lock(&self.state)
            .entries
            .iter()
            .filter(|entry| entry.sync != SyncState::PendingDelete)
            .cloned()
            .collect()
    }

    /// Looks up a visible record. A temporary id whose create has settled
    /// resolves to the server-assigned record.
    pub fn get(&self, id: &RecordId) -> Option<CachedRecord> {
        let state = lock(&self.state);
        let id = state.resolve(id).ok()?;
        state
            .live_position(&id)
            .map(|index| state.entries[index].clone())
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.state).disposed
    }

    /// Results that arrive after this point are discarded silently.
    pub fn dispose(&self) {
        lock(&self.state).disposed = true;
        debug!(resource = %self.schema.resource, "record store disposed");
    }

    /// Replaces the cache with the server's list. Only the most recently
    /// issued load may apply its result.
    pub fn load(&self) -> impl Future<Output = Result<LoadOutcome, StoreError>> + Send + 'static {
        let store = self.clone();
        let generation = {
            let mut state = lock(&self.state);
            if state.disposed {
                None
            } else {
                state.load_generation += 1;
                Some(state.load_generation)
            }
        };

        async move {
            let generation = generation.ok_or(StoreError::Stale)?;
            let result = store.remote.list().await;
            store.apply_load(generation, result)
        }
    }

    /// Inserts `draft` under a temporary id right away, then swaps in the
    /// server's record once the create succeeds.
    pub fn create(
        &self,
        draft: Fields,
    ) -> impl Future<Output = Result<Record, StoreError>> + Send + 'static {
        let store = self.clone();
        let issued = self.issue_create(draft);

        async move {
            let (temp_id, body, gate) = issued?;
            let result = store.remote.create(body).await;
            let result = result.and_then(|value| store.decode(&value));
            store.settle_create(&temp_id, gate.ticket, result)
        }
    }

    /// Applies `patch` once every earlier mutation of `id` has settled. The
    /// full merged record is sent to the server.
    pub fn update(
        &self,
        id: &RecordId,
        patch: Fields,
    ) -> impl Future<Output = Result<Record, StoreError>> + Send + 'static {
        let store = self.clone();
        let id = id.clone();
        let issued = self
            .schema
            .conform_patch(&patch)
            .map_err(StoreError::from)
            .and_then(|patch| Ok((self.issue(&id)?, patch)));

        async move {
            let (mut gate, patch) = issued?;
            gate.wait_turn().await;
            let (target, snapshot, body, epoch) = store.begin_update(&id, &patch)?;
            let result = store.remote.update(&target, body).await;
            let result = result.and_then(|value| store.decode(&value));
            store.settle_update(&target, snapshot, epoch, result)
        }
    }

    pub fn remove(&self, id: &RecordId) -> impl Future<Output = Result<(), StoreError>> + Send + 'static {
        let store = self.clone();
        let id = id.clone();
        let issued = self.issue(&id);

        async move {
            let mut gate = issued?;
            gate.wait_turn().await;
            let (target, epoch) = store.begin_remove(&id)?;
            let result = store.remote.remove(&target).await;
            store.settle_remove(&target, epoch, result)
        }
    }

    fn decode(&self, value: &Value) -> Result<Record, RemoteError> {
        Ok(self.schema.record_from_json(value)?)
    }

    fn changed(&self, revision: u64) {
        let _ = self.events.send(StoreEvent::Changed { revision });
    }

    fn issue(&self, id: &RecordId) -> Result<Gate, StoreError> {
        let mut state = lock(&self.state);
        if state.disposed {
            return Err(StoreError::Stale);
        }
        let key = state.resolve(id)?;
        Ok(Gate::enter(&self.state, &mut state, key))
    }

    fn apply_load(
        &self,
        generation: u64,
        result: Result<Vec<Value>, RemoteError>,
    ) -> Result<LoadOutcome, StoreError> {
        let items = match result {
            Ok(items) => items,
            Err(err) => return self.fail_load(generation, err),
        };

        let mut outcome = LoadOutcome::default();
        let mut entries: Vec<CachedRecord> = Vec::with_capacity(items.len());
        for item in &items {
            match self.schema.record_from_json(item) {
                Ok(record) if entries.iter().any(|entry| entry.record.id == record.id) => {
                    warn!(
                        resource = %self.schema.resource,
                        record_id = %record.id,
                        "skipping duplicate record id"
                    );
                    outcome.skipped += 1;
                }
                Ok(record) => entries.push(CachedRecord::synced(record)),
                Err(err) => {
                    warn!(
                        resource = %self.schema.resource,
                        error = %err,
                        "skipping record that does not match the schema"
                    );
                    outcome.skipped += 1;
                }
            }
        }
        outcome.loaded = entries.len();

        let revision = {
            let mut state = lock(&self.state);
            if state.disposed || state.load_generation != generation {
                return Err(StoreError::Stale);
            }
            state.entries = entries;
            state.epoch += 1;
            state.bump()
        };
        info!(
            resource = %self.schema.resource,
            count = outcome.loaded,
            skipped = outcome.skipped,
            "records loaded"
        );
        self.changed(revision);
        Ok(outcome)
    }

    fn fail_load(&self, generation: u64, err: RemoteError) -> Result<LoadOutcome, StoreError> {
        let revision = {
            let mut state = lock(&self.state);
            if state.disposed || state.load_generation != generation {
                return Err(StoreError::Stale);
            }
            match self.policy {
                LoadFailurePolicy::KeepStale => None,
                LoadFailurePolicy::Clear => {
                    state.entries.clear();
                    state.epoch += 1;
                    Some(state.bump())
                }
            }
        };
        warn!(resource = %self.schema.resource, error = %err, policy = ?self.policy, "load failed");
        if let Some(revision) = revision {
            self.changed(revision);
        }
        self.notifications
            .error(self.failure_message(Action::Load, &err));
        Err(err.into())
    }

    fn issue_create(
        &self,
        draft: Fields,
    ) -> Result<(RecordId, Map<String, Value>, Gate), StoreError> {
        let fields = self.schema.conform(&draft)?;
        let body = self.schema.to_wire(&fields);
        let temp_id = RecordId::local();

        let (gate, revision) = {
            let mut state = lock(&self.state);
            if state.disposed {
                return Err(StoreError::Stale);
            }
            state.entries.push(CachedRecord {
                record: Record::new(temp_id.clone(), fields),
                sync: SyncState::PendingCreate,
            });
            let gate = Gate::enter(&self.state, &mut state, temp_id.clone());
            (gate, state.bump())
        };
        debug!(resource = %self.schema.resource, record_id = %temp_id, "optimistic create");
        self.changed(revision);
        Ok((temp_id, body, gate))
    }

    fn settle_create(
        &self,
        temp_id: &RecordId,
        ticket: u64,
        result: Result<Record, RemoteError>,
    ) -> Result<Record, StoreError> {
        let revision = {
            let mut state = lock(&self.state);
            if state.disposed {
                return Err(StoreError::Stale);
            }
            let slot = state.position(temp_id);
            match &result {
                Ok(record) => {
                    state
                        .aliases
                        .insert(temp_id.clone(), Some(record.id.clone()));
                    // Mutations queued on the temporary id stay ahead of any
                    // issued later under the server id.
                    if let Some((queued, tail)) = state.tails.get(temp_id).cloned() {
                        if queued != ticket {
                            state.tails.insert(record.id.clone(), (queued, tail));
                        }
                    }
                    match (slot, state.position(&record.id)) {
                        (Some(temp), Some(existing)) => {
                            state.entries[existing] = CachedRecord::synced(record.clone());
                            state.entries.remove(temp);
                        }
                        (Some(temp), None) => {
                            state.entries[temp] = CachedRecord::synced(record.clone());
                        }
                        (None, _) => state.upsert(record.clone()),
                    }
                }
                Err(_) => {
                    state.aliases.insert(temp_id.clone(), None);
                    if let Some(temp) = slot {
                        state.entries.remove(temp);
                    }
                }
            }
            state.bump()
        };
        self.changed(revision);

        match result {
            Ok(record) => {
                info!(
                    resource = %self.schema.resource,
                    record_id = %record.id,
                    temp_id = %temp_id,
                    "create confirmed"
                );
                self.notifications
                    .success(self.success_message("added"));
                Ok(record)
            }
            Err(err) => {
                warn!(resource = %self.schema.resource, error = %err, "create failed, rolled back");
                self.notifications
                    .error(self.failure_message(Action::Create, &err));
                Err(err.into())
            }
        }
    }

    fn begin_update(
        &self,
        id: &RecordId,
        patch: &Fields,
    ) -> Result<(RecordId, Record, Map<String, Value>, u64), StoreError> {
        let (target, snapshot, merged, epoch, revision) = {
            let mut state = lock(&self.state);
            if state.disposed {
                return Err(StoreError::Stale);
            }
            let target = state.resolve(id)?;
            let index = state
                .live_position(&target)
                .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;
            let epoch = state.epoch;
            let entry = &mut state.entries[index];
            let snapshot = entry.record.clone();
            entry.record = snapshot.patched(patch);
            entry.sync = SyncState::PendingUpdate;
            let merged = entry.record.fields.clone();
            (target, snapshot, merged, epoch, state.bump())
        };
        debug!(resource = %self.schema.resource, record_id = %target, "optimistic update");
        self.changed(revision);
        let body = self.schema.to_wire(&merged);
        Ok((target, snapshot, body, epoch))
    }

    fn settle_update(
        &self,
        target: &RecordId,
        snapshot: Record,
        epoch: u64,
        result: Result<Record, RemoteError>,
    ) -> Result<Record, StoreError> {
        let result = result.map(|record| Record::new(target.clone(), record.fields));
        let revision = {
            let mut state = lock(&self.state);
            if state.disposed {
                return Err(StoreError::Stale);
            }
            let same_cache = state.epoch == epoch;
            match &result {
                Ok(record) => state.upsert(record.clone()),
                Err(_) if same_cache => {
                    if let Some(index) = state.position(target) {
                        state.entries[index] = CachedRecord::synced(snapshot);
                    }
                }
                // A reload replaced the cache; its snapshot is newer than ours.
                Err(_) => {}
            }
            state.bump()
        };
        self.changed(revision);

        match result {
            Ok(record) => {
                info!(resource = %self.schema.resource, record_id = %target, "update confirmed");
                self.notifications
                    .success(self.success_message("updated"));
                Ok(record)
            }
            Err(err) => {
                warn!(
                    resource = %self.schema.resource,
                    record_id = %target,
                    error = %err,
                    "update failed, rolled back"
                );
                self.notifications
                    .error(self.failure_message(Action::Update, &err));
                Err(err.into())
            }
        }
    }

    fn begin_remove(&self, id: &RecordId) -> Result<(RecordId, u64), StoreError> {
        let (target, epoch, revision) = {
            let mut state = lock(&self.state);
            if state.disposed {
                return Err(StoreError::Stale);
            }
            let target = state.resolve(id)?;
            let index = state
                .live_position(&target)
                .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;
            state.entries[index].sync = SyncState::PendingDelete;
            (target, state.epoch, state.bump())
        };
        debug!(resource = %self.schema.resource, record_id = %target, "optimistic delete");
        self.changed(revision);
        Ok((target, epoch))
    }

    fn settle_remove(
        &self,
        target: &RecordId,
        epoch: u64,
        result: Result<(), RemoteError>,
    ) -> Result<(), StoreError> {
        let revision = {
            let mut state = lock(&self.state);
            if state.disposed {
                return Err(StoreError::Stale);
            }
            let slot = state.position(target);
            match (&result, slot) {
                (Ok(()), Some(index)) => {
                    state.entries.remove(index);
                }
                (Err(_), Some(index)) if state.epoch == epoch => {
                    state.entries[index].sync = SyncState::Synced;
                }
                _ => {}
            }
            state.bump()
        };
        self.changed(revision);

        match result {
            Ok(()) => {
                info!(resource = %self.schema.resource, record_id = %target, "delete confirmed");
                self.notifications
                    .success(self.success_message("deleted"));
                Ok(())
            }
            Err(err) => {
                warn!(
                    resource = %self.schema.resource,
                    record_id = %target,
                    error = %err,
                    "delete failed, record restored"
                );
                self.notifications
                    .error(self.failure_message(Action::Remove, &err));
                Err(err.into())
            }
        }
    }

    fn success_message(&self, verb: &str) -> String {
        format!("{} {verb} successfully", self.schema.entity_title())
    }

    /// Transport failures and error responses are worded differently so a
    /// user can tell an unreachable server from a rejected request.
    fn failure_message(&self, action: Action, err: &RemoteError) -> String {
        let entity = &self.schema.entity;
        let plural = &self.schema.entity_plural;
        match (action, err.is_transport()) {
            (Action::Load, true) => format!("Error loading {plural}"),
            (Action::Load, false) => format!("Failed to load {plural}"),
            (Action::Create | Action::Update, true) => format!("Error saving {entity}"),
            (Action::Create | Action::Update, false) => format!("Failed to save {entity}"),
            (Action::Remove, true) => format!("Error deleting {entity}"),
            (Action::Remove, false) => format!("Failed to delete {entity}"),
        }
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
