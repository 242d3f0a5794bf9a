//! Screen-level orchestration for one mounted resource view.
//!
//! The controller owns the view phase, the filter and sort criteria and the
//! record store, and recomputes the visible rows from them on demand. Every
//! mutation is validated before the store sees it.

use std::{
    collections::BTreeMap,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};
use shared::{
    domain::{FieldValue, Fields, Record, RecordId},
    schema::ResourceSchema,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::{
    error::{MutationError, StoreError, ViewError},
    filter::{self, FilterCriteria},
    lock,
    notification::{Notification, NotificationEvent, NotificationQueue, DEFAULT_NOTIFICATION_TTL},
    remote::RemoteResource,
    sort::{self, SortState},
    store::{CachedRecord, LoadFailurePolicy, LoadOutcome, RecordStore, StoreEvent, SyncState},
    validation::{validate, validate_patch},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub notification_ttl: Duration,
    pub load_failure_policy: LoadFailurePolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            notification_ttl: DEFAULT_NOTIFICATION_TTL,
            load_failure_policy: LoadFailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewPhase {
    Loading,
    Ready,
    Unmounted,
}

/// Asks the user before a destructive action.
#[async_trait]
pub trait ConfirmDestructive: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

pub struct AlwaysConfirm;

#[async_trait]
impl ConfirmDestructive for AlwaysConfirm {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewRow {
    pub record: Record,
    /// Computed fields such as a line total.
    pub derived: Fields,
    pub sync: SyncState,
}

impl ViewRow {
    fn new(schema: &ResourceSchema, entry: &CachedRecord) -> Self {
        let derived = schema
            .derived
            .iter()
            .map(|field| (field.name.clone(), field.compute(&entry.record.fields)))
            .collect();
        Self {
            record: entry.record.clone(),
            derived,
            sync: entry.sync,
        }
    }

    pub fn value(&self, name: &str) -> FieldValue {
        self.derived
            .get(name)
            .or_else(|| self.record.fields.get(name))
            .cloned()
            .unwrap_or_default()
    }
}

/// Headline figures over the visible rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewSummary {
    pub count: usize,
    pub total_amount: f64,
    pub by_status: BTreeMap<String, usize>,
    pub this_month: usize,
}

impl ViewSummary {
    pub fn compute(schema: &ResourceSchema, rows: &[ViewRow], today: NaiveDate) -> Self {
        let mut summary = ViewSummary {
            count: rows.len(),
            ..ViewSummary::default()
        };
        for row in rows {
            if let Some(amount) = &schema.amount_field {
                summary.total_amount += row.value(amount).as_number().unwrap_or(0.0);
            }
            if let Some(status) = &schema.status_field {
                let value = row.value(status);
                if !value.is_blank() {
                    *summary.by_status.entry(value.display()).or_default() += 1;
                }
            }
            if let Some(date) = &schema.date_field {
                let in_month = row
                    .value(date)
                    .as_date()
                    .is_some_and(|dt| dt.year() == today.year() && dt.month() == today.month());
                if in_month {
                    summary.this_month += 1;
                }
            }
        }
        summary
    }

    pub fn status_count(&self, status: &str) -> usize {
        self.by_status.get(status).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewModel {
    pub phase: ViewPhase,
    pub rows: Vec<ViewRow>,
    /// Records in the cache before filtering, to tell "no data" from "no matches".
    pub total_records: usize,
    pub summary: ViewSummary,
    pub notifications: Vec<Notification>,
    pub sort: SortState,
    pub criteria: FilterCriteria,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    PhaseChanged(ViewPhase),
    CriteriaChanged,
    SortChanged(SortState),
    RecordsChanged { revision: u64 },
    Notification(NotificationEvent),
}

/// Everything that should trigger a re-render, merged into one stream.
pub struct ViewEvents {
    view: broadcast::Receiver<ViewEvent>,
    store: broadcast::Receiver<StoreEvent>,
    notifications: broadcast::Receiver<NotificationEvent>,
}

impl ViewEvents {
    /// Next event from any source. `None` once a source has shut down.
    pub async fn recv(&mut self) -> Option<ViewEvent> {
        loop {
            let next = tokio::select! {
                event = self.view.recv() => event,
                event = self.store.recv() => {
                    event.map(|StoreEvent::Changed { revision }| ViewEvent::RecordsChanged { revision })
                }
                event = self.notifications.recv() => event.map(ViewEvent::Notification),
            };
            match next {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "view event receiver lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

struct ViewState {
    phase: ViewPhase,
    criteria: FilterCriteria,
    sort: SortState,
}

pub struct Controller {
    store: RecordStore,
    notifications: NotificationQueue,
    state: Mutex<ViewState>,
    events: broadcast::Sender<ViewEvent>,
    clock: fn() -> NaiveDate,
}

fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

impl Controller {
    pub fn new(
        schema: ResourceSchema,
        remote: Arc<dyn RemoteResource>,
        config: ControllerConfig,
    ) -> Self {
        let notifications = NotificationQueue::new(config.notification_ttl);
        let sort = SortState::for_schema(&schema);
        let store = RecordStore::new(schema, remote, notifications.clone())
            .with_load_failure_policy(config.load_failure_policy);
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            notifications,
            state: Mutex::new(ViewState {
                phase: ViewPhase::Loading,
                criteria: FilterCriteria::default(),
                sort,
            }),
            events,
            clock: local_today,
        }
    }

    /// Replaces the source of "today" used for form defaults and the
    /// this-month summary.
    pub fn with_clock(mut self, clock: fn() -> NaiveDate) -> Self {
        self.clock = clock;
        self
    }

    pub fn schema(&self) -> &ResourceSchema {
        self.store.schema()
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    pub fn phase(&self) -> ViewPhase {
        lock(&self.state).phase
    }

    pub fn criteria(&self) -> FilterCriteria {
        lock(&self.state).criteria.clone()
    }

    pub fn sort(&self) -> SortState {
        lock(&self.state).sort.clone()
    }

    pub fn subscribe(&self) -> ViewEvents {
        ViewEvents {
            view: self.events.subscribe(),
            store: self.store.subscribe(),
            notifications: self.notifications.subscribe(),
        }
    }

    fn emit(&self, event: ViewEvent) {
        let _ = self.events.send(event);
    }

    /// Moves to `phase` unless the view is already unmounted.
    fn enter(&self, phase: ViewPhase) -> bool {
        let changed = {
            let mut state = lock(&self.state);
            if state.phase == ViewPhase::Unmounted || state.phase == phase {
                false
            } else {
                state.phase = phase;
                true
            }
        };
        if changed {
            debug!(resource = %self.schema().resource, phase = ?phase, "view phase changed");
            self.emit(ViewEvent::PhaseChanged(phase));
        }
        changed
    }

    /// Initial load. The view becomes ready whether or not the load
    /// succeeded; a failure surfaces as a notification. Only a view still in
    /// its initial `Loading` phase can be mounted.
    pub async fn mount(&self) -> Result<LoadOutcome, ViewError> {
        match self.phase() {
            ViewPhase::Loading => {}
            ViewPhase::Ready => return Err(ViewError::AlreadyMounted),
            ViewPhase::Unmounted => return Err(ViewError::Unmounted),
        }
        Ok(self.load_into_ready().await?)
    }

    pub async fn refresh(&self) -> Result<LoadOutcome, ViewError> {
        match self.phase() {
            ViewPhase::Ready => {}
            ViewPhase::Unmounted => return Err(ViewError::Unmounted),
            phase => return Err(ViewError::NotReady(phase)),
        }
        self.enter(ViewPhase::Loading);
        Ok(self.load_into_ready().await?)
    }

    async fn load_into_ready(&self) -> Result<LoadOutcome, StoreError> {
        let result = self.store.load().await;
        // A superseded load leaves the transition to the load that replaced it.
        if !matches!(result, Err(StoreError::Stale)) {
            self.enter(ViewPhase::Ready);
        }
        result
    }

    /// Disposes the store. Results still in flight are dropped on arrival.
    pub fn unmount(&self) {
        {
            let mut state = lock(&self.state);
            if state.phase == ViewPhase::Unmounted {
                return;
            }
            state.phase = ViewPhase::Unmounted;
        }
        self.store.dispose();
        self.emit(ViewEvent::PhaseChanged(ViewPhase::Unmounted));
    }

    fn update_criteria(&self, change: impl FnOnce(&mut FilterCriteria)) {
        change(&mut lock(&self.state).criteria);
        self.emit(ViewEvent::CriteriaChanged);
    }

    pub fn set_search(&self, term: impl Into<String>) {
        let term = term.into();
        self.update_criteria(|criteria| criteria.search = term);
    }

    /// Sets a categorical filter; an empty value clears it.
    pub fn set_filter(&self, field: impl Into<String>, value: impl Into<String>) {
        let (field, value) = (field.into(), value.into());
        self.update_criteria(|criteria| {
            if value.is_empty() {
                criteria.categories.remove(&field);
            } else {
                criteria.categories.insert(field, value);
            }
        });
    }

    pub fn set_date_range(&self, from: Option<NaiveDate>, to: Option<NaiveDate>) {
        self.update_criteria(|criteria| {
            criteria.date_from = from;
            criteria.date_to = to;
        });
    }

    pub fn reset_filters(&self) {
        self.update_criteria(FilterCriteria::reset);
    }

    /// Column-header behaviour: same field flips direction, a new field
    /// starts ascending.
    pub fn sort_by(&self, field: &str) {
        let sort = {
            let mut state = lock(&self.state);
            state.sort.toggle(field);
            state.sort.clone()
        };
        self.emit(ViewEvent::SortChanged(sort));
    }

    pub fn set_sort(&self, sort: SortState) {
        lock(&self.state).sort = sort.clone();
        self.emit(ViewEvent::SortChanged(sort));
    }

    pub fn view(&self) -> ViewModel {
        let (phase, criteria, sort) = {
            let state = lock(&self.state);
            (state.phase, state.criteria.clone(), state.sort.clone())
        };
        let schema = self.schema();
        let records = self.store.records();

        let mut visible = filter::apply(schema, &criteria, &records);
        sort::apply(schema, &sort, &mut visible);
        let rows: Vec<ViewRow> = visible
            .into_iter()
            .map(|entry| ViewRow::new(schema, entry))
            .collect();
        let summary = ViewSummary::compute(schema, &rows, (self.clock)());

        ViewModel {
            phase,
            rows,
            total_records: records.len(),
            summary,
            notifications: self.notifications.entries(),
            sort,
            criteria,
        }
    }

    /// Initial values for an add form.
    pub fn blank_draft(&self) -> Fields {
        self.schema().blank_draft((self.clock)())
    }

    /// Prefills an edit form from the cached record, falling back to the
    /// field defaults where the record has no value.
    pub fn draft_for_edit(&self, id: &RecordId) -> Option<Fields> {
        let entry = self.store.get(id)?;
        let present: Fields = entry
            .record
            .fields
            .into_iter()
            .filter(|(_, value)| !value.is_blank())
            .collect();
        Some(self.schema().with_defaults(&present, (self.clock)()))
    }

    /// Validates `draft` (with field defaults applied) and hands it to the
    /// store. A validation failure never reaches the store or the remote.
    pub fn create(
        &self,
        draft: Fields,
    ) -> impl Future<Output = Result<Record, MutationError>> + Send + 'static {
        let issued = self.prepare_create(draft);
        async move { Ok(issued?.await?) }
    }

    fn prepare_create(
        &self,
        draft: Fields,
    ) -> Result<impl Future<Output = Result<Record, StoreError>> + Send + 'static, MutationError>
    {
        let draft = self.schema().with_defaults(&draft, (self.clock)());
        validate(self.schema(), &draft)
            .into_result()
            .map_err(|errors| {
                debug!(resource = %self.schema().resource, errors = %errors, "create blocked by validation");
                MutationError::Validation(errors)
            })?;
        Ok(self.store.create(draft))
    }

    pub fn update(
        &self,
        id: &RecordId,
        patch: Fields,
    ) -> impl Future<Output = Result<Record, MutationError>> + Send + 'static {
        let issued = self.prepare_update(id, patch);
        async move { Ok(issued?.await?) }
    }

    fn prepare_update(
        &self,
        id: &RecordId,
        patch: Fields,
    ) -> Result<impl Future<Output = Result<Record, StoreError>> + Send + 'static, MutationError>
    {
        let current = self
            .store
            .get(id)
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;
        validate_patch(self.schema(), &current.record, &patch)
            .into_result()
            .map_err(|errors| {
                debug!(record_id = %id, errors = %errors, "update blocked by validation");
                MutationError::Validation(errors)
            })?;
        Ok(self.store.update(id, patch))
    }

    /// Deletes after `confirm` agrees. Nothing is touched when it declines.
    pub async fn remove(
        &self,
        id: &RecordId,
        confirm: &dyn ConfirmDestructive,
    ) -> Result<(), MutationError> {
        if self.store.get(id).is_none() {
            return Err(StoreError::RecordNotFound(id.to_string()).into());
        }
        let prompt = format!("Are you sure you want to delete this {}?", self.schema().entity);
        if !confirm.confirm(&prompt).await {
            debug!(record_id = %id, "delete declined");
            return Err(MutationError::Declined);
        }
        Ok(self.store.remove(id).await?)
    }

    pub fn dismiss_notification(&self, id: u64) -> bool {
        self.notifications.dismiss(id)
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
