//! Client-side state for resource-management screens: a record cache with
//! optimistic mutations over a remote REST collection, plus the filtering,
//! sorting, validation and notification logic a list/form view needs.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod controller;
pub mod error;
pub mod filter;
pub mod notification;
pub mod remote;
pub mod sort;
pub mod store;
pub mod validation;

pub use controller::{
    AlwaysConfirm, ConfirmDestructive, Controller, ControllerConfig, ViewEvent, ViewEvents,
    ViewModel, ViewPhase, ViewRow, ViewSummary,
};
pub use error::{MutationError, RemoteError, StoreError, ViewError};
pub use filter::FilterCriteria;
pub use notification::{Notification, NotificationEvent, NotificationQueue, Severity};
pub use remote::{HttpResource, MemoryResource, MissingResource, RemoteResource};
pub use sort::{SortDirection, SortState};
pub use store::{CachedRecord, LoadFailurePolicy, LoadOutcome, RecordStore, StoreEvent, SyncState};
pub use validation::{FieldError, ValidationErrors};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
