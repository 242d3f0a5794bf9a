//! Transient status messages raised by completed operations. Entries expire
//! on their own after a fixed TTL; dismissal and expiry are both idempotent.

use std::{
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{sync::broadcast, time::Instant};
use tracing::debug;

use crate::lock;

pub const DEFAULT_NOTIFICATION_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: u64,
    pub message: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    expires_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    Raised(Notification),
    Dismissed(u64),
    Expired(u64),
}

struct QueueState {
    next_id: u64,
    entries: Vec<Notification>,
}

#[derive(Clone)]
pub struct NotificationQueue {
    state: Arc<Mutex<QueueState>>,
    ttl: Duration,
    events: broadcast::Sender<NotificationEvent>,
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_TTL)
    }
}

impl NotificationQueue {
    pub fn new(ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(QueueState {
                next_id: 1,
                entries: Vec::new(),
            })),
            ttl,
            events,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn enqueue(&self, message: impl Into<String>, severity: Severity) -> u64 {
        let expires_at = Instant::now() + self.ttl;
        let notification = {
            let mut guard = lock(&self.state);
            let id = guard.next_id;
            guard.next_id += 1;
            let notification = Notification {
                id,
                message: message.into(),
                severity,
                created_at: Utc::now(),
                expires_at,
            };
            guard.entries.push(notification.clone());
            notification
        };

        let id = notification.id;
        debug!(id, severity = ?severity, message = %notification.message, "notification raised");
        let _ = self.events.send(NotificationEvent::Raised(notification));
        self.schedule_expiry(id, expires_at);
        id
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.enqueue(message, Severity::Success)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.enqueue(message, Severity::Error)
    }

    /// Removes `id` if it is still queued. Returns whether anything was removed.
    pub fn dismiss(&self, id: u64) -> bool {
        let removed = remove_entry(&self.state, id);
        if removed {
            let _ = self.events.send(NotificationEvent::Dismissed(id));
        }
        removed
    }

    /// Live entries in insertion order. Entries past their TTL are pruned
    /// here too, so they never outlive it even when no timer task ran.
    pub fn entries(&self) -> Vec<Notification> {
        self.prune_expired();
        lock(&self.state).entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.events.subscribe()
    }

    fn prune_expired(&self) {
        let now = Instant::now();
        let expired: Vec<u64> = {
            let mut guard = lock(&self.state);
            let expired = guard
                .entries
                .iter()
                .filter(|n| n.expires_at <= now)
                .map(|n| n.id)
                .collect();
            guard.entries.retain(|n| n.expires_at > now);
            expired
        };
        for id in expired {
            let _ = self.events.send(NotificationEvent::Expired(id));
        }
    }

    fn schedule_expiry(&self, id: u64, expires_at: Instant) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let state: Weak<Mutex<QueueState>> = Arc::downgrade(&self.state);
        let events = self.events.clone();
        runtime.spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            let Some(state) = state.upgrade() else {
                return;
            };
            if remove_entry(&state, id) {
                debug!(id, "notification expired");
                let _ = events.send(NotificationEvent::Expired(id));
            }
        });
    }
}

fn remove_entry(state: &Mutex<QueueState>, id: u64) -> bool {
    let mut guard = lock(state);
    let before = guard.entries.len();
    guard.entries.retain(|n| n.id != id);
    guard.entries.len() != before
}

#[cfg(test)]
#[path = "tests/notification_tests.rs"]
mod tests;
