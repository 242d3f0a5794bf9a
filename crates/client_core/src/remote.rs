//! The consumed list/create/update/delete contract and its implementations.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use shared::domain::RecordId;
use tracing::debug;
use url::Url;

use crate::{error::RemoteError, lock};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A remote collection of flat JSON records. Bodies and responses are raw
/// JSON; the store is responsible for checking them against the schema.
#[async_trait]
pub trait RemoteResource: Send + Sync {
    async fn list(&self) -> Result<Vec<Value>, RemoteError>;
    async fn create(&self, body: Map<String, Value>) -> Result<Value, RemoteError>;
    async fn update(&self, id: &RecordId, body: Map<String, Value>) -> Result<Value, RemoteError>;
    async fn remove(&self, id: &RecordId) -> Result<(), RemoteError>;
}

pub struct MissingResource;

#[async_trait]
impl RemoteResource for MissingResource {
    async fn list(&self) -> Result<Vec<Value>, RemoteError> {
        Err(RemoteError::Unavailable)
    }

    async fn create(&self, _body: Map<String, Value>) -> Result<Value, RemoteError> {
        Err(RemoteError::Unavailable)
    }

    async fn update(&self, _id: &RecordId, _body: Map<String, Value>) -> Result<Value, RemoteError> {
        Err(RemoteError::Unavailable)
    }

    async fn remove(&self, _id: &RecordId) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable)
    }
}

/// REST binding: `GET`/`POST` on `{base}/{path}`, `PUT`/`DELETE` on
/// `{base}/{path}/{id}`. Any non-2xx status is a failure.
pub struct HttpResource {
    http: Client,
    collection: Url,
}

impl HttpResource {
    pub fn new(base: &Url, path: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            collection: collection_url(base, path)?,
        })
    }

    pub fn collection_url(&self) -> &Url {
        &self.collection
    }

    fn item_url(&self, id: &RecordId) -> Result<Url, RemoteError> {
        let mut url = self.collection.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl(self.collection.to_string()))?
            .push(id.as_str());
        Ok(url)
    }
}

fn collection_url(base: &Url, path: &str) -> Result<Url, RemoteError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_matches('/'))
        .map_err(|err| RemoteError::InvalidUrl(format!("{base} + {path}: {err}")))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl RemoteResource for HttpResource {
    async fn list(&self) -> Result<Vec<Value>, RemoteError> {
        let body: Value = self
            .http
            .get(self.collection.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match body {
            Value::Array(items) => {
                debug!(url = %self.collection, count = items.len(), "listed records");
                Ok(items)
            }
            other => Err(RemoteError::Decode(format!(
                "expected an array of records, got {}",
                json_kind(&other)
            ))),
        }
    }

    async fn create(&self, body: Map<String, Value>) -> Result<Value, RemoteError> {
        let created = self
            .http
            .post(self.collection.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(created)
    }

    async fn update(&self, id: &RecordId, body: Map<String, Value>) -> Result<Value, RemoteError> {
        let updated = self
            .http
            .put(self.item_url(id)?)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(updated)
    }

    async fn remove(&self, id: &RecordId) -> Result<(), RemoteError> {
        self.http
            .delete(self.item_url(id)?)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    rows: Vec<Map<String, Value>>,
}

/// In-process collection with server-assigned numeric ids. Clones share the
/// same rows.
#[derive(Clone, Default)]
pub struct MemoryResource {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryResource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds rows as-is. Rows without an `id` get one assigned, and later
    /// ids are allocated above every numeric id seeded.
    pub fn seeded(rows: impl IntoIterator<Item = Map<String, Value>>) -> Self {
        let resource = Self::new();
        {
            let mut guard = lock(&resource.state);
            let rows: Vec<_> = rows.into_iter().collect();
            guard.next_id = rows
                .iter()
                .filter_map(row_id)
                .filter_map(|id| id.as_str().parse::<u64>().ok())
                .max()
                .unwrap_or(0);
            for mut row in rows {
                if !row.contains_key("id") {
                    guard.next_id += 1;
                    row.insert("id".to_string(), Value::from(guard.next_id));
                }
                guard.rows.push(row);
            }
        }
        resource
    }

    pub fn rows(&self) -> Vec<Map<String, Value>> {
        lock(&self.state).rows.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn row_id(row: &Map<String, Value>) -> Option<RecordId> {
    row.get("id")
        .and_then(|id| serde_json::from_value::<RecordId>(id.clone()).ok())
}

#[async_trait]
impl RemoteResource for MemoryResource {
    async fn list(&self) -> Result<Vec<Value>, RemoteError> {
        Ok(self.rows().into_iter().map(Value::Object).collect())
    }

    async fn create(&self, mut body: Map<String, Value>) -> Result<Value, RemoteError> {
        let mut guard = lock(&self.state);
        guard.next_id += 1;
        body.insert("id".to_string(), Value::from(guard.next_id));
        guard.rows.push(body.clone());
        Ok(Value::Object(body))
    }

    async fn update(&self, id: &RecordId, mut body: Map<String, Value>) -> Result<Value, RemoteError> {
        let mut guard = lock(&self.state);
        let row = guard
            .rows
            .iter_mut()
            .find(|row| row_id(row).as_ref() == Some(id))
            .ok_or(RemoteError::Status(404))?;
        if let Some(existing) = row.get("id") {
            body.insert("id".to_string(), existing.clone());
        }
        *row = body.clone();
        Ok(Value::Object(body))
    }

    async fn remove(&self, id: &RecordId) -> Result<(), RemoteError> {
        let mut guard = lock(&self.state);
        let before = guard.rows.len();
        guard.rows.retain(|row| row_id(row).as_ref() != Some(id));
        if guard.rows.len() == before {
            return Err(RemoteError::Status(404));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
