use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use shared::{
    domain::{fields, FieldValue, Record, RecordId},
    schema::house_purchases,
};
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::RemoteError,
    notification::{NotificationQueue, Severity},
    remote::RemoteResource,
    store::RecordStore,
};

pub fn purchase(
    id: &str,
    item: &str,
    vendor: &str,
    category: &str,
    price: impl Into<FieldValue>,
    date: &str,
) -> Record {
    let schema = house_purchases();
    let fields = schema
        .conform(&fields([
            ("item", FieldValue::from(item)),
            ("vendor", FieldValue::from(vendor)),
            ("category", FieldValue::from(category)),
            ("quantity", FieldValue::from(1)),
            ("price", price.into()),
            ("date", FieldValue::from(date)),
            ("paymentStatus", FieldValue::from("Pending")),
        ]))
        .expect("fixture conforms");
    Record::new(RecordId::new(id), fields)
}

pub fn catalogue() -> Vec<Record> {
    vec![
        purchase("1", "Corner Sofa", "Acme", "Furniture", 900, "2024-01-05"),
        purchase("2", "Fridge", "Coldline", "Appliances", 650, "2024-01-20"),
        purchase("3", "Sofa cushions", "Sofa World", "Decor", 40, "2024-02-02"),
        purchase("4", "Dining table", "sofaking ltd", "Furniture", 450, "2024-02-14"),
        purchase("5", "Camera", "Guardian", "Security", 120, "2024-03-01"),
        purchase("6", "Armchair", "Acme", "Furniture", 300, "2024-03-09"),
    ]
}

pub fn ids<T: AsRef<Record>>(rows: &[&T]) -> Vec<String> {
    rows.iter().map(|row| row.as_ref().id.0.clone()).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List,
    Create(Map<String, Value>),
    Update(String, Map<String, Value>),
    Remove(String),
}

/// One remote call waiting for the test to answer it.
pub struct PendingCall {
    pub call: Call,
    reply: oneshot::Sender<Result<Value, RemoteError>>,
}

impl PendingCall {
    pub fn respond(self, reply: Result<Value, RemoteError>) {
        let _ = self.reply.send(reply);
    }
}

/// Remote whose every call is handed to the test over a channel.
pub struct ScriptedRemote {
    calls: mpsc::UnboundedSender<PendingCall>,
}

impl ScriptedRemote {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingCall>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (Self { calls }, rx)
    }

    async fn call(&self, call: Call) -> Result<Value, RemoteError> {
        let (reply, answer) = oneshot::channel();
        self.calls
            .send(PendingCall { call, reply })
            .map_err(|_| RemoteError::Unavailable)?;
        answer.await.map_err(|_| RemoteError::Unavailable)?
    }
}

#[async_trait]
impl RemoteResource for ScriptedRemote {
    async fn list(&self) -> Result<Vec<Value>, RemoteError> {
        match self.call(Call::List).await? {
            Value::Array(items) => Ok(items),
            other => Err(RemoteError::Decode(other.to_string())),
        }
    }

    async fn create(&self, body: Map<String, Value>) -> Result<Value, RemoteError> {
        self.call(Call::Create(body)).await
    }

    async fn update(&self, id: &RecordId, body: Map<String, Value>) -> Result<Value, RemoteError> {
        self.call(Call::Update(id.to_string(), body)).await
    }

    async fn remove(&self, id: &RecordId) -> Result<(), RemoteError> {
        self.call(Call::Remove(id.to_string())).await.map(|_| ())
    }
}

pub fn scripted_store() -> (RecordStore, mpsc::UnboundedReceiver<PendingCall>) {
    let (remote, calls) = ScriptedRemote::new();
    let store = RecordStore::new(
        house_purchases(),
        Arc::new(remote),
        NotificationQueue::default(),
    );
    (store, calls)
}

pub fn purchase_json(id: impl Into<Value>, item: &str, price: f64) -> Value {
    json!({
        "id": id.into(),
        "item": item,
        "vendor": "Acme",
        "quantity": 1,
        "price": price,
        "date": "2024-01-05",
        "paymentStatus": "Pending",
        "status": "Ordered",
        "category": "Furniture",
        "notes": ""
    })
}

/// Echoes a create/update body back as the server would, with `id` set.
pub fn echo(body: &Map<String, Value>, id: impl Into<Value>) -> Value {
    let mut echoed = body.clone();
    echoed.insert("id".to_string(), id.into());
    Value::Object(echoed)
}

pub async fn next_call(calls: &mut mpsc::UnboundedReceiver<PendingCall>) -> PendingCall {
    tokio::time::timeout(std::time::Duration::from_secs(5), calls.recv())
        .await
        .expect("a remote call within 5s")
        .expect("remote still connected")
}

/// Asserts that nothing reaches the remote until every task is idle.
pub async fn assert_no_call(calls: &mut mpsc::UnboundedReceiver<PendingCall>) {
    let waited = tokio::time::timeout(std::time::Duration::from_millis(50), calls.recv()).await;
    if let Ok(Some(pending)) = waited {
        panic!("unexpected remote call {:?}", pending.call);
    }
}

pub async fn loaded_store(
    rows: Vec<Value>,
) -> (RecordStore, mpsc::UnboundedReceiver<PendingCall>) {
    let (store, mut calls) = scripted_store();
    let load = tokio::spawn(store.load());
    let pending = next_call(&mut calls).await;
    assert_eq!(pending.call, Call::List);
    pending.respond(Ok(Value::Array(rows)));
    load.await.expect("load task").expect("load succeeds");
    (store, calls)
}

pub fn messages(queue: &NotificationQueue) -> Vec<(Severity, String)> {
    queue
        .entries()
        .into_iter()
        .map(|n| (n.severity, n.message))
        .collect()
}
