use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use client_core::{
    AlwaysConfirm, Controller, ControllerConfig, HttpResource, MemoryResource, RemoteError,
    RemoteResource, Severity, SyncState, ViewPhase,
};
use serde_json::{Map, Value};
use shared::{
    domain::{fields, FieldValue, RecordId},
    schema::house_purchases,
};
use tokio::net::TcpListener;
use url::Url;

fn status_of(err: RemoteError) -> StatusCode {
    match err {
        RemoteError::Status(code) => {
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn list(State(rows): State<MemoryResource>) -> Result<Json<Value>, StatusCode> {
    let items = rows.list().await.map_err(status_of)?;
    Ok(Json(Value::Array(items)))
}

async fn create(
    State(rows): State<MemoryResource>,
    Json(body): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let created = rows.create(body).await.map_err(status_of)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update(
    State(rows): State<MemoryResource>,
    Path(id): Path<String>,
    Json(body): Json<Map<String, Value>>,
) -> Result<Json<Value>, StatusCode> {
    let updated = rows
        .update(&RecordId::new(id), body)
        .await
        .map_err(status_of)?;
    Ok(Json(updated))
}

async fn remove(
    State(rows): State<MemoryResource>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    rows.remove(&RecordId::new(id)).await.map_err(status_of)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn spawn_purchase_server(rows: MemoryResource) -> Url {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route("/api/house-purchases", get(list).post(create))
        .route("/api/house-purchases/:id", put(update).delete(remove))
        .with_state(rows);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Url::parse(&format!("http://{addr}/api")).expect("base url")
}

#[tokio::test]
async fn purchases_screen_round_trip_over_http() {
    let rows = MemoryResource::new();
    let base = spawn_purchase_server(rows.clone()).await;
    let schema = house_purchases();
    let resource = HttpResource::new(&base, &schema.resource, std::time::Duration::from_secs(5))
        .expect("http resource");
    let controller = Controller::new(schema, Arc::new(resource), ControllerConfig::default());

    let outcome = controller.mount().await.expect("mount");
    assert_eq!(outcome.loaded, 0);
    assert_eq!(controller.phase(), ViewPhase::Ready);

    let created = controller
        .create(fields([
            ("item", FieldValue::from("Sofa")),
            ("vendor", FieldValue::from("Acme")),
            ("quantity", FieldValue::from(2)),
            ("price", FieldValue::from("150.00")),
            ("date", FieldValue::from("2024-03-01")),
            ("category", FieldValue::from("Furniture")),
        ]))
        .await
        .expect("create");
    assert_eq!(created.id, RecordId::from("1"));
    assert_eq!(rows.len(), 1);

    controller
        .update(&created.id, fields([("paymentStatus", "Paid")]))
        .await
        .expect("update");

    controller.refresh().await.expect("refresh");
    let view = controller.view();
    assert_eq!(view.rows.len(), 1);
    let row = &view.rows[0];
    assert_eq!(row.sync, SyncState::Synced);
    assert_eq!(row.value("paymentStatus"), FieldValue::from("Paid"));
    assert_eq!(row.value("total"), FieldValue::Number(300.0));
    assert_eq!(view.summary.status_count("Paid"), 1);

    controller
        .remove(&created.id, &AlwaysConfirm)
        .await
        .expect("remove");
    assert!(rows.is_empty());
    assert!(controller.view().rows.is_empty());

    let notes: Vec<(Severity, String)> = controller
        .view()
        .notifications
        .into_iter()
        .map(|n| (n.severity, n.message))
        .collect();
    assert_eq!(
        notes,
        vec![
            (Severity::Success, "Purchase added successfully".to_string()),
            (Severity::Success, "Purchase updated successfully".to_string()),
            (Severity::Success, "Purchase deleted successfully".to_string()),
        ]
    );
}

#[tokio::test]
async fn server_rejections_roll_back_over_http() {
    let rows = MemoryResource::new();
    let base = spawn_purchase_server(rows.clone()).await;
    let schema = house_purchases();
    let resource = HttpResource::new(&base, &schema.resource, std::time::Duration::from_secs(5))
        .expect("http resource");
    let controller = Controller::new(schema, Arc::new(resource), ControllerConfig::default());
    controller.mount().await.expect("mount");

    // Deleted server-side while the view still shows it.
    let seeded = controller
        .create(fields([
            ("item", FieldValue::from("Lamp")),
            ("vendor", FieldValue::from("Ikea")),
            ("price", FieldValue::from(20)),
        ]))
        .await
        .expect("create");
    rows.remove(&seeded.id).await.expect("server-side delete");

    let err = controller
        .update(&seeded.id, fields([("price", 25)]))
        .await
        .expect_err("server no longer has the record");
    assert_eq!(
        err,
        client_core::MutationError::Store(client_core::StoreError::Remote(RemoteError::Status(
            404
        )))
    );
    let view = controller.view();
    assert_eq!(view.rows.len(), 1);
    assert_eq!(view.rows[0].value("price"), FieldValue::Number(20.0));
    assert_eq!(view.rows[0].sync, SyncState::Synced);
    assert_eq!(
        view.notifications.last().map(|n| n.message.as_str()),
        Some("Failed to save purchase")
    );
}
