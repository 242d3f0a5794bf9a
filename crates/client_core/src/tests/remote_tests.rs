use super::*;
use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    routing::{any, get, put},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;

type Seen = Arc<tokio::sync::Mutex<Vec<(Method, String, Value)>>>;

#[derive(Clone)]
struct ServerState {
    seen: Seen,
}

async fn list_purchases(State(state): State<ServerState>) -> Json<Value> {
    state
        .seen
        .lock()
        .await
        .push((Method::GET, "/api/house-purchases".into(), Value::Null));
    Json(json!([
        { "id": 1, "item": "Sofa", "vendor": "Acme" },
        { "id": "2", "item": "Lamp", "vendor": "Ikea" }
    ]))
}

async fn create_purchase(State(state): State<ServerState>, Json(body): Json<Value>) -> Json<Value> {
    state
        .seen
        .lock()
        .await
        .push((Method::POST, "/api/house-purchases".into(), body.clone()));
    let mut created = body;
    created["id"] = json!(7);
    Json(created)
}

async fn update_purchase(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state
        .seen
        .lock()
        .await
        .push((Method::PUT, format!("/api/house-purchases/{id}"), body.clone()));
    let mut updated = body;
    updated["id"] = json!(id);
    Json(updated)
}

async fn delete_purchase(State(state): State<ServerState>, Path(id): Path<String>) -> StatusCode {
    state
        .seen
        .lock()
        .await
        .push((Method::DELETE, format!("/api/house-purchases/{id}"), Value::Null));
    StatusCode::NO_CONTENT
}

async fn spawn_resource_server() -> (Url, Seen) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let seen: Seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/api/house-purchases", get(list_purchases).post(create_purchase))
        .route(
            "/api/house-purchases/:id",
            put(update_purchase).delete(delete_purchase),
        )
        .route("/api/broken", any(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/api/broken/:id", any(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/api/not-a-list", get(|| async { Json(json!({ "items": [] })) }))
        .with_state(ServerState { seen: seen.clone() });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let base = Url::parse(&format!("http://{addr}/api")).expect("base url");
    (base, seen)
}

fn body(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[test]
fn collection_url_tolerates_missing_trailing_slash() {
    let with = Url::parse("http://localhost:5000/api/").expect("url");
    let without = Url::parse("http://localhost:5000/api").expect("url");
    for base in [&with, &without] {
        let resource =
            HttpResource::new(base, "house-purchases", DEFAULT_REQUEST_TIMEOUT).expect("resource");
        assert_eq!(
            resource.collection_url().as_str(),
            "http://localhost:5000/api/house-purchases"
        );
    }

    let nested = HttpResource::new(&with, "/maintenance-alerts/alerts", DEFAULT_REQUEST_TIMEOUT)
        .expect("resource");
    assert_eq!(
        nested.collection_url().as_str(),
        "http://localhost:5000/api/maintenance-alerts/alerts"
    );
}

#[test]
fn item_url_escapes_the_id_as_one_segment() {
    let base = Url::parse("http://localhost:5000/api").expect("url");
    let resource =
        HttpResource::new(&base, "house-purchases", DEFAULT_REQUEST_TIMEOUT).expect("resource");
    let url = resource.item_url(&RecordId::from("a b/c")).expect("item url");
    assert_eq!(
        url.as_str(),
        "http://localhost:5000/api/house-purchases/a%20b%2Fc"
    );
}

#[tokio::test]
async fn http_resource_speaks_the_rest_contract() {
    let (base, seen) = spawn_resource_server().await;
    let resource =
        HttpResource::new(&base, "house-purchases", DEFAULT_REQUEST_TIMEOUT).expect("resource");

    let listed = resource.list().await.expect("list");
    assert_eq!(listed.len(), 2);

    let created = resource
        .create(body(json!({ "item": "Sofa", "price": 150.0 })))
        .await
        .expect("create");
    assert_eq!(created["id"], json!(7));
    assert_eq!(created["item"], json!("Sofa"));

    let updated = resource
        .update(&RecordId::from("42"), body(json!({ "item": "Sofa", "price": 120 })))
        .await
        .expect("update");
    assert_eq!(updated["id"], json!("42"));

    resource.remove(&RecordId::from("42")).await.expect("remove");

    let seen = seen.lock().await;
    let calls: Vec<(Method, &str)> = seen.iter().map(|(m, p, _)| (m.clone(), p.as_str())).collect();
    assert_eq!(
        calls,
        vec![
            (Method::GET, "/api/house-purchases"),
            (Method::POST, "/api/house-purchases"),
            (Method::PUT, "/api/house-purchases/42"),
            (Method::DELETE, "/api/house-purchases/42"),
        ]
    );
    assert_eq!(seen[1].2, json!({ "item": "Sofa", "price": 150.0 }));
    assert_eq!(seen[2].2, json!({ "item": "Sofa", "price": 120 }));
}

#[tokio::test]
async fn non_success_status_is_a_failure() {
    let (base, _) = spawn_resource_server().await;
    let resource = HttpResource::new(&base, "broken", DEFAULT_REQUEST_TIMEOUT).expect("resource");

    assert_eq!(resource.list().await, Err(RemoteError::Status(500)));
    assert_eq!(
        resource.remove(&RecordId::from("1")).await,
        Err(RemoteError::Status(500))
    );
    let err = resource.create(Map::new()).await.expect_err("create fails");
    assert!(!err.is_transport());
}

#[tokio::test]
async fn list_requires_an_array_body() {
    let (base, _) = spawn_resource_server().await;
    let resource =
        HttpResource::new(&base, "not-a-list", DEFAULT_REQUEST_TIMEOUT).expect("resource");
    match resource.list().await {
        Err(RemoteError::Decode(message)) => assert!(message.contains("an object"), "{message}"),
        other => panic!("expected decode failure, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_server_is_a_transport_failure() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let base = Url::parse(&format!("http://{addr}/api")).expect("url");
    let resource =
        HttpResource::new(&base, "house-purchases", Duration::from_secs(2)).expect("resource");
    let err = resource.list().await.expect_err("nothing listening");
    assert!(err.is_transport(), "{err:?}");
}

#[tokio::test]
async fn missing_resource_is_always_unavailable() {
    let resource = MissingResource;
    assert_eq!(resource.list().await, Err(RemoteError::Unavailable));
    assert_eq!(
        resource.remove(&RecordId::from("1")).await,
        Err(RemoteError::Unavailable)
    );
}

#[tokio::test]
async fn memory_resource_assigns_ids_and_rejects_unknown_records() {
    let resource = MemoryResource::seeded([body(json!({ "id": "seed", "item": "Rug" }))]);

    let first = resource.create(body(json!({ "item": "Sofa" }))).await.expect("create");
    let second = resource.create(body(json!({ "item": "Lamp" }))).await.expect("create");
    assert_eq!(first["id"], json!(1));
    assert_eq!(second["id"], json!(2));
    assert_eq!(resource.len(), 3);

    let updated = resource
        .update(&RecordId::from("1"), body(json!({ "item": "Corner sofa" })))
        .await
        .expect("update");
    assert_eq!(updated, json!({ "id": 1, "item": "Corner sofa" }));

    assert_eq!(
        resource.update(&RecordId::from("99"), Map::new()).await,
        Err(RemoteError::Status(404))
    );
    resource.remove(&RecordId::from("seed")).await.expect("remove");
    assert_eq!(
        resource.remove(&RecordId::from("seed")).await,
        Err(RemoteError::Status(404))
    );

    let listed = resource.list().await.expect("list");
    assert_eq!(
        listed,
        vec![
            json!({ "id": 1, "item": "Corner sofa" }),
            json!({ "id": 2, "item": "Lamp" }),
        ]
    );
}

#[tokio::test]
async fn memory_resource_allocates_above_seeded_ids() {
    let resource = MemoryResource::seeded([
        body(json!({ "id": 1, "item": "Rug" })),
        body(json!({ "id": "4", "item": "Lamp" })),
        body(json!({ "item": "Shelf" })),
    ]);

    let created = resource.create(body(json!({ "item": "Sofa" }))).await.expect("create");
    assert_eq!(created["id"], json!(6));

    let ids: Vec<Value> = resource
        .list()
        .await
        .expect("list")
        .into_iter()
        .map(|row| row["id"].clone())
        .collect();
    assert_eq!(ids, vec![json!(1), json!("4"), json!(5), json!(6)]);
}
