//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p order-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use order_store::{
    OrderDocument, OrderId, OrderQuery, OrderStore, OrderStoreError, ParkedCallback,
    PostgresOrderStore, SubjectId, Version,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            for migration in [
                include_str!("../../../migrations/001_create_orders_table.sql"),
                include_str!("../../../migrations/002_create_parked_callbacks_table.sql"),
            ] {
                sqlx::raw_sql(migration).execute(&temp_pool).await.unwrap();
            }

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresOrderStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE orders, parked_callbacks")
        .execute(&pool)
        .await
        .unwrap();

    PostgresOrderStore::new(pool)
}

fn create_test_document(owner: &str) -> OrderDocument {
    OrderDocument::new(
        OrderId::new(),
        SubjectId::new(owner),
        Utc::now(),
        serde_json::json!({"paymentStatus": "Pending", "fulfillmentStatus": "Received"}),
    )
}

#[tokio::test]
async fn insert_and_get_order() {
    let store = get_test_store().await;
    let doc = create_test_document("user_1");
    let id = doc.id;

    let version = store.insert(doc.clone()).await.unwrap();
    assert_eq!(version, Version::first());

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.owner_id, doc.owner_id);
    assert_eq!(stored.version, Version::first());
    assert_eq!(stored.body, doc.body);
}

#[tokio::test]
async fn insert_duplicate_id_is_rejected() {
    let store = get_test_store().await;
    let doc = create_test_document("user_1");

    store.insert(doc.clone()).await.unwrap();
    let result = store.insert(doc).await;

    assert!(matches!(result, Err(OrderStoreError::AlreadyExists(_))));
}

#[tokio::test]
async fn optimistic_concurrency_conflict() {
    let store = get_test_store().await;
    let doc = create_test_document("user_1");
    let id = doc.id;
    store.insert(doc).await.unwrap();

    let loaded = store.get(id).await.unwrap().unwrap();
    store
        .update(loaded.clone(), Version::first())
        .await
        .unwrap();

    let result = store.update(loaded, Version::first()).await;
    assert!(matches!(
        result,
        Err(OrderStoreError::ConcurrencyConflict { .. })
    ));

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.version, Version::new(2));
}

#[tokio::test]
async fn update_replaces_document_and_provider_ref() {
    let store = get_test_store().await;
    let doc = create_test_document("user_1");
    let id = doc.id;
    store.insert(doc).await.unwrap();

    let mut loaded = store.get(id).await.unwrap().unwrap();
    loaded.provider_ref = Some("ws_CO_191220191020363925".to_string());
    loaded.body["paymentStatus"] = serde_json::json!("Pending");
    loaded.updated_at = Utc::now();

    let version = store.update(loaded, Version::first()).await.unwrap();
    assert_eq!(version, Version::new(2));

    let found = store
        .find_by_provider_ref("ws_CO_191220191020363925")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, id);
}

#[tokio::test]
async fn update_missing_order_is_not_found() {
    let store = get_test_store().await;
    let result = store
        .update(create_test_document("user_1"), Version::first())
        .await;
    assert!(matches!(result, Err(OrderStoreError::NotFound(_))));
}

#[tokio::test]
async fn provider_ref_is_unique() {
    let store = get_test_store().await;
    store
        .insert(create_test_document("user_1").with_provider_ref(Some("R1".into())))
        .await
        .unwrap();

    let result = store
        .insert(create_test_document("user_2").with_provider_ref(Some("R1".into())))
        .await;

    assert!(matches!(
        result,
        Err(OrderStoreError::DuplicateProviderRef(_))
    ));
}

#[tokio::test]
async fn query_by_owner_newest_first() {
    let store = get_test_store().await;
    let base = Utc::now();

    for (owner, offset) in [("alice", 0), ("bob", 1), ("alice", 2)] {
        let doc = OrderDocument::new(
            OrderId::new(),
            SubjectId::new(owner),
            base + Duration::seconds(offset),
            serde_json::json!({ "n": offset }),
        );
        store.insert(doc).await.unwrap();
    }

    let alice = store
        .query(OrderQuery::for_owner(SubjectId::new("alice")))
        .await
        .unwrap();
    assert_eq!(alice.len(), 2);
    assert_eq!(alice[0].body["n"], 2);
    assert_eq!(alice[1].body["n"], 0);

    let page = store.query(OrderQuery::new().limit(1)).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].body["n"], 2);
}

#[tokio::test]
async fn parked_callbacks_upsert_and_purge() {
    let store = get_test_store().await;
    let now = Utc::now();

    store
        .park_callback(ParkedCallback::new(
            "ws_CO_1",
            serde_json::json!({"failed": {"reason": "first"}}),
            now - Duration::minutes(30),
        ))
        .await
        .unwrap();
    store
        .park_callback(ParkedCallback::new(
            "ws_CO_1",
            serde_json::json!({"failed": {"reason": "second"}}),
            now,
        ))
        .await
        .unwrap();
    store
        .park_callback(ParkedCallback::new(
            "ws_CO_2",
            serde_json::json!({}),
            now - Duration::minutes(30),
        ))
        .await
        .unwrap();

    let parked = store.parked_callback("ws_CO_1").await.unwrap().unwrap();
    assert_eq!(parked.outcome["failed"]["reason"], "second");

    let purged = store
        .purge_parked_callbacks(now - Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(purged, 1);
    assert!(store.parked_callback("ws_CO_2").await.unwrap().is_none());

    store.discard_parked_callback("ws_CO_1").await.unwrap();
    assert!(store.parked_callback("ws_CO_1").await.unwrap().is_none());
}
