//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and need a Docker daemon.
//! Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --ignored
//! ```

use std::sync::Arc;

use event_store::{
    AggregateId, AppendOptions, EventEnvelope, EventQuery, EventStore, EventStoreExt,
    PostgresEventStore, Version,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

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
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_events_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Fresh store with its own pool and an empty events table.
async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE events")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn create_test_event(
    aggregate_id: AggregateId,
    aggregate_type: &str,
    version: Version,
    event_type: &str,
) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type(aggregate_type)
        .event_type(event_type)
        .version(version)
        .payload_raw(serde_json::json!({"test": true}))
        .metadata("actor", serde_json::json!("test"))
        .build()
        .unwrap()
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn append_and_retrieve_events() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let events = vec![
        create_test_event(aggregate_id, "DesignSession", Version::new(1), "SessionCreated"),
        create_test_event(aggregate_id, "DesignSession", Version::new(2), "GenerationStarted"),
    ];
    let version = store
        .append(events, AppendOptions::expect_new())
        .await
        .unwrap();
    assert_eq!(version, Version::new(2));

    let stored = store.get_events_for_aggregate(aggregate_id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].event_type, "SessionCreated");
    assert_eq!(stored[1].version, Version::new(2));
    assert_eq!(
        stored[0].metadata.get("actor"),
        Some(&serde_json::json!("test"))
    );
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn stale_expected_version_conflicts() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append_event(
            create_test_event(aggregate_id, "Order", Version::first(), "OrderCreated"),
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let result = store
        .append_event(
            create_test_event(aggregate_id, "Order", Version::new(2), "FulfillmentSubmitted"),
            AppendOptions::expect_version(Version::initial()),
        )
        .await;
    assert!(result.unwrap_err().is_conflict());

    let result = store
        .append_event(
            create_test_event(aggregate_id, "Order", Version::new(2), "FulfillmentSubmitted"),
            AppendOptions::expect_version(Version::first()),
        )
        .await;
    assert!(result.is_ok());
    assert_eq!(
        store.get_aggregate_version(aggregate_id).await.unwrap(),
        Some(Version::new(2))
    );
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn duplicate_version_hits_unique_constraint() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append_event(
            create_test_event(aggregate_id, "Order", Version::first(), "OrderCreated"),
            AppendOptions::new(),
        )
        .await
        .unwrap();

    let result = store
        .append_event(
            create_test_event(aggregate_id, "Order", Version::first(), "OrderCreated"),
            AppendOptions::new(),
        )
        .await;
    assert!(result.unwrap_err().is_conflict());
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn query_by_type_and_event_type() {
    let store = get_test_store().await;
    let session = AggregateId::new();
    let order = AggregateId::new();

    store
        .append(
            vec![
                create_test_event(session, "DesignSession", Version::new(1), "SessionCreated"),
                create_test_event(session, "DesignSession", Version::new(2), "StageAdvanced"),
            ],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();
    store
        .append_event(
            create_test_event(order, "Order", Version::first(), "OrderCreated"),
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let orders = store
        .query_events(EventQuery::new().aggregate_type("Order"))
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);

    let advanced = store
        .query_events(EventQuery::for_aggregate(session).event_type("StageAdvanced"))
        .await
        .unwrap();
    assert_eq!(advanced.len(), 1);

    let page = store
        .query_events(EventQuery::new().limit(2).offset(1))
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn aggregate_ids_in_creation_order() {
    let store = get_test_store().await;
    let first = AggregateId::new();
    let second = AggregateId::new();

    for id in [first, second] {
        store
            .append_event(
                create_test_event(id, "Order", Version::first(), "OrderCreated"),
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();
    }

    assert_eq!(store.aggregate_ids("Order").await.unwrap(), vec![first, second]);
    assert!(store.aggregate_exists(first).await.unwrap());
    assert!(!store.aggregate_exists(AggregateId::new()).await.unwrap());
}
