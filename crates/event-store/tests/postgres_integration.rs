//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and need a Docker daemon.
//! Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;
use event_store::{
    ALL_STREAM, AggregateId, EventEnvelope, EventQuery, EventStore, EventStoreError,
    EventStoreExt, PostgresEventStore, Snapshot, Version,
};
use futures_util::StreamExt;
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

            // Migrations run once through the store itself.
            let store = PostgresEventStore::connect(&connection_string)
                .await
                .unwrap();
            store.pool().close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// A fresh store with its own pool and empty tables.
async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE events, snapshots")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn quote_event(aggregate_id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Quote")
        .event_type(event_type)
        .version(Version::new(version))
        .payload_raw(serde_json::json!({"type": event_type}))
        .metadata("correlation_id", serde_json::json!("c-1"))
        .build()
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn append_and_retrieve_events() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    let records = store
        .append(vec![
            quote_event(id, 1, "QuoteCreated"),
            quote_event(id, 2, "ItemAdded"),
        ])
        .await
        .unwrap();
    assert_eq!(records[0].position, 1);
    assert_eq!(records[1].position, 2);

    let events = store.get_all_events(id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "QuoteCreated");
    assert_eq!(events[1].version, Version::new(2));
    assert_eq!(
        events[0].metadata.get("correlation_id"),
        Some(&serde_json::json!("c-1"))
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn stale_append_is_rejected_and_rolled_back() {
    let store = get_test_store().await;
    let a = AggregateId::new();
    let b = AggregateId::new();
    store
        .append(vec![quote_event(b, 1, "QuoteCreated")])
        .await
        .unwrap();

    let err = store
        .append(vec![
            quote_event(a, 1, "QuoteCreated"),
            quote_event(b, 1, "QuoteCreated"),
        ])
        .await
        .unwrap_err();

    match err {
        EventStoreError::ConcurrencyConflict {
            aggregate_id,
            expected,
            actual,
        } => {
            assert_eq!(aggregate_id, b);
            assert_eq!(expected, Version::initial());
            assert_eq!(actual, Version::first());
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(store.get_aggregate_version(a).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Docker"]
async fn concurrent_appends_exactly_one_wins() {
    let store = get_test_store().await;
    let id = AggregateId::new();
    store
        .append(vec![quote_event(id, 1, "QuoteCreated")])
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.append(vec![quote_event(id, 2, "ItemAdded")]).await
        }));
    }

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) => assert!(e.is_concurrency_conflict(), "unexpected error: {e}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(store.get_all_events(id).await.unwrap().len(), 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn positions_stay_gap_free_after_rejection() {
    let store = get_test_store().await;
    let id = AggregateId::new();
    store
        .append(vec![quote_event(id, 1, "QuoteCreated")])
        .await
        .unwrap();
    let _ = store
        .append(vec![quote_event(id, 1, "QuoteCreated")])
        .await
        .unwrap_err();
    let records = store
        .append(vec![quote_event(id, 2, "ItemAdded")])
        .await
        .unwrap();

    assert_eq!(records[0].position, 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn by_type_and_stream_reads() {
    let store = get_test_store().await;
    let a = AggregateId::new();
    let b = AggregateId::new();
    store
        .append(vec![quote_event(a, 1, "QuoteCreated")])
        .await
        .unwrap();
    store
        .append(vec![quote_event(b, 1, "QuoteCreated")])
        .await
        .unwrap();
    store
        .append(vec![quote_event(a, 2, "ItemAdded")])
        .await
        .unwrap();

    let created = store
        .get_events_by_type("QuoteCreated", None)
        .await
        .unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].event.aggregate_id, a);

    let limited = store
        .get_events_by_type("QuoteCreated", Some(1))
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);

    let tail: Vec<_> = store
        .get_event_stream(ALL_STREAM, 2)
        .await
        .unwrap()
        .collect()
        .await;
    let positions: Vec<u64> = tail.into_iter().map(|r| r.unwrap().position).collect();
    assert_eq!(positions, vec![2, 3]);

    let none: Vec<_> = store
        .get_event_stream("Customer", 1)
        .await
        .unwrap()
        .collect()
        .await;
    assert!(none.is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn query_events_with_filters() {
    let store = get_test_store().await;
    let id = AggregateId::new();
    store
        .append(vec![
            quote_event(id, 1, "QuoteCreated"),
            quote_event(id, 2, "ItemAdded"),
            quote_event(id, 3, "ItemAdded"),
            quote_event(id, 4, "QuoteSubmitted"),
        ])
        .await
        .unwrap();

    let items = store
        .query_events(
            EventQuery::for_aggregate(id)
                .event_type("ItemAdded")
                .from_version(Version::new(3)),
        )
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].version, Version::new(3));

    let page = store
        .query_events(EventQuery::for_aggregate(id).offset(1).limit(2))
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].version, Version::new(2));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn snapshot_round_trip_and_overwrite() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    for version in [50, 100] {
        let snapshot = Snapshot::from_state(
            id,
            "Quote",
            Version::new(version),
            Utc::now(),
            &serde_json::json!({"items": version}),
        )
        .unwrap();
        store.save_snapshot(snapshot).await.unwrap();
    }

    let loaded = store.get_snapshot(id).await.unwrap().unwrap();
    assert_eq!(loaded.version, Version::new(100));
    assert_eq!(loaded.state, serde_json::json!({"items": 100}));
    assert!(
        store
            .get_snapshot(AggregateId::new())
            .await
            .unwrap()
            .is_none()
    );
}
