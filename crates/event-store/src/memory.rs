use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventQuery, EventRecord, EventStoreError, Result, Snapshot,
    Version,
    store::{ALL_STREAM, EventStore, EventStream, validate_events_for_append},
};

#[derive(Default)]
struct Log {
    records: Vec<EventRecord>,
    heads: HashMap<AggregateId, Version>,
}

impl Log {
    fn head(&self, aggregate_id: &AggregateId) -> Version {
        self.heads
            .get(aggregate_id)
            .copied()
            .unwrap_or(Version::initial())
    }
}

/// In-memory event store.
///
/// Appends hold one write lock for the whole batch, so the version checks and
/// the insert are a single step and concurrent appends serialize. Cloning
/// shares the underlying log.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
    snapshots: Arc<RwLock<HashMap<AggregateId, Snapshot>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.records.len()
    }

    /// Clears all events and snapshots.
    pub async fn clear(&self) {
        let mut log = self.log.write().await;
        log.records.clear();
        log.heads.clear();
        self.snapshots.write().await.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(&self, events: Vec<EventEnvelope>) -> Result<Vec<EventRecord>> {
        let batches = validate_events_for_append(&events)?;

        let mut log = self.log.write().await;

        for batch in &batches {
            let actual = log.head(&batch.aggregate_id);
            let expected = batch.expected_head();
            if actual != expected {
                metrics::counter!("event_store_concurrency_conflicts_total").increment(1);
                tracing::warn!(
                    aggregate_id = %batch.aggregate_id,
                    %expected,
                    %actual,
                    "append rejected: concurrency conflict"
                );
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: batch.aggregate_id,
                    expected,
                    actual,
                });
            }
        }

        let stored_at = Utc::now();
        let mut appended = Vec::with_capacity(events.len());
        for event in events {
            let record = EventRecord {
                position: log.records.len() as u64 + 1,
                stored_at,
                event,
            };
            log.heads
                .insert(record.event.aggregate_id, record.event.version);
            log.records.push(record.clone());
            appended.push(record);
        }

        metrics::counter!("event_store_events_appended_total").increment(appended.len() as u64);
        tracing::debug!(
            aggregates = batches.len(),
            last_position = log.records.len(),
            "events appended"
        );
        Ok(appended)
    }

    async fn get_events(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        // Per-aggregate versions grow with position, so log order is version order.
        Ok(log
            .records
            .iter()
            .filter(|r| r.event.aggregate_id == aggregate_id && r.event.version >= from_version)
            .map(|r| r.event.clone())
            .collect())
    }

    async fn get_events_by_type(
        &self,
        event_type: &str,
        limit: Option<usize>,
    ) -> Result<Vec<EventRecord>> {
        let log = self.log.read().await;
        Ok(log
            .records
            .iter()
            .filter(|r| r.event.event_type == event_type)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn get_event_stream(
        &self,
        stream_name: &str,
        from_position: u64,
    ) -> Result<EventStream> {
        let log = self.log.read().await;
        let start = from_position.saturating_sub(1) as usize;
        let records: Vec<Result<EventRecord>> = log
            .records
            .iter()
            .skip(start)
            .filter(|r| stream_name == ALL_STREAM || r.event.aggregate_type == stream_name)
            .cloned()
            .map(Ok)
            .collect();

        Ok(Box::pin(stream::iter(records)))
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log
            .records
            .iter()
            .filter(|r| query.matches(&r.event))
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|r| r.event.clone())
            .collect())
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        Ok(self.log.read().await.heads.get(&aggregate_id).copied())
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.read().await.get(&aggregate_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::EventStoreExt;

    fn event(aggregate_id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Quote")
            .event_type(event_type)
            .version(Version::new(version))
            .payload_raw(serde_json::json!({"version": version}))
            .build()
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let records = store
            .append(vec![event(id, 1, "QuoteCreated"), event(id, 2, "ItemAdded")])
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].position, 1);
        assert_eq!(records[1].position, 2);

        let events = store.get_all_events(id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].version, Version::new(1));
        assert_eq!(events[1].version, Version::new(2));
        assert_eq!(
            store.get_aggregate_version(id).await.unwrap(),
            Some(Version::new(2))
        );
    }

    #[tokio::test]
    async fn get_events_from_version() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append((1..=5).map(|v| event(id, v, "ItemAdded")).collect())
            .await
            .unwrap();

        let events = store.get_events(id, Version::new(3)).await.unwrap();
        let versions: Vec<i64> = events.iter().map(|e| e.version.as_i64()).collect();
        assert_eq!(versions, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn unknown_aggregate_has_no_events() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        assert!(store.get_all_events(id).await.unwrap().is_empty());
        assert_eq!(store.get_aggregate_version(id).await.unwrap(), None);
        assert!(!store.aggregate_exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, 1, "QuoteCreated")])
            .await
            .unwrap();

        let err = store
            .append(vec![event(id, 1, "QuoteCreated")])
            .await
            .unwrap_err();

        match err {
            EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            } => {
                assert_eq!(aggregate_id, id);
                assert_eq!(expected, Version::initial());
                assert_eq!(actual, Version::first());
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn skipping_ahead_is_a_conflict() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let err = store
            .append(vec![event(id, 3, "ItemAdded")])
            .await
            .unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn multi_aggregate_batch_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store
            .append(vec![event(b, 1, "QuoteCreated")])
            .await
            .unwrap();

        // `a` is fine, `b` is stale: nothing from the batch may land.
        let err = store
            .append(vec![event(a, 1, "QuoteCreated"), event(b, 1, "QuoteCreated")])
            .await
            .unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert_eq!(store.get_aggregate_version(a).await.unwrap(), None);
        assert_eq!(store.event_count().await, 1);

        store
            .append(vec![event(a, 1, "QuoteCreated"), event(b, 2, "ItemAdded")])
            .await
            .unwrap();
        assert_eq!(store.event_count().await, 3);
    }

    #[tokio::test]
    async fn concurrent_appends_exactly_one_wins() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, 1, "QuoteCreated")])
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(vec![event(id, 2, "ItemAdded")]).await
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(e) if e.is_concurrency_conflict() => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test]
    async fn events_by_type_in_position_order_with_limit() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store
            .append(vec![event(a, 1, "QuoteCreated")])
            .await
            .unwrap();
        store
            .append(vec![event(b, 1, "QuoteCreated")])
            .await
            .unwrap();
        store
            .append(vec![event(a, 2, "ItemAdded")])
            .await
            .unwrap();

        let created = store
            .get_events_by_type("QuoteCreated", None)
            .await
            .unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].event.aggregate_id, a);
        assert_eq!(created[1].event.aggregate_id, b);
        assert!(created[0].position < created[1].position);

        let limited = store
            .get_events_by_type("QuoteCreated", Some(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert!(
            store
                .get_events_by_type("Nope", None)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn stream_from_position_and_by_name() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append((1..=4).map(|v| event(id, v, "ItemAdded")).collect())
            .await
            .unwrap();
        let mut other = event(AggregateId::new(), 1, "CustomerRegistered");
        other.aggregate_type = "Customer".to_string();
        store.append(vec![other]).await.unwrap();

        let all: Vec<_> = store
            .get_event_stream(ALL_STREAM, 3)
            .await
            .unwrap()
            .collect()
            .await;
        let positions: Vec<u64> = all.into_iter().map(|r| r.unwrap().position).collect();
        assert_eq!(positions, vec![3, 4, 5]);

        let quotes: Vec<_> = store
            .get_event_stream("Quote", 1)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(quotes.len(), 4);
    }

    #[tokio::test]
    async fn query_with_paging() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append((1..=6).map(|v| event(id, v, "ItemAdded")).collect())
            .await
            .unwrap();

        let page = store
            .query_events(EventQuery::for_aggregate(id).offset(2).limit(3))
            .await
            .unwrap();
        let versions: Vec<i64> = page.iter().map(|e| e.version.as_i64()).collect();
        assert_eq!(versions, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn snapshot_then_tail_events() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append((1..=5).map(|v| event(id, v, "ItemAdded")).collect())
            .await
            .unwrap();

        let snapshot = Snapshot::from_state(
            id,
            "Quote",
            Version::new(3),
            Utc::now(),
            &serde_json::json!({"items": 3}),
        )
        .unwrap();
        store.save_snapshot(snapshot).await.unwrap();

        let (snapshot, events) = store.load_aggregate(id).await.unwrap();
        assert_eq!(snapshot.unwrap().version, Version::new(3));
        let versions: Vec<i64> = events.iter().map(|e| e.version.as_i64()).collect();
        assert_eq!(versions, vec![4, 5]);
    }

    #[tokio::test]
    async fn clear_resets_heads() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, 1, "QuoteCreated")])
            .await
            .unwrap();
        store.clear().await;

        assert_eq!(store.event_count().await, 0);
        store
            .append(vec![event(id, 1, "QuoteCreated")])
            .await
            .unwrap();
    }
}
