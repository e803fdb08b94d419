use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{
    AggregateId, EventEnvelope, EventQuery, EventRecord, EventStoreError, Result, Snapshot,
    Version,
};

/// Stream name that selects the whole log.
pub const ALL_STREAM: &str = "$all";

/// A stream of stored events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventRecord>> + Send>>;

/// Core trait for event store implementations.
///
/// The store is the single writer of events: every mutation of an aggregate
/// reaches durable state only through [`EventStore::append`]. All
/// implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events for one or more aggregates as a single unit.
    ///
    /// For every aggregate in the batch, its first event must carry exactly the
    /// stored version plus one and its events must be contiguous. Any
    /// violation rejects the whole batch: nothing is written and
    /// `ConcurrencyConflict` (or `InvalidAppend` for a malformed batch) is
    /// returned.
    ///
    /// Returns the stored records in batch order.
    async fn append(&self, events: Vec<EventEnvelope>) -> Result<Vec<EventRecord>>;

    /// Retrieves an aggregate's events with `version >= from_version`, oldest
    /// first.
    async fn get_events(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>>;

    /// Retrieves events of one type across all aggregates in persistence
    /// order, at most `limit` of them when given.
    async fn get_events_by_type(
        &self,
        event_type: &str,
        limit: Option<usize>,
    ) -> Result<Vec<EventRecord>>;

    /// Streams records with `position >= from_position`.
    ///
    /// `stream_name` is [`ALL_STREAM`] for the entire log, otherwise an
    /// aggregate type whose events are selected.
    async fn get_event_stream(&self, stream_name: &str, from_position: u64)
    -> Result<EventStream>;

    /// Retrieves events matching a query.
    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>>;

    /// Gets the current version of an aggregate.
    ///
    /// Returns None if the aggregate doesn't exist.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Saves a snapshot of an aggregate's state, replacing any previous one.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Retrieves the latest snapshot for an aggregate.
    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;
}

#[async_trait]
impl<S: EventStore + ?Sized> EventStore for Arc<S> {
    async fn append(&self, events: Vec<EventEnvelope>) -> Result<Vec<EventRecord>> {
        (**self).append(events).await
    }

    async fn get_events(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        (**self).get_events(aggregate_id, from_version).await
    }

    async fn get_events_by_type(
        &self,
        event_type: &str,
        limit: Option<usize>,
    ) -> Result<Vec<EventRecord>> {
        (**self).get_events_by_type(event_type, limit).await
    }

    async fn get_event_stream(
        &self,
        stream_name: &str,
        from_position: u64,
    ) -> Result<EventStream> {
        (**self).get_event_stream(stream_name, from_position).await
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        (**self).query_events(query).await
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        (**self).get_aggregate_version(aggregate_id).await
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        (**self).save_snapshot(snapshot).await
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        (**self).get_snapshot(aggregate_id).await
    }
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event.
    async fn append_event(&self, event: EventEnvelope) -> Result<EventRecord> {
        let mut records = self.append(vec![event]).await?;
        records
            .pop()
            .ok_or_else(|| EventStoreError::InvalidAppend("store returned no record".to_string()))
    }

    /// Retrieves the full history of an aggregate.
    async fn get_all_events(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        self.get_events(aggregate_id, Version::first()).await
    }

    /// Checks if an aggregate exists (has any events).
    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }

    /// Loads an aggregate's events, starting after its snapshot when one exists.
    async fn load_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<(Option<Snapshot>, Vec<EventEnvelope>)> {
        if let Some(snapshot) = self.get_snapshot(aggregate_id).await? {
            let events = self
                .get_events(aggregate_id, snapshot.version.next())
                .await?;
            Ok((Some(snapshot), events))
        } else {
            let events = self.get_all_events(aggregate_id).await?;
            Ok((None, events))
        }
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// The slice of an append batch that targets one aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateBatch {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    /// Version of the first event; the stored head must be one below it.
    pub first: Version,
    pub last: Version,
}

impl AggregateBatch {
    /// The stored version this batch was built on.
    pub fn expected_head(&self) -> Version {
        Version::new(self.first.as_i64() - 1)
    }
}

/// Validates a batch before any store touches it and groups it per aggregate,
/// in order of first appearance.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<Vec<AggregateBatch>> {
    if events.is_empty() {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty event list".to_string(),
        ));
    }

    let mut batches: Vec<AggregateBatch> = Vec::new();
    let mut index: HashMap<AggregateId, usize> = HashMap::new();

    for event in events {
        match index.get(&event.aggregate_id) {
            Some(&i) => {
                let batch = &mut batches[i];
                if batch.aggregate_type != event.aggregate_type {
                    return Err(EventStoreError::InvalidAppend(format!(
                        "aggregate {} appears with types {} and {}",
                        event.aggregate_id, batch.aggregate_type, event.aggregate_type
                    )));
                }
                let expected = batch.last.next();
                if event.version != expected {
                    return Err(EventStoreError::InvalidAppend(format!(
                        "event versions for aggregate {} must be contiguous: expected {}, got {}",
                        event.aggregate_id, expected, event.version
                    )));
                }
                batch.last = event.version;
            }
            None => {
                if event.version < Version::first() {
                    return Err(EventStoreError::InvalidAppend(format!(
                        "event version must be at least 1, got {}",
                        event.version
                    )));
                }
                index.insert(event.aggregate_id, batches.len());
                batches.push(AggregateBatch {
                    aggregate_id: event.aggregate_id,
                    aggregate_type: event.aggregate_type.clone(),
                    first: event.version,
                    last: event.version,
                });
            }
        }
    }

    Ok(batches)
}
