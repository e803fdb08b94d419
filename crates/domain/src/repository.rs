//! Loading and saving event-sourced aggregates.

use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{EventEnvelope, EventRecord, EventStore, EventStoreExt, Snapshot, Version};

use crate::aggregate::{Aggregate, DomainEvent, SnapshotCapable};
use crate::error::DomainError;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The records the store accepted, in version order.
    pub records: Vec<EventRecord>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

/// Moves aggregates between the event store and memory.
///
/// Loading replays history (starting from a snapshot when one exists);
/// saving appends the aggregate's pending events at the versions they were
/// raised with, so a concurrent writer turns into a
/// [`DomainError::EventStore`] conflict instead of a lost update.
pub struct AggregateRepository<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<fn() -> A>,
}

impl<S, A> Clone for AggregateRepository<S, A>
where
    S: EventStore + Clone,
    A: Aggregate,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<S, A> AggregateRepository<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate from the event store.
    ///
    /// If the aggregate doesn't exist, returns a default instance.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let (snapshot, events) = self.store.load_aggregate(aggregate_id).await?;

        let mut aggregate = match snapshot {
            Some(snapshot) => restore_from_snapshot::<A>(&snapshot)?,
            None => A::default(),
        };
        aggregate.load_from_history(&events)?;

        tracing::trace!(version = %aggregate.version(), replayed = events.len(), "aggregate loaded");
        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Loads an aggregate that must exist.
    pub async fn get(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        self.load_existing(aggregate_id)
            .await?
            .ok_or(DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id,
            })
    }

    /// Appends the aggregate's pending events and clears them once stored.
    ///
    /// On failure the pending events stay in place and the aggregate is
    /// unchanged; the caller reloads before retrying.
    #[tracing::instrument(skip_all, fields(aggregate_type = A::aggregate_type(), aggregate_id))]
    pub async fn save(&self, aggregate: &mut A) -> Result<Vec<EventRecord>, DomainError> {
        if aggregate.uncommitted_events().is_empty() {
            return Ok(Vec::new());
        }
        let aggregate_id = aggregate.id().ok_or(DomainError::MissingIdentity {
            aggregate_type: A::aggregate_type(),
        })?;
        tracing::Span::current().record("aggregate_id", tracing::field::display(aggregate_id));

        let envelopes = build_envelopes(aggregate_id, aggregate)?;
        let records = self.store.append(envelopes).await?;
        aggregate.mark_events_as_committed();

        tracing::debug!(
            version = %aggregate.version(),
            events = records.len(),
            "aggregate saved"
        );
        Ok(records)
    }

    /// Loads an aggregate, runs `command` against it and saves the result.
    ///
    /// A command that raises nothing leaves the store untouched.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&mut A) -> Result<(), A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        command(&mut aggregate)?;
        let records = self.save(&mut aggregate).await?;
        let new_version = aggregate.version();

        Ok(CommandResult {
            aggregate,
            records,
            new_version,
        })
    }
}

impl<S, A> AggregateRepository<S, A>
where
    S: EventStore,
    A: SnapshotCapable,
{
    /// Saves and stores a snapshot when the save crosses a snapshot boundary.
    ///
    /// Once the events are appended the command has happened, so a failed
    /// snapshot is logged and counted but never returned. Loading simply
    /// replays more events until the next boundary succeeds.
    pub async fn save_with_snapshot(&self, aggregate: &mut A) -> Result<Vec<EventRecord>, DomainError> {
        let from = aggregate.root().committed_version();
        let taken_at = aggregate.uncommitted_events().last().map(|e| e.occurred_at);
        let records = self.save(aggregate).await?;

        let to = aggregate.version();
        if let (Some(taken_at), Some(aggregate_id)) = (taken_at, aggregate.id())
            && A::should_snapshot(from, to)
        {
            match self.store_snapshot(aggregate_id, to, taken_at, aggregate).await {
                Ok(()) => tracing::debug!(%aggregate_id, version = %to, "snapshot stored"),
                Err(error) => {
                    metrics::counter!(
                        "snapshot_failures_total",
                        "aggregate_type" => A::aggregate_type()
                    )
                    .increment(1);
                    tracing::warn!(%aggregate_id, version = %to, %error, "snapshot not stored");
                }
            }
        }

        Ok(records)
    }

    async fn store_snapshot(
        &self,
        aggregate_id: AggregateId,
        version: Version,
        taken_at: DateTime<Utc>,
        aggregate: &A,
    ) -> Result<(), DomainError> {
        let snapshot =
            Snapshot::from_state(aggregate_id, A::aggregate_type(), version, taken_at, aggregate)?;
        self.store.save_snapshot(snapshot).await?;
        Ok(())
    }

    /// Same as [`execute`](Self::execute), snapshotting when due.
    pub async fn execute_with_snapshot<F>(
        &self,
        aggregate_id: AggregateId,
        command: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&mut A) -> Result<(), A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        command(&mut aggregate)?;
        let records = self.save_with_snapshot(&mut aggregate).await?;
        let new_version = aggregate.version();

        Ok(CommandResult {
            aggregate,
            records,
            new_version,
        })
    }
}

/// Builds event envelopes from the aggregate's pending events.
fn build_envelopes<A: Aggregate>(
    aggregate_id: AggregateId,
    aggregate: &A,
) -> Result<Vec<EventEnvelope>, DomainError> {
    aggregate
        .uncommitted_events()
        .iter()
        .map(|pending| {
            Ok(EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(pending.event.event_type())
                .version(pending.version)
                .timestamp(pending.occurred_at)
                .payload(&pending.event)?
                .build())
        })
        .collect()
}

fn restore_from_snapshot<A: Aggregate>(snapshot: &Snapshot) -> Result<A, DomainError> {
    let mut aggregate: A = snapshot.decode()?;
    aggregate.root_mut().set_version(snapshot.version);
    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use event_store::{EventQuery, EventStoreError, EventStream, InMemoryEventStore};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::aggregate::{AggregateRoot, raise};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data")]
    enum TallyEvent {
        Opened { id: AggregateId },
        Counted { by: u32 },
    }

    impl DomainEvent for TallyEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TallyEvent::Opened { .. } => "Opened",
                TallyEvent::Counted { .. } => "Counted",
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    enum TallyError {
        #[error("not opened")]
        NotOpened,
        #[error("already opened")]
        AlreadyOpened,
    }

    impl From<TallyError> for DomainError {
        fn from(e: TallyError) -> Self {
            DomainError::Serialization(serde::de::Error::custom(e.to_string()))
        }
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Tally {
        id: Option<AggregateId>,
        count: u32,
        root: AggregateRoot<TallyEvent>,
    }

    impl Tally {
        fn open(&mut self, id: AggregateId) -> Result<(), TallyError> {
            if self.id.is_some() {
                return Err(TallyError::AlreadyOpened);
            }
            raise(self, TallyEvent::Opened { id }, Utc::now());
            Ok(())
        }

        fn count(&mut self, by: u32) -> Result<(), TallyError> {
            if self.id.is_none() {
                return Err(TallyError::NotOpened);
            }
            raise(self, TallyEvent::Counted { by }, Utc::now());
            Ok(())
        }
    }

    impl Aggregate for Tally {
        type Event = TallyEvent;
        type Error = TallyError;

        fn aggregate_type() -> &'static str {
            "Tally"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn root(&self) -> &AggregateRoot<TallyEvent> {
            &self.root
        }

        fn root_mut(&mut self) -> &mut AggregateRoot<TallyEvent> {
            &mut self.root
        }

        fn apply(&mut self, event: &TallyEvent) {
            match event {
                TallyEvent::Opened { id } => self.id = Some(*id),
                TallyEvent::Counted { by } => self.count += by,
            }
        }
    }

    impl SnapshotCapable for Tally {
        fn snapshot_interval() -> u64 {
            5
        }
    }

    fn repository() -> AggregateRepository<Arc<InMemoryEventStore>, Tally> {
        AggregateRepository::new(Arc::new(InMemoryEventStore::new()))
    }

    #[tokio::test]
    async fn load_unknown_returns_default() {
        let repo = repository();
        let id = AggregateId::new();
        let tally = repo.load(id).await.unwrap();
        assert_eq!(tally.version(), Version::initial());
        assert!(repo.load_existing(id).await.unwrap().is_none());
        assert!(matches!(
            repo.get(id).await,
            Err(DomainError::AggregateNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let repo = repository();
        let id = AggregateId::new();

        let mut tally = Tally::default();
        tally.open(id).unwrap();
        tally.count(3).unwrap();
        let records = repo.save(&mut tally).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].event.version, Version::new(2));
        assert!(tally.uncommitted_events().is_empty());

        let loaded = repo.get(id).await.unwrap();
        assert_eq!(loaded, tally);
    }

    #[tokio::test]
    async fn execute_appends_only_new_events() {
        let repo = repository();
        let id = AggregateId::new();
        repo.execute(id, |t| t.open(id)).await.unwrap();

        let result = repo.execute(id, |t| t.count(2)).await.unwrap();
        assert_eq!(result.new_version, Version::new(2));
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.aggregate.count, 2);
        assert_eq!(repo.store().event_count().await, 2);
    }

    #[tokio::test]
    async fn rejected_command_stores_nothing() {
        let repo = repository();
        let id = AggregateId::new();
        let err = repo.execute(id, |t| t.count(1)).await.unwrap_err();
        assert!(matches!(err, DomainError::Serialization(_)));
        assert_eq!(repo.store().event_count().await, 0);
    }

    #[tokio::test]
    async fn stale_copy_conflicts_and_keeps_pending() {
        let repo = repository();
        let id = AggregateId::new();
        repo.execute(id, |t| t.open(id)).await.unwrap();

        let mut first = repo.load(id).await.unwrap();
        let mut second = repo.load(id).await.unwrap();
        first.count(1).unwrap();
        second.count(5).unwrap();

        repo.save(&mut first).await.unwrap();
        let err = repo.save(&mut second).await.unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert_eq!(second.uncommitted_events().len(), 1);

        let current = repo.load(id).await.unwrap();
        assert_eq!(current.count, 1);
    }

    #[tokio::test]
    async fn snapshot_is_taken_at_interval_and_used_on_load() {
        let repo = repository();
        let id = AggregateId::new();
        repo.execute_with_snapshot(id, |t| t.open(id)).await.unwrap();
        for _ in 0..3 {
            repo.execute_with_snapshot(id, |t| t.count(1)).await.unwrap();
        }
        assert!(repo.store().get_snapshot(id).await.unwrap().is_none());

        repo.execute_with_snapshot(id, |t| t.count(1)).await.unwrap();
        let snapshot = repo.store().get_snapshot(id).await.unwrap().unwrap();
        assert_eq!(snapshot.version, Version::new(5));

        repo.execute_with_snapshot(id, |t| t.count(10)).await.unwrap();
        let loaded = repo.load(id).await.unwrap();
        assert_eq!(loaded.version(), Version::new(6));
        assert_eq!(loaded.count, 14);
    }

    /// In-memory store that refuses every snapshot.
    struct SnapshotRefusingStore {
        inner: InMemoryEventStore,
    }

    #[async_trait]
    impl EventStore for SnapshotRefusingStore {
        async fn append(&self, events: Vec<EventEnvelope>) -> event_store::Result<Vec<EventRecord>> {
            self.inner.append(events).await
        }

        async fn get_events(
            &self,
            aggregate_id: AggregateId,
            from_version: Version,
        ) -> event_store::Result<Vec<EventEnvelope>> {
            self.inner.get_events(aggregate_id, from_version).await
        }

        async fn get_events_by_type(
            &self,
            event_type: &str,
            limit: Option<usize>,
        ) -> event_store::Result<Vec<EventRecord>> {
            self.inner.get_events_by_type(event_type, limit).await
        }

        async fn get_event_stream(
            &self,
            stream_name: &str,
            from_position: u64,
        ) -> event_store::Result<EventStream> {
            self.inner.get_event_stream(stream_name, from_position).await
        }

        async fn query_events(&self, query: EventQuery) -> event_store::Result<Vec<EventEnvelope>> {
            self.inner.query_events(query).await
        }

        async fn get_aggregate_version(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Option<Version>> {
            self.inner.get_aggregate_version(aggregate_id).await
        }

        async fn save_snapshot(&self, _snapshot: Snapshot) -> event_store::Result<()> {
            Err(EventStoreError::InvalidAppend(
                "snapshot storage unavailable".to_string(),
            ))
        }

        async fn get_snapshot(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Option<Snapshot>> {
            self.inner.get_snapshot(aggregate_id).await
        }
    }

    #[tokio::test]
    async fn failed_snapshot_does_not_fail_the_command() {
        let repo: AggregateRepository<_, Tally> =
            AggregateRepository::new(Arc::new(SnapshotRefusingStore {
                inner: InMemoryEventStore::new(),
            }));
        let id = AggregateId::new();
        repo.execute_with_snapshot(id, |t| t.open(id)).await.unwrap();
        for version in 2..=10 {
            let result = repo
                .execute_with_snapshot(id, |t| t.count(1))
                .await
                .unwrap();
            assert_eq!(result.new_version, Version::new(version));
        }

        assert!(repo.store().get_snapshot(id).await.unwrap().is_none());
        assert_eq!(repo.store().inner.event_count().await, 10);
        let loaded = repo.get(id).await.unwrap();
        assert_eq!(loaded.version(), Version::new(10));
        assert_eq!(loaded.count, 9);
    }
}
