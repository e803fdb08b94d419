//! Core aggregate and domain event traits.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{EventEnvelope, Version};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::DomainError;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Returns the event type name.
    ///
    /// This is used for serialization and event store filtering.
    fn event_type(&self) -> &'static str;
}

/// An event raised by an aggregate and not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent<E> {
    pub event: E,
    /// The aggregate version this event produces.
    pub version: Version,
    pub occurred_at: DateTime<Utc>,
}

/// Version and pending-event buffer embedded in every aggregate.
///
/// The buffer only grows while commands run and is only emptied once the
/// store has accepted its contents. It is never part of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct AggregateRoot<E> {
    version: Version,
    #[serde(skip)]
    uncommitted: Vec<PendingEvent<E>>,
}

impl<E> Default for AggregateRoot<E> {
    fn default() -> Self {
        Self {
            version: Version::initial(),
            uncommitted: Vec::new(),
        }
    }
}

impl<E> AggregateRoot<E> {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn pending(&self) -> &[PendingEvent<E>] {
        &self.uncommitted
    }

    /// Version as last persisted, before any pending events.
    pub fn committed_version(&self) -> Version {
        Version::new(self.version.as_i64() - self.uncommitted.len() as i64)
    }

    pub(crate) fn record(&mut self, event: E, occurred_at: DateTime<Utc>) {
        self.version = self.version.next();
        self.uncommitted.push(PendingEvent {
            event,
            version: self.version,
            occurred_at,
        });
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub(crate) fn clear(&mut self) {
        self.uncommitted.clear();
    }
}

/// Trait for aggregates in an event-sourced system.
///
/// An aggregate changes only through its own command methods. Each of them
/// checks its preconditions, then raises events; raising an event applies it
/// and buffers it. State is always derivable by replaying the persisted
/// events through [`Aggregate::apply`].
pub trait Aggregate: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors this aggregate's commands can produce.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the aggregate type name.
    ///
    /// Used for event store organization and routing.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's unique identifier.
    ///
    /// Returns None for a new, uninitialized aggregate.
    fn id(&self) -> Option<AggregateId>;

    fn root(&self) -> &AggregateRoot<Self::Event>;

    fn root_mut(&mut self) -> &mut AggregateRoot<Self::Event>;

    /// Applies an event to the aggregate, updating its state.
    ///
    /// This method must be pure and deterministic:
    /// - Given the same state and event, it must always produce the same new state
    /// - It must not have side effects
    /// - It must not fail (events represent facts that have happened)
    fn apply(&mut self, event: &Self::Event);

    /// Returns the current version of the aggregate.
    ///
    /// Version 0 means no events; every raised or replayed event adds one.
    fn version(&self) -> Version {
        self.root().version()
    }

    /// Events raised since the last commit, oldest first.
    fn uncommitted_events(&self) -> &[PendingEvent<Self::Event>] {
        self.root().pending()
    }

    /// Drops the pending events once the store has accepted them.
    fn mark_events_as_committed(&mut self) {
        self.root_mut().clear();
    }

    /// Replays persisted events on top of the current state.
    ///
    /// Each envelope must carry exactly the next version.
    fn load_from_history(&mut self, history: &[EventEnvelope]) -> Result<(), DomainError> {
        for envelope in history {
            let expected = self.version().next();
            if envelope.version != expected {
                return Err(DomainError::CorruptHistory {
                    aggregate_id: envelope.aggregate_id,
                    expected,
                    found: envelope.version,
                });
            }
            let event: Self::Event = envelope.decode()?;
            self.apply(&event);
            self.root_mut().set_version(envelope.version);
        }
        Ok(())
    }

    /// Rebuilds an aggregate from scratch out of an ordered event sequence.
    fn replay<'a>(events: impl IntoIterator<Item = &'a Self::Event>) -> Self {
        let mut aggregate = Self::default();
        for event in events {
            aggregate.apply(event);
            let next = aggregate.version().next();
            aggregate.root_mut().set_version(next);
        }
        aggregate
    }
}

/// Applies `event` and buffers it as the aggregate's next version.
pub(crate) fn raise<A: Aggregate>(aggregate: &mut A, event: A::Event, at: DateTime<Utc>) {
    aggregate.apply(&event);
    aggregate.root_mut().record(event, at);
}

/// Trait for aggregates that support snapshotting.
///
/// The repository stores a snapshot whenever a save crosses a multiple of
/// [`SnapshotCapable::snapshot_interval`].
pub trait SnapshotCapable: Aggregate {
    /// Number of events between snapshots.
    fn snapshot_interval() -> u64 {
        100
    }

    /// Returns whether moving from `from` to `to` crosses a snapshot boundary.
    fn should_snapshot(from: Version, to: Version) -> bool {
        let interval = Self::snapshot_interval().max(1) as i64;
        to.as_i64() / interval > from.as_i64() / interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data")]
    enum CounterEvent {
        Opened { id: AggregateId },
        Incremented { by: i64 },
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                CounterEvent::Opened { .. } => "Opened",
                CounterEvent::Incremented { .. } => "Incremented",
            }
        }
    }

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    struct Counter {
        id: Option<AggregateId>,
        total: i64,
        root: AggregateRoot<CounterEvent>,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("counter error")]
    struct CounterError;

    impl Aggregate for Counter {
        type Event = CounterEvent;
        type Error = CounterError;

        fn aggregate_type() -> &'static str {
            "Counter"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn root(&self) -> &AggregateRoot<CounterEvent> {
            &self.root
        }

        fn root_mut(&mut self) -> &mut AggregateRoot<CounterEvent> {
            &mut self.root
        }

        fn apply(&mut self, event: &CounterEvent) {
            match event {
                CounterEvent::Opened { id } => self.id = Some(*id),
                CounterEvent::Incremented { by } => self.total += by,
            }
        }
    }

    impl SnapshotCapable for Counter {
        fn snapshot_interval() -> u64 {
            10
        }
    }

    fn envelope(id: AggregateId, version: i64, event: &CounterEvent) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(id)
            .aggregate_type("Counter")
            .event_type(event.event_type())
            .version(Version::new(version))
            .payload(event)
            .unwrap()
            .build()
    }

    #[test]
    fn raise_applies_and_buffers() {
        let mut counter = Counter::default();
        let id = AggregateId::new();
        raise(&mut counter, CounterEvent::Opened { id }, Utc::now());
        raise(&mut counter, CounterEvent::Incremented { by: 5 }, Utc::now());

        assert_eq!(counter.version(), Version::new(2));
        assert_eq!(counter.total, 5);
        let pending = counter.uncommitted_events();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].version, Version::first());
        assert_eq!(pending[1].version, Version::new(2));
        assert_eq!(counter.root().committed_version(), Version::initial());

        counter.mark_events_as_committed();
        assert!(counter.uncommitted_events().is_empty());
        assert_eq!(counter.version(), Version::new(2));
        assert_eq!(counter.root().committed_version(), Version::new(2));
    }

    #[test]
    fn load_from_history_matches_direct_calls() {
        let id = AggregateId::new();
        let events = vec![
            CounterEvent::Opened { id },
            CounterEvent::Incremented { by: 3 },
            CounterEvent::Incremented { by: 4 },
        ];
        let history: Vec<_> = events
            .iter()
            .enumerate()
            .map(|(i, e)| envelope(id, i as i64 + 1, e))
            .collect();

        let mut loaded = Counter::default();
        loaded.load_from_history(&history).unwrap();

        let mut direct = Counter::default();
        for event in events.clone() {
            raise(&mut direct, event, Utc::now());
        }

        assert_eq!(loaded.id, direct.id);
        assert_eq!(loaded.total, direct.total);
        assert_eq!(loaded.version(), direct.version());
        assert!(loaded.uncommitted_events().is_empty());

        let replayed = Counter::replay(&events);
        assert_eq!(replayed.total, 7);
        assert_eq!(replayed.version(), Version::new(3));
    }

    #[test]
    fn replay_is_deterministic() {
        let id = AggregateId::new();
        let events = vec![
            CounterEvent::Opened { id },
            CounterEvent::Incremented { by: 2 },
        ];
        let a = Counter::replay(&events);
        let b = Counter::replay(&events);
        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&b).unwrap()
        );
    }

    #[test]
    fn gapped_history_is_rejected() {
        let id = AggregateId::new();
        let history = vec![
            envelope(id, 1, &CounterEvent::Opened { id }),
            envelope(id, 3, &CounterEvent::Incremented { by: 1 }),
        ];

        let mut counter = Counter::default();
        let err = counter.load_from_history(&history).unwrap_err();
        assert!(matches!(
            err,
            DomainError::CorruptHistory { expected, found, .. }
                if expected == Version::new(2) && found == Version::new(3)
        ));
    }

    #[test]
    fn snapshot_boundary_crossing() {
        assert!(!Counter::should_snapshot(Version::initial(), Version::new(9)));
        assert!(Counter::should_snapshot(Version::new(9), Version::new(10)));
        assert!(Counter::should_snapshot(Version::new(8), Version::new(12)));
        assert!(!Counter::should_snapshot(Version::new(10), Version::new(11)));
    }

    #[test]
    fn pending_events_are_not_serialized() {
        let mut counter = Counter::default();
        raise(
            &mut counter,
            CounterEvent::Opened {
                id: AggregateId::new(),
            },
            Utc::now(),
        );
        let restored: Counter =
            serde_json::from_value(serde_json::to_value(&counter).unwrap()).unwrap();
        assert_eq!(restored.version(), Version::first());
        assert!(restored.uncommitted_events().is_empty());
    }
}
