//! Event store for the quoting core.
//!
//! Events are appended per aggregate with contiguous versions starting at 1.
//! Every append is checked against the last stored version of each aggregate
//! it touches, which is what turns concurrent writers into
//! [`EventStoreError::ConcurrencyConflict`] instead of a corrupted history.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod snapshot;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, EventRecord, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::EventQuery;
pub use snapshot::Snapshot;
pub use store::{ALL_STREAM, EventStore, EventStoreExt, EventStream};
