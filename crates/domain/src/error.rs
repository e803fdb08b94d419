//! Domain error types.

use common::AggregateId;
use event_store::{EventStoreError, Version};
use thiserror::Error;

use crate::quote::QuoteError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A quote command was rejected.
    #[error("Quote error: {0}")]
    Quote(#[from] QuoteError),

    /// Aggregate not found.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// Events were raised on an aggregate that never got an identity.
    #[error("{aggregate_type} has pending events but no id")]
    MissingIdentity { aggregate_type: &'static str },

    /// Stored events do not form a contiguous sequence.
    #[error("Corrupt history for {aggregate_id}: expected version {expected}, found {found}")]
    CorruptHistory {
        aggregate_id: AggregateId,
        expected: Version,
        found: Version,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// True when the command lost a race with another writer and can be
    /// retried after reloading.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_concurrency_conflict())
    }
}
