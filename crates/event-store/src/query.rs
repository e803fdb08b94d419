use chrono::{DateTime, Utc};

use crate::{AggregateId, EventEnvelope, Version};

/// Filter over the event log.
///
/// Every set criterion must hold; unset criteria match everything. Results are
/// returned in persistence order, with `offset` applied before `limit`.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub aggregate_id: Option<AggregateId>,
    pub aggregate_type: Option<String>,

    /// Any of these event types.
    pub event_types: Option<Vec<String>>,

    /// Inclusive version bounds.
    pub from_version: Option<Version>,
    pub to_version: Option<Version>,

    /// Inclusive bounds on the event timestamp.
    pub from_timestamp: Option<DateTime<Utc>>,
    pub to_timestamp: Option<DateTime<Utc>>,

    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for a specific aggregate.
    pub fn for_aggregate(aggregate_id: AggregateId) -> Self {
        Self {
            aggregate_id: Some(aggregate_id),
            ..Default::default()
        }
    }

    /// Creates a query for events of a specific type.
    pub fn for_event_type(event_type: impl Into<String>) -> Self {
        Self {
            event_types: Some(vec![event_type.into()]),
            ..Default::default()
        }
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types = Some(vec![event_type.into()]);
        self
    }

    pub fn event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn from_version(mut self, version: Version) -> Self {
        self.from_version = Some(version);
        self
    }

    pub fn to_version(mut self, version: Version) -> Self {
        self.to_version = Some(version);
        self
    }

    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Checks the row-level criteria. Paging is left to the caller.
    pub fn matches(&self, event: &EventEnvelope) -> bool {
        if self.aggregate_id.is_some_and(|id| id != event.aggregate_id) {
            return false;
        }
        if self
            .aggregate_type
            .as_deref()
            .is_some_and(|t| t != event.aggregate_type)
        {
            return false;
        }
        if let Some(types) = &self.event_types
            && !types.iter().any(|t| *t == event.event_type)
        {
            return false;
        }
        if self.from_version.is_some_and(|v| event.version < v)
            || self.to_version.is_some_and(|v| event.version > v)
        {
            return false;
        }
        if self.from_timestamp.is_some_and(|t| event.timestamp < t)
            || self.to_timestamp.is_some_and(|t| event.timestamp > t)
        {
            return false;
        }
        true
    }
}
