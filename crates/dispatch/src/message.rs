use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ValidationError;

common::uuid_id!(
    /// Identity of a single command or query instance.
    MessageId
);

/// Identity and creation time carried by every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
}

impl MessageMeta {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Metadata stamped with a caller-supplied time.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::new(),
            timestamp,
        }
    }
}

impl Default for MessageMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Common shape of commands and queries.
///
/// `TYPE` is the tag handlers are registered under; it must be unique per bus.
pub trait Message: Send + Sync + 'static {
    const TYPE: &'static str;

    fn meta(&self) -> &MessageMeta;

    fn message_id(&self) -> MessageId {
        self.meta().id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.meta().timestamp
    }
}

/// A request to change state.
pub trait Command: Message {
    /// Checks the command's own fields.
    ///
    /// Must be pure: the bus may call it more than once per dispatch.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// A read-only request.
///
/// The serialized form is the query's cache key, so `MessageMeta` should be
/// excluded from it with `#[serde(skip)]`.
pub trait Query: Message + Serialize {
    type Output: Clone + Send + Sync + 'static;
}

/// Which side of the bus a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Command,
    Query,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Command => "command",
            MessageKind::Query => "query",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
