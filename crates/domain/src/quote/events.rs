//! Quote domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{CompanyId, CustomerId, ItemId, Money, QuoteItem, QuoteTerms, UserId};

/// Events that can occur on a quote aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum QuoteEvent {
    /// Quote was opened as a draft.
    QuoteCreated(QuoteCreatedData),

    ItemAdded(ItemAddedData),

    ItemRemoved(ItemRemovedData),

    /// An existing line was replaced.
    ItemUpdated(ItemUpdatedData),

    /// Quote was sent for a decision.
    QuoteSubmitted(QuoteSubmittedData),

    QuoteApproved(QuoteApprovedData),

    QuoteRejected(QuoteRejectedData),

    QuoteExpired(QuoteExpiredData),

    TermsUpdated(TermsUpdatedData),

    ValidityExtended(ValidityExtendedData),

    /// Quote was opened as a copy of another quote.
    QuoteCloned(QuoteClonedData),
}

impl DomainEvent for QuoteEvent {
    fn event_type(&self) -> &'static str {
        match self {
            QuoteEvent::QuoteCreated(_) => "QuoteCreated",
            QuoteEvent::ItemAdded(_) => "ItemAdded",
            QuoteEvent::ItemRemoved(_) => "ItemRemoved",
            QuoteEvent::ItemUpdated(_) => "ItemUpdated",
            QuoteEvent::QuoteSubmitted(_) => "QuoteSubmitted",
            QuoteEvent::QuoteApproved(_) => "QuoteApproved",
            QuoteEvent::QuoteRejected(_) => "QuoteRejected",
            QuoteEvent::QuoteExpired(_) => "QuoteExpired",
            QuoteEvent::TermsUpdated(_) => "TermsUpdated",
            QuoteEvent::ValidityExtended(_) => "ValidityExtended",
            QuoteEvent::QuoteCloned(_) => "QuoteCloned",
        }
    }
}

impl QuoteEvent {
    /// Event types that open a new quote stream.
    pub const OPENING_TYPES: [&'static str; 2] = ["QuoteCreated", "QuoteCloned"];
}

/// Data for QuoteCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteCreatedData {
    pub quote_id: AggregateId,

    /// Human-facing reference, e.g. `Q-20250301-0F1E2D3C`.
    pub quote_number: String,

    pub customer_id: CustomerId,
    pub company_id: CompanyId,
    pub valid_until: DateTime<Utc>,
    pub terms: QuoteTerms,
    pub created_at: DateTime<Utc>,
}

/// Data for ItemAdded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAddedData {
    pub item: QuoteItem,
}

/// Data for ItemRemoved event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRemovedData {
    pub item_id: ItemId,
}

/// Data for ItemUpdated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemUpdatedData {
    /// The line as it reads after the update; its id names the line replaced.
    pub item: QuoteItem,
}

/// Data for QuoteSubmitted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteSubmittedData {
    pub submitted_at: DateTime<Utc>,

    /// Total amount at submission time.
    pub total: Money,

    pub item_count: usize,
}

/// Data for QuoteApproved event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteApprovedData {
    pub approved_by: UserId,
    pub approved_at: DateTime<Utc>,
}

/// Data for QuoteRejected event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRejectedData {
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

/// Data for QuoteExpired event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteExpiredData {
    pub expired_at: DateTime<Utc>,
}

/// Data for TermsUpdated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermsUpdatedData {
    pub terms: QuoteTerms,
}

/// Data for ValidityExtended event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidityExtendedData {
    pub previous: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

/// Data for QuoteCloned event.
///
/// Recorded as version 1 of the new quote. Carries everything the copy
/// starts with, so the new stream replays without reading the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteClonedData {
    pub quote_id: AggregateId,
    pub quote_number: String,
    pub source_id: AggregateId,
    pub customer_id: CustomerId,
    pub company_id: CompanyId,
    pub valid_until: DateTime<Utc>,
    pub terms: QuoteTerms,
    pub items: Vec<QuoteItem>,
    pub created_at: DateTime<Utc>,
}
