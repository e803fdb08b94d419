//! Quote aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod handlers;
mod queries;
mod specifications;
mod state;
mod value_objects;

pub use aggregate::Quote;
pub use commands::*;
pub use events::{
    ItemAddedData, ItemRemovedData, ItemUpdatedData, QuoteApprovedData, QuoteClonedData,
    QuoteCreatedData, QuoteEvent, QuoteExpiredData, QuoteRejectedData, QuoteSubmittedData,
    TermsUpdatedData, ValidityExtendedData,
};
pub use handlers::{QuoteHandlers, register_quote_handlers};
pub use queries::{FindQuotes, GetQuote, GetQuoteHistory};
pub use specifications::{ActiveQuote, ExpiredQuote, ForCustomer, HighValueQuote, QuoteFilter};
pub use state::QuoteStatus;
pub use value_objects::{
    CompanyId, CustomerId, ItemId, Money, PricingSummary, ProductId, QuoteItem, QuoteTerms, UserId,
};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during quote operations.
#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("Customer ID is required")]
    MissingCustomer,

    #[error("Company ID is required")]
    MissingCompany,

    #[error("Quote already created")]
    AlreadyCreated,

    /// The command targets a quote that has no history.
    #[error("Quote has not been created")]
    NotCreated,

    /// Quote is not in a state that allows the action.
    #[error("Invalid state transition: cannot {action} a {current} quote")]
    InvalidStateTransition {
        current: QuoteStatus,
        action: &'static str,
    },

    /// A line with the same product and specification already exists.
    #[error("Duplicate item: {product_id} ({specification})")]
    DuplicateItem {
        product_id: String,
        specification: String,
    },

    #[error("Item not found: {item_id}")]
    ItemNotFound { item_id: ItemId },

    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    #[error("Invalid price: {price} (must not be negative)")]
    InvalidPrice { price: Money },

    #[error("Invalid item: {reason}")]
    InvalidItem { reason: String },

    #[error("Quote has no items")]
    NoItems,

    /// Submission needs every line to carry a positive unit price.
    #[error("Item {item_id} has no price")]
    UnpricedItem { item_id: ItemId },

    #[error("Quote validity ended at {valid_until}")]
    ValidityExpired { valid_until: DateTime<Utc> },

    #[error("A rejection reason is required")]
    EmptyReason,

    #[error("Invalid terms: {reason}")]
    InvalidTerms { reason: String },

    #[error("Invalid validity date {requested}: {reason}")]
    InvalidValidity {
        requested: DateTime<Utc>,
        reason: &'static str,
    },
}
