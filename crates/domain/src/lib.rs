//! Domain layer for the quoting core.
//!
//! This crate provides:
//! - the aggregate contract: identity, version, pending-event buffer and replay
//! - a repository that loads and saves aggregates through an event store
//! - composable specifications for filtering aggregates
//! - the Quote aggregate with its state machine, pricing and bus handlers

pub mod aggregate;
pub mod error;
pub mod quote;
pub mod repository;
pub mod specification;

pub use aggregate::{Aggregate, AggregateRoot, DomainEvent, PendingEvent, SnapshotCapable};
pub use error::DomainError;
pub use quote::{
    AddQuoteItem, ApproveQuote, CloneQuote, CompanyId, CreateQuote, CustomerId, ExpireQuote,
    ExtendQuoteValidity, FindQuotes, GetQuote, GetQuoteHistory, ItemId, Money, PricingSummary,
    ProductId, Quote, QuoteError, QuoteEvent, QuoteFilter, QuoteHandlers, QuoteItem, QuoteStatus,
    QuoteTerms, RejectQuote, RemoveQuoteItem, SubmitQuote, UpdateQuoteItem, UpdateQuoteTerms,
    UserId, register_quote_handlers,
};
pub use repository::{AggregateRepository, CommandResult};
pub use specification::{BoxSpecification, Specification};
