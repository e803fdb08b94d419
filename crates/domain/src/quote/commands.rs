//! Quote commands.
//!
//! Each command checks only its own fields in `validate`; anything that
//! depends on the quote's current state is decided by the aggregate.

use chrono::{DateTime, Utc};
use common::AggregateId;
use dispatch::{Command, Message, MessageMeta, ValidationError};

use super::{CompanyId, CustomerId, ItemId, QuoteItem, QuoteTerms, UserId};

macro_rules! message {
    ($ty:ident) => {
        impl Message for $ty {
            const TYPE: &'static str = stringify!($ty);

            fn meta(&self) -> &MessageMeta {
                &self.meta
            }
        }
    };
}

fn ensure_quote_id(quote_id: AggregateId) -> Result<(), ValidationError> {
    ValidationError::ensure(!quote_id.is_nil(), "quote_id", "required")
}

fn ensure_item(item: &QuoteItem) -> Result<(), ValidationError> {
    item.validate()
        .map_err(|e| ValidationError::new("item", e.to_string()))
}

fn ensure_terms(terms: &QuoteTerms) -> Result<(), ValidationError> {
    terms
        .validate()
        .map_err(|e| ValidationError::new("terms", e.to_string()))
}

/// Command to open a new draft quote.
#[derive(Debug, Clone)]
pub struct CreateQuote {
    pub meta: MessageMeta,

    /// The id the new quote will have; chosen by the caller so it can be
    /// addressed right away.
    pub quote_id: AggregateId,

    pub customer_id: CustomerId,
    pub company_id: CompanyId,
    pub valid_until: DateTime<Utc>,
    pub terms: QuoteTerms,
}

impl CreateQuote {
    pub fn new(customer_id: CustomerId, company_id: CompanyId, valid_until: DateTime<Utc>) -> Self {
        Self {
            meta: MessageMeta::new(),
            quote_id: AggregateId::new(),
            customer_id,
            company_id,
            valid_until,
            terms: QuoteTerms::default(),
        }
    }

    pub fn with_id(mut self, quote_id: AggregateId) -> Self {
        self.quote_id = quote_id;
        self
    }

    pub fn with_terms(mut self, terms: QuoteTerms) -> Self {
        self.terms = terms;
        self
    }
}

message!(CreateQuote);

impl Command for CreateQuote {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_quote_id(self.quote_id)?;
        ValidationError::ensure(!self.customer_id.is_nil(), "customer_id", "required")?;
        ValidationError::ensure(!self.company_id.is_nil(), "company_id", "required")?;
        ensure_terms(&self.terms)
    }
}

/// Command to add a line to a draft quote.
#[derive(Debug, Clone)]
pub struct AddQuoteItem {
    pub meta: MessageMeta,
    pub quote_id: AggregateId,
    pub item: QuoteItem,
}

impl AddQuoteItem {
    pub fn new(quote_id: AggregateId, item: QuoteItem) -> Self {
        Self {
            meta: MessageMeta::new(),
            quote_id,
            item,
        }
    }
}

message!(AddQuoteItem);

impl Command for AddQuoteItem {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_quote_id(self.quote_id)?;
        ensure_item(&self.item)
    }
}

#[derive(Debug, Clone)]
pub struct RemoveQuoteItem {
    pub meta: MessageMeta,
    pub quote_id: AggregateId,
    pub item_id: ItemId,
}

impl RemoveQuoteItem {
    pub fn new(quote_id: AggregateId, item_id: ItemId) -> Self {
        Self {
            meta: MessageMeta::new(),
            quote_id,
            item_id,
        }
    }
}

message!(RemoveQuoteItem);

impl Command for RemoveQuoteItem {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_quote_id(self.quote_id)?;
        ValidationError::ensure(!self.item_id.is_nil(), "item_id", "required")
    }
}

/// Command to replace an existing line, matched by `item.id`.
#[derive(Debug, Clone)]
pub struct UpdateQuoteItem {
    pub meta: MessageMeta,
    pub quote_id: AggregateId,
    pub item: QuoteItem,
}

impl UpdateQuoteItem {
    pub fn new(quote_id: AggregateId, item: QuoteItem) -> Self {
        Self {
            meta: MessageMeta::new(),
            quote_id,
            item,
        }
    }
}

message!(UpdateQuoteItem);

impl Command for UpdateQuoteItem {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_quote_id(self.quote_id)?;
        ensure_item(&self.item)
    }
}

#[derive(Debug, Clone)]
pub struct SubmitQuote {
    pub meta: MessageMeta,
    pub quote_id: AggregateId,
}

impl SubmitQuote {
    pub fn new(quote_id: AggregateId) -> Self {
        Self {
            meta: MessageMeta::new(),
            quote_id,
        }
    }
}

message!(SubmitQuote);

impl Command for SubmitQuote {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_quote_id(self.quote_id)
    }
}

#[derive(Debug, Clone)]
pub struct ApproveQuote {
    pub meta: MessageMeta,
    pub quote_id: AggregateId,
    pub approved_by: UserId,
}

impl ApproveQuote {
    pub fn new(quote_id: AggregateId, approved_by: UserId) -> Self {
        Self {
            meta: MessageMeta::new(),
            quote_id,
            approved_by,
        }
    }
}

message!(ApproveQuote);

impl Command for ApproveQuote {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_quote_id(self.quote_id)?;
        ValidationError::ensure(!self.approved_by.is_nil(), "approved_by", "required")
    }
}

#[derive(Debug, Clone)]
pub struct RejectQuote {
    pub meta: MessageMeta,
    pub quote_id: AggregateId,
    pub reason: String,
}

impl RejectQuote {
    pub fn new(quote_id: AggregateId, reason: impl Into<String>) -> Self {
        Self {
            meta: MessageMeta::new(),
            quote_id,
            reason: reason.into(),
        }
    }
}

message!(RejectQuote);

impl Command for RejectQuote {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_quote_id(self.quote_id)?;
        ValidationError::ensure(!self.reason.trim().is_empty(), "reason", "must not be empty")
    }
}

#[derive(Debug, Clone)]
pub struct ExpireQuote {
    pub meta: MessageMeta,
    pub quote_id: AggregateId,
}

impl ExpireQuote {
    pub fn new(quote_id: AggregateId) -> Self {
        Self {
            meta: MessageMeta::new(),
            quote_id,
        }
    }
}

message!(ExpireQuote);

impl Command for ExpireQuote {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_quote_id(self.quote_id)
    }
}

#[derive(Debug, Clone)]
pub struct UpdateQuoteTerms {
    pub meta: MessageMeta,
    pub quote_id: AggregateId,
    pub terms: QuoteTerms,
}

impl UpdateQuoteTerms {
    pub fn new(quote_id: AggregateId, terms: QuoteTerms) -> Self {
        Self {
            meta: MessageMeta::new(),
            quote_id,
            terms,
        }
    }
}

message!(UpdateQuoteTerms);

impl Command for UpdateQuoteTerms {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_quote_id(self.quote_id)?;
        ensure_terms(&self.terms)
    }
}

#[derive(Debug, Clone)]
pub struct ExtendQuoteValidity {
    pub meta: MessageMeta,
    pub quote_id: AggregateId,
    pub valid_until: DateTime<Utc>,
}

impl ExtendQuoteValidity {
    pub fn new(quote_id: AggregateId, valid_until: DateTime<Utc>) -> Self {
        Self {
            meta: MessageMeta::new(),
            quote_id,
            valid_until,
        }
    }
}

message!(ExtendQuoteValidity);

impl Command for ExtendQuoteValidity {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_quote_id(self.quote_id)
    }
}

/// Command to open a new draft copied from an existing quote.
#[derive(Debug, Clone)]
pub struct CloneQuote {
    pub meta: MessageMeta,
    pub source_id: AggregateId,
    pub new_quote_id: AggregateId,
    pub valid_until: DateTime<Utc>,
}

impl CloneQuote {
    pub fn new(source_id: AggregateId, valid_until: DateTime<Utc>) -> Self {
        Self {
            meta: MessageMeta::new(),
            source_id,
            new_quote_id: AggregateId::new(),
            valid_until,
        }
    }
}

message!(CloneQuote);

impl Command for CloneQuote {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::ensure(!self.source_id.is_nil(), "source_id", "required")?;
        ValidationError::ensure(!self.new_quote_id.is_nil(), "new_quote_id", "required")?;
        ValidationError::ensure(
            self.source_id != self.new_quote_id,
            "new_quote_id",
            "must differ from source_id",
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::quote::Money;

    #[test]
    fn type_tags_are_struct_names() {
        assert_eq!(CreateQuote::TYPE, "CreateQuote");
        assert_eq!(ExtendQuoteValidity::TYPE, "ExtendQuoteValidity");
    }

    #[test]
    fn create_requires_parties() {
        let valid_until = Utc::now() + Duration::days(30);
        assert!(
            CreateQuote::new(CustomerId::new(), CompanyId::new(), valid_until)
                .validate()
                .is_ok()
        );

        let err = CreateQuote::new(CustomerId::nil(), CompanyId::new(), valid_until)
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "customer_id");

        let err = CreateQuote::new(CustomerId::new(), CompanyId::nil(), valid_until)
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "company_id");
    }

    #[test]
    fn item_checks_surface_as_validation_errors() {
        let item = QuoteItem::new("P1", "", 0, Money::from_cents(100));
        let err = AddQuoteItem::new(AggregateId::new(), item)
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "item");
    }

    #[test]
    fn reject_needs_reason() {
        assert!(RejectQuote::new(AggregateId::new(), "").validate().is_err());
        assert!(RejectQuote::new(AggregateId::new(), "late").validate().is_ok());
    }

    #[test]
    fn nil_quote_id_is_rejected() {
        let err = SubmitQuote::new(AggregateId::nil()).validate().unwrap_err();
        assert_eq!(err.field, "quote_id");
    }

    #[test]
    fn clone_needs_distinct_ids() {
        let id = AggregateId::new();
        let mut cmd = CloneQuote::new(id, Utc::now() + Duration::days(1));
        assert!(cmd.validate().is_ok());
        cmd.new_quote_id = id;
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn terms_are_checked() {
        let cmd = UpdateQuoteTerms::new(AggregateId::new(), QuoteTerms::default().with_discount(101.0));
        assert_eq!(cmd.validate().unwrap_err().field, "terms");
    }
}
