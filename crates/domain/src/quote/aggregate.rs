//! Quote aggregate implementation.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, AggregateRoot, SnapshotCapable, raise};

use super::events::{
    ItemAddedData, ItemRemovedData, ItemUpdatedData, QuoteApprovedData, QuoteClonedData,
    QuoteCreatedData, QuoteExpiredData, QuoteRejectedData, QuoteSubmittedData, TermsUpdatedData,
    ValidityExtendedData,
};
use super::{
    CompanyId, CustomerId, ItemId, PricingSummary, QuoteError, QuoteEvent, QuoteItem, QuoteStatus,
    QuoteTerms, UserId,
};

/// Quote aggregate root.
///
/// A sales quote from a company to a customer: a set of priced lines, the
/// commercial terms, and a validity window. Every mutation goes through a
/// command method below, which checks its preconditions before raising an
/// event; a rejected command leaves the quote untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    id: Option<AggregateId>,
    quote_number: String,
    customer_id: Option<CustomerId>,
    company_id: Option<CompanyId>,
    status: QuoteStatus,
    valid_until: Option<DateTime<Utc>>,
    items: Vec<QuoteItem>,
    terms: QuoteTerms,
    pricing: PricingSummary,
    created_at: Option<DateTime<Utc>>,
    approved_by: Option<UserId>,
    rejection_reason: Option<String>,
    cloned_from: Option<AggregateId>,
    root: AggregateRoot<QuoteEvent>,
}

impl Aggregate for Quote {
    type Event = QuoteEvent;
    type Error = QuoteError;

    fn aggregate_type() -> &'static str {
        "Quote"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn root(&self) -> &AggregateRoot<QuoteEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut AggregateRoot<QuoteEvent> {
        &mut self.root
    }

    fn apply(&mut self, event: &QuoteEvent) {
        match event {
            QuoteEvent::QuoteCreated(data) => self.apply_created(data),
            QuoteEvent::QuoteCloned(data) => self.apply_cloned(data),
            QuoteEvent::ItemAdded(data) => {
                self.items.push(data.item.clone());
                self.recalculate();
            }
            QuoteEvent::ItemRemoved(data) => {
                self.items.retain(|item| item.id != data.item_id);
                self.recalculate();
            }
            QuoteEvent::ItemUpdated(data) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == data.item.id) {
                    *item = data.item.clone();
                }
                self.recalculate();
            }
            QuoteEvent::QuoteSubmitted(_) => {
                self.status = QuoteStatus::Pending;
            }
            QuoteEvent::QuoteApproved(data) => {
                self.status = QuoteStatus::Approved;
                self.approved_by = Some(data.approved_by);
            }
            QuoteEvent::QuoteRejected(data) => {
                self.status = QuoteStatus::Rejected;
                self.rejection_reason = Some(data.reason.clone());
            }
            QuoteEvent::QuoteExpired(_) => {
                self.status = QuoteStatus::Expired;
            }
            QuoteEvent::TermsUpdated(data) => {
                self.terms = data.terms.clone();
                self.recalculate();
            }
            QuoteEvent::ValidityExtended(data) => {
                self.valid_until = Some(data.valid_until);
            }
        }
    }
}

impl SnapshotCapable for Quote {
    fn snapshot_interval() -> u64 {
        50
    }
}

// Query methods
impl Quote {
    pub fn quote_number(&self) -> &str {
        &self.quote_number
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.company_id
    }

    pub fn status(&self) -> QuoteStatus {
        self.status
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.valid_until
    }

    pub fn items(&self) -> &[QuoteItem] {
        &self.items
    }

    pub fn get_item(&self, item_id: ItemId) -> Option<&QuoteItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn terms(&self) -> &QuoteTerms {
        &self.terms
    }

    pub fn pricing(&self) -> &PricingSummary {
        &self.pricing
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    /// The quote this one was cloned from, if any.
    pub fn cloned_from(&self) -> Option<AggregateId> {
        self.cloned_from
    }

    /// True once `now` is past the validity window.
    pub fn is_past_validity(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.is_some_and(|until| now > until)
    }

    /// Builds the human-facing reference for a quote.
    pub fn number_for(quote_id: AggregateId, created_at: DateTime<Utc>) -> String {
        format!("Q-{}-{}", created_at.format("%Y%m%d"), quote_id.short())
    }
}

// Command methods
impl Quote {
    /// Opens a new draft quote.
    ///
    /// The returned quote holds exactly one pending event at version 1.
    pub fn create(
        quote_id: AggregateId,
        customer_id: CustomerId,
        company_id: CompanyId,
        valid_until: DateTime<Utc>,
        terms: QuoteTerms,
        now: DateTime<Utc>,
    ) -> Result<Self, QuoteError> {
        let mut quote = Self::default();
        quote.open(quote_id, customer_id, company_id, valid_until, terms, now)?;
        Ok(quote)
    }

    /// Opens this (empty) instance as a new draft quote.
    pub fn open(
        &mut self,
        quote_id: AggregateId,
        customer_id: CustomerId,
        company_id: CompanyId,
        valid_until: DateTime<Utc>,
        terms: QuoteTerms,
        now: DateTime<Utc>,
    ) -> Result<(), QuoteError> {
        if self.id.is_some() {
            return Err(QuoteError::AlreadyCreated);
        }
        if customer_id.is_nil() {
            return Err(QuoteError::MissingCustomer);
        }
        if company_id.is_nil() {
            return Err(QuoteError::MissingCompany);
        }
        if valid_until <= now {
            return Err(QuoteError::InvalidValidity {
                requested: valid_until,
                reason: "must be in the future",
            });
        }
        terms.validate()?;

        let event = QuoteEvent::QuoteCreated(QuoteCreatedData {
            quote_id,
            quote_number: Self::number_for(quote_id, now),
            customer_id,
            company_id,
            valid_until,
            terms,
            created_at: now,
        });
        raise(self, event, now);
        Ok(())
    }

    /// Adds a line. A line with the same product and specification must not
    /// already exist.
    pub fn add_item(&mut self, item: QuoteItem, now: DateTime<Utc>) -> Result<(), QuoteError> {
        self.ensure_editable("add item")?;
        item.validate()?;

        if self.items.iter().any(|existing| existing.same_line_as(&item)) {
            return Err(QuoteError::DuplicateItem {
                product_id: item.product_id.to_string(),
                specification: item.specification,
            });
        }
        if self.get_item(item.id).is_some() {
            return Err(QuoteError::InvalidItem {
                reason: format!("item id {} already in use", item.id),
            });
        }
        let mut lines = self.items.clone();
        lines.push(item.clone());
        PricingSummary::try_calculate(&lines, &self.terms)?;

        raise(self, QuoteEvent::ItemAdded(ItemAddedData { item }), now);
        Ok(())
    }

    pub fn remove_item(&mut self, item_id: ItemId, now: DateTime<Utc>) -> Result<(), QuoteError> {
        self.ensure_editable("remove item")?;
        if self.get_item(item_id).is_none() {
            return Err(QuoteError::ItemNotFound { item_id });
        }

        raise(self, QuoteEvent::ItemRemoved(ItemRemovedData { item_id }), now);
        Ok(())
    }

    /// Replaces the line whose id matches `item.id`.
    ///
    /// The replacement must be valid on its own and must not collide with
    /// another line's product and specification.
    pub fn update_item(&mut self, item: QuoteItem, now: DateTime<Utc>) -> Result<(), QuoteError> {
        self.ensure_editable("update item")?;
        if self.get_item(item.id).is_none() {
            return Err(QuoteError::ItemNotFound { item_id: item.id });
        }
        item.validate()?;

        if self
            .items
            .iter()
            .any(|existing| existing.id != item.id && existing.same_line_as(&item))
        {
            return Err(QuoteError::DuplicateItem {
                product_id: item.product_id.to_string(),
                specification: item.specification,
            });
        }
        let lines: Vec<QuoteItem> = self
            .items
            .iter()
            .map(|existing| if existing.id == item.id { &item } else { existing })
            .cloned()
            .collect();
        PricingSummary::try_calculate(&lines, &self.terms)?;

        raise(self, QuoteEvent::ItemUpdated(ItemUpdatedData { item }), now);
        Ok(())
    }

    /// Sends the quote for a decision. Every line must carry a price.
    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<(), QuoteError> {
        self.ensure_created()?;
        if !self.status.can_submit() {
            return Err(self.invalid_transition("submit"));
        }
        if self.items.is_empty() {
            return Err(QuoteError::NoItems);
        }
        if let Some(unpriced) = self.items.iter().find(|item| !item.unit_price.is_positive()) {
            return Err(QuoteError::UnpricedItem {
                item_id: unpriced.id,
            });
        }

        let event = QuoteEvent::QuoteSubmitted(QuoteSubmittedData {
            submitted_at: now,
            total: self.pricing.total,
            item_count: self.items.len(),
        });
        raise(self, event, now);
        Ok(())
    }

    /// Accepts a pending quote while it is still valid.
    pub fn approve(&mut self, approved_by: UserId, now: DateTime<Utc>) -> Result<(), QuoteError> {
        self.ensure_created()?;
        if !self.status.can_decide() {
            return Err(self.invalid_transition("approve"));
        }
        if let Some(valid_until) = self.valid_until.filter(|until| now > *until) {
            return Err(QuoteError::ValidityExpired { valid_until });
        }

        let event = QuoteEvent::QuoteApproved(QuoteApprovedData {
            approved_by,
            approved_at: now,
        });
        raise(self, event, now);
        Ok(())
    }

    pub fn reject(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), QuoteError> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(QuoteError::EmptyReason);
        }
        self.ensure_created()?;
        if !self.status.can_decide() {
            return Err(self.invalid_transition("reject"));
        }

        let event = QuoteEvent::QuoteRejected(QuoteRejectedData {
            reason,
            rejected_at: now,
        });
        raise(self, event, now);
        Ok(())
    }

    /// Marks the quote expired. Expiring an expired quote changes nothing.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), QuoteError> {
        self.ensure_created()?;
        if self.status == QuoteStatus::Expired {
            return Ok(());
        }
        if !self.status.can_expire() {
            return Err(self.invalid_transition("expire"));
        }

        raise(
            self,
            QuoteEvent::QuoteExpired(QuoteExpiredData { expired_at: now }),
            now,
        );
        Ok(())
    }

    pub fn update_terms(&mut self, terms: QuoteTerms, now: DateTime<Utc>) -> Result<(), QuoteError> {
        self.ensure_editable("update terms")?;
        terms.validate()?;

        raise(self, QuoteEvent::TermsUpdated(TermsUpdatedData { terms }), now);
        Ok(())
    }

    /// Moves the end of the validity window later.
    pub fn extend_validity(
        &mut self,
        valid_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), QuoteError> {
        self.ensure_created()?;
        if !self.status.can_extend_validity() {
            return Err(self.invalid_transition("extend validity"));
        }
        if valid_until <= now {
            return Err(QuoteError::InvalidValidity {
                requested: valid_until,
                reason: "must be in the future",
            });
        }
        let previous = self.valid_until.unwrap_or(now);
        if valid_until <= previous {
            return Err(QuoteError::InvalidValidity {
                requested: valid_until,
                reason: "must be later than the current validity",
            });
        }

        let event = QuoteEvent::ValidityExtended(ValidityExtendedData {
            previous,
            valid_until,
        });
        raise(self, event, now);
        Ok(())
    }

    /// Opens a new draft that copies this quote's items and terms.
    ///
    /// The source is not modified. The copy gets its own identity and
    /// number, and records a single QuoteCloned event at version 1.
    pub fn clone_as(
        &self,
        new_id: AggregateId,
        valid_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Quote, QuoteError> {
        let source_id = self.ensure_created()?;
        if new_id == source_id {
            return Err(QuoteError::AlreadyCreated);
        }
        let (Some(customer_id), Some(company_id)) = (self.customer_id, self.company_id) else {
            return Err(QuoteError::NotCreated);
        };
        if valid_until <= now {
            return Err(QuoteError::InvalidValidity {
                requested: valid_until,
                reason: "must be in the future",
            });
        }

        let mut copy = Quote::default();
        let event = QuoteEvent::QuoteCloned(QuoteClonedData {
            quote_id: new_id,
            quote_number: Self::number_for(new_id, now),
            source_id,
            customer_id,
            company_id,
            valid_until,
            terms: self.terms.clone(),
            items: self.items.clone(),
            created_at: now,
        });
        raise(&mut copy, event, now);
        Ok(copy)
    }
}

// Guards and apply helpers
impl Quote {
    fn ensure_created(&self) -> Result<AggregateId, QuoteError> {
        self.id.ok_or(QuoteError::NotCreated)
    }

    fn ensure_editable(&self, action: &'static str) -> Result<(), QuoteError> {
        self.ensure_created()?;
        if !self.status.is_editable() {
            return Err(self.invalid_transition(action));
        }
        Ok(())
    }

    fn invalid_transition(&self, action: &'static str) -> QuoteError {
        QuoteError::InvalidStateTransition {
            current: self.status,
            action,
        }
    }

    fn recalculate(&mut self) {
        self.pricing = PricingSummary::calculate(&self.items, &self.terms);
    }

    fn apply_created(&mut self, data: &QuoteCreatedData) {
        self.id = Some(data.quote_id);
        self.quote_number = data.quote_number.clone();
        self.customer_id = Some(data.customer_id);
        self.company_id = Some(data.company_id);
        self.status = QuoteStatus::Draft;
        self.valid_until = Some(data.valid_until);
        self.terms = data.terms.clone();
        self.created_at = Some(data.created_at);
        self.recalculate();
    }

    fn apply_cloned(&mut self, data: &QuoteClonedData) {
        self.id = Some(data.quote_id);
        self.quote_number = data.quote_number.clone();
        self.customer_id = Some(data.customer_id);
        self.company_id = Some(data.company_id);
        self.status = QuoteStatus::Draft;
        self.valid_until = Some(data.valid_until);
        self.terms = data.terms.clone();
        self.items = data.items.clone();
        self.created_at = Some(data.created_at);
        self.cloned_from = Some(data.source_id);
        self.recalculate();
    }
}
