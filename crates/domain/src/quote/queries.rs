//! Quote queries.

use common::AggregateId;
use dispatch::{Message, MessageMeta, Query};
use event_store::EventEnvelope;
use serde::Serialize;

use super::{CustomerId, Quote, QuoteFilter};

/// Current state of one quote.
#[derive(Debug, Clone, Serialize)]
pub struct GetQuote {
    #[serde(skip)]
    pub meta: MessageMeta,
    pub quote_id: AggregateId,
}

impl GetQuote {
    pub fn new(quote_id: AggregateId) -> Self {
        Self {
            meta: MessageMeta::new(),
            quote_id,
        }
    }
}

impl Message for GetQuote {
    const TYPE: &'static str = "GetQuote";

    fn meta(&self) -> &MessageMeta {
        &self.meta
    }
}

impl Query for GetQuote {
    type Output = Quote;
}

/// Every persisted event of one quote, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct GetQuoteHistory {
    #[serde(skip)]
    pub meta: MessageMeta,
    pub quote_id: AggregateId,
}

impl GetQuoteHistory {
    pub fn new(quote_id: AggregateId) -> Self {
        Self {
            meta: MessageMeta::new(),
            quote_id,
        }
    }
}

impl Message for GetQuoteHistory {
    const TYPE: &'static str = "GetQuoteHistory";

    fn meta(&self) -> &MessageMeta {
        &self.meta
    }
}

impl Query for GetQuoteHistory {
    type Output = Vec<EventEnvelope>;
}

/// Quotes matching a filter, optionally for one customer, in creation order.
#[derive(Debug, Clone, Serialize)]
pub struct FindQuotes {
    #[serde(skip)]
    pub meta: MessageMeta,
    pub customer_id: Option<CustomerId>,
    pub filter: QuoteFilter,
    pub limit: Option<usize>,
}

impl FindQuotes {
    pub fn new(filter: QuoteFilter) -> Self {
        Self {
            meta: MessageMeta::new(),
            customer_id: None,
            filter,
            limit: None,
        }
    }

    pub fn for_customer(mut self, customer_id: CustomerId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl Message for FindQuotes {
    const TYPE: &'static str = "FindQuotes";

    fn meta(&self) -> &MessageMeta {
        &self.meta
    }
}

impl Query for FindQuotes {
    type Output = Vec<Quote>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::Money;

    #[test]
    fn cache_key_ignores_message_identity() {
        let customer = CustomerId::new();
        let a = FindQuotes::new(QuoteFilter::Active).for_customer(customer);
        let b = FindQuotes::new(QuoteFilter::Active).for_customer(customer);
        assert_ne!(a.message_id(), b.message_id());
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn filter_is_part_of_the_key() {
        let a = FindQuotes::new(QuoteFilter::HighValue {
            threshold: Money::from_cents(100),
        });
        let b = FindQuotes::new(QuoteFilter::HighValue {
            threshold: Money::from_cents(200),
        });
        assert_ne!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
