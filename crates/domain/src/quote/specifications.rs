//! Business rules for filtering quotes.

use chrono::{DateTime, Utc};

use crate::specification::{Anything, BoxSpecification, Specification};

use super::{CustomerId, Money, Quote, QuoteStatus};

/// Pending or Approved.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveQuote;

impl Specification<Quote> for ActiveQuote {
    fn is_satisfied_by(&self, quote: &Quote) -> bool {
        matches!(quote.status(), QuoteStatus::Pending | QuoteStatus::Approved)
    }
}

/// Marked expired, or past its validity at `now` even if not yet marked.
#[derive(Debug, Clone, Copy)]
pub struct ExpiredQuote {
    pub now: DateTime<Utc>,
}

impl ExpiredQuote {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl Specification<Quote> for ExpiredQuote {
    fn is_satisfied_by(&self, quote: &Quote) -> bool {
        quote.status() == QuoteStatus::Expired || quote.is_past_validity(self.now)
    }
}

/// Total strictly above the threshold.
#[derive(Debug, Clone, Copy)]
pub struct HighValueQuote {
    pub threshold: Money,
}

impl HighValueQuote {
    pub fn above(threshold: Money) -> Self {
        Self { threshold }
    }
}

impl Specification<Quote> for HighValueQuote {
    fn is_satisfied_by(&self, quote: &Quote) -> bool {
        quote.pricing().total > self.threshold
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForCustomer(pub CustomerId);

impl Specification<Quote> for ForCustomer {
    fn is_satisfied_by(&self, quote: &Quote) -> bool {
        quote.customer_id() == Some(self.0)
    }
}

/// Canned selections offered by the `FindQuotes` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
pub enum QuoteFilter {
    #[default]
    All,
    Active,
    Expired,
    HighValue {
        threshold: Money,
    },
}

impl QuoteFilter {
    /// The rule this filter stands for, evaluated at `now`.
    pub fn specification(&self, now: DateTime<Utc>) -> BoxSpecification<Quote> {
        match *self {
            QuoteFilter::All => Box::new(Anything),
            // A quote that is past its validity is not active any more, even
            // before anyone marks it expired.
            QuoteFilter::Active => Box::new(ActiveQuote.and(ExpiredQuote::at(now).not())),
            QuoteFilter::Expired => Box::new(ExpiredQuote::at(now)),
            QuoteFilter::HighValue { threshold } => Box::new(HighValueQuote::above(threshold)),
        }
    }
}
