//! Value objects for the quote domain.

use std::iter::Sum;

use common::uuid_id;
use serde::{Deserialize, Serialize};

use super::QuoteError;

uuid_id!(
    /// The buying customer.
    CustomerId
);

uuid_id!(
    /// The selling company issuing the quote.
    CompanyId
);

uuid_id!(
    /// A user acting on a quote, e.g. the approver.
    UserId
);

uuid_id!(
    /// Identifies one line of a quote.
    ItemId
);

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Money amount represented in cents to avoid floating point issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub fn from_dollars(dollars: i64) -> Self {
        Self {
            cents: dollars.saturating_mul(100),
        }
    }

    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the dollar portion (whole number).
    pub fn dollars(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the cents portion (remainder after dollars).
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.cents.checked_add(rhs.cents).map(Money::from_cents)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.cents.checked_sub(rhs.cents).map(Money::from_cents)
    }

    /// Multiplies by a quantity, or `None` if the result does not fit.
    pub fn checked_mul(self, quantity: u32) -> Option<Money> {
        self.cents
            .checked_mul(i64::from(quantity))
            .map(Money::from_cents)
    }

    /// Multiplies by a quantity, saturating at the bounds.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money {
            cents: self.cents.saturating_mul(i64::from(quantity)),
        }
    }

    /// Returns `pct` percent of this amount, rounded half away from zero to
    /// the nearest cent.
    ///
    /// `pct` is taken to a millionth of a percent and the product is worked
    /// out in `i128`, so every `i64` amount is exact.
    pub fn percentage(&self, pct: f64) -> Money {
        const SCALE: i128 = 1_000_000;
        const DENOMINATOR: u128 = 100 * SCALE as u128;

        // `as` saturates and maps NaN to zero.
        let scaled = (pct * SCALE as f64).round() as i128;
        let product = i128::from(self.cents).saturating_mul(scaled);
        let magnitude = (product.unsigned_abs() + DENOMINATOR / 2) / DENOMINATOR;
        let magnitude = i64::try_from(magnitude).unwrap_or(i64::MAX);
        Money {
            cents: if product < 0 { -magnitude } else { magnitude },
        }
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-${}.{:02}", self.dollars().abs(), self.cents_part())
        } else {
            write!(f, "${}.{:02}", self.dollars(), self.cents_part())
        }
    }
}

// The operators saturate. Code that must notice overflow uses the
// `checked_*` methods instead.
impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents.saturating_add(rhs.cents),
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents.saturating_sub(rhs.cents),
        }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// One priced line of a quote.
///
/// `tax` and `discount` are absolute amounts for the whole line, not rates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteItem {
    pub id: ItemId,
    pub product_id: ProductId,

    /// Configuration variant of the product; the same product may appear
    /// once per specification.
    pub specification: String,

    pub description: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub tax: Money,
    pub discount: Money,
}

impl QuoteItem {
    /// Creates an untaxed, undiscounted line with a fresh id.
    pub fn new(
        product_id: impl Into<ProductId>,
        specification: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            id: ItemId::new(),
            product_id: product_id.into(),
            specification: specification.into(),
            description: String::new(),
            quantity,
            unit_price,
            tax: Money::zero(),
            discount: Money::zero(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tax(mut self, tax: Money) -> Self {
        self.tax = tax;
        self
    }

    pub fn with_discount(mut self, discount: Money) -> Self {
        self.discount = discount;
        self
    }

    /// Line total before tax and discount.
    ///
    /// Saturates; [`QuoteItem::validate`] rejects lines where that matters.
    pub fn total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }

    pub fn checked_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }

    /// True when both lines describe the same product configuration.
    pub fn same_line_as(&self, other: &QuoteItem) -> bool {
        self.product_id == other.product_id && self.specification == other.specification
    }

    /// Checks the line on its own, independent of the quote's state.
    ///
    /// A zero unit price is allowed here; submission is what requires every
    /// line to be priced.
    pub fn validate(&self) -> Result<(), QuoteError> {
        if self.product_id.as_str().trim().is_empty() {
            return Err(QuoteError::InvalidItem {
                reason: "product id is required".to_string(),
            });
        }
        if self.quantity == 0 {
            return Err(QuoteError::InvalidQuantity {
                quantity: self.quantity,
            });
        }
        if self.unit_price.is_negative() {
            return Err(QuoteError::InvalidPrice {
                price: self.unit_price,
            });
        }
        if self.tax.is_negative() {
            return Err(QuoteError::InvalidItem {
                reason: format!("tax {} is negative", self.tax),
            });
        }
        let Some(total) = self.checked_total() else {
            return Err(QuoteError::InvalidItem {
                reason: format!(
                    "{} x {} exceeds the largest representable amount",
                    self.quantity, self.unit_price
                ),
            });
        };
        if total.checked_add(self.tax).is_none() {
            return Err(QuoteError::InvalidItem {
                reason: format!("tax {} on {} overflows", self.tax, total),
            });
        }
        if self.discount.is_negative() || self.discount > total {
            return Err(QuoteError::InvalidItem {
                reason: format!("discount {} outside 0..={}", self.discount, total),
            });
        }
        Ok(())
    }
}

/// Commercial terms attached to a quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteTerms {
    pub payment_terms_days: u32,
    pub delivery_terms: String,

    /// Quote-level discount applied to the subtotal, 0 to 100.
    pub discount_percentage: f64,

    pub notes: Option<String>,
}

impl QuoteTerms {
    pub const MAX_PAYMENT_TERMS_DAYS: u32 = 365;

    pub fn with_discount(mut self, discount_percentage: f64) -> Self {
        self.discount_percentage = discount_percentage;
        self
    }

    pub fn validate(&self) -> Result<(), QuoteError> {
        if !self.discount_percentage.is_finite()
            || !(0.0..=100.0).contains(&self.discount_percentage)
        {
            return Err(QuoteError::InvalidTerms {
                reason: format!(
                    "discount percentage {} outside 0..=100",
                    self.discount_percentage
                ),
            });
        }
        if self.payment_terms_days > Self::MAX_PAYMENT_TERMS_DAYS {
            return Err(QuoteError::InvalidTerms {
                reason: format!(
                    "payment terms of {} days exceed {}",
                    self.payment_terms_days,
                    Self::MAX_PAYMENT_TERMS_DAYS
                ),
            });
        }
        Ok(())
    }
}

impl Default for QuoteTerms {
    fn default() -> Self {
        Self {
            payment_terms_days: 30,
            delivery_terms: String::new(),
            discount_percentage: 0.0,
            notes: None,
        }
    }
}

/// Derived totals of a quote.
///
/// Always recomputed from the items and terms, never edited directly, so
/// `total == subtotal + tax_total - discount_total` holds to the cent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSummary {
    pub subtotal: Money,
    pub tax_total: Money,
    pub item_discount: Money,
    pub quote_discount: Money,
    pub discount_total: Money,
    pub total: Money,
}

impl PricingSummary {
    /// Computes the totals, failing if any sum leaves the `i64` cent range.
    ///
    /// Commands call this before raising an event so that state rebuilt from
    /// the event log always prices exactly.
    pub fn try_calculate(items: &[QuoteItem], terms: &QuoteTerms) -> Result<Self, QuoteError> {
        let overflow = || QuoteError::InvalidItem {
            reason: "quote total exceeds the largest representable amount".to_string(),
        };
        let subtotal =
            checked_sum(items.iter().map(QuoteItem::checked_total)).ok_or_else(overflow)?;
        let tax_total =
            checked_sum(items.iter().map(|item| Some(item.tax))).ok_or_else(overflow)?;
        let item_discount =
            checked_sum(items.iter().map(|item| Some(item.discount))).ok_or_else(overflow)?;
        let quote_discount = subtotal.percentage(terms.discount_percentage);
        let discount_total = item_discount
            .checked_add(quote_discount)
            .ok_or_else(overflow)?;
        let total = subtotal
            .checked_add(tax_total)
            .and_then(|gross| gross.checked_sub(discount_total))
            .ok_or_else(overflow)?;

        Ok(Self {
            subtotal,
            tax_total,
            item_discount,
            quote_discount,
            discount_total,
            total,
        })
    }

    /// Infallible variant for event application; saturates where
    /// [`PricingSummary::try_calculate`] would fail.
    pub fn calculate(items: &[QuoteItem], terms: &QuoteTerms) -> Self {
        if let Ok(pricing) = Self::try_calculate(items, terms) {
            return pricing;
        }
        let subtotal: Money = items.iter().map(QuoteItem::total).sum();
        let tax_total: Money = items.iter().map(|item| item.tax).sum();
        let item_discount: Money = items.iter().map(|item| item.discount).sum();
        let quote_discount = subtotal.percentage(terms.discount_percentage);
        let discount_total = item_discount + quote_discount;

        Self {
            subtotal,
            tax_total,
            item_discount,
            quote_discount,
            discount_total,
            total: subtotal + tax_total - discount_total,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.total == self.subtotal + self.tax_total - self.discount_total
    }
}

fn checked_sum(amounts: impl IntoIterator<Item = Option<Money>>) -> Option<Money> {
    amounts
        .into_iter()
        .try_fold(Money::zero(), |acc, amount| acc.checked_add(amount?))
}
