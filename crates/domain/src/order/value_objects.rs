//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

use crate::session::AssetId;

use super::OrderError;

/// Catalog variant identifier (product + size + color), e.g. `tee-black-m`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantRef(String);

impl VariantRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VariantRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VariantRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VariantRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Amount of money in integer minor units (cents for USD).
///
/// The currency lives on the [`PriceBreakdown`]; all amounts inside one
/// order share it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub fn from_minor(units: i64) -> Self {
        Self(units)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Multiplies by a quantity.
    pub fn times(&self, quantity: u32) -> Money {
        Money(self.0 * i64::from(quantity))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.0.abs() / 100, self.0.abs() % 100)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// One priced line of an order.
///
/// Lines are immutable once the order exists; quantity corrections are
/// recorded as separate adjustment events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub variant: VariantRef,
    pub quantity: u32,
    pub unit_price: Money,

    /// The design asset printed on this line, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<AssetId>,
}

impl OrderItem {
    pub fn new(variant: impl Into<VariantRef>, quantity: u32, unit_price: Money) -> Self {
        Self {
            variant: variant.into(),
            quantity,
            unit_price,
            asset_id: None,
        }
    }

    pub fn with_asset(mut self, asset_id: AssetId) -> Self {
        self.asset_id = Some(asset_id);
        self
    }

    pub fn line_total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }

    fn validate(&self) -> Result<(), OrderError> {
        if self.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                quantity: self.quantity,
            });
        }
        if !self.unit_price.is_positive() {
            return Err(OrderError::InvalidPrice {
                price: self.unit_price.minor_units(),
            });
        }
        Ok(())
    }
}

/// Price components of an order, all in the same currency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: Money,
    pub shipping: Money,
    pub tax: Money,
    pub discount: Money,
    pub total: Money,
    pub currency: String,
}

impl PriceBreakdown {
    /// Prices a set of lines. The total is
    /// `subtotal + shipping + tax - discount` and must be positive.
    pub fn compute(
        lines: &[OrderItem],
        shipping: Money,
        tax: Money,
        discount: Money,
        currency: impl Into<String>,
    ) -> Result<Self, OrderError> {
        if lines.is_empty() {
            return Err(OrderError::NoItems);
        }
        for line in lines {
            line.validate()?;
        }
        if shipping.minor_units() < 0 || tax.minor_units() < 0 || discount.minor_units() < 0 {
            return Err(OrderError::InvalidPrice {
                price: shipping
                    .minor_units()
                    .min(tax.minor_units())
                    .min(discount.minor_units()),
            });
        }

        let subtotal: Money = lines.iter().map(OrderItem::line_total).sum();
        let total = subtotal + shipping + tax - discount;
        if !total.is_positive() {
            return Err(OrderError::NonPositiveTotal {
                total: total.minor_units(),
            });
        }

        Ok(Self {
            subtotal,
            shipping,
            tax,
            discount,
            total,
            currency: currency.into(),
        })
    }

    /// Returns the breakdown with the subtotal and total shifted by `delta`.
    pub fn adjusted(&self, delta: Money) -> Result<Self, OrderError> {
        let total = self.total + delta;
        if !total.is_positive() {
            return Err(OrderError::NonPositiveTotal {
                total: total.minor_units(),
            });
        }
        Ok(Self {
            subtotal: self.subtotal + delta,
            total,
            ..self.clone()
        })
    }
}

/// Where the print partner ships the order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub name: String,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
}

impl ShippingAddress {
    /// Checks the fields every print partner requires. Deeper validation
    /// (deliverability) is the partner's job and surfaces as a rejection.
    pub fn validate(&self) -> Result<(), OrderError> {
        let required = [
            ("name", &self.name),
            ("line1", &self.line1),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(OrderError::InvalidAddress {
                    field: field.to_string(),
                });
            }
        }
        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(OrderError::InvalidAddress {
                field: "country".to_string(),
            });
        }
        Ok(())
    }
}
