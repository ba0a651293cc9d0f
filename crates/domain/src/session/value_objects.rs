//! Value objects for design sessions.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::order::{OrderItem, PriceBreakdown, ShippingAddress, VariantRef};

/// Identifier of a generated design asset, assigned by the generation
/// provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A finished design. Never modified once recorded; a regeneration
/// appends new assets next to the old ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignAsset {
    pub id: AssetId,
    pub session_id: AggregateId,
    pub preview_url: String,
    #[serde(default)]
    pub mockup_urls: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Free-form style keywords passed through to the generation provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StyleHints(Vec<String>);

impl StyleHints {
    /// Builds hints, dropping blank entries.
    pub fn new<I, T>(hints: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self(
            hints
                .into_iter()
                .map(Into::into)
                .map(|h: String| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect(),
        )
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The product a customer chose to print the design on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSelection {
    pub product_slug: String,
    pub variant: VariantRef,
}

/// A priced checkout attached to a session while payment is in flight.
///
/// The payment reference ties the processor's confirmation back to the
/// session and its approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutDraft {
    pub payment_ref: String,
    pub approval_nonce: String,
    pub lines: Vec<OrderItem>,
    pub breakdown: PriceBreakdown,
    pub shipping_address: ShippingAddress,
}
