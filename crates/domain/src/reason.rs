//! Stable, user-facing failure codes.

use serde::{Deserialize, Serialize};

/// Machine-readable reason attached to every user-visible failure.
///
/// Raw provider strings are logged, never surfaced; clients branch on this
/// code and show [`ReasonCode::default_message`] or a localized variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    ContentPolicy,
    ProviderUnavailable,
    ProviderRejected,
    InvalidAddress,
    OutOfStock,
    FulfillmentRejected,
    RetriesExhausted,
    TrackingOverdue,
    CanceledByOperator,
}

impl ReasonCode {
    /// Returns the snake_case wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::ContentPolicy => "content_policy",
            ReasonCode::ProviderUnavailable => "provider_unavailable",
            ReasonCode::ProviderRejected => "provider_rejected",
            ReasonCode::InvalidAddress => "invalid_address",
            ReasonCode::OutOfStock => "out_of_stock",
            ReasonCode::FulfillmentRejected => "fulfillment_rejected",
            ReasonCode::RetriesExhausted => "retries_exhausted",
            ReasonCode::TrackingOverdue => "tracking_overdue",
            ReasonCode::CanceledByOperator => "canceled_by_operator",
        }
    }

    /// Human-readable message shown when nothing more specific is known.
    pub fn default_message(&self) -> &'static str {
        match self {
            ReasonCode::ContentPolicy => "The prompt was declined by the content policy",
            ReasonCode::ProviderUnavailable => "The design service is temporarily unavailable",
            ReasonCode::ProviderRejected => "The design service could not process this request",
            ReasonCode::InvalidAddress => "The shipping address could not be validated",
            ReasonCode::OutOfStock => "The selected product is out of stock",
            ReasonCode::FulfillmentRejected => "The print partner rejected the order",
            ReasonCode::RetriesExhausted => "The order could not be submitted after several attempts",
            ReasonCode::TrackingOverdue => "Tracking information is overdue",
            ReasonCode::CanceledByOperator => "The order was canceled by support",
        }
    }

    /// Returns true for failures a later retry cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ReasonCode::ContentPolicy
                | ReasonCode::ProviderRejected
                | ReasonCode::InvalidAddress
                | ReasonCode::OutOfStock
                | ReasonCode::FulfillmentRejected
        )
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reason code together with the message shown to the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub reason: ReasonCode,
    pub message: String,
}

impl FailureInfo {
    pub fn new(reason: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// Builds a failure carrying the code's default message.
    pub fn from_reason(reason: ReasonCode) -> Self {
        Self::new(reason, reason.default_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&ReasonCode::ProviderUnavailable).unwrap();
        assert_eq!(json, "\"provider_unavailable\"");

        let parsed: ReasonCode = serde_json::from_str("\"canceled_by_operator\"").unwrap();
        assert_eq!(parsed, ReasonCode::CanceledByOperator);
    }

    #[test]
    fn display_matches_wire_form() {
        for code in [
            ReasonCode::ContentPolicy,
            ReasonCode::InvalidAddress,
            ReasonCode::TrackingOverdue,
        ] {
            assert_eq!(
                serde_json::to_string(&code).unwrap(),
                format!("\"{code}\"")
            );
        }
    }

    #[test]
    fn transient_codes_are_not_permanent() {
        assert!(ReasonCode::ContentPolicy.is_permanent());
        assert!(!ReasonCode::ProviderUnavailable.is_permanent());
        assert!(!ReasonCode::RetriesExhausted.is_permanent());
    }
}
