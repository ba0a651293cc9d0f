//! Order payment and fulfillment state machines, and the customer-facing
//! status derived from them.

use serde::{Deserialize, Serialize};

/// Payment side of an order.
///
/// ```text
/// Pending ──► Processing ──► Paid ──► PartiallyRefunded ──► Refunded
///    │            │           └──────────────────────────────┘
///    └────────────┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Processing,
    Paid,
    PartiallyRefunded,
    Refunded,
    Failed,
}

impl PaymentStatus {
    /// Returns true if `next` is a legal successor of this status.
    ///
    /// A capture can be confirmed without a separate processing notice, so
    /// `Pending → Paid` is allowed.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Paid)
                | (Processing, Paid)
                | (Pending, Failed)
                | (Processing, Failed)
                | (Paid, PartiallyRefunded)
                | (Paid, Refunded)
                | (PartiallyRefunded, PartiallyRefunded)
                | (PartiallyRefunded, Refunded)
        )
    }

    /// Returns true once money has been captured (and not fully returned).
    pub fn is_captured(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::PartiallyRefunded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Paid => "paid",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fulfillment side of an order.
///
/// ```text
/// Unsubmitted ──► Submitted ──► InProduction ──► Shipped ──► Delivered
///      │              │              │              │
///      └──► Failed    └──────────────┴──────────────┴──► Canceled
/// ```
///
/// Provider reports may skip forward (submitted straight to shipped) but
/// never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    #[default]
    Unsubmitted,
    Submitted,
    InProduction,
    Shipped,
    Delivered,
    Failed,
    Canceled,
}

impl FulfillmentStatus {
    /// Position along the forward path; `None` for the side exits.
    pub fn rank(&self) -> Option<u8> {
        match self {
            FulfillmentStatus::Unsubmitted => Some(0),
            FulfillmentStatus::Submitted => Some(1),
            FulfillmentStatus::InProduction => Some(2),
            FulfillmentStatus::Shipped => Some(3),
            FulfillmentStatus::Delivered => Some(4),
            FulfillmentStatus::Failed | FulfillmentStatus::Canceled => None,
        }
    }

    /// Returns true if a provider report of `next` moves the order forward.
    /// Only statuses after submission are reported by providers.
    pub fn can_advance_to(&self, next: FulfillmentStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(current), Some(target)) => current >= 1 && target > current,
            _ => false,
        }
    }

    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FulfillmentStatus::Delivered | FulfillmentStatus::Failed | FulfillmentStatus::Canceled
        )
    }

    /// Returns true while the print partner holds the order but has not
    /// shipped it.
    pub fn is_with_provider(&self) -> bool {
        matches!(
            self,
            FulfillmentStatus::Submitted | FulfillmentStatus::InProduction
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Unsubmitted => "unsubmitted",
            FulfillmentStatus::Submitted => "submitted",
            FulfillmentStatus::InProduction => "in_production",
            FulfillmentStatus::Shipped => "shipped",
            FulfillmentStatus::Delivered => "delivered",
            FulfillmentStatus::Failed => "failed",
            FulfillmentStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The single status a customer sees for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    PaymentFailed,
    AwaitingPayment,
    Refunded,
    Canceled,
    Processing,
    InProduction,
    Shipped,
    Delivered,
    FulfillmentIssue,
}

impl CustomerStatus {
    pub fn message(&self) -> &'static str {
        match self {
            CustomerStatus::PaymentFailed => "payment failed",
            CustomerStatus::AwaitingPayment => "awaiting payment",
            CustomerStatus::Refunded => "refunded",
            CustomerStatus::Canceled => "canceled",
            CustomerStatus::Processing => "processing your order",
            CustomerStatus::InProduction => "in production",
            CustomerStatus::Shipped => "shipped",
            CustomerStatus::Delivered => "delivered",
            CustomerStatus::FulfillmentIssue => {
                "payment captured, fulfillment issue; retry in progress"
            }
        }
    }
}

impl std::fmt::Display for CustomerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// Derives the customer-facing status. Payment outcome wins over
/// fulfillment progress, except that a canceled order reads as canceled
/// while money is still captured.
pub fn customer_status(payment: PaymentStatus, fulfillment: FulfillmentStatus) -> CustomerStatus {
    match (payment, fulfillment) {
        (PaymentStatus::Failed, _) => CustomerStatus::PaymentFailed,
        (PaymentStatus::Pending | PaymentStatus::Processing, _) => CustomerStatus::AwaitingPayment,
        (PaymentStatus::Refunded, _) => CustomerStatus::Refunded,
        (_, FulfillmentStatus::Canceled) => CustomerStatus::Canceled,
        (_, FulfillmentStatus::Unsubmitted) => CustomerStatus::Processing,
        (_, FulfillmentStatus::Submitted | FulfillmentStatus::InProduction) => {
            CustomerStatus::InProduction
        }
        (_, FulfillmentStatus::Shipped) => CustomerStatus::Shipped,
        (_, FulfillmentStatus::Delivered) => CustomerStatus::Delivered,
        (_, FulfillmentStatus::Failed) => CustomerStatus::FulfillmentIssue,
    }
}
