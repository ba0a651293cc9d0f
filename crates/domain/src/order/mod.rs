//! Order aggregate and related types.

mod aggregate;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::{NewOrder, Order};
pub use events::{
    DeadLetterReleasedData, FulfillmentRejectedData, FulfillmentSubmittedData,
    FulfillmentUpdatedData, ItemQuantityAdjustedData, OrderCanceledData, OrderCreatedData,
    OrderDeadLetteredData, OrderEvent, PaymentCapturedData, RefundIssuedData,
    SubmissionAttemptFailedData, TrackingOverdueData,
};
pub use service::OrderService;
pub use state::{CustomerStatus, FulfillmentStatus, PaymentStatus, customer_status};
pub use value_objects::{Money, OrderItem, PriceBreakdown, ShippingAddress, VariantRef};

use thiserror::Error;

use crate::reason::ReasonCode;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order is already created.
    #[error("Order already created")]
    AlreadyCreated,

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Invalid price.
    #[error("Invalid price: {price}")]
    InvalidPrice { price: i64 },

    /// Priced total is zero or negative.
    #[error("Order total must be positive, got {total}")]
    NonPositiveTotal { total: i64 },

    /// A required address field is missing or malformed.
    #[error("Invalid shipping address: {field}")]
    InvalidAddress { field: String },

    /// Payment has not been captured.
    #[error("Order is not paid (payment status: {payment_status})")]
    NotPaid { payment_status: PaymentStatus },

    /// The order already left the unsubmitted state.
    #[error("Order already submitted (fulfillment status: {status})")]
    AlreadySubmitted { status: FulfillmentStatus },

    /// The order is waiting for an operator.
    #[error("Order is dead-lettered")]
    DeadLettered,

    /// Release was requested for an order that is not dead-lettered.
    #[error("Order is not dead-lettered")]
    NotDeadLettered,

    /// A provider status arrived before any submission was recorded.
    #[error("Order has not been submitted")]
    NotSubmitted,

    /// The order was canceled.
    #[error("Order is canceled")]
    Canceled,

    /// Fulfillment cannot move between these states.
    #[error("Invalid fulfillment transition: {from} -> {to}")]
    InvalidFulfillmentTransition {
        from: FulfillmentStatus,
        to: FulfillmentStatus,
    },

    /// Payment cannot move between these states.
    #[error("Invalid payment transition: {from} -> {to}")]
    InvalidPaymentTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    /// A quantity increase would cost more than the payment still covers.
    #[error("Quantity increase of {delta} is not covered by the payment (available: {available})")]
    UncoveredIncrease { delta: i64, available: i64 },

    /// Refund amount is not positive or exceeds what remains.
    #[error("Invalid refund of {amount} (refundable: {refundable})")]
    InvalidRefund { amount: i64, refundable: i64 },

    /// No line at this index.
    #[error("Item not found at line {line}")]
    ItemNotFound { line: usize },
}

impl OrderError {
    /// Reason code for errors a customer can see.
    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            OrderError::InvalidAddress { .. } => Some(ReasonCode::InvalidAddress),
            OrderError::DeadLettered => Some(ReasonCode::RetriesExhausted),
            _ => None,
        }
    }
}
