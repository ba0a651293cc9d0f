//! Order domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, OwnerId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::reason::ReasonCode;

use super::{FulfillmentStatus, Money, OrderItem, PriceBreakdown, ShippingAddress};

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was created from a confirmed payment.
    OrderCreated(OrderCreatedData),

    /// Payment was captured by the processor.
    PaymentCaptured(PaymentCapturedData),

    /// The print partner accepted the order.
    FulfillmentSubmitted(FulfillmentSubmittedData),

    /// A submission attempt did not produce a confirmed reference.
    SubmissionAttemptFailed(SubmissionAttemptFailedData),

    /// The print partner permanently rejected the order.
    FulfillmentRejected(FulfillmentRejectedData),

    /// The print partner reported progress or tracking.
    FulfillmentUpdated(FulfillmentUpdatedData),

    /// Automatic submission gave up; the order waits for an operator.
    OrderDeadLettered(OrderDeadLetteredData),

    /// An operator returned a dead-lettered order to automatic handling.
    DeadLetterReleased(DeadLetterReleasedData),

    /// Tracking did not arrive within the service level.
    TrackingOverdue(TrackingOverdueData),

    /// Money was returned to the customer.
    RefundIssued(RefundIssuedData),

    /// The order was canceled.
    OrderCanceled(OrderCanceledData),

    /// A line's quantity was corrected after creation.
    ItemQuantityAdjusted(ItemQuantityAdjustedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "OrderCreated",
            OrderEvent::PaymentCaptured(_) => "PaymentCaptured",
            OrderEvent::FulfillmentSubmitted(_) => "FulfillmentSubmitted",
            OrderEvent::SubmissionAttemptFailed(_) => "SubmissionAttemptFailed",
            OrderEvent::FulfillmentRejected(_) => "FulfillmentRejected",
            OrderEvent::FulfillmentUpdated(_) => "FulfillmentUpdated",
            OrderEvent::OrderDeadLettered(_) => "OrderDeadLettered",
            OrderEvent::DeadLetterReleased(_) => "DeadLetterReleased",
            OrderEvent::TrackingOverdue(_) => "TrackingOverdue",
            OrderEvent::RefundIssued(_) => "RefundIssued",
            OrderEvent::OrderCanceled(_) => "OrderCanceled",
            OrderEvent::ItemQuantityAdjusted(_) => "ItemQuantityAdjusted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: AggregateId,
    pub owner: Option<OwnerId>,
    pub session_id: Option<AggregateId>,
    pub payment_ref: String,
    pub items: Vec<OrderItem>,
    pub breakdown: PriceBreakdown,
    pub shipping_address: ShippingAddress,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCapturedData {
    pub payment_ref: String,
    pub amount: Money,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentSubmittedData {
    pub provider_ref: String,

    /// True when the reference was recovered by reading back a submission
    /// whose response was lost.
    pub via_read_back: bool,

    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionAttemptFailedData {
    /// Attempt number, starting at 1.
    pub attempt: u32,

    /// True if the request may have reached the provider (timeout after
    /// send). Such attempts are resolved by read-back, never assumed.
    pub ambiguous: bool,

    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentRejectedData {
    pub reason: ReasonCode,
    pub message: String,

    /// Amount queued for refund evaluation.
    pub refund_queued: Money,

    pub rejected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentUpdatedData {
    pub from: FulfillmentStatus,
    pub to: FulfillmentStatus,
    pub tracking_code: Option<String>,
    pub tracking_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDeadLetteredData {
    pub reason: ReasonCode,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterReleasedData {
    pub released_by: Option<String>,
    pub released_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingOverdueData {
    pub flagged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundIssuedData {
    pub refund_ref: String,
    pub amount: Money,
    pub refunded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCanceledData {
    pub reason: ReasonCode,
    pub note: Option<String>,
    pub canceled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemQuantityAdjustedData {
    /// Index into the order's original lines.
    pub line: usize,
    pub old_quantity: u32,
    pub new_quantity: u32,
    pub reason: String,

    /// Signed change to subtotal and total.
    pub delta: Money,

    pub adjusted_at: DateTime<Utc>,
}

// Convenience constructors for events
impl OrderEvent {
    pub fn payment_captured(payment_ref: impl Into<String>, amount: Money) -> Self {
        OrderEvent::PaymentCaptured(PaymentCapturedData {
            payment_ref: payment_ref.into(),
            amount,
            captured_at: Utc::now(),
        })
    }

    pub fn fulfillment_submitted(provider_ref: impl Into<String>, via_read_back: bool) -> Self {
        OrderEvent::FulfillmentSubmitted(FulfillmentSubmittedData {
            provider_ref: provider_ref.into(),
            via_read_back,
            submitted_at: Utc::now(),
        })
    }

    pub fn submission_attempt_failed(
        attempt: u32,
        ambiguous: bool,
        error: impl Into<String>,
    ) -> Self {
        OrderEvent::SubmissionAttemptFailed(SubmissionAttemptFailedData {
            attempt,
            ambiguous,
            error: error.into(),
            failed_at: Utc::now(),
        })
    }

    pub fn fulfillment_rejected(
        reason: ReasonCode,
        message: impl Into<String>,
        refund_queued: Money,
    ) -> Self {
        OrderEvent::FulfillmentRejected(FulfillmentRejectedData {
            reason,
            message: message.into(),
            refund_queued,
            rejected_at: Utc::now(),
        })
    }

    pub fn fulfillment_updated(
        from: FulfillmentStatus,
        to: FulfillmentStatus,
        tracking_code: Option<String>,
        tracking_url: Option<String>,
    ) -> Self {
        OrderEvent::FulfillmentUpdated(FulfillmentUpdatedData {
            from,
            to,
            tracking_code,
            tracking_url,
            updated_at: Utc::now(),
        })
    }

    pub fn dead_lettered(reason: ReasonCode, attempts: u32) -> Self {
        OrderEvent::OrderDeadLettered(OrderDeadLetteredData {
            reason,
            attempts,
            dead_lettered_at: Utc::now(),
        })
    }

    pub fn dead_letter_released(released_by: Option<String>) -> Self {
        OrderEvent::DeadLetterReleased(DeadLetterReleasedData {
            released_by,
            released_at: Utc::now(),
        })
    }

    pub fn tracking_overdue() -> Self {
        OrderEvent::TrackingOverdue(TrackingOverdueData {
            flagged_at: Utc::now(),
        })
    }

    pub fn refund_issued(refund_ref: impl Into<String>, amount: Money) -> Self {
        OrderEvent::RefundIssued(RefundIssuedData {
            refund_ref: refund_ref.into(),
            amount,
            refunded_at: Utc::now(),
        })
    }

    pub fn order_canceled(reason: ReasonCode, note: Option<String>) -> Self {
        OrderEvent::OrderCanceled(OrderCanceledData {
            reason,
            note,
            canceled_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = OrderEvent::fulfillment_submitted("PRV-1", true);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "FulfillmentSubmitted");
        assert_eq!(json["data"]["provider_ref"], "PRV-1");
        assert_eq!(json["data"]["via_read_back"], true);

        let back: OrderEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type(), "FulfillmentSubmitted");
    }

    #[test]
    fn reason_codes_serialize_inside_payloads() {
        let event = OrderEvent::dead_lettered(ReasonCode::RetriesExhausted, 5);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["reason"], "retries_exhausted");
        assert_eq!(json["data"]["attempts"], 5);
    }
}
