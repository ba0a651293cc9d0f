//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, OwnerId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::reason::{FailureInfo, ReasonCode};

use super::{
    CustomerStatus, FulfillmentStatus, Money, OrderError, OrderEvent, OrderItem, PaymentStatus,
    PriceBreakdown, ShippingAddress, customer_status,
    events::{
        FulfillmentRejectedData, FulfillmentUpdatedData, ItemQuantityAdjustedData,
        OrderCreatedData, RefundIssuedData,
    },
};

/// Everything needed to create an order from a confirmed payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub owner: Option<OwnerId>,
    pub session_id: Option<AggregateId>,
    pub payment_ref: String,
    pub items: Vec<OrderItem>,
    pub breakdown: PriceBreakdown,
    pub shipping_address: ShippingAddress,
}

/// Order aggregate root.
///
/// Tracks payment and fulfillment as two independent state machines; the
/// status a customer sees is derived from both. Orders are never deleted,
/// only moved to a terminal state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    owner: Option<OwnerId>,
    session_id: Option<AggregateId>,
    payment_ref: String,
    items: Vec<OrderItem>,

    /// Current quantity per line, after adjustments.
    line_quantities: Vec<u32>,
    adjustments: Vec<ItemQuantityAdjustedData>,

    breakdown: PriceBreakdown,
    shipping_address: ShippingAddress,

    /// Money actually taken from the customer. Adjustments never move it.
    captured: Money,
    payment_status: PaymentStatus,
    fulfillment_status: FulfillmentStatus,
    provider_ref: Option<String>,
    tracking_code: Option<String>,
    tracking_url: Option<String>,
    submission_attempts: u32,
    last_submission_error: Option<String>,
    rejection: Option<FailureInfo>,
    refund_queued: Money,
    refunded: Money,
    refund_refs: Vec<String>,
    dead_letter: Option<ReasonCode>,
    tracking_overdue: bool,
    canceled: Option<ReasonCode>,
    created_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderCreated(data) => self.apply_order_created(data),
            OrderEvent::PaymentCaptured(data) => {
                self.payment_status = PaymentStatus::Paid;
                self.captured += data.amount;
                self.updated_at = Some(data.captured_at);
            }
            OrderEvent::FulfillmentSubmitted(data) => {
                self.fulfillment_status = FulfillmentStatus::Submitted;
                self.provider_ref = Some(data.provider_ref);
                self.submitted_at = Some(data.submitted_at);
                self.dead_letter = None;
                self.updated_at = Some(data.submitted_at);
            }
            OrderEvent::SubmissionAttemptFailed(data) => {
                self.submission_attempts = data.attempt;
                self.last_submission_error = Some(data.error);
                self.updated_at = Some(data.failed_at);
            }
            OrderEvent::FulfillmentRejected(data) => self.apply_fulfillment_rejected(data),
            OrderEvent::FulfillmentUpdated(data) => self.apply_fulfillment_updated(data),
            OrderEvent::OrderDeadLettered(data) => {
                self.dead_letter = Some(data.reason);
                self.updated_at = Some(data.dead_lettered_at);
            }
            OrderEvent::DeadLetterReleased(data) => {
                self.dead_letter = None;
                self.submission_attempts = 0;
                self.updated_at = Some(data.released_at);
            }
            OrderEvent::TrackingOverdue(data) => {
                self.tracking_overdue = true;
                self.updated_at = Some(data.flagged_at);
            }
            OrderEvent::RefundIssued(data) => self.apply_refund_issued(data),
            OrderEvent::OrderCanceled(data) => {
                self.fulfillment_status = FulfillmentStatus::Canceled;
                self.canceled = Some(data.reason);
                self.updated_at = Some(data.canceled_at);
            }
            OrderEvent::ItemQuantityAdjusted(data) => self.apply_item_quantity_adjusted(data),
        }
    }
}

// Query methods
impl Order {
    pub fn owner(&self) -> Option<&OwnerId> {
        self.owner.as_ref()
    }

    pub fn session_id(&self) -> Option<AggregateId> {
        self.session_id
    }

    pub fn payment_ref(&self) -> &str {
        &self.payment_ref
    }

    /// Lines as created.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Lines with quantity adjustments applied. This is what gets printed.
    pub fn effective_items(&self) -> Vec<OrderItem> {
        self.items
            .iter()
            .zip(&self.line_quantities)
            .map(|(item, quantity)| OrderItem {
                quantity: *quantity,
                ..item.clone()
            })
            .collect()
    }

    pub fn adjustments(&self) -> &[ItemQuantityAdjustedData] {
        &self.adjustments
    }

    pub fn breakdown(&self) -> &PriceBreakdown {
        &self.breakdown
    }

    pub fn shipping_address(&self) -> &ShippingAddress {
        &self.shipping_address
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn fulfillment_status(&self) -> FulfillmentStatus {
        self.fulfillment_status
    }

    pub fn customer_status(&self) -> CustomerStatus {
        customer_status(self.payment_status, self.fulfillment_status)
    }

    pub fn provider_ref(&self) -> Option<&str> {
        self.provider_ref.as_deref()
    }

    pub fn tracking_code(&self) -> Option<&str> {
        self.tracking_code.as_deref()
    }

    pub fn tracking_url(&self) -> Option<&str> {
        self.tracking_url.as_deref()
    }

    pub fn submission_attempts(&self) -> u32 {
        self.submission_attempts
    }

    pub fn last_submission_error(&self) -> Option<&str> {
        self.last_submission_error.as_deref()
    }

    pub fn rejection(&self) -> Option<&FailureInfo> {
        self.rejection.as_ref()
    }

    /// Amount waiting for a refund decision.
    pub fn refund_queued(&self) -> Money {
        self.refund_queued
    }

    pub fn captured(&self) -> Money {
        self.captured
    }

    pub fn refunded(&self) -> Money {
        self.refunded
    }

    /// Number of refunds issued so far.
    pub fn refund_count(&self) -> usize {
        self.refund_refs.len()
    }

    /// Amount that can still be refunded.
    pub fn refundable(&self) -> Money {
        self.captured - self.refunded
    }

    pub fn dead_letter_reason(&self) -> Option<ReasonCode> {
        self.dead_letter
    }

    pub fn is_dead_lettered(&self) -> bool {
        self.dead_letter.is_some()
    }

    pub fn is_tracking_overdue(&self) -> bool {
        self.tracking_overdue
    }

    pub fn canceled_reason(&self) -> Option<ReasonCode> {
        self.canceled
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Paid, never confirmed by the print partner, and still eligible for
    /// automatic submission.
    pub fn needs_submission(&self) -> bool {
        self.payment_status.is_captured()
            && self.fulfillment_status == FulfillmentStatus::Unsubmitted
            && self.dead_letter.is_none()
    }

    /// Held by the print partner without a tracking code yet.
    pub fn awaiting_tracking(&self) -> bool {
        self.fulfillment_status.is_with_provider() && self.tracking_code.is_none()
    }

    /// Needs a human: dead-lettered, overdue tracking, or money to return.
    pub fn needs_review(&self) -> bool {
        self.is_dead_lettered() || self.tracking_overdue || self.refund_queued.is_positive()
    }
}

// Command methods (return events)
impl Order {
    /// Creates the order and records the captured payment.
    pub fn create(
        &self,
        order_id: AggregateId,
        new_order: NewOrder,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyCreated);
        }
        if new_order.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &new_order.items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    quantity: item.quantity,
                });
            }
        }
        if !new_order.breakdown.total.is_positive() {
            return Err(OrderError::NonPositiveTotal {
                total: new_order.breakdown.total.minor_units(),
            });
        }
        new_order.shipping_address.validate()?;
        self.ensure_payment_transition(PaymentStatus::Paid)?;

        let amount = new_order.breakdown.total;
        let payment_ref = new_order.payment_ref.clone();

        Ok(vec![
            OrderEvent::OrderCreated(OrderCreatedData {
                order_id,
                owner: new_order.owner,
                session_id: new_order.session_id,
                payment_ref: new_order.payment_ref,
                items: new_order.items,
                breakdown: new_order.breakdown,
                shipping_address: new_order.shipping_address,
                created_at: Utc::now(),
            }),
            OrderEvent::payment_captured(payment_ref, amount),
        ])
    }

    /// Checks the preconditions for sending the order to the print partner.
    pub fn ensure_submittable(&self) -> Result<(), OrderError> {
        if self.fulfillment_status == FulfillmentStatus::Canceled {
            return Err(OrderError::Canceled);
        }
        if !self.payment_status.is_captured() {
            return Err(OrderError::NotPaid {
                payment_status: self.payment_status,
            });
        }
        if self.fulfillment_status != FulfillmentStatus::Unsubmitted {
            return Err(OrderError::AlreadySubmitted {
                status: self.fulfillment_status,
            });
        }
        if self.dead_letter.is_some() {
            return Err(OrderError::DeadLettered);
        }
        Ok(())
    }

    /// Records the provider's order reference.
    ///
    /// Recording the same reference twice is a no-op. A reference found by
    /// read-back is recorded even for a dead-lettered order: the partner
    /// already holds it.
    pub fn record_submission(
        &self,
        provider_ref: impl Into<String>,
        via_read_back: bool,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        let provider_ref = provider_ref.into();
        if self.provider_ref.as_deref() == Some(provider_ref.as_str()) {
            return Ok(vec![]);
        }

        match self.ensure_submittable() {
            Ok(()) => {}
            Err(OrderError::DeadLettered) if via_read_back => {}
            Err(e) => return Err(e),
        }

        Ok(vec![OrderEvent::fulfillment_submitted(
            provider_ref,
            via_read_back,
        )])
    }

    /// Records a submission attempt that produced no confirmed reference.
    /// The order stays unsubmitted.
    pub fn record_attempt_failure(
        &self,
        ambiguous: bool,
        error: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.fulfillment_status != FulfillmentStatus::Unsubmitted {
            return Err(OrderError::AlreadySubmitted {
                status: self.fulfillment_status,
            });
        }

        Ok(vec![OrderEvent::submission_attempt_failed(
            self.submission_attempts + 1,
            ambiguous,
            error,
        )])
    }

    /// Marks fulfillment failed after a permanent rejection and queues the
    /// captured amount for refund evaluation.
    pub fn reject_fulfillment(
        &self,
        reason: ReasonCode,
        message: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_submittable()?;

        Ok(vec![OrderEvent::fulfillment_rejected(
            reason,
            message,
            self.refundable(),
        )])
    }

    /// Applies a status reported by the print partner.
    ///
    /// Forward moves (including skips) and newly provided tracking are
    /// recorded; stale or regressing reports produce no events.
    pub fn apply_provider_status(
        &self,
        status: FulfillmentStatus,
        tracking_code: Option<String>,
        tracking_url: Option<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.fulfillment_status == FulfillmentStatus::Unsubmitted {
            return Err(OrderError::NotSubmitted);
        }

        let new_tracking = tracking_code.is_some() && tracking_code != self.tracking_code;
        let moves_forward = self.fulfillment_status.can_advance_to(status);
        let same_status = status == self.fulfillment_status && !status.is_terminal();

        if !moves_forward && !(same_status && new_tracking) {
            return Ok(vec![]);
        }

        let (tracking_code, tracking_url) = if new_tracking {
            (tracking_code, tracking_url.or_else(|| self.tracking_url.clone()))
        } else {
            (self.tracking_code.clone(), self.tracking_url.clone())
        };

        Ok(vec![OrderEvent::fulfillment_updated(
            self.fulfillment_status,
            status,
            tracking_code,
            tracking_url,
        )])
    }

    /// Parks the order for an operator. Idempotent.
    pub fn dead_letter(&self, reason: ReasonCode) -> Result<Vec<OrderEvent>, OrderError> {
        if self.dead_letter.is_some() {
            return Ok(vec![]);
        }
        if self.fulfillment_status != FulfillmentStatus::Unsubmitted {
            return Err(OrderError::AlreadySubmitted {
                status: self.fulfillment_status,
            });
        }

        Ok(vec![OrderEvent::dead_lettered(
            reason,
            self.submission_attempts,
        )])
    }

    /// Returns a dead-lettered order to automatic handling with a fresh
    /// attempt budget.
    pub fn release_dead_letter(
        &self,
        released_by: Option<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.dead_letter.is_none() {
            return Err(OrderError::NotDeadLettered);
        }

        Ok(vec![OrderEvent::dead_letter_released(released_by)])
    }

    /// Flags missing tracking once. No-op if already flagged or tracking
    /// has since arrived.
    pub fn flag_tracking_overdue(&self) -> Result<Vec<OrderEvent>, OrderError> {
        if self.tracking_overdue || !self.awaiting_tracking() {
            return Ok(vec![]);
        }

        Ok(vec![OrderEvent::tracking_overdue()])
    }

    /// Records a refund confirmed by the payment processor. Recording the
    /// same refund reference twice is a no-op.
    pub fn record_refund(
        &self,
        refund_ref: impl Into<String>,
        amount: Money,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        let refund_ref = refund_ref.into();
        if self.refund_refs.contains(&refund_ref) {
            return Ok(vec![]);
        }

        self.ensure_refundable(amount)?;
        self.ensure_payment_transition(self.status_after_refund(amount))?;

        Ok(vec![OrderEvent::refund_issued(refund_ref, amount)])
    }

    /// Checks a refund amount against what has been captured.
    pub fn ensure_refundable(&self, amount: Money) -> Result<(), OrderError> {
        if !self.payment_status.is_captured() {
            return Err(OrderError::NotPaid {
                payment_status: self.payment_status,
            });
        }
        if !amount.is_positive() || amount > self.refundable() {
            return Err(OrderError::InvalidRefund {
                amount: amount.minor_units(),
                refundable: self.refundable().minor_units(),
            });
        }
        Ok(())
    }

    /// Payment status once `amount` more has been returned.
    fn status_after_refund(&self, amount: Money) -> PaymentStatus {
        if self.refunded + amount >= self.captured {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        }
    }

    fn ensure_payment_transition(&self, next: PaymentStatus) -> Result<(), OrderError> {
        if !self.payment_status.can_transition_to(next) {
            return Err(OrderError::InvalidPaymentTransition {
                from: self.payment_status,
                to: next,
            });
        }
        Ok(())
    }

    /// Cancels the order. Canceling a canceled order is a no-op.
    pub fn cancel(
        &self,
        reason: ReasonCode,
        note: Option<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.fulfillment_status == FulfillmentStatus::Canceled {
            return Ok(vec![]);
        }
        if !self.fulfillment_status.can_cancel() {
            return Err(OrderError::InvalidFulfillmentTransition {
                from: self.fulfillment_status,
                to: FulfillmentStatus::Canceled,
            });
        }

        Ok(vec![OrderEvent::order_canceled(reason, note)])
    }

    /// Corrects one line's quantity before submission. The line itself is
    /// never rewritten; a compensating adjustment is appended and the
    /// totals move by the difference.
    ///
    /// Once paid, the new total must stay within the money still held:
    /// increases can only take back a reduction that has not been refunded.
    pub fn adjust_item_quantity(
        &self,
        line: usize,
        new_quantity: u32,
        reason: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.fulfillment_status == FulfillmentStatus::Canceled {
            return Err(OrderError::Canceled);
        }
        if self.fulfillment_status != FulfillmentStatus::Unsubmitted {
            return Err(OrderError::AlreadySubmitted {
                status: self.fulfillment_status,
            });
        }

        let (item, old_quantity) = self
            .items
            .get(line)
            .zip(self.line_quantities.get(line).copied())
            .ok_or(OrderError::ItemNotFound { line })?;

        if new_quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                quantity: new_quantity,
            });
        }
        if new_quantity == old_quantity {
            return Ok(vec![]);
        }

        let delta = item.unit_price.times(new_quantity) - item.unit_price.times(old_quantity);
        let adjusted = self.breakdown.adjusted(delta)?;
        if delta.is_positive()
            && self.payment_status.is_captured()
            && adjusted.total > self.refundable()
        {
            return Err(OrderError::UncoveredIncrease {
                delta: delta.minor_units(),
                available: (self.refundable() - self.breakdown.total).minor_units(),
            });
        }

        Ok(vec![OrderEvent::ItemQuantityAdjusted(
            ItemQuantityAdjustedData {
                line,
                old_quantity,
                new_quantity,
                reason: reason.into(),
                delta,
                adjusted_at: Utc::now(),
            },
        )])
    }
}

// Apply event helpers
impl Order {
    fn apply_order_created(&mut self, data: OrderCreatedData) {
        self.id = Some(data.order_id);
        self.owner = data.owner;
        self.session_id = data.session_id;
        self.payment_ref = data.payment_ref;
        self.line_quantities = data.items.iter().map(|i| i.quantity).collect();
        self.items = data.items;
        self.breakdown = data.breakdown;
        self.shipping_address = data.shipping_address;
        self.payment_status = PaymentStatus::Pending;
        self.fulfillment_status = FulfillmentStatus::Unsubmitted;
        self.created_at = Some(data.created_at);
        self.updated_at = Some(data.created_at);
    }

    fn apply_fulfillment_rejected(&mut self, data: FulfillmentRejectedData) {
        self.fulfillment_status = FulfillmentStatus::Failed;
        self.rejection = Some(FailureInfo::new(data.reason, data.message));
        self.refund_queued = data.refund_queued;
        self.updated_at = Some(data.rejected_at);
    }

    fn apply_fulfillment_updated(&mut self, data: FulfillmentUpdatedData) {
        self.fulfillment_status = data.to;
        if data.tracking_code.is_some() {
            self.tracking_code = data.tracking_code;
            self.tracking_overdue = false;
        }
        if data.tracking_url.is_some() {
            self.tracking_url = data.tracking_url;
        }
        self.updated_at = Some(data.updated_at);
    }

    fn apply_refund_issued(&mut self, data: RefundIssuedData) {
        self.payment_status = self.status_after_refund(data.amount);
        self.refunded += data.amount;
        self.refund_queued = drain(self.refund_queued, data.amount);
        self.refund_refs.push(data.refund_ref);
        self.updated_at = Some(data.refunded_at);
    }

    fn apply_item_quantity_adjusted(&mut self, data: ItemQuantityAdjustedData) {
        if let Some(quantity) = self.line_quantities.get_mut(data.line) {
            *quantity = data.new_quantity;
        }
        self.breakdown.subtotal += data.delta;
        self.breakdown.total += data.delta;
        // A reduction after capture leaves money to return; an increase
        // takes some of it back.
        if self.payment_status.is_captured() {
            if data.delta.is_positive() {
                self.refund_queued = drain(self.refund_queued, data.delta);
            } else {
                self.refund_queued += Money::zero() - data.delta;
            }
        }
        self.updated_at = Some(data.adjusted_at);
        self.adjustments.push(data);
    }
}

fn drain(queued: Money, amount: Money) -> Money {
    if amount >= queued {
        Money::zero()
    } else {
        queued - amount
    }
}
