//! Order service providing a simplified API for order operations.

use common::AggregateId;
use event_store::{EventEnvelope, EventStore};

use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;
use crate::reason::ReasonCode;

use super::{FulfillmentStatus, Money, NewOrder, Order};

/// Service for managing orders.
///
/// Every method loads the order, lets the aggregate decide, and appends at
/// the loaded version. Callers that can lose a race check
/// [`DomainError::is_conflict`].
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
}

impl<S: EventStore> OrderService<S> {
    /// Creates a new order service with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    /// Returns a reference to the underlying command handler.
    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    /// Creates an order. The append expects a new stream, so of two racing
    /// creators with the same id exactly one succeeds.
    #[tracing::instrument(skip(self, new_order), fields(payment_ref = %new_order.payment_ref))]
    pub async fn create_order(
        &self,
        order_id: AggregateId,
        new_order: NewOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, |order| order.create(order_id, new_order))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_submission(
        &self,
        order_id: AggregateId,
        provider_ref: String,
        via_read_back: bool,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_existing(order_id, |order| {
                order.record_submission(provider_ref, via_read_back)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_attempt_failure(
        &self,
        order_id: AggregateId,
        ambiguous: bool,
        error: String,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_existing(order_id, |order| {
                order.record_attempt_failure(ambiguous, error)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn reject_fulfillment(
        &self,
        order_id: AggregateId,
        reason: ReasonCode,
        message: String,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_existing(order_id, |order| order.reject_fulfillment(reason, message))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn apply_provider_status(
        &self,
        order_id: AggregateId,
        status: FulfillmentStatus,
        tracking_code: Option<String>,
        tracking_url: Option<String>,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_existing(order_id, |order| {
                order.apply_provider_status(status, tracking_code, tracking_url)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn dead_letter(
        &self,
        order_id: AggregateId,
        reason: ReasonCode,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_existing(order_id, |order| order.dead_letter(reason))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn release_dead_letter(
        &self,
        order_id: AggregateId,
        released_by: Option<String>,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_existing(order_id, |order| order.release_dead_letter(released_by))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn flag_tracking_overdue(
        &self,
        order_id: AggregateId,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_existing(order_id, |order| order.flag_tracking_overdue())
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_refund(
        &self,
        order_id: AggregateId,
        refund_ref: String,
        amount: Money,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_existing(order_id, |order| order.record_refund(refund_ref, amount))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: AggregateId,
        reason: ReasonCode,
        note: Option<String>,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_existing(order_id, |order| order.cancel(reason, note))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn adjust_item_quantity(
        &self,
        order_id: AggregateId,
        line: usize,
        new_quantity: u32,
        reason: String,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_existing(order_id, |order| {
                order.adjust_item_quantity(line, new_quantity, reason)
            })
            .await
    }

    /// Loads an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }

    /// Ids of every order, oldest first.
    pub async fn order_ids(&self) -> Result<Vec<AggregateId>, DomainError> {
        self.handler.ids().await
    }

    /// Loads every order, oldest first.
    pub async fn list_orders(&self) -> Result<Vec<Order>, DomainError> {
        self.handler.list().await
    }

    /// Returns the stored events of one order.
    pub async fn history(&self, order_id: AggregateId) -> Result<Vec<EventEnvelope>, DomainError> {
        self.handler.history(order_id).await
    }
}
