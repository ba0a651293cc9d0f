//! Order coordinator: from approved design to a submitted print order.

use std::collections::HashMap;
use std::sync::Arc;

use common::AggregateId;
use domain::{
    CheckoutDraft, CommandResult, DesignSession, DomainError, FulfillmentStatus, Money, NewOrder,
    Order, OrderError, OrderItem, OrderService, PriceBreakdown, ReasonCode, SessionService,
    ShippingAddress,
};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::approval::ApprovalSigner;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::retry::{retry_transient, with_timeout};
use crate::services::{
    FulfillmentProvider, PaymentIntent, PaymentIntentRequest, PaymentOutcome, PaymentProcessor,
    RefundRequest,
};

/// How many times a consume is retried when the session moved under it.
const CONSUME_ATTEMPTS: u32 = 3;

/// A priced cart for an approved design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub shipping: Money,
    #[serde(default)]
    pub tax: Money,
    #[serde(default)]
    pub discount: Money,
    pub currency: String,
    pub shipping_address: ShippingAddress,
}

/// The order a payment resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfirmedOrder {
    pub order_id: AggregateId,
    /// False when the order already existed.
    pub created: bool,
}

/// Result of one attempt to hand an order to the print partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    Submitted { provider_ref: String },
    /// Refused for good; the order is failed and its total queued for refund.
    Rejected { reason: ReasonCode },
    /// No answer. The partner may hold the order; read back before retrying.
    Ambiguous,
    /// Another writer changed the order first.
    Superseded,
}

/// What a payment notification led to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookOutcome {
    OrderCreated {
        order_id: AggregateId,
        submission: Option<SubmissionOutcome>,
    },
    Duplicate {
        order_id: AggregateId,
    },
    PaymentFailed {
        payment_ref: String,
    },
    RefundRecorded {
        order_id: AggregateId,
    },
    Ignored {
        payment_ref: String,
    },
}

/// Turns confirmed payments into orders exactly once and submits them.
///
/// Order ids are derived from the payment reference, so every path that
/// sees the same payment (webhook retries, the reconciler, a client
/// polling) lands on the same order stream.
pub struct OrderCoordinator<S: EventStore> {
    sessions: SessionService<S>,
    orders: OrderService<S>,
    signer: ApprovalSigner,
    payments: Arc<dyn PaymentProcessor>,
    fulfillment: Arc<dyn FulfillmentProvider>,
    config: PipelineConfig,
}

impl<S: EventStore + Clone> OrderCoordinator<S> {
    pub fn new(
        store: S,
        signer: ApprovalSigner,
        payments: Arc<dyn PaymentProcessor>,
        fulfillment: Arc<dyn FulfillmentProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            sessions: SessionService::new(store.clone()),
            orders: OrderService::new(store),
            signer,
            payments,
            fulfillment,
            config,
        }
    }
}

impl<S: EventStore> OrderCoordinator<S> {
    /// The order id a payment reference maps to.
    pub fn order_id_for(payment_ref: &str) -> AggregateId {
        AggregateId::derive("order", payment_ref)
    }

    pub async fn order(&self, order_id: AggregateId) -> Result<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(PipelineError::OrderNotFound(order_id))
    }

    async fn session(&self, session_id: AggregateId) -> Result<DesignSession> {
        self.sessions
            .get_session(session_id)
            .await?
            .ok_or(PipelineError::SessionNotFound(session_id))
    }

    /// Prices the cart, opens a payment and attaches the checkout to the
    /// session.
    #[tracing::instrument(skip(self, token, request))]
    pub async fn begin_checkout(
        &self,
        token: &str,
        request: CheckoutRequest,
    ) -> Result<PaymentIntent> {
        let claims = self.signer.verify(token)?;
        let session_id = claims.session_id;
        let session = self.session(session_id).await?;

        let selected = session.selected_asset_id().cloned();
        let items: Vec<OrderItem> = request
            .items
            .into_iter()
            .map(|mut item| {
                if item.asset_id.is_none() {
                    item.asset_id = selected.clone();
                }
                item
            })
            .collect();
        let breakdown = PriceBreakdown::compute(
            &items,
            request.shipping,
            request.tax,
            request.discount,
            request.currency,
        )
        .map_err(DomainError::from)?;
        request
            .shipping_address
            .validate()
            .map_err(DomainError::from)?;

        let mut draft = CheckoutDraft {
            payment_ref: String::new(),
            approval_nonce: claims.nonce.clone(),
            lines: items,
            breakdown,
            shipping_address: request.shipping_address,
        };

        // Decide against the loaded state before opening a payment.
        session
            .initiate_checkout(draft.clone())
            .map_err(DomainError::from)?;

        let intent_request = PaymentIntentRequest {
            idempotency_key: format!("{session_id}:{}", claims.nonce),
            amount: draft.breakdown.total,
            currency: draft.breakdown.currency.clone(),
            metadata: HashMap::from([
                ("approval_token".to_string(), token.to_string()),
                ("session_id".to_string(), session_id.to_string()),
            ]),
        };
        let intent = retry_transient(
            self.config.max_stage_attempts,
            self.config.provider_timeout,
            &self.config.backoff,
            || self.payments.create_payment_intent(intent_request.clone()),
            |attempt, e| tracing::warn!(%session_id, attempt, error = %e, "payment intent failed, retrying"),
        )
        .await?;

        draft.payment_ref = intent.payment_ref.clone();
        self.sessions.initiate_checkout(session_id, draft).await?;

        tracing::info!(%session_id, payment_ref = %intent.payment_ref, "checkout started");
        Ok(intent)
    }

    /// Creates the order for a captured payment, exactly once.
    ///
    /// A repeat confirmation returns the existing order without touching
    /// anything.
    #[tracing::instrument(skip(self, token))]
    pub async fn on_payment_confirmed(
        &self,
        payment_ref: &str,
        token: Option<&str>,
    ) -> Result<ConfirmedOrder> {
        let order_id = Self::order_id_for(payment_ref);
        if self.orders.get_order(order_id).await?.is_some() {
            metrics::counter!("payment_confirmations_duplicate_total").increment(1);
            tracing::debug!(%order_id, "payment already confirmed");
            return Ok(ConfirmedOrder {
                order_id,
                created: false,
            });
        }

        let claims = self
            .signer
            .verify(token.ok_or(PipelineError::InvalidApprovalToken)?)?;
        let session = self.session(claims.session_id).await?;
        let checkout = session
            .checkout()
            .filter(|c| c.payment_ref == payment_ref && c.approval_nonce == claims.nonce)
            .cloned()
            .ok_or_else(|| PipelineError::CheckoutMismatch {
                payment_ref: payment_ref.to_string(),
            })?;

        self.consume_approval(claims.session_id, &claims.nonce, order_id)
            .await?;

        let new_order = NewOrder {
            owner: session.owner().cloned(),
            session_id: Some(claims.session_id),
            payment_ref: payment_ref.to_string(),
            items: checkout.lines,
            breakdown: checkout.breakdown,
            shipping_address: checkout.shipping_address,
        };

        match self.orders.create_order(order_id, new_order).await {
            Ok(_) => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(%order_id, session_id = %claims.session_id, "order created");
                Ok(ConfirmedOrder {
                    order_id,
                    created: true,
                })
            }
            Err(e) if e.is_conflict() || matches!(e.as_order(), Some(OrderError::AlreadyCreated)) => {
                metrics::counter!("payment_confirmations_duplicate_total").increment(1);
                metrics::counter!("conditional_writes_dropped_total", "aggregate" => "order")
                    .increment(1);
                tracing::debug!(%order_id, "lost order creation race");
                Ok(ConfirmedOrder {
                    order_id,
                    created: false,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn consume_approval(
        &self,
        session_id: AggregateId,
        nonce: &str,
        order_id: AggregateId,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .sessions
                .consume_approval(session_id, nonce.to_string(), order_id)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() && attempt < CONSUME_ATTEMPTS => {
                    tracing::debug!(%session_id, attempt, "session moved, retrying consume");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Verifies and handles one payment notification.
    ///
    /// Only a newly created order is submitted here; duplicates leave
    /// submission to whoever created the order and to the reconciler.
    #[tracing::instrument(skip_all)]
    pub async fn handle_payment_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookOutcome> {
        let webhook = self.payments.verify_webhook(payload, signature)?;
        let payment_ref = webhook.payment_ref;

        match webhook.outcome {
            PaymentOutcome::Succeeded => {
                let confirmed = self
                    .on_payment_confirmed(&payment_ref, webhook.approval_token.as_deref())
                    .await?;
                if !confirmed.created {
                    return Ok(WebhookOutcome::Duplicate {
                        order_id: confirmed.order_id,
                    });
                }

                let submission = match self.submit_to_fulfillment(confirmed.order_id).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        tracing::warn!(order_id = %confirmed.order_id, error = %e, "submission deferred to reconciler");
                        None
                    }
                };
                Ok(WebhookOutcome::OrderCreated {
                    order_id: confirmed.order_id,
                    submission,
                })
            }
            PaymentOutcome::Failed { reason } => {
                tracing::warn!(%payment_ref, %reason, "payment failed");
                Ok(WebhookOutcome::PaymentFailed { payment_ref })
            }
            PaymentOutcome::Refunded { refund_ref, amount } => {
                let order_id = Self::order_id_for(&payment_ref);
                if self.orders.get_order(order_id).await?.is_none() {
                    tracing::warn!(%payment_ref, "refund for unknown order");
                    return Ok(WebhookOutcome::Ignored { payment_ref });
                }
                self.orders
                    .record_refund(order_id, refund_ref, amount)
                    .await?;
                Ok(WebhookOutcome::RefundRecorded { order_id })
            }
        }
    }

    /// Sends a paid order to the print partner, keyed by the order id.
    ///
    /// A timeout or server error is recorded as an ambiguous attempt and
    /// the order stays unsubmitted; it is never marked failed on a guess.
    #[tracing::instrument(skip(self))]
    pub async fn submit_to_fulfillment(&self, order_id: AggregateId) -> Result<SubmissionOutcome> {
        let order = self.order(order_id).await?;
        order.ensure_submittable().map_err(DomainError::from)?;

        metrics::counter!("fulfillment_submissions_total").increment(1);
        let items = order.effective_items();
        let result = with_timeout(
            self.config.provider_timeout,
            self.fulfillment
                .submit_order(&order_id.to_string(), &items, order.shipping_address()),
        )
        .await;

        match result {
            Ok(provider_ref) => {
                let written = self
                    .orders
                    .record_submission(order_id, provider_ref.clone(), false)
                    .await;
                if self.settle(order_id, written)?.is_none() {
                    return Ok(SubmissionOutcome::Superseded);
                }
                tracing::info!(%order_id, %provider_ref, "order submitted");
                Ok(SubmissionOutcome::Submitted { provider_ref })
            }
            Err(e) if e.is_ambiguous() => {
                metrics::counter!("fulfillment_submissions_ambiguous_total").increment(1);
                tracing::warn!(%order_id, error = %e, "submission outcome unknown");
                let written = self
                    .orders
                    .record_attempt_failure(order_id, true, e.to_string())
                    .await;
                if self.settle(order_id, written)?.is_none() {
                    return Ok(SubmissionOutcome::Superseded);
                }
                Ok(SubmissionOutcome::Ambiguous)
            }
            Err(e) => {
                let reason = match e.reason_code() {
                    ReasonCode::ProviderUnavailable => ReasonCode::FulfillmentRejected,
                    reason => reason,
                };
                tracing::warn!(%order_id, %reason, error = %e, "submission rejected");
                let written = self
                    .orders
                    .reject_fulfillment(order_id, reason, reason.default_message().to_string())
                    .await;
                if self.settle(order_id, written)?.is_none() {
                    return Ok(SubmissionOutcome::Superseded);
                }
                Ok(SubmissionOutcome::Rejected { reason })
            }
        }
    }

    /// Records a provider reference found by read-back. Returns false if
    /// the order already had it.
    #[tracing::instrument(skip(self))]
    pub async fn record_read_back(&self, order_id: AggregateId, provider_ref: String) -> Result<bool> {
        let written = self
            .orders
            .record_submission(order_id, provider_ref, true)
            .await;
        Ok(self
            .settle(order_id, written)?
            .is_some_and(|result| !result.is_noop()))
    }

    /// Pulls the partner's status and applies forward moves and tracking.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_fulfillment(&self, order_id: AggregateId) -> Result<Order> {
        let order = self.order(order_id).await?;
        let Some(provider_ref) = order.provider_ref().map(str::to_string) else {
            return Err(DomainError::from(OrderError::NotSubmitted).into());
        };

        let status = with_timeout(
            self.config.provider_timeout,
            self.fulfillment.get_order_status(&provider_ref),
        )
        .await?;

        // Partner-side failures are handled by support, not mirrored here.
        if matches!(
            status.status,
            FulfillmentStatus::Failed | FulfillmentStatus::Canceled
        ) {
            tracing::warn!(%order_id, status = %status.status, "partner reported a terminal problem");
            return Ok(order);
        }

        let written = self
            .orders
            .apply_provider_status(order_id, status.status, status.tracking_code, status.tracking_url)
            .await;
        match self.settle(order_id, written)? {
            Some(result) => Ok(result.aggregate),
            None => self.order(order_id).await,
        }
    }

    /// Refunds through the payment processor. Without an amount the whole
    /// refundable balance is returned.
    #[tracing::instrument(skip(self))]
    pub async fn refund(&self, order_id: AggregateId, amount: Option<Money>) -> Result<Order> {
        let order = self.order(order_id).await?;
        let amount = amount.unwrap_or_else(|| order.refundable());
        order.ensure_refundable(amount).map_err(DomainError::from)?;

        let request = RefundRequest {
            payment_ref: order.payment_ref().to_string(),
            amount,
            idempotency_key: format!("{order_id}:refund:{}", order.refund_count() + 1),
        };
        let receipt = with_timeout(self.config.provider_timeout, self.payments.refund(request)).await?;

        let result = self
            .orders
            .record_refund(order_id, receipt.refund_ref, receipt.amount)
            .await?;
        tracing::info!(%order_id, amount = %receipt.amount, "refund issued");
        Ok(result.aggregate)
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        order_id: AggregateId,
        reason: ReasonCode,
        note: Option<String>,
    ) -> Result<Order> {
        let result = self.orders.cancel_order(order_id, reason, note).await?;
        tracing::info!(%order_id, %reason, "order canceled");
        Ok(result.aggregate)
    }

    #[tracing::instrument(skip(self))]
    pub async fn adjust_item_quantity(
        &self,
        order_id: AggregateId,
        line: usize,
        new_quantity: u32,
        reason: String,
    ) -> Result<Order> {
        let result = self
            .orders
            .adjust_item_quantity(order_id, line, new_quantity, reason)
            .await?;
        Ok(result.aggregate)
    }

    /// Drops writes that lost to a concurrent writer.
    fn settle(
        &self,
        order_id: AggregateId,
        written: std::result::Result<CommandResult<Order>, DomainError>,
    ) -> Result<Option<CommandResult<Order>>> {
        match written {
            Ok(result) => Ok(Some(result)),
            Err(e) if e.is_conflict() || matches!(e.as_order(), Some(OrderError::AlreadySubmitted { .. })) => {
                tracing::debug!(%order_id, error = %e, "conditional write dropped");
                metrics::counter!("conditional_writes_dropped_total", "aggregate" => "order")
                    .increment(1);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
