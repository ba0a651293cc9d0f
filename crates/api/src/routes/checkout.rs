//! Checkout and payment webhook endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use event_store::EventStore;
use pipeline::services::PaymentIntent;
use pipeline::{CheckoutRequest, WebhookOutcome};
use serde::Deserialize;

use super::{SIGNATURE_HEADER, caller, ensure_owner};
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CheckoutBody {
    pub approval_token: String,
    #[serde(flatten)]
    pub cart: CheckoutRequest,
}

/// POST /checkout: price the cart and open a payment intent.
///
/// The client completes payment with the returned `client_secret`; the
/// order is created when the processor's webhook arrives.
#[tracing::instrument(skip(state, headers, body))]
pub async fn begin<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(body): Json<CheckoutBody>,
) -> Result<(StatusCode, Json<PaymentIntent>), ApiError> {
    let claims = state.approvals.signer().verify(&body.approval_token)?;
    let session = state
        .sessions
        .get_session(claims.session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session {} not found", claims.session_id)))?;
    ensure_owner(session.owner(), caller(&headers).as_ref())?;

    let intent = state
        .coordinator
        .begin_checkout(&body.approval_token, body.cart)
        .await?;
    Ok((StatusCode::CREATED, Json(intent)))
}

/// POST /webhooks/payments: signed notifications from the payment processor.
///
/// Safe to deliver any number of times.
#[tracing::instrument(skip(state, headers, body), fields(bytes = body.len()))]
pub async fn payment_webhook<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("missing {SIGNATURE_HEADER} header")))?;

    let outcome = state
        .coordinator
        .handle_payment_webhook(&body, signature)
        .await
        .inspect_err(|_| {
            metrics::counter!("payment_webhooks_received_total", "result" => "error").increment(1);
        })?;

    let result = match &outcome {
        WebhookOutcome::OrderCreated { .. } => "order_created",
        WebhookOutcome::Duplicate { .. } => "duplicate",
        WebhookOutcome::PaymentFailed { .. } => "payment_failed",
        WebhookOutcome::RefundRecorded { .. } => "refund_recorded",
        WebhookOutcome::Ignored { .. } => "ignored",
    };
    metrics::counter!("payment_webhooks_received_total", "result" => result).increment(1);
    Ok(Json(outcome))
}
