//! Operator endpoints: the retries queue and manual interventions.
//!
//! Mounted behind the operator network boundary; no owner checks here.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use domain::{Money, Order, ReasonCode};
use event_store::EventStore;
use serde::{Deserialize, Serialize};
use status::OrderSnapshot;

use super::{caller, parse_aggregate_id};
use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct RetriesResponse {
    /// Orders parked after exhausting submission attempts.
    pub dead_letters: Vec<OrderSnapshot>,
    /// Orders with a rejection, an overdue tracking flag, or a dead letter.
    pub review: Vec<OrderSnapshot>,
}

#[derive(Deserialize, Default)]
pub struct RefundBody {
    /// Full refundable balance when omitted.
    #[serde(default)]
    pub amount_minor: Option<i64>,
}

#[derive(Deserialize)]
pub struct CancelBody {
    #[serde(default = "default_cancel_reason")]
    pub reason: ReasonCode,
    #[serde(default)]
    pub note: Option<String>,
}

fn default_cancel_reason() -> ReasonCode {
    ReasonCode::CanceledByOperator
}

/// GET /admin/retries
#[tracing::instrument(skip(state))]
pub async fn retries<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<RetriesResponse>, ApiError> {
    let dead_letters = state.reconciler.dead_letters().await?;
    let review = state.reconciler.review_queue().await?;

    Ok(Json(RetriesResponse {
        dead_letters: snapshots(&dead_letters),
        review: snapshots(&review),
    }))
}

/// POST /admin/orders/{id}/release: hand a dead-lettered order back to the
/// reconciler with a fresh attempt budget.
#[tracing::instrument(skip(state, headers))]
pub async fn release<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<OrderSnapshot>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let released_by = caller(&headers).map(|c| c.to_string());

    let order = state
        .reconciler
        .release_dead_letter(order_id, released_by)
        .await?;
    snapshot(&order)
}

/// POST /admin/orders/{id}/refund
#[tracing::instrument(skip(state, body))]
pub async fn refund<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    body: Option<Json<RefundBody>>,
) -> Result<Json<OrderSnapshot>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let order = state
        .coordinator
        .refund(order_id, body.amount_minor.map(Money::from_minor))
        .await?;
    snapshot(&order)
}

/// POST /admin/orders/{id}/cancel
#[tracing::instrument(skip(state, body))]
pub async fn cancel<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(body): Json<CancelBody>,
) -> Result<Json<OrderSnapshot>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;

    let order = state
        .coordinator
        .cancel(order_id, body.reason, body.note)
        .await?;
    snapshot(&order)
}

fn snapshots(orders: &[Order]) -> Vec<OrderSnapshot> {
    orders.iter().filter_map(OrderSnapshot::from_order).collect()
}

fn snapshot(order: &Order) -> Result<Json<OrderSnapshot>, ApiError> {
    OrderSnapshot::from_order(order)
        .map(Json)
        .ok_or_else(|| ApiError::Internal("order without id".to_string()))
}
