//! Customer-facing order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use event_store::EventStore;
use status::OrderSnapshot;

use super::{caller, ensure_owner, parse_aggregate_id};
use crate::AppState;
use crate::error::ApiError;

/// GET /orders/{id}: order snapshot with the derived customer status.
#[tracing::instrument(skip(state, headers))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<OrderSnapshot>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state.coordinator.order(order_id).await?;
    ensure_owner(order.owner(), caller(&headers).as_ref())?;

    let snapshot = OrderSnapshot::from_order(&order)
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;
    Ok(Json(snapshot))
}
