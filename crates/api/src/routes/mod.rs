//! Route handlers.

pub mod admin;
pub mod checkout;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod sessions;

use axum::http::HeaderMap;
use common::{AggregateId, OwnerId};

use crate::error::ApiError;

/// Header carrying the signed-in user's subject, set by the auth proxy.
pub const USER_HEADER: &str = "x-user-id";

/// Header carrying the payment processor's webhook signature.
pub const SIGNATURE_HEADER: &str = "x-payment-signature";

pub(crate) fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    AggregateId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}

/// The signed-in caller, if any.
pub(crate) fn caller(headers: &HeaderMap) -> Option<OwnerId> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(OwnerId::new)
}

/// Owned resources are visible only to their owner.
pub(crate) fn ensure_owner(
    owner: Option<&OwnerId>,
    caller: Option<&OwnerId>,
) -> Result<(), ApiError> {
    match owner {
        Some(owner) if caller != Some(owner) => {
            Err(ApiError::Forbidden("not the owner of this resource".to_string()))
        }
        _ => Ok(()),
    }
}
