//! Status views delivered to clients.

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{
    Aggregate, AssetId, CustomerStatus, DesignAsset, DesignSession, FailureInfo,
    FulfillmentStatus, Order, PaymentStatus, Stage,
};
use serde::{Deserialize, Serialize};

/// Ordering key of a session's status: attempt, then stage, then progress.
///
/// A requeue starts a new attempt, so `queued` on attempt 2 is newer than
/// `failed` on attempt 1.
pub type StagePosition = (u32, u8, u8);

/// Current state of a design session, as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: AggregateId,
    pub version: i64,
    pub stage: Stage,
    pub progress: u8,
    pub message: String,
    pub error: Option<FailureInfo>,
    pub retry_count: u32,
    pub assets: Vec<DesignAsset>,
    pub selected_asset_id: Option<AssetId>,
    pub consent_accepted: bool,
    pub abandoned: bool,
    pub order_id: Option<AggregateId>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    /// Builds a snapshot from a loaded session. Returns None for a session
    /// that does not exist.
    pub fn from_session(session: &DesignSession) -> Option<Self> {
        Some(Self {
            session_id: session.id()?,
            version: session.version().as_i64(),
            stage: session.stage(),
            progress: session.progress(),
            message: session.message().to_string(),
            error: session.error().cloned(),
            retry_count: session.retry_count(),
            assets: session.assets().to_vec(),
            selected_asset_id: session.selected_asset_id().cloned(),
            consent_accepted: session.consent_accepted(),
            abandoned: session.is_abandoned(),
            order_id: session.consumed_by_order(),
            updated_at: session.updated_at(),
        })
    }

    pub fn position(&self) -> StagePosition {
        (self.retry_count, self.stage.rank(), self.progress)
    }
}

/// One entry of a session's status stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    pub session_id: AggregateId,
    pub stage: Stage,
    pub progress: u8,
    pub message: String,
    pub error: Option<FailureInfo>,
    pub retry_count: u32,
    /// Preview URLs, present once the session is ready.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previews: Vec<String>,
}

impl StageEvent {
    pub fn position(&self) -> StagePosition {
        (self.retry_count, self.stage.rank(), self.progress)
    }
}

impl From<&SessionSnapshot> for StageEvent {
    fn from(snapshot: &SessionSnapshot) -> Self {
        let previews = if snapshot.stage == Stage::Ready {
            snapshot
                .assets
                .iter()
                .map(|a| a.preview_url.clone())
                .collect()
        } else {
            Vec::new()
        };
        Self {
            session_id: snapshot.session_id,
            stage: snapshot.stage,
            progress: snapshot.progress,
            message: snapshot.message.clone(),
            error: snapshot.error.clone(),
            retry_count: snapshot.retry_count,
            previews,
        }
    }
}

/// Current state of an order, including the derived customer status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: AggregateId,
    pub version: i64,
    pub session_id: Option<AggregateId>,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub customer_status: CustomerStatus,
    pub status_message: String,
    pub provider_ref: Option<String>,
    pub tracking_code: Option<String>,
    pub tracking_url: Option<String>,
    pub total_minor: i64,
    pub currency: String,
    pub refunded_minor: i64,
    pub refund_queued_minor: i64,
    /// Fulfillment rejection, or the dead-letter reason while parked.
    pub failure: Option<FailureInfo>,
    pub dead_lettered: bool,
    pub tracking_overdue: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderSnapshot {
    pub fn from_order(order: &Order) -> Option<Self> {
        let customer_status = order.customer_status();
        Some(Self {
            order_id: order.id()?,
            version: order.version().as_i64(),
            session_id: order.session_id(),
            payment_status: order.payment_status(),
            fulfillment_status: order.fulfillment_status(),
            customer_status,
            status_message: customer_status.message().to_string(),
            provider_ref: order.provider_ref().map(str::to_string),
            tracking_code: order.tracking_code().map(str::to_string),
            tracking_url: order.tracking_url().map(str::to_string),
            total_minor: order.breakdown().total.minor_units(),
            currency: order.breakdown().currency.clone(),
            refunded_minor: order.refunded().minor_units(),
            refund_queued_minor: order.refund_queued().minor_units(),
            failure: order
                .rejection()
                .cloned()
                .or_else(|| order.dead_letter_reason().map(FailureInfo::from_reason)),
            dead_lettered: order.is_dead_lettered(),
            tracking_overdue: order.is_tracking_overdue(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        })
    }
}
