//! Design session domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, OwnerId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::reason::ReasonCode;

use super::{AssetId, CheckoutDraft, DesignAsset, ProductSelection, Stage, StyleHints};

/// Events that can occur on a design session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    SessionCreated(SessionCreatedData),

    /// The provider accepted a generation job.
    GenerationStarted(GenerationStartedData),

    /// The session moved exactly one stage forward.
    StageAdvanced(StageAdvancedData),

    /// Progress moved within the current stage.
    ProgressReported(ProgressReportedData),

    AssetRecorded(AssetRecordedData),
    AssetSelected(AssetSelectedData),
    GenerationFailed(GenerationFailedData),

    /// A failed session went back to the queue for another attempt.
    SessionRequeued(SessionRequeuedData),

    OwnerAssigned(OwnerAssignedData),
    ProductSelected(ProductSelectedData),
    SessionAbandoned(SessionAbandonedData),

    /// The customer approved the design for print.
    ConsentRecorded(ConsentRecordedData),

    /// A priced checkout is waiting for payment.
    CheckoutInitiated(CheckoutInitiatedData),

    /// An order was created from this session's approval.
    ApprovalConsumed(ApprovalConsumedData),
}

impl DomainEvent for SessionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SessionCreated(_) => "SessionCreated",
            SessionEvent::GenerationStarted(_) => "GenerationStarted",
            SessionEvent::StageAdvanced(_) => "StageAdvanced",
            SessionEvent::ProgressReported(_) => "ProgressReported",
            SessionEvent::AssetRecorded(_) => "AssetRecorded",
            SessionEvent::AssetSelected(_) => "AssetSelected",
            SessionEvent::GenerationFailed(_) => "GenerationFailed",
            SessionEvent::SessionRequeued(_) => "SessionRequeued",
            SessionEvent::OwnerAssigned(_) => "OwnerAssigned",
            SessionEvent::ProductSelected(_) => "ProductSelected",
            SessionEvent::SessionAbandoned(_) => "SessionAbandoned",
            SessionEvent::ConsentRecorded(_) => "ConsentRecorded",
            SessionEvent::CheckoutInitiated(_) => "CheckoutInitiated",
            SessionEvent::ApprovalConsumed(_) => "ApprovalConsumed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreatedData {
    pub session_id: AggregateId,
    pub owner: Option<OwnerId>,
    pub prompt: String,
    pub style_hints: StyleHints,
    pub locale: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationStartedData {
    pub job_handle: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageAdvancedData {
    pub from: Stage,
    pub to: Stage,
    pub progress: u8,
    pub message: String,
    pub advanced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReportedData {
    pub stage: Stage,
    pub progress: u8,
    pub message: String,
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecordedData {
    pub asset: DesignAsset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSelectedData {
    pub asset_id: AssetId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationFailedData {
    pub stage: Stage,
    pub reason: ReasonCode,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequeuedData {
    /// Retry count after this requeue.
    pub retry_count: u32,
    pub requeued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerAssignedData {
    pub owner: OwnerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSelectedData {
    pub selection: ProductSelection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAbandonedData {
    pub abandoned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRecordedData {
    /// Fresh nonce; replaces any earlier one and so invalidates tokens
    /// issued for it.
    pub nonce: String,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutInitiatedData {
    pub checkout: CheckoutDraft,
    pub initiated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConsumedData {
    pub nonce: String,
    pub order_id: AggregateId,
    pub consumed_at: DateTime<Utc>,
}

// Convenience constructors for events
impl SessionEvent {
    pub fn stage_advanced(from: Stage, to: Stage, progress: u8, message: impl Into<String>) -> Self {
        SessionEvent::StageAdvanced(StageAdvancedData {
            from,
            to,
            progress,
            message: message.into(),
            advanced_at: Utc::now(),
        })
    }

    pub fn progress_reported(stage: Stage, progress: u8, message: impl Into<String>) -> Self {
        SessionEvent::ProgressReported(ProgressReportedData {
            stage,
            progress,
            message: message.into(),
            reported_at: Utc::now(),
        })
    }

    pub fn generation_failed(stage: Stage, reason: ReasonCode, message: impl Into<String>) -> Self {
        SessionEvent::GenerationFailed(GenerationFailedData {
            stage,
            reason,
            message: message.into(),
            failed_at: Utc::now(),
        })
    }

    /// Returns true for events that change what the status stream shows.
    pub fn is_status_change(&self) -> bool {
        matches!(
            self,
            SessionEvent::StageAdvanced(_)
                | SessionEvent::ProgressReported(_)
                | SessionEvent::GenerationFailed(_)
                | SessionEvent::SessionRequeued(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_advanced_round_trips_with_tag() {
        let event = SessionEvent::stage_advanced(Stage::Compositing, Stage::PreparingPrint, 60, "");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StageAdvanced");
        assert_eq!(json["data"]["to"], "preparing_print");

        let back: SessionEvent = serde_json::from_value(json).unwrap();
        assert!(back.is_status_change());
    }

    #[test]
    fn consent_is_not_a_status_change() {
        let event = SessionEvent::ConsentRecorded(ConsentRecordedData {
            nonce: "n".to_string(),
            accepted_at: Utc::now(),
        });
        assert!(!event.is_status_change());
        assert_eq!(event.event_type(), "ConsentRecorded");
    }
}
