//! Design session aggregate and related types.

mod aggregate;
mod events;
mod service;
mod stage;
mod value_objects;

pub use aggregate::DesignSession;
pub use events::{
    ApprovalConsumedData, AssetRecordedData, AssetSelectedData, CheckoutInitiatedData,
    ConsentRecordedData, GenerationFailedData, GenerationStartedData, OwnerAssignedData,
    ProductSelectedData, ProgressReportedData, SessionAbandonedData, SessionCreatedData,
    SessionEvent, SessionRequeuedData, StageAdvancedData,
};
pub use service::SessionService;
pub use stage::Stage;
pub use value_objects::{AssetId, CheckoutDraft, DesignAsset, ProductSelection, StyleHints};

use thiserror::Error;

/// Errors that can occur during design session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session already created")]
    AlreadyCreated,

    #[error("Prompt must not be empty")]
    EmptyPrompt,

    /// The session is not in the stage the caller loaded it at.
    #[error("Expected stage {expected}, session is at {actual}")]
    StageMismatch { expected: Stage, actual: Stage },

    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Session is terminal at {stage}")]
    Terminal { stage: Stage },

    #[error("Asset already recorded: {asset_id}")]
    DuplicateAsset { asset_id: String },

    #[error("Asset not found: {asset_id}")]
    AssetNotFound { asset_id: String },

    /// Retry was requested for a session that has not failed.
    #[error("Session has not failed (stage: {stage})")]
    NotFailed { stage: Stage },

    #[error("Retry limit of {max_retries} reached")]
    RetryLimitExceeded { max_retries: u32 },

    #[error("Session belongs to another owner")]
    OwnerMismatch,

    #[error("Session is not ready (stage: {stage})")]
    NotReady { stage: Stage },

    #[error("Consent is required")]
    ConsentRequired,

    #[error("Session was abandoned")]
    Abandoned,

    /// An order was already created from this session's approval.
    #[error("Approval already consumed")]
    ApprovalAlreadyConsumed,

    /// The approval nonce is missing or superseded.
    #[error("Invalid approval")]
    InvalidApproval,
}
