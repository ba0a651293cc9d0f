//! Pipeline error types.

use common::AggregateId;
use domain::{DomainError, OrderError, ReasonCode, SessionError};
use thiserror::Error;

/// Errors returned by the external collaborators.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The call did not finish in time. The request may still have taken
    /// effect on the provider's side.
    #[error("Provider call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The provider answered with a server error.
    #[error("Provider unavailable (status {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// The prompt was refused by the provider's content policy.
    #[error("Content policy rejection: {0}")]
    ContentPolicy(String),

    /// The provider validated the request and refused it.
    #[error("Provider rejected the request ({reason}): {message}")]
    Rejected { reason: ReasonCode, message: String },

    #[error("Provider resource not found: {0}")]
    NotFound(String),

    /// A callback failed authenticity checks.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),
}

impl ProviderError {
    /// Returns true for failures worth retrying: timeouts and 5xx.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_) | ProviderError::Unavailable { .. }
        )
    }

    /// Returns true if the request may have taken effect despite the error.
    pub fn is_ambiguous(&self) -> bool {
        self.is_transient()
    }

    /// The customer-facing code for this failure.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            ProviderError::ContentPolicy(_) => ReasonCode::ContentPolicy,
            ProviderError::Rejected { reason, .. } => *reason,
            ProviderError::Timeout(_) | ProviderError::Unavailable { .. } => {
                ReasonCode::ProviderUnavailable
            }
            ProviderError::NotFound(_)
            | ProviderError::InvalidSignature
            | ProviderError::MalformedPayload(_) => ReasonCode::ProviderRejected,
        }
    }
}

/// Errors that can occur in the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A domain command failed, including typed precondition violations.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Session not found: {0}")]
    SessionNotFound(AggregateId),

    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    /// The approval token is forged, malformed or superseded.
    #[error("Invalid approval token")]
    InvalidApprovalToken,

    /// The payment does not belong to the session's current checkout.
    #[error("Payment {payment_ref} does not match the session checkout")]
    CheckoutMismatch { payment_ref: String },

    /// A signing secret could not be used.
    #[error("Invalid signing secret")]
    InvalidSecret,
}

impl PipelineError {
    /// Returns true if a conditional write lost to another writer.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PipelineError::Domain(e) if e.is_conflict())
    }

    pub fn as_session(&self) -> Option<&SessionError> {
        match self {
            PipelineError::Domain(e) => e.as_session(),
            _ => None,
        }
    }

    pub fn as_order(&self) -> Option<&OrderError> {
        match self {
            PipelineError::Domain(e) => e.as_order(),
            _ => None,
        }
    }

    /// Stable code for failures a customer may see.
    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            PipelineError::Provider(e) => Some(e.reason_code()),
            PipelineError::Domain(DomainError::Order(e)) => e.reason_code(),
            _ => None,
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
