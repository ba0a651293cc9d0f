//! Status notifier error types.

use common::AggregateId;
use thiserror::Error;

/// Errors that can occur while reading status.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Session not found: {0}")]
    SessionNotFound(AggregateId),

    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    /// Loading the aggregate failed.
    #[error("Domain error: {0}")]
    Domain(#[from] domain::DomainError),
}

/// Result type for status operations.
pub type Result<T> = std::result::Result<T, StatusError>;
