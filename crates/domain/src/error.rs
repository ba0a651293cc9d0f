//! Domain error types.

use common::AggregateId;
use event_store::EventStoreError;
use thiserror::Error;

use crate::order::OrderError;
use crate::session::SessionError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store, including failed conditional
    /// writes.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A design session command was rejected.
    #[error("Session error: {0}")]
    Session(SessionError),

    /// An order command was rejected.
    #[error("Order error: {0}")]
    Order(OrderError),

    /// Aggregate not found.
    #[error("{aggregate_type} not found: {aggregate_id}")]
    NotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    pub fn not_found(aggregate_type: &'static str, aggregate_id: AggregateId) -> Self {
        DomainError::NotFound {
            aggregate_type,
            aggregate_id,
        }
    }

    /// Returns true if another writer advanced the aggregate first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }

    /// Returns the session rejection, if this is one.
    pub fn as_session(&self) -> Option<&SessionError> {
        match self {
            DomainError::Session(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the order rejection, if this is one.
    pub fn as_order(&self) -> Option<&OrderError> {
        match self {
            DomainError::Order(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SessionError> for DomainError {
    fn from(e: SessionError) -> Self {
        DomainError::Session(e)
    }
}

impl From<OrderError> for DomainError {
    fn from(e: OrderError) -> Self {
        DomainError::Order(e)
    }
}
