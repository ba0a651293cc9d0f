//! The order and design fulfillment pipeline.
//!
//! - [`GenerationWorker`] drives design sessions from `queued` to `ready`
//! - [`ApprovalGate`] records consent and issues signed approval tokens
//! - [`OrderCoordinator`] turns a confirmed payment into exactly one order
//!   and hands it to the print partner
//! - [`Reconciler`] repairs what the happy path left behind: unconfirmed
//!   submissions, missing tracking, exhausted retries
//!
//! All writes go through conditional appends on the event store; a write
//! that loses a race is dropped, never retried blindly.

pub mod approval;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod reconciler;
pub mod retry;
pub mod services;
pub mod signing;
pub mod worker;

pub use approval::{ApprovalClaims, ApprovalGate, ApprovalSigner, ApprovalToken};
pub use config::PipelineConfig;
pub use coordinator::{
    CheckoutRequest, ConfirmedOrder, OrderCoordinator, SubmissionOutcome, WebhookOutcome,
};
pub use error::{PipelineError, ProviderError, Result};
pub use reconciler::{ReconciliationReport, Reconciler};
pub use retry::BackoffConfig;
pub use worker::{AdvanceOutcome, GenerationWorker};
