//! Domain layer for the design and fulfillment pipeline.
//!
//! This crate provides the core domain abstractions including:
//! - Aggregate trait for event-sourced entities
//! - DomainEvent trait for domain events
//! - CommandHandler for load, decide, conditional append
//! - DesignSession aggregate with the generation stage machine
//! - Order aggregate with payment and fulfillment state machines

pub mod aggregate;
pub mod command;
pub mod error;
pub mod order;
pub mod reason;
pub mod session;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{CommandHandler, CommandResult};
pub use error::DomainError;
pub use order::{
    CustomerStatus, FulfillmentStatus, Money, NewOrder, Order, OrderError, OrderEvent, OrderItem,
    OrderService, PaymentStatus, PriceBreakdown, ShippingAddress, VariantRef, customer_status,
};
pub use reason::{FailureInfo, ReasonCode};
pub use session::{
    AssetId, CheckoutDraft, DesignAsset, DesignSession, ProductSelection, SessionError,
    SessionEvent, SessionService, Stage, StyleHints,
};
