//! External collaborators and their in-memory implementations.
//!
//! Real providers live behind these traits; the pipeline only ever talks
//! to the trait objects.

mod fulfillment;
mod generation;
mod payment;

pub use fulfillment::{FulfillmentProvider, InMemoryFulfillmentProvider, ProviderOrderStatus};
pub use generation::{
    GeneratedAsset, GenerationRequest, GenerationResult, GenerationService, GenerationUpdate,
    InMemoryGenerationService, JobHandle,
};
pub use payment::{
    InMemoryPaymentProcessor, PaymentIntent, PaymentIntentRequest, PaymentOutcome,
    PaymentProcessor, PaymentWebhook, RefundReceipt, RefundRequest,
};
