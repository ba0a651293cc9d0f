//! Append-only event store.
//!
//! Every design session and order is an event stream keyed by its aggregate
//! id. Appends carry an expected version, which turns each write into a
//! compare-and-set: a writer that loaded stale state gets
//! [`EventStoreError::ConcurrencyConflict`] instead of overwriting a newer
//! transition.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::EventQuery;
pub use store::{AppendOptions, EventStore, EventStoreExt};
