//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Events are facts: immutable, named in the past tense, and the only way
/// aggregate state ever changes.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name stored alongside the payload.
    fn event_type(&self) -> &'static str;
}

/// Trait for event-sourced aggregates.
///
/// An aggregate is rebuilt by folding its events in version order. Command
/// methods inspect the current state and return the events to append; they
/// never mutate. `apply` is the fold step and must not fail.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors its command methods return.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name used to tag stored events.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's identifier, or None before its creation event.
    fn id(&self) -> Option<AggregateId>;

    /// Returns the version of the last applied event.
    fn version(&self) -> Version;

    /// Sets the aggregate version. Called by the command handler on load.
    fn set_version(&mut self, version: Version);

    /// Applies one event. Pure and deterministic.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Returns true once the creation event has been applied.
    fn exists(&self) -> bool {
        self.id().is_some()
    }
}
