//! Command handling: load, decide, conditionally append.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventQuery, EventStore, Version};
use serde::Serialize;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

impl<A: Aggregate> CommandResult<A> {
    /// Returns true if the command produced no events.
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// Executes commands against aggregates.
///
/// Every write is a compare-and-set: events are appended with the version
/// the aggregate was loaded at, so a writer holding stale state fails with
/// a conflict (see [`DomainError::is_conflict`]) instead of overwriting a
/// newer transition.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    /// Creates a new command handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate by replaying its events.
    ///
    /// If the aggregate doesn't exist, returns a default instance.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let events = self.store.get_events_for_aggregate(aggregate_id).await?;

        let mut aggregate = A::default();
        for envelope in events {
            let event: A::Event = envelope.decode()?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        if aggregate.exists() {
            Ok(Some(aggregate))
        } else {
            Ok(None)
        }
    }

    /// Loads an aggregate, failing with `NotFound` if it doesn't exist.
    pub async fn load_required(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        self.load_existing(aggregate_id)
            .await?
            .ok_or_else(|| DomainError::not_found(A::aggregate_type(), aggregate_id))
    }

    /// Ids of every aggregate of this type in creation order, without
    /// replaying any events.
    pub async fn ids(&self) -> Result<Vec<AggregateId>, DomainError> {
        Ok(self.store.aggregate_ids(A::aggregate_type()).await?)
    }

    /// Lists every aggregate of this type in creation order.
    pub async fn list(&self) -> Result<Vec<A>, DomainError> {
        let ids = self.store.aggregate_ids(A::aggregate_type()).await?;
        let mut aggregates = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(aggregate) = self.load_existing(id).await? {
                aggregates.push(aggregate);
            }
        }
        Ok(aggregates)
    }

    /// Returns the raw event history of one aggregate, oldest first.
    pub async fn history(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>, DomainError> {
        let query = EventQuery::for_aggregate(aggregate_id).aggregate_type(A::aggregate_type());
        Ok(self.store.query_events(query).await?)
    }

    /// Executes a command and persists the resulting events.
    ///
    /// The command function receives the current aggregate state and returns
    /// either a list of events to apply, or an error. An empty list persists
    /// nothing. A new aggregate is appended with expect-new semantics, so
    /// two racing creators of the same id produce exactly one stream.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let aggregate = self.load(aggregate_id).await?;
        self.decide_and_append(aggregate_id, aggregate, command_fn)
            .await
    }

    /// Like [`execute`](Self::execute) but fails with `NotFound` instead of
    /// handing the command a blank aggregate.
    pub async fn execute_existing<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let aggregate = self.load_required(aggregate_id).await?;
        self.decide_and_append(aggregate_id, aggregate, command_fn)
            .await
    }

    async fn decide_and_append<F>(
        &self,
        aggregate_id: AggregateId,
        mut aggregate: A,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events: vec![],
                new_version: current_version,
            });
        }

        let envelopes = self.build_envelopes(aggregate_id, current_version, &events)?;

        let options = if current_version == Version::initial() {
            AppendOptions::expect_new()
        } else {
            AppendOptions::expect_version(current_version)
        };

        let new_version = self.store.append(envelopes, options).await?;

        for event in &events {
            aggregate.apply(event.clone());
        }
        aggregate.set_version(new_version);

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }

    /// Builds event envelopes from domain events.
    fn build_envelopes(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError>
    where
        A::Event: Serialize,
    {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let envelope = EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?
                .build()?;
            envelopes.push(envelope);
        }

        Ok(envelopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::InMemoryEventStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum LampEvent {
        Installed { id: AggregateId },
        Switched { on: bool },
    }

    impl DomainEvent for LampEvent {
        fn event_type(&self) -> &'static str {
            match self {
                LampEvent::Installed { .. } => "LampInstalled",
                LampEvent::Switched { .. } => "LampSwitched",
            }
        }
    }

    #[derive(Debug, Default)]
    struct Lamp {
        id: Option<AggregateId>,
        on: bool,
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    enum LampError {
        #[error("lamp already installed")]
        AlreadyInstalled,
    }

    impl Aggregate for Lamp {
        type Event = LampEvent;
        type Error = LampError;

        fn aggregate_type() -> &'static str {
            "Lamp"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                LampEvent::Installed { id } => self.id = Some(id),
                LampEvent::Switched { on } => self.on = on,
            }
        }
    }

    impl Lamp {
        fn install(&self, id: AggregateId) -> Result<Vec<LampEvent>, LampError> {
            if self.id.is_some() {
                return Err(LampError::AlreadyInstalled);
            }
            Ok(vec![LampEvent::Installed { id }])
        }

        fn switch(&self, on: bool) -> Result<Vec<LampEvent>, LampError> {
            if self.on == on {
                return Ok(vec![]);
            }
            Ok(vec![LampEvent::Switched { on }])
        }
    }

    impl From<LampError> for DomainError {
        fn from(_: LampError) -> Self {
            DomainError::NotFound {
                aggregate_type: "Lamp",
                aggregate_id: AggregateId::new(),
            }
        }
    }

    fn handler(store: InMemoryEventStore) -> CommandHandler<InMemoryEventStore, Lamp> {
        CommandHandler::new(store)
    }

    #[tokio::test]
    async fn execute_creates_then_updates() {
        let handler = handler(InMemoryEventStore::new());
        let id = AggregateId::new();

        let result = handler.execute(id, |lamp| lamp.install(id)).await.unwrap();
        assert_eq!(result.new_version, Version::first());
        assert!(result.aggregate.exists());

        let result = handler
            .execute(id, |lamp| lamp.switch(true))
            .await
            .unwrap();
        assert_eq!(result.new_version, Version::new(2));
        assert!(result.aggregate.on);
    }

    #[tokio::test]
    async fn empty_decision_persists_nothing() {
        let store = InMemoryEventStore::new();
        let handler = handler(store.clone());
        let id = AggregateId::new();
        handler.execute(id, |lamp| lamp.install(id)).await.unwrap();

        let result = handler
            .execute(id, |lamp| lamp.switch(false))
            .await
            .unwrap();

        assert!(result.is_noop());
        assert_eq!(result.new_version, Version::first());
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn racing_creators_produce_one_stream() {
        let store = InMemoryEventStore::new();
        let first = handler(store.clone());
        let second = handler(store.clone());
        let id = AggregateId::new();

        // Both decide against an empty stream before either appends.
        let blank_a = first.load(id).await.unwrap();
        let blank_b = second.load(id).await.unwrap();

        let a = first.decide_and_append(id, blank_a, |l| l.install(id)).await;
        let b = second.decide_and_append(id, blank_b, |l| l.install(id)).await;

        assert!(a.is_ok());
        assert!(b.unwrap_err().is_conflict());
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn execute_existing_requires_creation() {
        let handler = handler(InMemoryEventStore::new());
        let result = handler
            .execute_existing(AggregateId::new(), |lamp| lamp.switch(true))
            .await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn list_and_history() {
        let handler = handler(InMemoryEventStore::new());
        let a = AggregateId::new();
        let b = AggregateId::new();
        handler.execute(a, |l| l.install(a)).await.unwrap();
        handler.execute(b, |l| l.install(b)).await.unwrap();
        handler.execute(a, |l| l.switch(true)).await.unwrap();

        let lamps = handler.list().await.unwrap();
        assert_eq!(lamps.len(), 2);
        assert_eq!(lamps[0].id(), Some(a));
        assert!(lamps[0].on);

        let history = handler.history(a).await.unwrap();
        let types: Vec<_> = history.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["LampInstalled", "LampSwitched"]);
    }
}
