//! Event store decorator that fans out committed events.

use async_trait::async_trait;
use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventQuery, EventStore, Result, Version};
use tokio::sync::broadcast;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Wraps an [`EventStore`] and publishes every successfully appended
/// envelope to all subscribers.
///
/// Publishing happens after the append commits, so subscribers never see
/// an event that a conflicting writer lost. When the buffer is full the
/// oldest messages are dropped and slow receivers observe
/// `RecvError::Lagged`.
#[derive(Clone)]
pub struct BroadcastEventStore<S> {
    inner: S,
    sender: broadcast::Sender<EventEnvelope>,
}

impl<S: EventStore> BroadcastEventStore<S> {
    pub fn new(inner: S) -> Self {
        Self::with_capacity(inner, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: S, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { inner, sender }
    }

    /// Subscribes to every envelope committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: EventStore> EventStore for BroadcastEventStore<S> {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        let version = self.inner.append(events.clone(), options).await?;
        for envelope in events {
            // Zero receivers is not an error.
            let _ = self.sender.send(envelope);
        }
        Ok(version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        self.inner.get_events_for_aggregate(aggregate_id).await
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        self.inner.query_events(query).await
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        self.inner.get_aggregate_version(aggregate_id).await
    }

    async fn aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>> {
        self.inner.aggregate_ids(aggregate_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{EventStoreError, InMemoryEventStore};

    fn envelope(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("DesignSession")
            .event_type("TestEvent")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({"test": true}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn publishes_committed_events() {
        let store = BroadcastEventStore::new(InMemoryEventStore::new());
        let mut rx = store.subscribe();
        let id = AggregateId::new();

        store
            .append(
                vec![envelope(id, 1), envelope(id, 2)],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().version, Version::new(1));
        assert_eq!(rx.recv().await.unwrap().version, Version::new(2));
    }

    #[tokio::test]
    async fn conflicting_append_publishes_nothing() {
        let store = BroadcastEventStore::new(InMemoryEventStore::new());
        let id = AggregateId::new();
        store
            .append(vec![envelope(id, 1)], AppendOptions::expect_new())
            .await
            .unwrap();

        let mut rx = store.subscribe();
        let result = store
            .append(vec![envelope(id, 1)], AppendOptions::expect_new())
            .await;
        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { .. })
        ));
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn append_without_subscribers_succeeds() {
        let store = BroadcastEventStore::new(InMemoryEventStore::new());
        let id = AggregateId::new();
        let version = store
            .append(vec![envelope(id, 1)], AppendOptions::expect_new())
            .await
            .unwrap();
        assert_eq!(version, Version::new(1));
        assert_eq!(store.inner().event_count().await, 1);
    }
}
