use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventQuery, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

/// In-memory event store.
///
/// Used by tests and by the API when no `DATABASE_URL` is configured. The
/// write lock is held for the whole version check and insert, so an append
/// is a true compare-and-set.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }
}

fn current_version(events: &[EventEnvelope], aggregate_id: AggregateId) -> Version {
    events
        .iter()
        .filter(|e| e.aggregate_id == aggregate_id)
        .map(|e| e.version)
        .max()
        .unwrap_or(Version::initial())
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_new_version = events[0].version;

        let mut store = self.events.write().await;
        let current = current_version(&store, aggregate_id);

        if let Some(expected) = options.expected_version
            && current != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            });
        }

        // Mirrors the unique (aggregate_id, version) constraint of the
        // Postgres table for unchecked appends.
        if first_new_version != current.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current),
                actual: current,
            });
        }

        let last_version = events.last().map(|e| e.version).unwrap_or(current);
        store.extend(events);

        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store.iter().filter(|e| query.matches(e)).cloned().collect();

        events.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.version.cmp(&b.version))
        });

        let events = events.into_iter().skip(query.offset.unwrap_or(0));
        Ok(match query.limit {
            Some(limit) => events.take(limit).collect(),
            None => events.collect(),
        })
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let store = self.events.read().await;
        let version = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max();
        Ok(version)
    }

    async fn aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>> {
        let store = self.events.read().await;
        // Events are held in append order; every stream opens at version 1.
        Ok(store
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type && e.version == Version::first())
            .map(|e| e.aggregate_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_event(
        aggregate_id: AggregateId,
        version: Version,
        event_type: &str,
    ) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("DesignSession")
            .event_type(event_type)
            .version(version)
            .payload_raw(serde_json::json!({"test": true}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        let events = vec![
            create_test_event(aggregate_id, Version::new(1), "SessionCreated"),
            create_test_event(aggregate_id, Version::new(2), "GenerationStarted"),
        ];

        let version = store
            .append(events, AppendOptions::expect_new())
            .await
            .unwrap();
        assert_eq!(version, Version::new(2));

        let stored = store.get_events_for_aggregate(aggregate_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].event_type, "GenerationStarted");
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test]
    async fn stale_writer_gets_conflict() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        store
            .append(
                vec![create_test_event(aggregate_id, Version::first(), "SessionCreated")],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();

        // Two writers both loaded version 1 and race to advance.
        let winner = store
            .append(
                vec![create_test_event(aggregate_id, Version::new(2), "StageAdvanced")],
                AppendOptions::expect_version(Version::first()),
            )
            .await;
        let loser = store
            .append(
                vec![create_test_event(aggregate_id, Version::new(2), "StageAdvanced")],
                AppendOptions::expect_version(Version::first()),
            )
            .await;

        assert!(winner.is_ok());
        let err = loser.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test]
    async fn expect_new_fails_for_existing_aggregate() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        store
            .append(
                vec![create_test_event(aggregate_id, Version::first(), "OrderCreated")],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();

        let result = store
            .append(
                vec![create_test_event(aggregate_id, Version::first(), "OrderCreated")],
                AppendOptions::expect_new(),
            )
            .await;
        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn unchecked_append_still_rejects_duplicate_versions() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        store
            .append(
                vec![create_test_event(aggregate_id, Version::first(), "A")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        let result = store
            .append(
                vec![create_test_event(aggregate_id, Version::first(), "B")],
                AppendOptions::new(),
            )
            .await;
        assert!(result.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn query_with_pagination() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();
        let events = (1..=5)
            .map(|v| create_test_event(aggregate_id, Version::new(v), "ProgressReported"))
            .collect();
        store.append(events, AppendOptions::expect_new()).await.unwrap();

        let page = store
            .query_events(EventQuery::for_aggregate(aggregate_id).offset(1).limit(2))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].version, Version::new(2));
        assert_eq!(page[1].version, Version::new(3));
    }

    #[tokio::test]
    async fn aggregate_ids_by_type_in_creation_order() {
        let store = InMemoryEventStore::new();
        let first = AggregateId::new();
        let second = AggregateId::new();

        for id in [first, second] {
            store
                .append(
                    vec![create_test_event(id, Version::first(), "SessionCreated")],
                    AppendOptions::expect_new(),
                )
                .await
                .unwrap();
        }
        store
            .append(
                vec![create_test_event(first, Version::new(2), "StageAdvanced")],
                AppendOptions::expect_version(Version::first()),
            )
            .await
            .unwrap();

        let ids = store.aggregate_ids("DesignSession").await.unwrap();
        assert_eq!(ids, vec![first, second]);
        assert!(store.aggregate_ids("Order").await.unwrap().is_empty());
    }
}
