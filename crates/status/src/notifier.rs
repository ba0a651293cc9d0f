//! Per-session and per-order status streams.

use std::pin::Pin;
use std::sync::Arc;

use common::AggregateId;
use domain::{Aggregate, CommandHandler, DesignSession, Order, SessionEvent, Stage};
use event_store::{EventEnvelope, EventStore};
use futures_core::Stream;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::broadcast_store::BroadcastEventStore;
use crate::error::{Result, StatusError};
use crate::events::{OrderSnapshot, SessionSnapshot, StageEvent, StagePosition};

/// Stream of status updates for one session.
pub type StageEventStream = Pin<Box<dyn Stream<Item = StageEvent> + Send>>;

/// Stream of snapshots for one order.
pub type OrderStream = Pin<Box<dyn Stream<Item = OrderSnapshot> + Send>>;

/// Pushes status changes to subscribed clients and serves snapshots.
///
/// Delivery is at-least-once and monotonic within one session: a stream
/// never yields a position older than one it already yielded. Nothing is
/// promised across sessions.
pub struct StatusNotifier<S: EventStore> {
    store: BroadcastEventStore<S>,
    sessions: Arc<CommandHandler<BroadcastEventStore<S>, DesignSession>>,
    orders: Arc<CommandHandler<BroadcastEventStore<S>, Order>>,
}

impl<S: EventStore> Clone for StatusNotifier<S>
where
    BroadcastEventStore<S>: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            sessions: Arc::clone(&self.sessions),
            orders: Arc::clone(&self.orders),
        }
    }
}

impl<S> StatusNotifier<S>
where
    S: EventStore + Clone + 'static,
{
    pub fn new(store: BroadcastEventStore<S>) -> Self {
        Self {
            sessions: Arc::new(CommandHandler::new(store.clone())),
            orders: Arc::new(CommandHandler::new(store.clone())),
            store,
        }
    }

    /// Loads the current state of a session from the store.
    pub async fn snapshot(&self, session_id: AggregateId) -> Result<SessionSnapshot> {
        let session = self.sessions.load(session_id).await?;
        SessionSnapshot::from_session(&session).ok_or(StatusError::SessionNotFound(session_id))
    }

    /// Loads the current state of an order from the store.
    pub async fn snapshot_order(&self, order_id: AggregateId) -> Result<OrderSnapshot> {
        let order = self.orders.load(order_id).await?;
        OrderSnapshot::from_order(&order).ok_or(StatusError::OrderNotFound(order_id))
    }

    /// Subscribes to one session's status.
    ///
    /// The stream starts with the current snapshot, then follows live
    /// events. It ends after yielding `ready`; a `failed` session may still
    /// be requeued, so the stream stays open.
    pub async fn subscribe(&self, session_id: AggregateId) -> Result<StageEventStream> {
        // Subscribe before reading so nothing committed in between is missed.
        let rx = self.store.subscribe();
        let snapshot = self.snapshot(session_id).await?;

        let feed = SessionFeed {
            notifier: self.clone(),
            session_id,
            rx,
            pending: Some(StageEvent::from(&snapshot)),
            last: None,
            finished: false,
        };

        Ok(Box::pin(futures_util::stream::unfold(
            feed,
            |mut feed| async move {
                let event = feed.next_event().await?;
                Some((event, feed))
            },
        )))
    }

    /// Subscribes to one order's snapshots, starting with the current one.
    pub async fn subscribe_order(&self, order_id: AggregateId) -> Result<OrderStream> {
        let rx = self.store.subscribe();
        let snapshot = self.snapshot_order(order_id).await?;

        let feed = OrderFeed {
            notifier: self.clone(),
            order_id,
            rx,
            pending: Some(snapshot),
            last_version: 0,
        };

        Ok(Box::pin(futures_util::stream::unfold(
            feed,
            |mut feed| async move {
                let snapshot = feed.next_snapshot().await?;
                Some((snapshot, feed))
            },
        )))
    }
}

struct SessionFeed<S: EventStore> {
    notifier: StatusNotifier<S>,
    session_id: AggregateId,
    rx: broadcast::Receiver<EventEnvelope>,
    pending: Option<StageEvent>,
    last: Option<StagePosition>,
    finished: bool,
}

impl<S> SessionFeed<S>
where
    S: EventStore + Clone + 'static,
{
    async fn next_event(&mut self) -> Option<StageEvent> {
        if self.finished {
            return None;
        }
        if let Some(event) = self.pending.take()
            && let Some(event) = self.accept(event)
        {
            return Some(event);
        }

        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if !self.is_status_change(&envelope) {
                        continue;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(
                        session_id = %self.session_id,
                        skipped,
                        "status stream lagged, re-reading snapshot"
                    );
                }
                Err(RecvError::Closed) => return None,
            }

            // The snapshot may already include later events; the position
            // filter drops whatever was yielded before.
            let snapshot = match self.notifier.snapshot(self.session_id).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(session_id = %self.session_id, error = %e, "snapshot reload failed");
                    continue;
                }
            };
            if let Some(event) = self.accept(StageEvent::from(&snapshot)) {
                return Some(event);
            }
        }
    }

    fn is_status_change(&self, envelope: &EventEnvelope) -> bool {
        if envelope.aggregate_id != self.session_id
            || !envelope.is_for(DesignSession::aggregate_type())
        {
            return false;
        }
        match envelope.decode::<SessionEvent>() {
            Ok(event) => event.is_status_change(),
            Err(e) => {
                tracing::warn!(event_type = %envelope.event_type, error = %e, "undecodable session event");
                false
            }
        }
    }

    fn accept(&mut self, event: StageEvent) -> Option<StageEvent> {
        let position = event.position();
        if self.last.is_some_and(|last| position <= last) {
            return None;
        }
        self.last = Some(position);
        self.finished = event.stage == Stage::Ready;
        Some(event)
    }
}

struct OrderFeed<S: EventStore> {
    notifier: StatusNotifier<S>,
    order_id: AggregateId,
    rx: broadcast::Receiver<EventEnvelope>,
    pending: Option<OrderSnapshot>,
    last_version: i64,
}

impl<S> OrderFeed<S>
where
    S: EventStore + Clone + 'static,
{
    async fn next_snapshot(&mut self) -> Option<OrderSnapshot> {
        if let Some(snapshot) = self.pending.take() {
            self.last_version = snapshot.version;
            return Some(snapshot);
        }

        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if envelope.aggregate_id != self.order_id
                        || !envelope.is_for(Order::aggregate_type())
                        || envelope.version.as_i64() <= self.last_version
                    {
                        continue;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(order_id = %self.order_id, skipped, "order stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }

            match self.notifier.snapshot_order(self.order_id).await {
                Ok(snapshot) if snapshot.version > self.last_version => {
                    self.last_version = snapshot.version;
                    return Some(snapshot);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(order_id = %self.order_id, error = %e, "order snapshot reload failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{ReasonCode, SessionService, StyleHints};
    use event_store::InMemoryEventStore;
    use futures_util::StreamExt;

    async fn setup() -> (
        SessionService<BroadcastEventStore<InMemoryEventStore>>,
        StatusNotifier<InMemoryEventStore>,
        AggregateId,
    ) {
        let store = BroadcastEventStore::new(InMemoryEventStore::new());
        let service = SessionService::new(store.clone());
        let notifier = StatusNotifier::new(store);
        let id = service
            .create_session(
                None,
                "a lighthouse".to_string(),
                StyleHints::default(),
                "en".to_string(),
            )
            .await
            .unwrap()
            .aggregate
            .id()
            .unwrap();
        (service, notifier, id)
    }

    #[tokio::test]
    async fn stream_starts_with_snapshot() {
        let (_service, notifier, id) = setup().await;
        let mut stream = notifier.subscribe(id).await.unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(first.session_id, id);
        assert_eq!(first.stage, Stage::Queued);
    }

    #[tokio::test]
    async fn stream_follows_live_transitions() {
        let (service, notifier, id) = setup().await;
        let mut stream = notifier.subscribe(id).await.unwrap();
        assert_eq!(stream.next().await.unwrap().stage, Stage::Queued);

        service
            .start_generation(id, "job-1".to_string())
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().stage, Stage::GeneratingBrief);

        service
            .report_progress(id, Stage::GeneratingBrief, 20, "drafting".to_string())
            .await
            .unwrap();
        let event = stream.next().await.unwrap();
        assert_eq!(event.progress, 20);
        assert_eq!(event.message, "drafting");
    }

    #[tokio::test]
    async fn failure_then_requeue_is_forward() {
        let (service, notifier, id) = setup().await;
        service
            .start_generation(id, "job-1".to_string())
            .await
            .unwrap();

        let mut stream = notifier.subscribe(id).await.unwrap();
        assert_eq!(stream.next().await.unwrap().stage, Stage::GeneratingBrief);

        service
            .fail(
                id,
                Stage::GeneratingBrief,
                ReasonCode::ContentPolicy,
                "declined".to_string(),
            )
            .await
            .unwrap();
        let failed = stream.next().await.unwrap();
        assert_eq!(failed.stage, Stage::Failed);
        assert_eq!(
            failed.error.map(|e| e.reason),
            Some(ReasonCode::ContentPolicy)
        );

        service.requeue(id, 3).await.unwrap();
        let requeued = stream.next().await.unwrap();
        assert_eq!(requeued.stage, Stage::Queued);
        assert_eq!(requeued.retry_count, 1);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let store = BroadcastEventStore::new(InMemoryEventStore::new());
        let notifier = StatusNotifier::new(store);
        let missing = AggregateId::new();

        assert!(matches!(
            notifier.snapshot(missing).await,
            Err(StatusError::SessionNotFound(id)) if id == missing
        ));
        assert!(notifier.subscribe(missing).await.is_err());
    }

    #[tokio::test]
    async fn lagged_receiver_recovers_from_snapshot() {
        let store = BroadcastEventStore::with_capacity(InMemoryEventStore::new(), 2);
        let service = SessionService::new(store.clone());
        let notifier = StatusNotifier::new(store);
        let id = service
            .create_session(None, "x".to_string(), StyleHints::default(), "en".to_string())
            .await
            .unwrap()
            .aggregate
            .id()
            .unwrap();

        let mut stream = notifier.subscribe(id).await.unwrap();
        assert_eq!(stream.next().await.unwrap().stage, Stage::Queued);

        // Overflow the two-slot buffer before the stream reads again.
        service
            .start_generation(id, "job-1".to_string())
            .await
            .unwrap();
        for progress in [12, 14, 16, 18] {
            service
                .report_progress(id, Stage::GeneratingBrief, progress, String::new())
                .await
                .unwrap();
        }

        let event = stream.next().await.unwrap();
        assert_eq!(event.stage, Stage::GeneratingBrief);
        assert_eq!(event.progress, 18);
    }
}
