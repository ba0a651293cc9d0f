//! Reconciliation engine: finds paid orders the partner never confirmed
//! and orders stuck without tracking.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Order, OrderService, ReasonCode};
use event_store::EventStore;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::coordinator::{OrderCoordinator, SubmissionOutcome};
use crate::error::Result;
use crate::retry::with_timeout;
use crate::services::FulfillmentProvider;

/// Tally of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub scanned: usize,
    /// Orders skipped because their fulfillment already finished.
    pub settled: usize,
    pub submitted: usize,
    /// References found by read-back and recorded without resubmitting.
    pub recovered: usize,
    pub ambiguous: usize,
    pub rejected: usize,
    pub dead_lettered: usize,
    pub refreshed: usize,
    pub overdue_flagged: usize,
    pub errors: usize,
}

impl ReconciliationReport {
    /// Returns true if the pass changed or flagged anything.
    pub fn acted(&self) -> bool {
        self.submitted
            + self.recovered
            + self.ambiguous
            + self.rejected
            + self.dead_lettered
            + self.overdue_flagged
            + self.errors
            > 0
    }
}

/// Periodic scanner over the order store.
///
/// Never resubmits without reading back first: a submission that timed out
/// may have landed at the partner.
pub struct Reconciler<S: EventStore> {
    orders: OrderService<S>,
    coordinator: Arc<OrderCoordinator<S>>,
    fulfillment: Arc<dyn FulfillmentProvider>,
    config: PipelineConfig,
    /// Orders whose fulfillment reached a terminal state. Terminal states
    /// never change, so these are skipped without replaying their events.
    settled: RwLock<HashSet<AggregateId>>,
}

impl<S: EventStore> Reconciler<S> {
    pub fn new(
        store: S,
        coordinator: Arc<OrderCoordinator<S>>,
        fulfillment: Arc<dyn FulfillmentProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            orders: OrderService::new(store),
            coordinator,
            fulfillment,
            config,
            settled: RwLock::new(HashSet::new()),
        }
    }

    /// Scans once right away, then every `scan_interval` until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_ms = self.config.scan_interval.as_millis() as u64,
            "reconciler started"
        );

        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("reconciler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_once_at(Utc::now()).await {
                        Ok(report) if report.acted() => {
                            tracing::info!(?report, "reconciliation pass finished");
                        }
                        Ok(report) => tracing::debug!(scanned = report.scanned, "nothing to reconcile"),
                        Err(e) => tracing::error!(error = %e, "reconciliation pass failed"),
                    }
                }
            }
        }
    }

    /// One pass over every open order, as of `now`.
    ///
    /// An order that cannot be loaded counts as an error and the pass moves
    /// on to the next one.
    #[tracing::instrument(skip(self))]
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<ReconciliationReport> {
        let started = Instant::now();
        metrics::counter!("reconciliation_runs_total").increment(1);

        let mut report = ReconciliationReport::default();
        let grace = chrono::Duration::from_std(self.config.grace_period)
            .unwrap_or(chrono::Duration::MAX);

        let ids = self.orders.order_ids().await?;
        let open: Vec<AggregateId> = {
            let settled = self.settled.read().await;
            ids.into_iter().filter(|id| !settled.contains(id)).collect()
        };

        for order_id in open {
            let order = match self.orders.get_order(order_id).await {
                Ok(Some(order)) => order,
                Ok(None) => continue,
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(%order_id, error = %e, "order could not be loaded");
                    continue;
                }
            };
            if order.fulfillment_status().is_terminal() {
                self.settled.write().await.insert(order_id);
                report.settled += 1;
                continue;
            }
            report.scanned += 1;

            let result = if order.needs_submission() {
                let old_enough = order.created_at().is_some_and(|at| now - at > grace);
                if old_enough {
                    self.reconcile_submission(order_id, &order, &mut report).await
                } else {
                    Ok(())
                }
            } else if order.is_dead_lettered() && order.provider_ref().is_none() {
                self.read_back_dead_letter(order_id, &mut report).await
            } else if order.awaiting_tracking() {
                self.reconcile_tracking(order_id, now, &mut report).await
            } else {
                Ok(())
            };

            if let Err(e) = result {
                report.errors += 1;
                tracing::warn!(%order_id, error = %e, "order reconciliation failed");
            }
        }

        metrics::histogram!("reconciliation_run_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(report)
    }

    async fn reconcile_submission(
        &self,
        order_id: AggregateId,
        order: &Order,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        if order.submission_attempts() >= self.config.max_submission_attempts {
            let result = self
                .orders
                .dead_letter(order_id, ReasonCode::RetriesExhausted)
                .await?;
            if !result.is_noop() {
                metrics::counter!("orders_dead_lettered_total").increment(1);
                tracing::error!(
                    %order_id,
                    attempts = order.submission_attempts(),
                    "order dead-lettered"
                );
                report.dead_lettered += 1;
            }
            return Ok(());
        }

        let key = order_id.to_string();
        match with_timeout(self.config.provider_timeout, self.fulfillment.find_order(&key)).await {
            Ok(Some(provider_ref)) => {
                if self.coordinator.record_read_back(order_id, provider_ref).await? {
                    metrics::counter!("reconciliation_read_back_recovered_total").increment(1);
                    tracing::info!(%order_id, "submission recovered by read-back");
                    report.recovered += 1;
                }
            }
            Ok(None) => match self.coordinator.submit_to_fulfillment(order_id).await? {
                SubmissionOutcome::Submitted { .. } => report.submitted += 1,
                SubmissionOutcome::Ambiguous => report.ambiguous += 1,
                SubmissionOutcome::Rejected { .. } => report.rejected += 1,
                SubmissionOutcome::Superseded => {}
            },
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "read-back failed");
                self.orders
                    .record_attempt_failure(order_id, e.is_ambiguous(), format!("read-back failed: {e}"))
                    .await?;
                report.errors += 1;
            }
        }
        Ok(())
    }

    /// A dead-lettered order may still have landed at the partner; a read
    /// is harmless and takes it off the queue if so.
    async fn read_back_dead_letter(
        &self,
        order_id: AggregateId,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        let key = order_id.to_string();
        let found =
            with_timeout(self.config.provider_timeout, self.fulfillment.find_order(&key)).await?;
        if let Some(provider_ref) = found
            && self.coordinator.record_read_back(order_id, provider_ref).await?
        {
            metrics::counter!("reconciliation_read_back_recovered_total").increment(1);
            tracing::info!(%order_id, "dead-lettered order found at partner");
            report.recovered += 1;
        }
        Ok(())
    }

    async fn reconcile_tracking(
        &self,
        order_id: AggregateId,
        now: DateTime<Utc>,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        let order = self.coordinator.refresh_fulfillment(order_id).await?;
        report.refreshed += 1;

        if !order.awaiting_tracking() || order.is_tracking_overdue() {
            return Ok(());
        }
        let sla = chrono::Duration::from_std(self.config.tracking_sla)
            .unwrap_or(chrono::Duration::MAX);
        let overdue = order.submitted_at().is_some_and(|at| now - at > sla);
        if overdue {
            let result = self.orders.flag_tracking_overdue(order_id).await?;
            if !result.is_noop() {
                tracing::warn!(%order_id, "tracking overdue");
                report.overdue_flagged += 1;
            }
        }
        Ok(())
    }

    /// Orders parked for an operator.
    pub async fn dead_letters(&self) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .list_orders()
            .await?
            .into_iter()
            .filter(Order::is_dead_lettered)
            .collect())
    }

    /// Returns a dead-lettered order to the scanner with a fresh attempt
    /// budget.
    #[tracing::instrument(skip(self))]
    pub async fn release_dead_letter(
        &self,
        order_id: AggregateId,
        released_by: Option<String>,
    ) -> Result<Order> {
        self.coordinator.order(order_id).await?;
        let result = self
            .orders
            .release_dead_letter(order_id, released_by)
            .await?;
        tracing::info!(%order_id, "dead letter released");
        Ok(result.aggregate)
    }

    /// Everything that needs a human: dead letters, overdue tracking and
    /// queued refunds.
    pub async fn review_queue(&self) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .list_orders()
            .await?
            .into_iter()
            .filter(Order::needs_review)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalSigner;
    use crate::error::ProviderError;
    use crate::services::{InMemoryFulfillmentProvider, InMemoryPaymentProcessor};
    use domain::{FulfillmentStatus, Money, NewOrder, OrderItem, PriceBreakdown, ShippingAddress};
    use event_store::{AppendOptions, EventEnvelope, InMemoryEventStore, Version};
    use std::time::Duration;

    struct Harness {
        store: InMemoryEventStore,
        fulfillment: InMemoryFulfillmentProvider,
        coordinator: Arc<OrderCoordinator<InMemoryEventStore>>,
        reconciler: Reconciler<InMemoryEventStore>,
    }

    fn harness() -> Harness {
        let store = InMemoryEventStore::new();
        let fulfillment = InMemoryFulfillmentProvider::new();
        let config = PipelineConfig {
            max_submission_attempts: 2,
            ..PipelineConfig::fast()
        };
        let coordinator = Arc::new(OrderCoordinator::new(
            store.clone(),
            ApprovalSigner::new(b"approval").unwrap(),
            Arc::new(InMemoryPaymentProcessor::new(b"whsec").unwrap()),
            Arc::new(fulfillment.clone()),
            config.clone(),
        ));
        Harness {
            reconciler: Reconciler::new(
                store.clone(),
                Arc::clone(&coordinator),
                Arc::new(fulfillment.clone()),
                config,
            ),
            store,
            fulfillment,
            coordinator,
        }
    }

    async fn paid_order(store: &InMemoryEventStore) -> AggregateId {
        let items = vec![OrderItem::new("mug-white", 1, Money::from_minor(1200))];
        let breakdown =
            PriceBreakdown::compute(&items, Money::zero(), Money::zero(), Money::zero(), "USD")
                .unwrap();
        let order_id = AggregateId::new();
        OrderService::new(store.clone())
            .create_order(
                order_id,
                NewOrder {
                    owner: None,
                    session_id: None,
                    payment_ref: format!("pi_{order_id}"),
                    items,
                    breakdown,
                    shipping_address: ShippingAddress {
                        name: "Katherine".to_string(),
                        line1: "1 Langley Blvd".to_string(),
                        city: "Hampton".to_string(),
                        postal_code: "23681".to_string(),
                        country: "US".to_string(),
                        ..Default::default()
                    },
                },
            )
            .await
            .unwrap();
        order_id
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::minutes(5)
    }

    #[tokio::test]
    async fn young_orders_are_left_alone() {
        let h = harness();
        paid_order(&h.store).await;

        let report = h.reconciler.run_once_at(Utc::now()).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert!(!report.acted());
        assert_eq!(h.fulfillment.find_calls(), 0);
    }

    #[tokio::test]
    async fn missing_submission_is_sent() {
        let h = harness();
        let order_id = paid_order(&h.store).await;

        let report = h.reconciler.run_once_at(later()).await.unwrap();
        assert_eq!(report.submitted, 1);
        let order = h.coordinator.order(order_id).await.unwrap();
        assert_eq!(order.fulfillment_status(), FulfillmentStatus::Submitted);
    }

    #[tokio::test]
    async fn read_back_recovers_a_timed_out_submission() {
        let h = harness();
        let order_id = paid_order(&h.store).await;
        h.fulfillment.commit_then_timeout(1);
        assert_eq!(
            h.coordinator.submit_to_fulfillment(order_id).await.unwrap(),
            SubmissionOutcome::Ambiguous
        );

        let report = h.reconciler.run_once_at(later()).await.unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(report.submitted, 0);
        assert_eq!(h.fulfillment.submit_calls(), 1);
        assert_eq!(h.fulfillment.order_count(), 1);

        let order = h.coordinator.order(order_id).await.unwrap();
        assert_eq!(order.provider_ref(), h.fulfillment.reference_for(&order_id.to_string()).as_deref());
    }

    #[tokio::test]
    async fn exhausted_order_is_dead_lettered_then_released() {
        let h = harness();
        let order_id = paid_order(&h.store).await;
        let busy = || ProviderError::Unavailable {
            status: 503,
            message: "busy".to_string(),
        };
        h.fulfillment.fail_next_submits([busy(), busy()]);

        h.reconciler.run_once_at(later()).await.unwrap();
        h.reconciler.run_once_at(later()).await.unwrap();
        let report = h.reconciler.run_once_at(later()).await.unwrap();
        assert_eq!(report.dead_lettered, 1);

        let parked = h.reconciler.dead_letters().await.unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(
            parked[0].dead_letter_reason(),
            Some(ReasonCode::RetriesExhausted)
        );
        assert_eq!(h.reconciler.review_queue().await.unwrap().len(), 1);

        // Parked orders are not resubmitted.
        h.reconciler.run_once_at(later()).await.unwrap();
        assert_eq!(h.fulfillment.submit_calls(), 2);

        let released = h.reconciler.release_dead_letter(order_id, Some("ops".to_string())).await.unwrap();
        assert_eq!(released.submission_attempts(), 0);

        let report = h.reconciler.run_once_at(later()).await.unwrap();
        assert_eq!(report.submitted, 1);
        assert!(h.reconciler.dead_letters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overdue_tracking_is_flagged_once_without_resubmitting() {
        let h = harness();
        let order_id = paid_order(&h.store).await;
        h.coordinator.submit_to_fulfillment(order_id).await.unwrap();
        let far_future = Utc::now() + chrono::Duration::hours(49);

        let report = h.reconciler.run_once_at(far_future).await.unwrap();
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.overdue_flagged, 1);

        let report = h.reconciler.run_once_at(far_future).await.unwrap();
        assert_eq!(report.overdue_flagged, 0);
        assert_eq!(h.fulfillment.submit_calls(), 1);

        let order = h.coordinator.order(order_id).await.unwrap();
        assert!(order.is_tracking_overdue());
        assert!(order.needs_review());
    }

    #[tokio::test]
    async fn refresh_picks_up_tracking_before_the_deadline() {
        let h = harness();
        let order_id = paid_order(&h.store).await;
        let SubmissionOutcome::Submitted { provider_ref } =
            h.coordinator.submit_to_fulfillment(order_id).await.unwrap()
        else {
            panic!("expected submission");
        };
        h.fulfillment
            .set_status(&provider_ref, FulfillmentStatus::Shipped, Some("TRK42"));

        let report = h.reconciler.run_once_at(later()).await.unwrap();
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.overdue_flagged, 0);
        let order = h.coordinator.order(order_id).await.unwrap();
        assert_eq!(order.tracking_code(), Some("TRK42"));
    }

    #[tokio::test]
    async fn delivered_orders_are_not_rescanned() {
        let h = harness();
        let order_id = paid_order(&h.store).await;
        let SubmissionOutcome::Submitted { provider_ref } =
            h.coordinator.submit_to_fulfillment(order_id).await.unwrap()
        else {
            panic!("expected submission");
        };
        h.fulfillment
            .set_status(&provider_ref, FulfillmentStatus::Delivered, Some("TRK7"));

        let report = h.reconciler.run_once_at(later()).await.unwrap();
        assert_eq!(report.refreshed, 1);
        let status_calls = h.fulfillment.status_calls();

        let report = h.reconciler.run_once_at(later()).await.unwrap();
        assert_eq!(report.settled, 1);
        assert_eq!(report.scanned, 0);

        let report = h.reconciler.run_once_at(later()).await.unwrap();
        assert_eq!(report.settled, 0);
        assert_eq!(report.scanned, 0);
        assert_eq!(h.fulfillment.status_calls(), status_calls);
    }

    #[tokio::test]
    async fn unreadable_order_does_not_stop_the_pass() {
        let h = harness();
        let corrupt = EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("Order")
            .event_type("OrderCreated")
            .version(Version::first())
            .payload_raw(serde_json::json!({"unexpected": true}))
            .build()
            .unwrap();
        h.store
            .append(vec![corrupt], AppendOptions::expect_new())
            .await
            .unwrap();
        let order_id = paid_order(&h.store).await;

        let report = h.reconciler.run_once_at(later()).await.unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.scanned, 1);
        assert_eq!(report.submitted, 1);
        let order = h.coordinator.order(order_id).await.unwrap();
        assert_eq!(order.fulfillment_status(), FulfillmentStatus::Submitted);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let h = harness();
        let reconciler = Arc::new(h.reconciler);
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let reconciler = Arc::clone(&reconciler);
            let cancel = cancel.clone();
            async move { reconciler.run(cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
