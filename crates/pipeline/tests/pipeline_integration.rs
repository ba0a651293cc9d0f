//! End-to-end pipeline scenarios over a broadcasting in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::AggregateId;
use domain::{
    Aggregate, FulfillmentStatus, Money, OrderItem, OrderService, ReasonCode, SessionError,
    SessionService, ShippingAddress, Stage, StyleHints,
};
use event_store::{EventStore, InMemoryEventStore};
use futures_util::StreamExt;
use pipeline::services::{
    GenerationRequest, GenerationService, GenerationUpdate, InMemoryFulfillmentProvider,
    InMemoryGenerationService, InMemoryPaymentProcessor, JobHandle, PaymentOutcome,
};
use pipeline::{
    AdvanceOutcome, ApprovalGate, ApprovalSigner, CheckoutRequest, GenerationWorker,
    OrderCoordinator, PipelineConfig, ProviderError, Reconciler, SubmissionOutcome,
    WebhookOutcome,
};
use status::{BroadcastEventStore, StatusNotifier};
use tokio::sync::Barrier;

type Store = BroadcastEventStore<InMemoryEventStore>;

struct Pipeline {
    store: Store,
    generation: InMemoryGenerationService,
    payments: InMemoryPaymentProcessor,
    fulfillment: InMemoryFulfillmentProvider,
    sessions: SessionService<Store>,
    worker: Arc<GenerationWorker<Store>>,
    gate: ApprovalGate<Store>,
    coordinator: Arc<OrderCoordinator<Store>>,
    reconciler: Reconciler<Store>,
    notifier: StatusNotifier<InMemoryEventStore>,
}

fn pipeline_with(config: PipelineConfig) -> Pipeline {
    let store = BroadcastEventStore::new(InMemoryEventStore::new());
    let generation = InMemoryGenerationService::new();
    let payments = InMemoryPaymentProcessor::new(b"whsec_integration").unwrap();
    let fulfillment = InMemoryFulfillmentProvider::new();
    let signer = ApprovalSigner::new(b"approval_integration").unwrap();

    let coordinator = Arc::new(OrderCoordinator::new(
        store.clone(),
        signer.clone(),
        Arc::new(payments.clone()),
        Arc::new(fulfillment.clone()),
        config.clone(),
    ));
    Pipeline {
        sessions: SessionService::new(store.clone()),
        worker: Arc::new(GenerationWorker::new(
            store.clone(),
            Arc::new(generation.clone()),
            config.clone(),
        )),
        gate: ApprovalGate::new(store.clone(), signer),
        reconciler: Reconciler::new(
            store.clone(),
            Arc::clone(&coordinator),
            Arc::new(fulfillment.clone()),
            config,
        ),
        notifier: StatusNotifier::new(store.clone()),
        coordinator,
        store,
        generation,
        payments,
        fulfillment,
    }
}

fn pipeline() -> Pipeline {
    pipeline_with(PipelineConfig::fast())
}

async fn create_session(p: &Pipeline, prompt: &str) -> AggregateId {
    p.sessions
        .create_session(
            None,
            prompt.to_string(),
            StyleHints::new(["minimal"]),
            "en".to_string(),
        )
        .await
        .unwrap()
        .aggregate
        .id()
        .unwrap()
}

fn cart() -> CheckoutRequest {
    CheckoutRequest {
        items: vec![OrderItem::new("poster-a3", 1, Money::from_minor(2400))],
        shipping: Money::from_minor(499),
        tax: Money::zero(),
        discount: Money::zero(),
        currency: "EUR".to_string(),
        shipping_address: ShippingAddress {
            name: "Margaret Hamilton".to_string(),
            line1: "Kendall Sq 1".to_string(),
            city: "Cambridge".to_string(),
            postal_code: "02139".to_string(),
            country: "US".to_string(),
            ..Default::default()
        },
    }
}

/// Generates, approves and checks out a design. Returns the signed body of
/// the payment-succeeded notification.
async fn paid_checkout(p: &Pipeline) -> (AggregateId, Vec<u8>, String) {
    let session_id = create_session(p, "blue wave pattern").await;
    assert_eq!(p.worker.run(session_id).await.unwrap(), Stage::Ready);
    let token = p.gate.approve(session_id, true).await.unwrap().to_string();
    let intent = p.coordinator.begin_checkout(&token, cart()).await.unwrap();
    let (body, signature) = p
        .payments
        .webhook_payload(&intent.payment_ref, PaymentOutcome::Succeeded);
    (session_id, body, signature)
}

async fn stage_transitions(store: &Store, session_id: AggregateId) -> usize {
    store
        .get_events_for_aggregate(session_id)
        .await
        .unwrap()
        .iter()
        .filter(|e| e.event_type == "StageAdvanced")
        .count()
}

mod generation {
    use super::*;

    #[tokio::test]
    async fn blue_wave_pattern_reaches_ready() {
        let p = pipeline();
        let session_id = create_session(&p, "blue wave pattern").await;
        assert_eq!(
            p.sessions.get_session(session_id).await.unwrap().unwrap().stage(),
            Stage::Queued
        );

        assert_eq!(p.worker.run(session_id).await.unwrap(), Stage::Ready);

        let session = p.sessions.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.progress(), 100);
        assert!(!session.assets().is_empty());
        assert!(!session.assets()[0].preview_url.is_empty());
        // queued → generating_brief ... uploading → ready
        assert_eq!(stage_transitions(&p.store, session_id).await, 7);
    }

    /// Holds every poll until two callers are inside it, so both decide
    /// from the same loaded stage.
    struct LockstepGeneration {
        inner: InMemoryGenerationService,
        barrier: Barrier,
    }

    #[async_trait]
    impl GenerationService for LockstepGeneration {
        async fn start_generation(
            &self,
            request: GenerationRequest,
        ) -> Result<JobHandle, ProviderError> {
            self.inner.start_generation(request).await
        }

        async fn poll(&self, job: &JobHandle) -> Result<GenerationUpdate, ProviderError> {
            self.barrier.wait().await;
            self.inner.poll(job).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn racing_advances_produce_one_transition() {
        let p = pipeline();
        let lockstep = Arc::new(LockstepGeneration {
            inner: p.generation.clone(),
            barrier: Barrier::new(2),
        });
        let worker = Arc::new(GenerationWorker::new(
            p.store.clone(),
            lockstep,
            PipelineConfig::fast(),
        ));
        let session_id = create_session(&p, "racing").await;
        assert_eq!(worker.advance(session_id).await.unwrap(), AdvanceOutcome::Started);
        let before = stage_transitions(&p.store, session_id).await;

        let (a, b) = tokio::join!(
            tokio::spawn({
                let worker = Arc::clone(&worker);
                async move { worker.advance(session_id).await }
            }),
            tokio::spawn({
                let worker = Arc::clone(&worker);
                async move { worker.advance(session_id).await }
            }),
        );
        let outcomes = [a.unwrap().unwrap(), b.unwrap().unwrap()];

        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, AdvanceOutcome::Advanced { .. }))
                .count(),
            1
        );
        assert!(outcomes.contains(&AdvanceOutcome::Superseded));
        assert_eq!(stage_transitions(&p.store, session_id).await, before + 1);
        assert_eq!(
            p.sessions.get_session(session_id).await.unwrap().unwrap().stage(),
            Stage::GeneratingImages
        );
    }

    #[tokio::test]
    async fn transient_failures_then_retry_reach_ready() {
        let p = pipeline_with(PipelineConfig {
            max_stage_attempts: 1,
            ..PipelineConfig::fast()
        });
        p.generation.fail_next_starts([
            ProviderError::Timeout(std::time::Duration::from_millis(5)),
            ProviderError::Unavailable {
                status: 503,
                message: "overloaded".to_string(),
            },
        ]);
        let session_id = create_session(&p, "retry me").await;

        for _ in 0..2 {
            assert_eq!(p.worker.run(session_id).await.unwrap(), Stage::Failed);
            let failed = p.sessions.get_session(session_id).await.unwrap().unwrap();
            assert_eq!(
                failed.error().map(|e| e.reason),
                Some(ReasonCode::ProviderUnavailable)
            );
            p.worker.retry(session_id).await.unwrap();
        }

        assert_eq!(p.worker.run(session_id).await.unwrap(), Stage::Ready);
        let session = p.sessions.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.retry_count(), 2);
        assert!(session.retry_count() <= PipelineConfig::default().max_session_retries);
    }

    #[tokio::test]
    async fn retries_stop_at_the_cap() {
        let p = pipeline_with(PipelineConfig {
            max_stage_attempts: 1,
            max_session_retries: 1,
            ..PipelineConfig::fast()
        });
        p.generation.block_word("forbidden");
        let session_id = create_session(&p, "forbidden crest").await;

        assert_eq!(p.worker.run(session_id).await.unwrap(), Stage::Failed);
        p.worker.retry(session_id).await.unwrap();
        assert_eq!(p.worker.run(session_id).await.unwrap(), Stage::Failed);

        let err = p.worker.retry(session_id).await.unwrap_err();
        assert!(matches!(
            err.as_session(),
            Some(SessionError::RetryLimitExceeded { max_retries: 1 })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn observers_never_see_a_stage_go_backwards() {
        let p = pipeline();
        p.generation.set_polls_per_stage(2);
        let session_id = create_session(&p, "observed").await;
        let mut stream = p.notifier.subscribe(session_id).await.unwrap();

        // Two workers on the same session, racing each other.
        for _ in 0..2 {
            let worker = Arc::clone(&p.worker);
            tokio::spawn(async move { worker.run(session_id).await });
        }

        let mut seen = Vec::new();
        while let Some(event) = tokio::time::timeout(std::time::Duration::from_secs(5), stream.next())
            .await
            .unwrap()
        {
            seen.push(event);
        }

        assert_eq!(seen.first().map(|e| e.stage), Some(Stage::Queued));
        assert_eq!(seen.last().map(|e| e.stage), Some(Stage::Ready));
        assert!(!seen.last().unwrap().previews.is_empty());
        for pair in seen.windows(2) {
            assert!(pair[0].position() < pair[1].position(), "{pair:?}");
        }
    }
}

mod orders {
    use super::*;

    #[tokio::test]
    async fn duplicate_webhook_creates_one_order_and_one_submission() {
        let p = pipeline();
        let (session_id, body, signature) = paid_checkout(&p).await;

        let first = p
            .coordinator
            .handle_payment_webhook(&body, &signature)
            .await
            .unwrap();
        let second = p
            .coordinator
            .handle_payment_webhook(&body, &signature)
            .await
            .unwrap();

        let WebhookOutcome::OrderCreated {
            order_id,
            submission: Some(SubmissionOutcome::Submitted { .. }),
        } = first
        else {
            panic!("unexpected first outcome: {first:?}");
        };
        assert_eq!(second, WebhookOutcome::Duplicate { order_id });

        let orders = OrderService::new(p.store.clone()).list_orders().await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].session_id(), Some(session_id));
        assert_eq!(p.fulfillment.submit_calls(), 1);
        assert_eq!(p.fulfillment.order_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_webhooks_create_one_order_and_one_submission() {
        const DELIVERIES: usize = 8;

        for _ in 0..5 {
            let p = pipeline();
            let (session_id, body, signature) = paid_checkout(&p).await;
            let barrier = Arc::new(Barrier::new(DELIVERIES));

            let handles: Vec<_> = (0..DELIVERIES)
                .map(|_| {
                    let coordinator = Arc::clone(&p.coordinator);
                    let barrier = Arc::clone(&barrier);
                    let body = body.clone();
                    let signature = signature.clone();
                    tokio::spawn(async move {
                        barrier.wait().await;
                        coordinator.handle_payment_webhook(&body, &signature).await
                    })
                })
                .collect();

            let mut created = 0;
            let mut duplicates = 0;
            for handle in handles {
                match handle.await.unwrap().unwrap() {
                    WebhookOutcome::OrderCreated { .. } => created += 1,
                    WebhookOutcome::Duplicate { .. } => duplicates += 1,
                    other => panic!("unexpected outcome: {other:?}"),
                }
            }
            assert_eq!(created, 1);
            assert_eq!(duplicates, DELIVERIES - 1);

            let orders = OrderService::new(p.store.clone()).list_orders().await.unwrap();
            assert_eq!(orders.len(), 1);
            assert_eq!(orders[0].session_id(), Some(session_id));
            assert_eq!(p.fulfillment.submit_calls(), 1);
            assert_eq!(p.fulfillment.order_count(), 1);
        }
    }

    #[tokio::test]
    async fn forged_webhook_is_rejected() {
        let p = pipeline();
        let (_, body, _) = paid_checkout(&p).await;

        let err = p
            .coordinator
            .handle_payment_webhook(&body, "deadbeef")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            pipeline::PipelineError::Provider(ProviderError::InvalidSignature)
        ));
        assert!(OrderService::new(p.store.clone()).list_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeout_then_read_back_submits_once() {
        let p = pipeline();
        let (_, body, signature) = paid_checkout(&p).await;
        p.fulfillment.commit_then_timeout(1);

        let outcome = p
            .coordinator
            .handle_payment_webhook(&body, &signature)
            .await
            .unwrap();
        let WebhookOutcome::OrderCreated {
            order_id,
            submission: Some(SubmissionOutcome::Ambiguous),
        } = outcome
        else {
            panic!("unexpected outcome: {outcome:?}");
        };

        let report = p
            .reconciler
            .run_once_at(Utc::now() + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(report.recovered, 1);

        let order = p.coordinator.order(order_id).await.unwrap();
        assert_eq!(order.fulfillment_status(), FulfillmentStatus::Submitted);
        assert!(order.provider_ref().is_some());
        assert_eq!(p.fulfillment.submit_calls(), 1);
        assert_eq!(p.fulfillment.order_count(), 1);
    }

    #[tokio::test]
    async fn consent_false_is_rejected_and_nothing_changes() {
        let p = pipeline();
        let session_id = create_session(&p, "blue wave pattern").await;
        p.worker.run(session_id).await.unwrap();
        let before = p.store.get_events_for_aggregate(session_id).await.unwrap().len();

        let err = p.gate.approve(session_id, false).await.unwrap_err();
        assert!(matches!(err.as_session(), Some(SessionError::ConsentRequired)));

        let session = p.sessions.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.stage(), Stage::Ready);
        assert!(!session.consent_accepted());
        assert_eq!(
            p.store.get_events_for_aggregate(session_id).await.unwrap().len(),
            before
        );
        assert!(OrderService::new(p.store.clone()).list_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn order_stream_follows_fulfillment() {
        let p = pipeline();
        let (_, body, signature) = paid_checkout(&p).await;
        let WebhookOutcome::OrderCreated {
            order_id,
            submission: Some(SubmissionOutcome::Submitted { provider_ref }),
        } = p
            .coordinator
            .handle_payment_webhook(&body, &signature)
            .await
            .unwrap()
        else {
            panic!("expected a submitted order");
        };

        let mut stream = p.notifier.subscribe_order(order_id).await.unwrap();
        let current = stream.next().await.unwrap();
        assert_eq!(current.status_message, "in production");

        p.fulfillment
            .set_status(&provider_ref, FulfillmentStatus::Delivered, Some("TRK-9"));
        p.coordinator.refresh_fulfillment(order_id).await.unwrap();

        let delivered = stream.next().await.unwrap();
        assert_eq!(delivered.fulfillment_status, FulfillmentStatus::Delivered);
        assert_eq!(delivered.tracking_code.as_deref(), Some("TRK-9"));
    }

    #[tokio::test]
    async fn refund_webhook_is_recorded() {
        let p = pipeline();
        let (_, body, signature) = paid_checkout(&p).await;
        let WebhookOutcome::OrderCreated { order_id, .. } = p
            .coordinator
            .handle_payment_webhook(&body, &signature)
            .await
            .unwrap()
        else {
            panic!("expected an order");
        };
        let order = p.coordinator.order(order_id).await.unwrap();

        let (body, signature) = p.payments.webhook_payload(
            order.payment_ref(),
            PaymentOutcome::Refunded {
                refund_ref: "re_ext_1".to_string(),
                amount: Money::from_minor(500),
            },
        );
        let outcome = p
            .coordinator
            .handle_payment_webhook(&body, &signature)
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::RefundRecorded { order_id });
        assert_eq!(
            p.coordinator.order(order_id).await.unwrap().refunded(),
            Money::from_minor(500)
        );
    }
}
