//! HTTP surface for the design and fulfillment pipeline.
//!
//! Client-facing session, checkout and order endpoints, the payment
//! webhook, and the admin retries surface, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use domain::SessionService;
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use pipeline::services::{
    InMemoryFulfillmentProvider, InMemoryGenerationService, InMemoryPaymentProcessor,
};
use pipeline::{
    ApprovalGate, ApprovalSigner, GenerationWorker, OrderCoordinator, PipelineConfig,
    PipelineError, Reconciler,
};
use status::{BroadcastEventStore, StatusNotifier};
use tokio_util::task::TaskTracker;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// The store every component writes through, so status streams see each
/// committed event.
pub type SharedStore<S> = BroadcastEventStore<S>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub sessions: SessionService<SharedStore<S>>,
    pub worker: Arc<GenerationWorker<SharedStore<S>>>,
    pub approvals: ApprovalGate<SharedStore<S>>,
    pub coordinator: Arc<OrderCoordinator<SharedStore<S>>>,
    pub reconciler: Arc<Reconciler<SharedStore<S>>>,
    pub notifier: StatusNotifier<S>,
    /// Detached generation runs. Waited on at shutdown.
    pub tasks: TaskTracker,
}

impl<S: EventStore + Clone + 'static> AppState<S> {
    /// Runs a session to a terminal stage in the background.
    pub fn spawn_generation(&self, session_id: common::AggregateId) {
        let worker = Arc::clone(&self.worker);
        self.tasks.spawn(async move {
            if let Err(e) = worker.run(session_id).await {
                tracing::error!(%session_id, error = %e, "generation run aborted");
            }
        });
    }
}

/// In-process provider implementations.
#[derive(Clone)]
pub struct Providers {
    pub generation: InMemoryGenerationService,
    pub payments: InMemoryPaymentProcessor,
    pub fulfillment: InMemoryFulfillmentProvider,
}

impl Providers {
    pub fn in_memory(webhook_secret: &[u8]) -> Result<Self, PipelineError> {
        Ok(Self {
            generation: InMemoryGenerationService::new(),
            payments: InMemoryPaymentProcessor::new(webhook_secret)?,
            fulfillment: InMemoryFulfillmentProvider::new(),
        })
    }
}

/// Wires the pipeline over `store`.
pub fn create_state<S: EventStore + Clone + 'static>(
    store: S,
    providers: &Providers,
    approval_secret: &[u8],
    config: PipelineConfig,
) -> Result<Arc<AppState<S>>, PipelineError> {
    let store = BroadcastEventStore::new(store);
    let signer = ApprovalSigner::new(approval_secret)?;

    let coordinator = Arc::new(OrderCoordinator::new(
        store.clone(),
        signer.clone(),
        Arc::new(providers.payments.clone()),
        Arc::new(providers.fulfillment.clone()),
        config.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        Arc::clone(&coordinator),
        Arc::new(providers.fulfillment.clone()),
        config.clone(),
    ));
    let worker = Arc::new(GenerationWorker::new(
        store.clone(),
        Arc::new(providers.generation.clone()),
        config,
    ));

    Ok(Arc::new(AppState {
        sessions: SessionService::new(store.clone()),
        approvals: ApprovalGate::new(store.clone(), signer),
        notifier: StatusNotifier::new(store),
        worker,
        coordinator,
        reconciler,
        tasks: TaskTracker::new(),
    }))
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/sessions", post(routes::sessions::create::<S>))
        .route("/sessions/{id}", get(routes::sessions::get::<S>))
        .route("/sessions/{id}/events", get(routes::sessions::events::<S>))
        .route("/sessions/{id}/retry", post(routes::sessions::retry::<S>))
        .route("/sessions/{id}/product", put(routes::sessions::select_product::<S>))
        .route("/sessions/{id}/approve", post(routes::sessions::approve::<S>))
        .route("/sessions/{id}/abandon", post(routes::sessions::abandon::<S>))
        .route("/checkout", post(routes::checkout::begin::<S>))
        .route("/webhooks/payments", post(routes::checkout::payment_webhook::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/admin/retries", get(routes::admin::retries::<S>))
        .route("/admin/orders/{id}/release", post(routes::admin::release::<S>))
        .route("/admin/orders/{id}/refund", post(routes::admin::refund::<S>))
        .route("/admin/orders/{id}/cancel", post(routes::admin::cancel::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
