//! API server entry point.

use std::sync::Arc;
use std::time::Duration;

use api::config::{Config, LogFormat};
use api::{AppState, Providers};
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How long shutdown waits for background work before giving up.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (json, pretty) = match config.log_format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Pretty => (None, Some(tracing_subscriber::fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .init();
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);
    if config.uses_dev_secrets() {
        tracing::warn!("APPROVAL_SECRET or PAYMENT_WEBHOOK_SECRET not set, using development keys");
    }

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the event store and run
    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresEventStore::connect(&url)
                .await
                .expect("failed to connect to Postgres");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using Postgres event store");
            serve(store, config, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, events are kept in memory only");
            serve(InMemoryEventStore::new(), config, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}

async fn serve<S: EventStore + Clone + 'static>(
    store: S,
    config: Config,
    metrics_handle: PrometheusHandle,
) {
    let providers = Providers::in_memory(config.payment_webhook_secret.as_bytes())
        .expect("invalid PAYMENT_WEBHOOK_SECRET");
    let state = api::create_state(
        store,
        &providers,
        config.approval_secret.as_bytes(),
        config.pipeline.clone(),
    )
    .expect("invalid APPROVAL_SECRET");

    // Sessions interrupted by the last shutdown pick up where they stopped.
    resume_sessions(&state).await;

    let cancel = CancellationToken::new();
    let reconciler = Arc::clone(&state.reconciler);
    let reconciler_cancel = cancel.clone();
    state.tasks.spawn(async move {
        reconciler.run(reconciler_cancel).await;
    });

    let app = api::create_app(Arc::clone(&state), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Stop the reconciler, then give in-flight generation runs a moment.
    cancel.cancel();
    state.tasks.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, state.tasks.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            remaining = state.tasks.len(),
            "background tasks still running at shutdown; they resume on next start"
        );
    }
}

async fn resume_sessions<S: EventStore + Clone + 'static>(state: &AppState<S>) {
    match state.worker.resume_pending().await {
        Ok(pending) => {
            if !pending.is_empty() {
                tracing::info!(count = pending.len(), "resuming in-flight sessions");
            }
            for session_id in pending {
                state.spawn_generation(session_id);
            }
        }
        Err(e) => tracing::error!(error = %e, "could not list in-flight sessions"),
    }
}
