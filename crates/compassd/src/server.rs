//! Subsystem assembly and the serve loop.

use std::net::SocketAddr;
use std::sync::Arc;

use compass_api::ApiState;
use compass_constraint::{ConstraintEngine, OperatorRegistry};
use compass_core::CompassConfig;
use compass_formation::{ConsumerDirectory, Orchestrator, OrchestratorConfig, Sweeper};
use compass_notify::{Dispatcher, HttpTransport, RetryPolicy};
use compass_state::StateStore;
use compass_template::TemplateCache;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub async fn run(config: CompassConfig) -> anyhow::Result<()> {
    info!("Compass daemon starting");
    let settings = config.notifications.resolve()?;

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("compass.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let templates = Arc::new(TemplateCache::new());
    let transport = Arc::new(HttpTransport::new(settings.request_timeout)?);
    let retry = RetryPolicy {
        max_attempts: settings.retry_attempts,
        base_backoff: settings.retry_base_backoff,
        max_backoff: settings.retry_max_backoff,
    };
    let dispatcher = Dispatcher::new(transport, templates.clone(), retry);
    info!(
        timeout_ms = settings.request_timeout.as_millis() as u64,
        attempts = settings.retry_attempts,
        "webhook dispatcher initialized"
    );

    let constraints = ConstraintEngine::new(store.clone(), OperatorRegistry::with_defaults(), templates);
    info!("constraint engine initialized");

    let consumers = ConsumerDirectory::new(config.consumers.clone());
    if consumers.is_empty() {
        warn!("no consumers configured; every status callback will be rejected");
    } else {
        info!(consumers = consumers.len(), "consumer directory loaded");
    }

    let orchestrator = Orchestrator::new(
        store,
        constraints,
        dispatcher,
        consumers,
        OrchestratorConfig {
            notification_timeout: retry.worst_case_delay(settings.request_timeout),
        },
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let sweeper = Sweeper::new(orchestrator.clone(), settings.sweep_interval, settings.callback_timeout)
        .spawn(shutdown_rx);

    // ── Start API server ───────────────────────────────────────

    let router = compass_api::build_router(ApiState::new(orchestrator));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = sweeper.await;

    info!("Compass daemon stopped");
    Ok(())
}
