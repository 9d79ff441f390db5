//! Coordinator
//!
//! Entry point for the shared claw machine coordinator.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Spawn the coordinator actor
//! 4. Serve HTTP (queue, events, realtime, ledger webhook, health, metrics)
//! 5. Wait for shutdown signal, drain, then cancel the actor

use coordinator::actors::{CoordinatorActor, CoordinatorSettings};
use coordinator::bus::ChannelBus;
use coordinator::config::Config;
use coordinator::observability::{metrics, HealthState};
use coordinator::routes::{self, AppState};
use coordinator::scene::{Scene, SceneSettings};
use coordinator::services::{CreditLedger, InMemoryLedger};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Coordinator");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        coordinator_id = %config.coordinator_id,
        bind_address = %config.bind_address,
        session_unit_seconds = config.session_unit_seconds,
        max_credits_per_session = config.max_credits_per_session,
        disconnect_grace_seconds = config.disconnect_grace_seconds,
        ledger_webhook_enabled = config.ledger_webhook_secret.is_some(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let metrics_handle = metrics::init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health = Arc::new(HealthState::new());
    let bus = ChannelBus::new(config.bus_capacity);
    let ledger: Arc<dyn CreditLedger> = Arc::new(InMemoryLedger::new(config.free_play_credits));

    let scene = Scene::new(SceneSettings {
        object_count: config.round_object_count,
        ..SceneSettings::default()
    });

    let settings = CoordinatorSettings::from_config(&config);
    info!(epoch = %settings.epoch, "Spawning coordinator actor");

    let shutdown_token = CancellationToken::new();
    let (coordinator, actor_task) = CoordinatorActor::spawn(
        settings,
        Arc::clone(&ledger),
        bus.clone(),
        scene,
        shutdown_token.child_token(),
    );

    // Parse bind address before moving config
    let bind_address = config.bind_address.clone();

    let state = Arc::new(AppState {
        config,
        coordinator,
        bus,
        ledger,
        health: Arc::clone(&health),
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    // Bind listener before reporting ready to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind HTTP server");
        e
    })?;

    health.set_ready();
    info!("Coordinator listening on {}", addr);

    let shutdown_health = Arc::clone(&health);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        shutdown_health.set_not_ready();
        info!(stage = %shutdown_health.stage(), "Readiness withdrawn");
        drain_period().await;
    })
    .await?;

    // Realtime streams are closed by now; stop the actor
    shutdown_token.cancel();
    if let Err(e) = actor_task.await {
        warn!(error = %e, "Coordinator actor task ended abnormally");
    }
    health.set_stopped();

    info!("Coordinator shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Keeps serving for `COORDINATOR_DRAIN_SECONDS` (default 30) after readiness
/// is withdrawn.
async fn drain_period() {
    let drain_secs: u64 = std::env::var("COORDINATOR_DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    if drain_secs > 0 {
        warn!("Draining connections for {} seconds...", drain_secs);
        tokio::time::sleep(Duration::from_secs(drain_secs)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (COORDINATOR_DRAIN_SECONDS=0)");
    }
}
