//! Scene viewer
//!
//! Passive client of the game topic. Mirrors the play field and logs what
//! happens on it, with a telemetry sample every second. Holds no queue place
//! and sends no control commands.

use anyhow::Context;
use common::events::{ChannelEvent, Topic};
use session_client::api::HttpCoordinatorApi;
use session_client::client::request_scene;
use session_client::config::ClientConfig;
use session_client::mirror::SceneMirror;
use session_client::realtime::{RealtimeConfig, RealtimeEvent, RealtimeSubscriber};
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the telemetry value is sampled and logged.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scene_viewer=info,session_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env().context("failed to load configuration")?;
    info!(core_url = %config.core_url, "Starting scene viewer");

    let api = HttpCoordinatorApi::new(config.core_url.as_str())
        .context("failed to build coordinator client")?;

    let cancel_token = CancellationToken::new();
    let realtime = RealtimeSubscriber::spawn(
        RealtimeConfig {
            base_url: config.core_url.clone(),
            channels: vec![Topic::Game],
            participant_id: None,
        },
        cancel_token.child_token(),
    );
    let mut events = realtime.subscribe();

    let mut mirror = SceneMirror::new();
    let mut sampler = tokio::time::interval(SAMPLE_INTERVAL);
    sampler.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,

            _ = sampler.tick() => {
                let now = Instant::now();
                mirror.sample(now);
                info!(
                    telemetry = %format!("{:.1}", mirror.telemetry().value_at(now)),
                    status = ?mirror.status_at(now),
                    objects = mirror.objects().len(),
                    claw_x = mirror.claw().x,
                    claw_y = mirror.claw().y,
                    "Scene"
                );
            }

            event = events.recv() => match event {
                Ok(RealtimeEvent::Connected) | Err(RecvError::Lagged(_)) => {
                    request_scene(&api).await;
                }
                Ok(RealtimeEvent::Disconnected) => warn!("Realtime stream lost, reconnecting"),
                Ok(RealtimeEvent::Frame(ChannelEvent::Game(event))) => {
                    mirror.apply(&event, Instant::now());
                    if let Some(action) = mirror.last_action() {
                        info!(event = event.name(), action = %action, "Game event");
                    }
                }
                Ok(RealtimeEvent::Frame(ChannelEvent::Queue(_))) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    cancel_token.cancel();
    realtime.shutdown().await;
    info!(rounds = mirror.rounds(), "Scene viewer stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("Shutdown signal received");
}
