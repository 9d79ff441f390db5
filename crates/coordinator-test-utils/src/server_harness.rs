//! Test server harness for E2E testing
//!
//! Provides `TestCoordinatorServer` for spawning real coordinator instances in tests.

use coordinator::actors::{CoordinatorActor, CoordinatorHandle, CoordinatorSettings};
use coordinator::bus::ChannelBus;
use coordinator::config::Config;
use coordinator::observability::HealthState;
use coordinator::routes::{self, AppState};
use coordinator::scene::{Scene, SceneSettings};
use coordinator::services::{CreditLedger, InMemoryLedger};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Seed for the scene of test servers, so object layouts are reproducible.
pub const TEST_SCENE_SEED: u64 = 7;

/// Test harness for spawning a coordinator in E2E tests.
///
/// The server uses the real router and actor with an [`InMemoryLedger`].
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let server = TestCoordinatorServer::spawn().await?;
///     server.grant("alice", 3).await?;
///
///     let response = reqwest::Client::new()
///         .post(format!("{}/join", server.url()))
///         .json(&serde_json::json!({ "id": "alice" }))
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestCoordinatorServer {
    addr: SocketAddr,
    config: Config,
    coordinator: CoordinatorHandle,
    ledger: Arc<dyn CreditLedger>,
    cancel_token: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestCoordinatorServer {
    /// Spawn a server with default configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(&[]).await
    }

    /// Spawn a server with configuration overrides (environment variable names).
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the coordinator actor and HTTP server in the background
    pub async fn spawn_with(overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("COORDINATOR_ID".to_string(), "test-coordinator".to_string()),
        ]);
        for (key, value) in overrides {
            vars.insert((*key).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let ledger: Arc<dyn CreditLedger> =
            Arc::new(InMemoryLedger::new(config.free_play_credits));
        let bus = ChannelBus::new(config.bus_capacity);
        let scene = Scene::with_seed(
            SceneSettings {
                object_count: config.round_object_count,
                ..SceneSettings::default()
            },
            TEST_SCENE_SEED,
        );

        let cancel_token = CancellationToken::new();
        let (coordinator, _actor_task) = CoordinatorActor::spawn(
            CoordinatorSettings::from_config(&config),
            Arc::clone(&ledger),
            bus.clone(),
            scene,
            cancel_token.child_token(),
        );

        let health = Arc::new(HealthState::new());
        health.set_ready();

        let state = Arc::new(AppState {
            config: config.clone(),
            coordinator: coordinator.clone(),
            bus,
            ledger: Arc::clone(&ledger),
            health,
        });

        // Uninstalled recorder: tests may spawn many servers in one process
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            coordinator,
            ledger,
            cancel_token,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle to the running coordinator actor.
    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Credit a participant directly, bypassing the webhook.
    pub async fn grant(&self, id: &str, credits: u32) -> Result<u32, anyhow::Error> {
        self.ledger
            .grant(&id.into(), credits)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to grant credits: {}", e))
    }

    /// Unspent credits of a participant.
    pub async fn credits(&self, id: &str) -> Result<u32, anyhow::Error> {
        self.ledger
            .available_credits(&id.into())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read credits: {}", e))
    }
}

impl Drop for TestCoordinatorServer {
    fn drop(&mut self) {
        // Stop the actor and abort the HTTP server task so that the test
        // ends without dangling realtime streams.
        self.cancel_token.cancel();
        self._handle.abort();
    }
}
