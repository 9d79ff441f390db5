//! `SessionClient` - a controller client assembled from its parts.
//!
//! One realtime subscription feeds the session machine (queue topic) and the
//! scene side (game topic). The scene side keeps the dispatcher's claw in
//! step with the coordinator and folds every game event into the mirror.

use crate::api::{CoordinatorApi, HttpCoordinatorApi};
use crate::config::ClientConfig;
use crate::dispatcher::{CommandDispatcher, DispatchSettings};
use crate::errors::ClientError;
use crate::identity::IdentityStore;
use crate::machine::{SessionHandle, SessionMachine, SessionSettings};
use crate::mirror::SceneMirror;
use crate::realtime::{RealtimeConfig, RealtimeEvent, RealtimeSubscriber};

use common::events::{ChannelEvent, GameEvent, InitGamePayload, Topic};
use common::types::ParticipantId;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// `source` of the `init-game` this client sends on (re)connect.
const INIT_SOURCE: &str = "session-client";

/// A running controller client.
pub struct SessionClient {
    session: SessionHandle,
    dispatcher: CommandDispatcher,
    mirror: Arc<RwLock<SceneMirror>>,
    realtime: RealtimeSubscriber,
    cancel_token: CancellationToken,
    session_task: JoinHandle<()>,
    scene_task: JoinHandle<()>,
    outbox_task: JoinHandle<()>,
}

impl SessionClient {
    /// Start a client from configuration.
    ///
    /// The participant id comes from the identity store and is never created
    /// here; without one the session goes to `RedirectHome`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Internal` if the identity store cannot be read
    /// or the HTTP client cannot be built.
    pub async fn start(config: &ClientConfig) -> Result<Self, ClientError> {
        let identity = config
            .identity_path
            .as_ref()
            .map_or_else(IdentityStore::memory, IdentityStore::file);
        let participant_id = identity.load().await?;
        let api = Arc::new(HttpCoordinatorApi::new(config.core_url.as_str())?);

        Ok(Self::with_api(config, participant_id, api))
    }

    /// Start a client for `participant_id` against `api`.
    pub fn with_api(
        config: &ClientConfig,
        participant_id: Option<ParticipantId>,
        api: Arc<dyn CoordinatorApi>,
    ) -> Self {
        let cancel_token = CancellationToken::new();

        let realtime = RealtimeSubscriber::spawn(
            RealtimeConfig {
                base_url: config.core_url.clone(),
                channels: Topic::ALL.to_vec(),
                participant_id: participant_id.clone(),
            },
            cancel_token.child_token(),
        );
        let session_events = realtime.subscribe();
        let scene_events = realtime.subscribe();

        let (session, session_task) = SessionMachine::spawn(
            participant_id,
            api.clone(),
            session_events,
            SessionSettings::from_config(config),
            cancel_token.child_token(),
        );
        let (dispatcher, outbox_task) = CommandDispatcher::spawn(
            api.clone(),
            session.subscribe(),
            DispatchSettings::from_config(config),
        );

        let mirror = Arc::new(RwLock::new(SceneMirror::new()));
        let scene_task = tokio::spawn(scene_loop(
            scene_events,
            api,
            dispatcher.clone(),
            mirror.clone(),
            cancel_token.child_token(),
        ));

        Self {
            session,
            dispatcher,
            mirror,
            realtime,
            cancel_token,
            session_task,
            scene_task,
            outbox_task,
        }
    }

    #[must_use]
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    #[must_use]
    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Copy of the current scene mirror.
    pub async fn mirror(&self) -> SceneMirror {
        self.mirror.read().await.clone()
    }

    /// Leave (best effort) and stop every task.
    pub async fn shutdown(self) {
        self.session.shutdown();
        if let Err(e) = self.session_task.await {
            warn!(target: "client.session", error = %e, "Session task ended abnormally");
        }

        self.cancel_token.cancel();
        self.realtime.shutdown().await;
        let _ = self.scene_task.await;

        // The outbox ends with the last dispatcher clone.
        drop(self.dispatcher);
        let _ = self.outbox_task.await;
        info!(target: "client.session", "Session client stopped");
    }
}

/// Game topic consumer: claw sync, mirror updates, and `init-game` on reconnect.
async fn scene_loop(
    mut events: broadcast::Receiver<RealtimeEvent>,
    api: Arc<dyn CoordinatorApi>,
    dispatcher: CommandDispatcher,
    mirror: Arc<RwLock<SceneMirror>>,
    cancel_token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(RealtimeEvent::Frame(ChannelEvent::Game(event))) => {
                dispatcher.observe(&event).await;
                mirror.write().await.apply(&event, Instant::now());
            }
            Ok(RealtimeEvent::Connected) | Err(RecvError::Lagged(_)) => {
                request_scene(api.as_ref()).await;
            }
            Ok(_) => {}
            Err(RecvError::Closed) => break,
        }
    }
    debug!(target: "client.mirror", "Scene loop stopped");
}

/// Ask the coordinator to republish the current round.
pub async fn request_scene(api: &dyn CoordinatorApi) {
    let event = GameEvent::InitGame(InitGamePayload {
        source: Some(INIT_SOURCE.to_string()),
    });
    if let Err(e) = api.send_event(&event, None).await {
        warn!(target: "client.mirror", error = %e, "Scene resync request failed");
    }
}
