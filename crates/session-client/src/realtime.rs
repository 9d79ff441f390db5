//! Realtime subscriber.
//!
//! Keeps one server-sent event stream open to `GET /realtime` and fans its
//! frames out to the session machine, the dispatcher and the scene mirror.
//!
//! # Features
//!
//! - Reconnect with exponential backoff (1s, 2s, 4s, ..., max 30s)
//! - `Connected` / `Disconnected` transport events so consumers resync
//! - Malformed frames are logged and skipped
//!
//! Frames missed while disconnected are not replayed; consumers re-issue
//! `join` (queue) or `init-game` (scene) when `Connected` arrives.

use common::events::{ChannelEvent, Topic};
use common::sse::SseDecoder;
use common::types::ParticipantId;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Initial backoff delay for reconnects.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum backoff delay.
const MAX_BACKOFF_MS: u64 = 30_000;

/// Default connection timeout for the stream request.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames buffered per consumer before it lags.
const EVENT_BUFFER: usize = 256;

/// What consumers of the realtime stream observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    /// The stream is (re)established.
    Connected,
    /// The stream dropped; a reconnect is scheduled.
    Disconnected,
    /// A decoded channel frame.
    Frame(ChannelEvent),
}

/// Which stream to open.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub base_url: String,
    pub channels: Vec<Topic>,
    /// Ties the stream to the participant's presence on the coordinator.
    pub participant_id: Option<ParticipantId>,
}

impl RealtimeConfig {
    fn url(&self) -> String {
        format!("{}/realtime", self.base_url.trim_end_matches('/'))
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let channels = self
            .channels
            .iter()
            .map(Topic::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let mut query = vec![("channels", channels)];
        if let Some(id) = &self.participant_id {
            query.push(("id", id.as_str().to_string()));
        }
        query
    }
}

/// Handle to the running subscriber.
pub struct RealtimeSubscriber {
    events: broadcast::Sender<RealtimeEvent>,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl RealtimeSubscriber {
    /// Spawn the subscriber task.
    ///
    /// Subscribe consumers before awaiting anything, or they may miss the
    /// first `Connected`.
    pub fn spawn(config: RealtimeConfig, cancel_token: CancellationToken) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let task = tokio::spawn(subscription_loop(
            config,
            events.clone(),
            cancel_token.clone(),
        ));

        Self {
            events,
            cancel_token,
            task,
        }
    }

    /// New receiver of realtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.events.subscribe()
    }

    /// Stop the subscriber and wait for its task to end.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.task.await {
            warn!(target: "client.realtime", error = %e, "Realtime task ended abnormally");
        }
    }
}

/// Reconnect loop. Runs until cancelled.
#[instrument(skip_all, name = "client.realtime", fields(url = %config.url()))]
async fn subscription_loop(
    config: RealtimeConfig,
    events: broadcast::Sender<RealtimeEvent>,
    cancel_token: CancellationToken,
) {
    let client = match reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!(target: "client.realtime", error = %e, "Failed to build HTTP client");
            return;
        }
    };

    let mut backoff = INITIAL_BACKOFF_MS;

    loop {
        let outcome = tokio::select! {
            () = cancel_token.cancelled() => break,
            outcome = stream_once(&client, &config, &events) => outcome,
        };

        match outcome {
            StreamOutcome::Delivered => {
                // The stream worked for a while; start over from the shortest delay
                backoff = INITIAL_BACKOFF_MS;
                let _ = events.send(RealtimeEvent::Disconnected);
                info!(target: "client.realtime", "Realtime stream ended, reconnecting");
            }
            StreamOutcome::Failed(reason) => {
                warn!(
                    target: "client.realtime",
                    reason = %reason,
                    backoff_ms = backoff,
                    "Realtime connection failed, will retry"
                );
            }
        }

        tokio::select! {
            () = cancel_token.cancelled() => break,
            () = tokio::time::sleep(Duration::from_millis(backoff)) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF_MS);
    }

    debug!(target: "client.realtime", "Realtime subscriber stopped");
}

enum StreamOutcome {
    /// Connected, then the stream ended.
    Delivered,
    /// Could not connect.
    Failed(String),
}

async fn stream_once(
    client: &reqwest::Client,
    config: &RealtimeConfig,
    events: &broadcast::Sender<RealtimeEvent>,
) -> StreamOutcome {
    let response = match client
        .get(config.url())
        .query(&config.query())
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
    {
        Ok(response) => response,
        Err(e) => return StreamOutcome::Failed(e.to_string()),
    };

    info!(target: "client.realtime", "Realtime stream connected");
    let _ = events.send(RealtimeEvent::Connected);

    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(target: "client.realtime", error = %e, "Realtime stream read failed");
                break;
            }
        };

        for frame in decoder.push(&chunk) {
            match frame.envelope().and_then(|envelope| envelope.decode()) {
                Ok(event) => {
                    let _ = events.send(RealtimeEvent::Frame(event));
                }
                Err(e) => {
                    warn!(
                        target: "client.realtime",
                        event = %frame.event,
                        error = %e,
                        "Skipping malformed realtime frame"
                    );
                }
            }
        }
    }

    StreamOutcome::Delivered
}
