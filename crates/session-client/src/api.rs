//! Coordinator HTTP API client.
//!
//! - `POST /join` answers the caller's standing or `NO_CREDITS`
//! - `POST /leave` is idempotent and always succeeds on the server
//! - `POST /send-event` publishes a game event
//!
//! Failures are reported as [`ClientError`]; callers decide whether to
//! surface them (join) or swallow them (leave, publish).

use crate::errors::ClientError;
use common::events::{Envelope, GameEvent};
use common::protocol::{
    ErrorResponse, JoinRequest, JoinResponse, LeaveRequest, SendEventRequest, NO_CREDITS_CODE,
};
use common::types::ParticipantId;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default timeout for coordinator requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connect timeout for coordinator requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Trait for coordinator API operations (enables mocking).
#[async_trait::async_trait]
pub trait CoordinatorApi: Send + Sync {
    /// Enter the queue or read the current standing.
    async fn join(&self, id: &ParticipantId) -> Result<JoinResponse, ClientError>;

    /// Release the queue place or end the active session.
    async fn leave(&self, id: &ParticipantId) -> Result<(), ClientError>;

    /// Publish a game event, as `sender` when given.
    async fn send_event(
        &self,
        event: &GameEvent,
        sender: Option<&ParticipantId>,
    ) -> Result<(), ClientError>;
}

/// HTTP implementation of [`CoordinatorApi`].
#[derive(Clone)]
pub struct HttpCoordinatorApi {
    client: Client,
    base_url: String,
}

impl HttpCoordinatorApi {
    /// Create a client for the coordinator at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Internal` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            warn!(target: "client.api", path, error = %e, "Coordinator request failed");
            ClientError::Transient(format!("request to {path} failed"))
        })?;
        check_status(response).await
    }
}

/// Map non-success statuses to errors.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.json::<ErrorResponse>().await.ok();
    let code = body.as_ref().map(|b| b.error.code.as_str());

    if status.as_u16() == 402 || code == Some(NO_CREDITS_CODE) {
        Err(ClientError::NoCredits)
    } else if status.is_server_error() || status.as_u16() == 429 {
        warn!(target: "client.api", status = %status, "Coordinator unavailable");
        Err(ClientError::Transient(format!(
            "coordinator answered {status}"
        )))
    } else {
        let message = body.map_or_else(|| status.to_string(), |b| b.error.message);
        warn!(target: "client.api", status = %status, message = %message, "Coordinator rejected request");
        Err(ClientError::Protocol(message))
    }
}

#[async_trait::async_trait]
impl CoordinatorApi for HttpCoordinatorApi {
    #[instrument(skip_all, name = "client.api.join", fields(participant_id = %id))]
    async fn join(&self, id: &ParticipantId) -> Result<JoinResponse, ClientError> {
        let response = self.post("/join", &JoinRequest { id: id.clone() }).await?;
        let body: JoinResponse = response.json().await.map_err(|e| {
            warn!(target: "client.api", error = %e, "Unreadable join response");
            ClientError::Protocol(format!("unreadable join response: {e}"))
        })?;

        debug!(
            target: "client.api",
            active = body.active,
            position = ?body.position,
            seq = body.seq,
            "Join answered"
        );
        Ok(body)
    }

    #[instrument(skip_all, name = "client.api.leave", fields(participant_id = %id))]
    async fn leave(&self, id: &ParticipantId) -> Result<(), ClientError> {
        self.post("/leave", &LeaveRequest { id: id.clone() }).await?;
        Ok(())
    }

    async fn send_event(
        &self,
        event: &GameEvent,
        sender: Option<&ParticipantId>,
    ) -> Result<(), ClientError> {
        let envelope =
            Envelope::game(event).map_err(|e| ClientError::Internal(e.to_string()))?;
        let request = SendEventRequest {
            channel: envelope.channel,
            event: envelope.event,
            data: envelope.data,
            sender: sender.cloned(),
        };
        self.post("/send-event", &request).await?;
        Ok(())
    }
}

/// Mock API module for testing.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Mock coordinator API.
    ///
    /// Join answers are scripted in order; once the script runs out, the last
    /// answer repeats. Every call is recorded.
    #[derive(Default)]
    pub struct MockCoordinatorApi {
        joins: Mutex<VecDeque<Result<JoinResponse, ClientError>>>,
        last_join: Mutex<Option<Result<JoinResponse, ClientError>>>,
        join_delay: Mutex<Option<Duration>>,
        calls: Mutex<Vec<ApiCall>>,
        fail_sends: Mutex<bool>,
    }

    /// A recorded API call.
    #[derive(Debug, Clone, PartialEq)]
    pub enum ApiCall {
        Join(ParticipantId),
        Leave(ParticipantId),
        SendEvent(GameEvent, Option<ParticipantId>),
    }

    impl MockCoordinatorApi {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue the answer to the next `join`.
        pub fn push_join(&self, result: Result<JoinResponse, ClientError>) {
            lock(&self.joins).push_back(result);
        }

        /// Delay every `join` answer (for in-flight overlap tests).
        pub fn set_join_delay(&self, delay: Duration) {
            *lock(&self.join_delay) = Some(delay);
        }

        /// Make `send_event` fail.
        pub fn set_fail_sends(&self, fail: bool) {
            *lock(&self.fail_sends) = fail;
        }

        pub fn calls(&self) -> Vec<ApiCall> {
            lock(&self.calls).clone()
        }

        pub fn join_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, ApiCall::Join(_)))
                .count()
        }

        pub fn leave_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, ApiCall::Leave(_)))
                .count()
        }

        /// Events published, in order.
        pub fn sent_events(&self) -> Vec<GameEvent> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    ApiCall::SendEvent(event, _) => Some(event),
                    _ => None,
                })
                .collect()
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[async_trait::async_trait]
    impl CoordinatorApi for MockCoordinatorApi {
        async fn join(&self, id: &ParticipantId) -> Result<JoinResponse, ClientError> {
            lock(&self.calls).push(ApiCall::Join(id.clone()));

            let delay = *lock(&self.join_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let next = lock(&self.joins).pop_front();
            let mut last = lock(&self.last_join);
            match next {
                Some(result) => {
                    *last = Some(result.clone());
                    result
                }
                None => last
                    .clone()
                    .unwrap_or_else(|| Err(ClientError::Transient("no scripted join".to_string()))),
            }
        }

        async fn leave(&self, id: &ParticipantId) -> Result<(), ClientError> {
            lock(&self.calls).push(ApiCall::Leave(id.clone()));
            Ok(())
        }

        async fn send_event(
            &self,
            event: &GameEvent,
            sender: Option<&ParticipantId>,
        ) -> Result<(), ClientError> {
            lock(&self.calls).push(ApiCall::SendEvent(event.clone(), sender.cloned()));
            if *lock(&self.fail_sends) {
                return Err(ClientError::Transient("mock send failure".to_string()));
            }
            Ok(())
        }
    }
}
