//! Realtime stream reader for E2E tests.

use common::events::{ChannelEvent, Envelope, GameEvent, QueueEvent};
use common::sse::SseDecoder;
use common::types::QueueSnapshot;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::VecDeque;
use std::time::Duration;

/// How long `next_*` waits for a frame before failing the test.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Reads envelopes from `GET /realtime`.
pub struct SseReader {
    body: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    decoder: SseDecoder,
    buffered: VecDeque<Envelope>,
}

impl SseReader {
    /// Open a realtime stream.
    ///
    /// `channels` is the comma-separated channel list; `id` ties the stream
    /// to a participant's presence.
    pub async fn connect(
        base_url: &str,
        channels: &str,
        id: Option<&str>,
    ) -> Result<Self, anyhow::Error> {
        let mut query = vec![("channels", channels)];
        if let Some(id) = id {
            query.push(("id", id));
        }

        let response = reqwest::Client::new()
            .get(format!("{base_url}/realtime"))
            .query(&query)
            .send()
            .await?
            .error_for_status()?;

        Ok(Self {
            body: response.bytes_stream().boxed(),
            decoder: SseDecoder::new(),
            buffered: VecDeque::new(),
        })
    }

    /// Next envelope on any subscribed channel.
    pub async fn next_envelope(&mut self) -> Result<Envelope, anyhow::Error> {
        loop {
            if let Some(envelope) = self.buffered.pop_front() {
                return Ok(envelope);
            }

            let chunk = tokio::time::timeout(DEFAULT_FRAME_TIMEOUT, self.body.next())
                .await
                .map_err(|_| anyhow::anyhow!("Timed out waiting for a realtime frame"))?
                .ok_or_else(|| anyhow::anyhow!("Realtime stream closed"))??;

            for frame in self.decoder.push(&chunk) {
                self.buffered.push_back(frame.envelope()?);
            }
        }
    }

    /// Next `queue-update`, skipping game traffic.
    pub async fn next_snapshot(&mut self) -> Result<QueueSnapshot, anyhow::Error> {
        loop {
            if let ChannelEvent::Queue(QueueEvent::QueueUpdate(snapshot)) =
                self.next_envelope().await?.decode()?
            {
                return Ok(snapshot);
            }
        }
    }

    /// Next game event, skipping queue traffic.
    pub async fn next_game_event(&mut self) -> Result<GameEvent, anyhow::Error> {
        loop {
            if let ChannelEvent::Game(event) = self.next_envelope().await?.decode()? {
                return Ok(event);
            }
        }
    }

    /// Skip snapshots until one satisfies `predicate`.
    pub async fn snapshot_matching(
        &mut self,
        predicate: impl Fn(&QueueSnapshot) -> bool,
    ) -> Result<QueueSnapshot, anyhow::Error> {
        loop {
            let snapshot = self.next_snapshot().await?;
            if predicate(&snapshot) {
                return Ok(snapshot);
            }
        }
    }
}
