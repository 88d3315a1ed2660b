//! Change feed: keeps a session cache in step with the hub
//!
//! Reads the hub's SSE change stream and turns it into [`CacheAction`]s.
//! After every (re)connect the full list is fetched as a snapshot; a dropped
//! stream or a `resync` frame puts the session back into its reconnecting
//! state until the next snapshot lands. Missed events are never replayed.

use crate::cache::CacheAction;
use crate::http::HttpBackend;
use futures::StreamExt;
use intake_common::api::TriageBackend;
use intake_common::events::ChangeEvent;
use intake_common::model::AdminId;
use intake_common::view::{SortKey, ViewFilters};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental SSE parser; chunks may split lines and frames anywhere
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every frame they complete
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            let event = self.event.take();
            if self.data.is_empty() {
                return None;
            }
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(SseFrame {
                event: event.unwrap_or_else(|| "message".to_string()),
                data,
            });
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

/// Frames the hub sends on `/api/events`
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Connected,
    Change(ChangeEvent),
    /// Events were dropped for this subscriber
    Resync,
}

impl FeedMessage {
    /// Interpret a frame; unknown or malformed frames yield `None`
    pub fn from_frame(frame: &SseFrame) -> Option<Self> {
        match frame.event.as_str() {
            "connected" => Some(FeedMessage::Connected),
            "resync" => Some(FeedMessage::Resync),
            "change" => match serde_json::from_str(&frame.data) {
                Ok(event) => Some(FeedMessage::Change(event)),
                Err(e) => {
                    warn!("Dropping malformed change frame: {}", e);
                    None
                }
            },
            _ => None,
        }
    }
}

/// Capped exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    initial: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial,
            initial,
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

/// Why one connection ended
enum StreamEnd {
    Cancelled,
    SinkClosed,
    Dropped,
}

/// Run the change feed for `actor` until `cancel` fires or `sink` closes
pub async fn run_feed(
    backend: Arc<HttpBackend>,
    actor: AdminId,
    label: Option<String>,
    sink: mpsc::Sender<CacheAction>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::default();
    info!(admin_id = %actor, hub = backend.base_url(), "Change feed starting");

    loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            opened = backend.open_event_stream(&actor, label.as_deref()) => opened,
        };

        match opened {
            Ok(response) => {
                match follow_stream(&backend, response, &sink, &cancel, &mut backoff).await {
                    StreamEnd::Cancelled | StreamEnd::SinkClosed => break,
                    StreamEnd::Dropped => {
                        if sink.send(CacheAction::ConnectionLost).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!("Change stream connect failed: {}", e),
        }

        let delay = backoff.next_delay();
        debug!(?delay, "Reconnecting change stream");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    info!(admin_id = %actor, "Change feed stopped");
}

async fn follow_stream(
    backend: &HttpBackend,
    response: reqwest::Response,
    sink: &mpsc::Sender<CacheAction>,
    cancel: &CancellationToken,
    backoff: &mut Backoff,
) -> StreamEnd {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            chunk = body.next() => chunk,
        };
        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                warn!("Change stream read failed: {}", e);
                return StreamEnd::Dropped;
            }
            None => {
                info!("Change stream closed by hub");
                return StreamEnd::Dropped;
            }
        };

        for frame in decoder.push(&bytes) {
            let Some(message) = FeedMessage::from_frame(&frame) else {
                continue;
            };
            let actions = match message {
                FeedMessage::Connected => match snapshot(backend).await {
                    Some(action) => {
                        backoff.reset();
                        vec![action]
                    }
                    None => return StreamEnd::Dropped,
                },
                FeedMessage::Change(event) => vec![CacheAction::Event(event)],
                FeedMessage::Resync => {
                    warn!("Hub dropped events for this session, re-fetching");
                    match snapshot(backend).await {
                        Some(action) => vec![CacheAction::ConnectionLost, action],
                        None => return StreamEnd::Dropped,
                    }
                }
            };
            for action in actions {
                if sink.send(action).await.is_err() {
                    return StreamEnd::SinkClosed;
                }
            }
        }
    }
}

async fn snapshot(backend: &HttpBackend) -> Option<CacheAction> {
    match backend
        .list_submissions(&ViewFilters::default(), SortKey::Date)
        .await
    {
        Ok(all) => {
            debug!(count = all.len(), "Fetched snapshot");
            Some(CacheAction::Snapshot(all))
        }
        Err(e) => {
            warn!("Snapshot fetch failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: conn").is_empty());
        assert!(decoder.push(b"ected\r\ndata: {\"status\"").is_empty());
        let frames = decoder.push(b": \"connected\"}\r\n\r\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "connected".into(),
                data: "{\"status\": \"connected\"}".into(),
            }]
        );
    }

    #[test]
    fn test_decoder_skips_comments_and_joins_data() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keep-alive\n\ndata: a\ndata: b\n\nevent: resync\ndata:{}\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "a\nb");
        assert_eq!(frames[1].event, "resync");
        assert_eq!(frames[1].data, "{}");
    }

    #[test]
    fn test_feed_messages() {
        let frame = |event: &str, data: &str| SseFrame {
            event: event.into(),
            data: data.into(),
        };
        assert_eq!(
            FeedMessage::from_frame(&frame("resync", "{\"missed\":3}")),
            Some(FeedMessage::Resync)
        );
        assert_eq!(FeedMessage::from_frame(&frame("change", "not json")), None);
        assert_eq!(FeedMessage::from_frame(&frame("message", "x")), None);

        let id = uuid::Uuid::new_v4();
        let data = serde_json::to_string(&ChangeEvent::deleted(id)).unwrap();
        assert_eq!(
            FeedMessage::from_frame(&frame("change", &data)),
            Some(FeedMessage::Change(ChangeEvent::deleted(id)))
        );
    }

    #[test]
    fn test_backoff_doubles_to_cap_and_resets() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000, 4000, 8000, 10_000, 10_000]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), INITIAL_BACKOFF);
    }
}
