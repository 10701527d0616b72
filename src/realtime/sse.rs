//! Event channel over server-sent events
//!
//! Server-to-client events arrive on `GET /sessions/{id}/events` as
//! `event:`/`data:` frames; client events are posted back to the same path.
//! An `event: close` frame marks a server-initiated close.

use super::channel::{ChannelHandle, FrameSink, InboundFrame, RealtimeChannel, TransportError};
use super::event::ClientEvent;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_EVENT: &str = "close";

/// Incremental decoder for a `text/event-stream` body
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed a chunk; returns every frame completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<InboundFrame> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_block(&String::from_utf8_lossy(&block)) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn parse_block(block: &str) -> Option<InboundFrame> {
    let mut event: Option<&str> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    let mut comment = false;

    for line in block.lines() {
        if line.starts_with(':') {
            comment = true;
            continue;
        }
        if line.is_empty() {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if event.is_none() && data_lines.is_empty() {
        // A comment-only block is the server's keep-alive
        return comment.then_some(InboundFrame::KeepAlive);
    }

    let raw = data_lines.join("\n");
    let data = if raw.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&raw).unwrap_or(Value::String(raw))
    };
    let name = event.unwrap_or("message");

    if name == CLOSE_EVENT {
        let reason = match &data {
            Value::String(s) => Some(s.clone()),
            other => other.get("reason").and_then(Value::as_str).map(String::from),
        };
        return Some(InboundFrame::Closed { reason });
    }

    Some(InboundFrame::Event {
        name: name.to_string(),
        data,
    })
}

/// Decode a `text/event-stream` body into frames
pub fn decode_frames<S, B, E>(body: S) -> BoxStream<'static, Result<InboundFrame, TransportError>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    body.scan(SseDecoder::default(), |decoder, chunk| {
        let frames: Vec<Result<InboundFrame, TransportError>> = match chunk {
            Ok(bytes) => decoder.push(bytes.as_ref()).into_iter().map(Ok).collect(),
            Err(e) => vec![Err(TransportError::network(e.to_string()))],
        };
        futures::future::ready(Some(futures::stream::iter(frames)))
    })
    .flatten()
    .boxed()
}

/// Production [`RealtimeChannel`] backed by reqwest
#[derive(Clone)]
pub struct SseChannel {
    client: Client,
    base_url: String,
}

impl SseChannel {
    /// The event stream is long-lived, so only the connect phase is bounded
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn events_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{session_id}/events", self.base_url)
    }
}

#[async_trait]
impl RealtimeChannel for SseChannel {
    async fn open(&self, session_id: &str) -> Result<ChannelHandle, TransportError> {
        let url = self.events_url(session_id);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::network(format!("Event stream unreachable: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(TransportError::rejected(format!("Event stream refused: {status}")));
        }
        if !status.is_success() {
            return Err(TransportError::network(format!("Event stream unavailable: {status}")));
        }

        Ok(ChannelHandle {
            inbound: decode_frames(response.bytes_stream()),
            outbound: Box::new(SseSink {
                client: self.client.clone(),
                url,
            }),
        })
    }
}

struct SseSink {
    client: Client,
    url: String,
}

#[async_trait]
impl FrameSink for SseSink {
    async fn send(&self, event: &ClientEvent) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "event": event.name(), "data": event.payload() }))
            .send()
            .await
            .map_err(|e| TransportError::network(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(TransportError::rejected(format!(
                "{} refused: {status}",
                event.name()
            )));
        }
        if !status.is_success() {
            return Err(TransportError::network(format!(
                "{} failed: {status}",
                event.name()
            )));
        }
        Ok(())
    }
}
