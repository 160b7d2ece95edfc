//! Wire normalizer
//!
//! Converts a provider byte stream into a `DeltaStream`. Each wire shape has
//! its own framing loop; all of them share the extraction rules in
//! [`extract`](super::extract) and one deadline for the whole stream.

use std::time::Duration;

use bytes::Bytes;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::time::{Instant, timeout_at};

use super::extract::{Extracted, extract};
use super::types::DeltaStream;
use super::wire::WireFormat;
use crate::error::GatewayError;

/// Raw response body as delivered by the transport.
pub type ByteStream = std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

const DONE_MARKER: &str = "[DONE]";

/// Per-stream normalizer settings.
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Provider id, used in log fields and error messages.
    pub label: String,
    /// Budget for the whole call, handshake and close marker included.
    pub timeout: Duration,
    /// Instant the budget runs out.
    pub deadline: Instant,
}

impl NormalizerConfig {
    /// Start the clock now.
    pub fn new(label: impl Into<String>, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            timeout,
            deadline: Instant::now() + timeout,
        }
    }

    pub(crate) fn timed_out(&self) -> GatewayError {
        GatewayError::TransportError(format!(
            "{}: stream did not complete within {:?}",
            self.label, self.timeout
        ))
    }

    fn ended_early(&self) -> GatewayError {
        GatewayError::TransportError(format!("{}: stream ended before completion", self.label))
    }

    fn provider_error(&self, message: &str) -> GatewayError {
        GatewayError::TransportError(format!("{}: provider error: {message}", self.label))
    }
}

/// Normalize `bytes` framed as `format` into text deltas.
pub fn normalize<S>(bytes: S, format: WireFormat, config: NormalizerConfig) -> DeltaStream
where
    S: Stream<Item = Result<Bytes, GatewayError>> + Send + 'static,
{
    match format {
        WireFormat::Sse => Box::pin(sse_deltas(bytes, config)),
        WireFormat::JsonLines => Box::pin(json_lines_deltas(bytes, config)),
        WireFormat::Json => Box::pin(single_json_delta(bytes, config)),
    }
}

fn sse_deltas<S>(
    bytes: S,
    config: NormalizerConfig,
) -> impl Stream<Item = Result<String, GatewayError>> + Send
where
    S: Stream<Item = Result<Bytes, GatewayError>> + Send + 'static,
{
    async_stream::stream! {
        let deadline = config.deadline;
        let mut events = Box::pin(bytes.eventsource());
        let mut finished = false;

        loop {
            let next = match timeout_at(deadline, events.next()).await {
                Ok(next) => next,
                Err(_) => {
                    yield Err(config.timed_out());
                    return;
                }
            };
            let event = match next {
                None => break,
                Some(Ok(event)) => event,
                Some(Err(EventStreamError::Transport(err))) => {
                    yield Err(err);
                    return;
                }
                Some(Err(err)) => {
                    yield Err(GatewayError::TransportError(format!(
                        "{}: malformed event stream: {err}",
                        config.label
                    )));
                    return;
                }
            };

            if event.event == "ping" {
                continue;
            }
            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == DONE_MARKER {
                return;
            }

            let Some(extracted) = decode(data, &config) else {
                continue;
            };
            if let Some(message) = extracted.error {
                yield Err(config.provider_error(&message));
                return;
            }
            if let Some(text) = extracted.text {
                yield Ok(text);
            }
            finished |= extracted.finished;
            if extracted.closed {
                return;
            }
        }

        if !finished {
            yield Err(config.ended_early());
        }
    }
}

fn json_lines_deltas<S>(
    bytes: S,
    config: NormalizerConfig,
) -> impl Stream<Item = Result<String, GatewayError>> + Send
where
    S: Stream<Item = Result<Bytes, GatewayError>> + Send + 'static,
{
    async_stream::stream! {
        let deadline = config.deadline;
        let mut chunks = Box::pin(bytes);
        let mut buffer: Vec<u8> = Vec::new();
        let mut finished = false;
        let mut eof = false;

        while !eof {
            match timeout_at(deadline, chunks.next()).await {
                Err(_) => {
                    yield Err(config.timed_out());
                    return;
                }
                Ok(None) => {
                    eof = true;
                    if !buffer.is_empty() {
                        buffer.push(b'\n');
                    }
                }
                Ok(Some(Err(err))) => {
                    yield Err(err);
                    return;
                }
                Ok(Some(Ok(chunk))) => buffer.extend_from_slice(&chunk),
            }

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = match std::str::from_utf8(&line) {
                    Ok(line) => line.trim(),
                    Err(_) => {
                        tracing::warn!(provider = %config.label, "skipping non UTF-8 stream line");
                        continue;
                    }
                };
                // Some servers frame JSON lines SSE-style.
                let line = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
                if line.is_empty() {
                    continue;
                }
                if line == DONE_MARKER {
                    return;
                }

                let Some(extracted) = decode(line, &config) else {
                    continue;
                };
                if let Some(message) = extracted.error {
                    yield Err(config.provider_error(&message));
                    return;
                }
                if let Some(text) = extracted.text {
                    yield Ok(text);
                }
                finished |= extracted.finished;
                if extracted.closed {
                    return;
                }
            }
        }

        if !finished {
            yield Err(config.ended_early());
        }
    }
}

fn single_json_delta<S>(
    bytes: S,
    config: NormalizerConfig,
) -> impl Stream<Item = Result<String, GatewayError>> + Send
where
    S: Stream<Item = Result<Bytes, GatewayError>> + Send + 'static,
{
    async_stream::stream! {
        let deadline = config.deadline;
        let mut chunks = Box::pin(bytes);
        let mut body: Vec<u8> = Vec::new();

        loop {
            match timeout_at(deadline, chunks.next()).await {
                Err(_) => {
                    yield Err(config.timed_out());
                    return;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    yield Err(err);
                    return;
                }
                Ok(Some(Ok(chunk))) => body.extend_from_slice(&chunk),
            }
        }

        let value: Value = match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(err) => {
                yield Err(GatewayError::TransportError(format!(
                    "{}: malformed response body: {err}",
                    config.label
                )));
                return;
            }
        };
        let extracted = extract(&value);
        if let Some(message) = extracted.error {
            yield Err(config.provider_error(&message));
            return;
        }
        if let Some(text) = extracted.text {
            yield Ok(text);
        }
    }
}

/// Parse one event payload; malformed payloads are logged and skipped.
fn decode(payload: &str, config: &NormalizerConfig) -> Option<Extracted> {
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => Some(extract(&value)),
        Err(err) => {
            tracing::warn!(
                provider = %config.label,
                error = %err,
                "skipping malformed stream payload"
            );
            None
        }
    }
}
