//! Response-direction translation (L10, egress half). `retry::execute`
//! only ever calls `registry::transform_request`; a provider's native
//! response still needs the `to → from` leg before it reaches the
//! client. Grounded on `gproxy-router/src/proxy.rs::to_axum_response`'s
//! `UpstreamBody::{Bytes,Stream}` split, using the SSE parser/encoder
//! from `gw-protocol` and the `(from,to)` registry from `gw-transform`.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::StreamExt;
use gw_common::cost::TokenUsage;
use gw_protocol::Format;
use gw_protocol::sse::{SseEvent, SseParser};
use gw_provider_core::provider::StreamBody;
use gw_transform::registry::{self, StreamState};
use serde_json::Value;

use crate::pipeline::extract_usage;

/// Shared sink the translating stream writes final token usage into as
/// it observes it; the transport reads it back via [`Self::snapshot`]
/// once the stream has fully drained.
#[derive(Clone, Default)]
pub struct UsageAccumulator(Arc<Mutex<TokenUsage>>);

impl UsageAccumulator {
    pub fn new() -> Self {
        UsageAccumulator::default()
    }

    pub fn snapshot(&self) -> TokenUsage {
        self.0.lock().map(|guard| *guard).unwrap_or_default()
    }

    fn update(&self, usage: TokenUsage) {
        if usage == TokenUsage::default() {
            return;
        }
        if let Ok(mut guard) = self.0.lock() {
            *guard = usage;
        }
    }
}

/// Translates a complete (non-streamed) response body from the
/// provider's native format to the client's. Passes the body through
/// untouched (logged at warn) on a malformed body or an unregistered
/// pair, per spec.md §4.10's error-conditions clause.
pub fn translate_json(client_format: Format, native_format: Format, body: Bytes) -> Bytes {
    if client_format == native_format {
        return body;
    }
    let Ok(value) = serde_json::from_slice::<Value>(&body) else {
        tracing::warn!(event = "response_translate_parse_failed", ?native_format, ?client_format);
        return body;
    };
    match registry::transform_response(client_format, native_format, value) {
        Ok(translated) => serde_json::to_vec(&translated).map(Bytes::from).unwrap_or(body),
        Err(error) => {
            tracing::warn!(event = "response_translate_failed", ?native_format, ?client_format, %error);
            body
        }
    }
}

/// Wraps a provider's streamed response: parses native-format SSE
/// events, extracts usage into `usage` as it's observed, re-encodes
/// each event in the client's format, and forwards the re-encoded
/// bytes. Runs on a spawned task so parsing never blocks the transport
/// poll; passthrough (no re-parse) when formats already match.
pub fn wrap_stream(client_format: Format, native_format: Format, body: StreamBody, usage: UsageAccumulator) -> StreamBody {
    if client_format == native_format {
        return body;
    }

    let mut inner = body.stream;
    let content_type = body.content_type;
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);

    tokio::spawn(async move {
        let mut parser = SseParser::new();
        let mut state = StreamState::default();
        while let Some(item) = inner.next().await {
            let Ok(chunk) = item else { break };
            let events = parser.push_bytes(&chunk);
            if !emit(events, client_format, native_format, &mut state, &usage, &tx).await {
                return;
            }
        }
        let trailing = parser.finish();
        let _ = emit(trailing, client_format, native_format, &mut state, &usage, &tx).await;
    });

    StreamBody::new(
        content_type,
        tokio_stream::wrappers::ReceiverStream::new(rx).map(Ok::<Bytes, std::io::Error>),
    )
}

async fn emit(
    events: Vec<SseEvent>,
    client_format: Format,
    native_format: Format,
    state: &mut StreamState,
    usage: &UsageAccumulator,
    tx: &tokio::sync::mpsc::Sender<Bytes>,
) -> bool {
    for event in events {
        if let Ok(value) = serde_json::from_str::<Value>(&event.data) {
            usage.update(extract_usage(native_format, &value));
        }
        for out_event in registry::transform_stream_chunk(client_format, native_format, event, state) {
            if tx.send(Bytes::from(out_event.encode())).await.is_err() {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulator_ignores_default_updates() {
        let acc = UsageAccumulator::new();
        acc.update(TokenUsage::default());
        assert_eq!(acc.snapshot(), TokenUsage::default());
        acc.update(TokenUsage { input_tokens: 5, ..TokenUsage::default() });
        assert_eq!(acc.snapshot().input_tokens, 5);
    }

    #[test]
    fn translate_json_passes_through_on_same_format() {
        let body = Bytes::from_static(b"{\"a\":1}");
        let out = translate_json(Format::Claude, Format::Claude, body.clone());
        assert_eq!(out, body);
    }

    #[test]
    fn translate_json_passes_through_malformed_body() {
        let body = Bytes::from_static(b"not json");
        let out = translate_json(Format::Claude, Format::OpenAi, body.clone());
        assert_eq!(out, body);
    }
}
