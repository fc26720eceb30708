//! `(fromFormat, toFormat)` transform registry. Grounded on the
//! teacher's `middleware::ops::transform_request/transform_response`
//! match-on-pair dispatch, generalized from the teacher's (proto, op)
//! keying to a flat (from, to) keying since this gateway has a single
//! logical operation (send a chat turn) per format.

use gw_protocol::Format;
use serde_json::Value;
use thiserror::Error;

use crate::{claude2openai, codex2openai, geminicli2openai, openai2claude, openai2codex, openai2geminicli};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("request body did not match the expected shape for {format}")]
    MalformedBody { format: Format },
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

/// Per-chunk bookkeeping carried across a streamed response translation.
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    pub block_index: u32,
    pub current_block_type: Option<BlockKind>,
    pub has_tool_call: bool,
    pub message_started: bool,
    pub usage_seen: bool,
    /// Response/message id surfaced by the provider's first event, reused
    /// on every synthesized chunk so the client sees one consistent id.
    pub message_id: Option<String>,
    pub model: Option<String>,
    /// Index of the text block currently open, so a provider that sends
    /// interleaved deltas without explicit block markers (OpenAI, Codex)
    /// can still be re-wrapped into Claude/Gemini's block-start/stop
    /// framing.
    pub text_block_open: bool,
    /// `call_id` (OpenAI) / tool-call item id → block index, so later
    /// argument deltas land in the same content block their start event
    /// opened.
    pub tool_call_blocks: Vec<(String, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

/// Translate a request body. Passes the body through untouched when the
/// pair has no registered transform (spec.md §4.10: "If a pair is
/// unregistered, the payload is passed through untouched").
pub fn transform_request(from: Format, to: Format, body: Value) -> Result<Value, TransformError> {
    if from == to {
        return Ok(body);
    }
    match (from, to) {
        (Format::OpenAi, Format::Claude) => openai2claude::transform_request(body),
        (Format::Claude, Format::OpenAi) => claude2openai::transform_request(body),
        (Format::GeminiCli, Format::OpenAi) => geminicli2openai::transform_request(body),
        (Format::OpenAi, Format::GeminiCli) => openai2geminicli::transform_request(body),
        (Format::OpenAi, Format::Codex) => openai2codex::transform_request(body),
        (Format::Codex, Format::OpenAi) => codex2openai::transform_request(body),
        _ => Ok(body),
    }
}

/// Translate a complete (non-streamed) response body, `to` → `from`
/// direction (the provider speaks `to`, the client expects `from`).
pub fn transform_response(from: Format, to: Format, body: Value) -> Result<Value, TransformError> {
    if from == to {
        return Ok(body);
    }
    match (from, to) {
        (Format::OpenAi, Format::Claude) => openai2claude::transform_response(body),
        (Format::Claude, Format::OpenAi) => claude2openai::transform_response(body),
        (Format::GeminiCli, Format::OpenAi) => geminicli2openai::transform_response(body),
        (Format::OpenAi, Format::GeminiCli) => openai2geminicli::transform_response(body),
        (Format::OpenAi, Format::Codex) => openai2codex::transform_response(body),
        (Format::Codex, Format::OpenAi) => codex2openai::transform_response(body),
        _ => Ok(body),
    }
}

/// Translate one SSE chunk of a streamed response, `to` → `from`.
/// Returns zero or more client-facing SSE events; `state` carries
/// cross-chunk bookkeeping.
pub fn transform_stream_chunk(
    from: Format,
    to: Format,
    event: gw_protocol::sse::SseEvent,
    state: &mut StreamState,
) -> Vec<gw_protocol::sse::SseEvent> {
    if from == to {
        return vec![event];
    }
    match (from, to) {
        (Format::OpenAi, Format::Claude) => openai2claude::transform_stream_chunk(event, state),
        (Format::Claude, Format::OpenAi) => claude2openai::transform_stream_chunk(event, state),
        (Format::GeminiCli, Format::OpenAi) => {
            geminicli2openai::transform_stream_chunk(event, state)
        }
        (Format::OpenAi, Format::GeminiCli) => {
            openai2geminicli::transform_stream_chunk(event, state)
        }
        (Format::OpenAi, Format::Codex) => openai2codex::transform_stream_chunk(event, state),
        (Format::Codex, Format::OpenAi) => codex2openai::transform_stream_chunk(event, state),
        _ => vec![event],
    }
}
