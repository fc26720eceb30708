//! Gemini-CLI envelope ↔ OpenAI chat-completions, Gemini-CLI → OpenAI
//! direction. Contract: spec.md §4.10 "Gemini-CLI → OpenAI (request)"
//! and scenario S6.

use gw_protocol::gemini;
use gw_protocol::geminicli;
use gw_protocol::openai;
use gw_protocol::sse::SseEvent;
use serde_json::Value;

use crate::registry::{StreamState, TransformError};

pub fn transform_request(body: Value) -> Result<Value, TransformError> {
    let envelope: geminicli::Envelope = match serde_json::from_value(body) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(event = "transform_parse_error", pair = "geminicli->openai", %error);
            return Ok(serde_json::json!({"model": "", "messages": []}));
        }
    };

    let mut messages = Vec::new();
    if let Some(system) = envelope.request.system_instruction {
        let text = join_text_parts(&system.parts);
        if !text.is_empty() {
            messages.push(openai::ChatMessage {
                role: "system".to_string(),
                content: Some(openai::MessageContent::Text(text)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
        }
    }

    // Most recent outstanding tool-call id, to pair a `functionResponse`
    // with the `tool_calls[]` entry that introduced it.
    let mut last_tool_call_id: Option<String> = None;
    let mut call_seq: u32 = 0;

    for content in envelope.request.contents {
        let role = match content.role.as_deref() {
            Some("model") => "assistant",
            Some(other) => other,
            None => "user",
        };

        let mut text = String::new();
        let mut image_parts = Vec::new();
        let mut tool_calls = Vec::new();

        for part in content.parts {
            if let Some(part_text) = part.text {
                text.push_str(&part_text);
            }
            if let Some(inline) = part.inline_data {
                image_parts.push(openai::ContentPart::ImageUrl {
                    image_url: openai::ImageUrl {
                        url: format!("data:{};base64,{}", inline.mime_type, inline.data),
                    },
                });
            }
            if let Some(call) = part.function_call {
                call_seq += 1;
                let id = format!("call_{}", base62_id(call_seq));
                tool_calls.push(openai::ToolCall {
                    id: id.clone(),
                    kind: "function".to_string(),
                    function: openai::FunctionCall {
                        name: call.name,
                        arguments: call.args.to_string(),
                    },
                });
                last_tool_call_id = Some(id);
            }
            if let Some(response) = part.function_response {
                let content_text = response
                    .response
                    .get("result")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| response.response.to_string());
                messages.push(openai::ChatMessage {
                    role: "tool".to_string(),
                    content: Some(openai::MessageContent::Text(content_text)),
                    tool_calls: None,
                    tool_call_id: last_tool_call_id.clone(),
                    name: None,
                });
            }
        }

        if !tool_calls.is_empty() {
            messages.push(openai::ChatMessage {
                role: "assistant".to_string(),
                content: None,
                tool_calls: Some(tool_calls),
                tool_call_id: None,
                name: None,
            });
            continue;
        }

        if text.is_empty() && image_parts.is_empty() {
            continue;
        }

        let content_value = if image_parts.is_empty() {
            openai::MessageContent::Text(text)
        } else {
            let mut parts = image_parts;
            if !text.is_empty() {
                parts.insert(0, openai::ContentPart::Text { text });
            }
            openai::MessageContent::Parts(parts)
        };

        messages.push(openai::ChatMessage {
            role: role.to_string(),
            content: Some(content_value),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
    }

    let tools = envelope.request.tools.map(|tools| {
        tools
            .into_iter()
            .flat_map(|tool| tool.function_declarations)
            .map(|decl| openai::ToolDefinition {
                kind: "function".to_string(),
                function: openai::FunctionDef {
                    name: decl.name,
                    description: decl.description,
                    parameters: decl.parameters.unwrap_or(Value::Object(Default::default())),
                },
            })
            .collect()
    });

    let (max_tokens, temperature, top_p, reasoning_effort) = envelope
        .request
        .generation_config
        .map(|config| {
            (
                config.max_output_tokens,
                config.temperature,
                config.top_p,
                config.thinking_config.map(map_reasoning_effort),
            )
        })
        .unwrap_or((None, None, None, None));

    let out = openai::ChatCompletionRequest {
        model: envelope.model,
        messages,
        max_tokens,
        max_completion_tokens: None,
        temperature,
        top_p,
        stream: None,
        tools,
        tool_choice: None,
        reasoning_effort,
    };

    Ok(serde_json::to_value(out)?)
}

fn map_reasoning_effort(config: gemini::ThinkingConfig) -> String {
    if config.include_thoughts == Some(false) {
        return "none".to_string();
    }
    match config.thinking_budget {
        Some(0) => "none".to_string(),
        Some(-1) => "auto".to_string(),
        Some(budget) if budget <= 1024 => "low".to_string(),
        Some(budget) if budget <= 8192 => "medium".to_string(),
        Some(_) => "high".to_string(),
        None => "medium".to_string(),
    }
}

fn join_text_parts(parts: &[gemini::Part]) -> String {
    parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deterministic, non-colliding-within-a-request base62 id; real ids
/// only need to round-trip within one conversation's tool pairing.
fn base62_id(seq: u32) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut value = seq as u64;
    let mut out = vec![b'0'; 24];
    for slot in out.iter_mut().rev() {
        *slot = ALPHABET[(value % 62) as usize];
        value /= 62;
    }
    String::from_utf8(out).unwrap()
}

pub fn transform_response(body: Value) -> Result<Value, TransformError> {
    // Gemini-CLI as a client is out of scope for response translation
    // in the required pairs (spec.md only mandates the request leg);
    // pass the provider's OpenAI response through as the envelope body.
    Ok(body)
}

/// Provider (OpenAI) SSE chunk → client (Gemini-CLI) stream frame.
/// Gemini's streaming wire has no `[DONE]` sentinel and no `event:`
/// line, just bare `data:` frames of `GenerateContentResponse`.
pub fn transform_stream_chunk(event: SseEvent, state: &mut StreamState) -> Vec<SseEvent> {
    if event.data.trim() == "[DONE]" {
        return Vec::new();
    }

    let Ok(chunk) = serde_json::from_str::<openai::ChatCompletionChunk>(&event.data) else {
        tracing::warn!(event = "transform_stream_parse_error", pair = "geminicli<-openai_stream");
        return Vec::new();
    };
    state.model.get_or_insert_with(|| chunk.model.clone());

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Vec::new();
    };

    let mut parts = Vec::new();
    if let Some(text) = choice.delta.content {
        parts.push(gemini::Part::text(text));
    }
    for call in choice.delta.tool_calls.into_iter().flatten() {
        if let Some(name) = call.function.as_ref().and_then(|function| function.name.clone()) {
            parts.push(gemini::Part {
                function_call: Some(gemini::FunctionCall { name, args: serde_json::json!({}) }),
                ..Default::default()
            });
        }
    }

    if parts.is_empty() && choice.finish_reason.is_none() {
        return Vec::new();
    }

    let candidate = gemini::Candidate {
        content: gemini::Content { role: Some("model".to_string()), parts },
        finish_reason: choice.finish_reason.as_deref().map(map_gemini_finish_reason),
        index: 0,
    };

    let usage_metadata = chunk.usage.map(|usage| gemini::UsageMetadata {
        prompt_token_count: usage.prompt_tokens,
        candidates_token_count: usage.completion_tokens,
        cached_content_token_count: usage.prompt_tokens_details.map(|details| details.cached_tokens).unwrap_or(0),
        total_token_count: usage.total_tokens,
    });

    let response = gemini::GenerateContentResponse {
        candidates: vec![candidate],
        usage_metadata,
        model_version: state.model.clone(),
    };

    vec![SseEvent { event: None, data: serde_json::to_string(&response).unwrap_or_default() }]
}

fn map_gemini_finish_reason(reason: &str) -> String {
    match reason {
        "length" => "MAX_TOKENS".to_string(),
        "content_filter" => "SAFETY".to_string(),
        _ => "STOP".to_string(),
    }
}

#[cfg(test)]
mod stream_tests {
    use super::*;

    fn chunk(content: Option<&str>, finish_reason: Option<&str>) -> String {
        serde_json::to_string(&openai::ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            model: "gpt-x".to_string(),
            choices: vec![openai::ChunkChoice {
                index: 0,
                delta: openai::ChatMessageDelta { content: content.map(|text| text.to_string()), ..Default::default() },
                finish_reason: finish_reason.map(|reason| reason.to_string()),
            }],
            usage: None,
        })
        .unwrap()
    }

    #[test]
    fn text_delta_becomes_candidate_part() {
        let mut state = StreamState::default();
        let out = transform_stream_chunk(SseEvent { event: None, data: chunk(Some("hi"), None) }, &mut state);
        assert_eq!(out.len(), 1);
        assert!(out[0].event.is_none());
        assert!(out[0].data.contains("\"text\":\"hi\""));
    }

    #[test]
    fn done_sentinel_yields_nothing() {
        let mut state = StreamState::default();
        let out = transform_stream_chunk(SseEvent { event: None, data: "[DONE]".to_string() }, &mut state);
        assert!(out.is_empty());
    }

    #[test]
    fn finish_reason_maps_to_gemini_stop() {
        let mut state = StreamState::default();
        let out = transform_stream_chunk(SseEvent { event: None, data: chunk(None, Some("stop")) }, &mut state);
        assert!(out[0].data.contains("\"finishReason\":\"STOP\""));
    }
}
