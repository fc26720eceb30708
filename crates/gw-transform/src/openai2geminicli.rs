//! OpenAI chat-completions ↔ Gemini-CLI envelope, OpenAI → Gemini-CLI
//! direction. Inverse leg of [`crate::geminicli2openai`]; spec.md only
//! spells out contract details for the Gemini-CLI → OpenAI request, so
//! this leg follows the same field mapping in reverse.

use gw_protocol::gemini;
use gw_protocol::geminicli;
use gw_protocol::openai;
use gw_protocol::sse::SseEvent;
use serde_json::Value;

use crate::registry::{StreamState, TransformError};

pub fn transform_request(body: Value) -> Result<Value, TransformError> {
    let request: openai::ChatCompletionRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(event = "transform_parse_error", pair = "openai->geminicli", %error);
            return Ok(serde_json::json!({"model": "", "project": "", "request": {"contents": []}}));
        }
    };

    let mut system_instruction = None;
    let mut contents = Vec::new();

    for message in request.messages {
        if message.role == "system" || message.role == "developer" {
            if let Some(text) = content_to_text(&message.content) {
                system_instruction = Some(gemini::Content {
                    role: None,
                    parts: vec![gemini::Part::text(text)],
                });
            }
            continue;
        }

        if message.role == "tool" {
            contents.push(gemini::Content {
                role: Some("user".to_string()),
                parts: vec![gemini::Part {
                    function_response: Some(gemini::FunctionResponse {
                        name: message.name.clone().unwrap_or_default(),
                        response: serde_json::json!({
                            "result": content_to_text(&message.content).unwrap_or_default(),
                        }),
                    }),
                    ..Default::default()
                }],
            });
            continue;
        }

        let role = if message.role == "assistant" { "model" } else { "user" };
        let mut parts = Vec::new();
        if let Some(text) = content_to_text(&message.content) {
            if !text.is_empty() {
                parts.push(gemini::Part::text(text));
            }
        }
        if let Some(tool_calls) = message.tool_calls {
            for call in tool_calls {
                let args = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments));
                parts.push(gemini::Part {
                    function_call: Some(gemini::FunctionCall {
                        name: call.function.name,
                        args,
                    }),
                    ..Default::default()
                });
            }
        }
        if parts.is_empty() {
            continue;
        }
        contents.push(gemini::Content {
            role: Some(role.to_string()),
            parts,
        });
    }

    let tools = request.tools.map(|tools| {
        vec![gemini::Tool {
            function_declarations: tools
                .into_iter()
                .map(|tool| gemini::FunctionDeclaration {
                    name: tool.function.name,
                    description: tool.function.description,
                    parameters: Some(tool.function.parameters),
                })
                .collect(),
        }]
    });

    let generation_config = Some(gemini::GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        max_output_tokens: request.max_tokens,
        stop_sequences: None,
        thinking_config: None,
    });

    let out = geminicli::Envelope {
        model: request.model,
        project: String::new(),
        request: gemini::GenerateContentRequest {
            contents,
            system_instruction,
            tools,
            generation_config,
        },
    };

    Ok(serde_json::to_value(out)?)
}

fn content_to_text(content: &Option<openai::MessageContent>) -> Option<String> {
    match content {
        Some(openai::MessageContent::Text(text)) => Some(text.clone()),
        Some(openai::MessageContent::Parts(parts)) => Some(
            parts
                .iter()
                .filter_map(|part| match part {
                    openai::ContentPart::Text { text } => Some(text.clone()),
                    openai::ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        None => None,
    }
}

pub fn transform_response(body: Value) -> Result<Value, TransformError> {
    Ok(body)
}

/// Provider (Gemini) stream frame → client (OpenAI) chunk(s). Gemini's
/// frame carries the whole candidate each time rather than a delta
/// against the previous frame, so the only state worth keeping across
/// calls is the synthesized id/model and whether the role has gone out.
pub fn transform_stream_chunk(event: SseEvent, state: &mut StreamState) -> Vec<SseEvent> {
    let Ok(response) = serde_json::from_str::<gemini::GenerateContentResponse>(&event.data) else {
        tracing::warn!(event = "transform_stream_parse_error", pair = "openai<-geminicli_stream");
        return Vec::new();
    };

    if let Some(model_version) = &response.model_version {
        state.model.get_or_insert_with(|| model_version.clone());
    }
    let id = state.message_id.get_or_insert_with(|| "chatcmpl-geminicli".to_string()).clone();

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Vec::new();
    };

    let mut delta = openai::ChatMessageDelta::default();
    if !state.message_started {
        delta.role = Some("assistant".to_string());
        state.message_started = true;
    }

    let text = candidate.content.parts.iter().filter_map(|part| part.text.clone()).collect::<Vec<_>>().join("");
    if !text.is_empty() {
        delta.content = Some(text);
    }

    let tool_calls: Vec<_> = candidate
        .content
        .parts
        .iter()
        .filter_map(|part| part.function_call.as_ref())
        .enumerate()
        .map(|(index, call)| openai::ToolCallDelta {
            index: index as u32,
            id: Some(format!("call_{index}")),
            function: Some(openai::FunctionCallDelta {
                name: Some(call.name.clone()),
                arguments: Some(call.args.to_string()),
            }),
        })
        .collect();
    if !tool_calls.is_empty() {
        delta.tool_calls = Some(tool_calls);
    }

    let finish_reason = candidate.finish_reason.as_deref().map(map_openai_finish_reason);

    let chunk = openai::ChatCompletionChunk {
        id,
        model: state.model.clone().unwrap_or_default(),
        choices: vec![openai::ChunkChoice { index: 0, delta, finish_reason: finish_reason.clone() }],
        usage: response.usage_metadata.map(|usage| openai::Usage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
            prompt_tokens_details: Some(openai::PromptTokensDetails { cached_tokens: usage.cached_content_token_count }),
            completion_tokens_details: None,
        }),
    };

    let mut out = vec![SseEvent { event: None, data: serde_json::to_string(&chunk).unwrap_or_default() }];
    if finish_reason.is_some() {
        out.push(SseEvent { event: None, data: "[DONE]".to_string() });
    }
    out
}

fn map_openai_finish_reason(reason: &str) -> String {
    match reason {
        "MAX_TOKENS" => "length".to_string(),
        "SAFETY" | "RECITATION" => "content_filter".to_string(),
        _ => "stop".to_string(),
    }
}

#[cfg(test)]
mod stream_tests {
    use super::*;

    fn frame(text: &str, finish_reason: Option<&str>) -> String {
        serde_json::to_string(&gemini::GenerateContentResponse {
            candidates: vec![gemini::Candidate {
                content: gemini::Content { role: Some("model".to_string()), parts: vec![gemini::Part::text(text)] },
                finish_reason: finish_reason.map(|reason| reason.to_string()),
                index: 0,
            }],
            usage_metadata: None,
            model_version: Some("gemini-x".to_string()),
        })
        .unwrap()
    }

    #[test]
    fn first_frame_emits_role_and_content() {
        let mut state = StreamState::default();
        let out = transform_stream_chunk(SseEvent { event: None, data: frame("hi", None) }, &mut state);
        assert_eq!(out.len(), 1);
        assert!(out[0].data.contains("\"role\":\"assistant\""));
        assert!(out[0].data.contains("\"content\":\"hi\""));
    }

    #[test]
    fn finish_reason_emits_done_after_chunk() {
        let mut state = StreamState::default();
        let out = transform_stream_chunk(SseEvent { event: None, data: frame("bye", Some("STOP")) }, &mut state);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].data, "[DONE]");
    }
}
